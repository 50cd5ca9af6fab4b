//! Second-price auction economics
//!
//! - Winner, 2+ bids in the batch: runner-up price + 0.01 (absent price = 0.0)
//! - Winner, solo bid: its floor if positive, else 0.01
//! - Outbid losers: the winner's price
//! - Failed candidates: technical error, priced at the winner's bid (0.0
//!   when the round had no winner)

use crate::models::{Bid, SettlementOutcome, SettlementRecord, FLOOR_MINIMUM, MIN_BID_INCREMENT};

/// Minimum the winner needed to bid, evaluated over the full ranked batch
/// (not just the candidates that were attempted).
pub fn winner_min_to_win(ranked: &[Bid]) -> f64 {
    match ranked {
        [] => FLOOR_MINIMUM,
        [solo] => solo.floor_price().unwrap_or(FLOOR_MINIMUM),
        [_, runner_up, ..] => runner_up.price_or_zero() + MIN_BID_INCREMENT,
    }
}

/// What a loser would have needed to beat the winner
pub fn loser_min_to_win(winner: &Bid) -> f64 {
    winner.price_or_zero()
}

/// Build one record per ranked bid for a finished round.
///
/// Attempts are sequential, so every bid ranked above the winner was tried
/// and failed, and every bid below it was never tried. Without a winner all
/// bids were tried and failed.
pub fn settle_round(ranked: &[Bid], winner: Option<usize>) -> Vec<SettlementRecord> {
    let winner_bid = winner.and_then(|i| ranked.get(i));
    let technical_min = winner_bid.map(loser_min_to_win).unwrap_or(0.0);

    ranked
        .iter()
        .enumerate()
        .map(|(index, bid)| match (winner, winner_bid) {
            (Some(w), Some(_)) if index == w => {
                SettlementRecord::new(bid, SettlementOutcome::Won, winner_min_to_win(ranked))
            }
            (Some(w), Some(winning)) if index > w => SettlementRecord::new(
                bid,
                SettlementOutcome::LostToHigherBid,
                loser_min_to_win(winning),
            ),
            _ => SettlementRecord::new(bid, SettlementOutcome::TechnicalError, technical_min),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bid(rank: u32, price: Option<f64>) -> Bid {
        let b = Bid::new("auction-123", format!("bid-{}", rank), rank, "cloudx");
        match price {
            Some(p) => b.with_price(p),
            None => b,
        }
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_runner_up_plus_increment() {
        let ranked = vec![bid(1, Some(5.0)), bid(2, Some(4.5))];
        assert!(approx(winner_min_to_win(&ranked), 4.51));
    }

    #[test]
    fn test_runner_up_without_price() {
        let ranked = vec![bid(1, Some(5.0)), bid(2, None), bid(3, Some(3.0))];
        assert!(approx(winner_min_to_win(&ranked), 0.01));
    }

    #[test]
    fn test_solo_with_floor() {
        let ranked = vec![bid(1, Some(5.0)).with_floor(Some(2.0))];
        assert!(approx(winner_min_to_win(&ranked), 2.0));
    }

    #[test]
    fn test_solo_floor_absent_zero_or_negative() {
        for floor in [None, Some(0.0), Some(-1.0)] {
            let ranked = vec![bid(1, Some(5.0)).with_floor(floor)];
            assert!(approx(winner_min_to_win(&ranked), 0.01), "floor {:?}", floor);
        }
    }

    #[test]
    fn test_settle_round_classification() {
        let ranked = vec![bid(1, Some(6.0)), bid(2, Some(5.0)), bid(3, Some(4.5)), bid(4, None)];
        let records = settle_round(&ranked, Some(1));

        let outcomes: Vec<_> = records.iter().map(|r| r.outcome).collect();
        assert_eq!(
            outcomes,
            vec![
                SettlementOutcome::TechnicalError,
                SettlementOutcome::Won,
                SettlementOutcome::LostToHigherBid,
                SettlementOutcome::LostToHigherBid,
            ]
        );
        // runner-up of the ranked batch is rank 2 itself
        assert!(approx(records[1].auction_min_to_win, 5.01));
        assert!(approx(records[2].auction_min_to_win, 5.0));
        assert!(approx(records[3].auction_min_to_win, 5.0));
        assert!(approx(records[0].auction_min_to_win, 5.0));
    }

    #[test]
    fn test_settle_round_without_winner() {
        let ranked = vec![bid(1, Some(2.0)), bid(2, Some(1.0))];
        let records = settle_round(&ranked, None);
        assert!(records
            .iter()
            .all(|r| r.outcome == SettlementOutcome::TechnicalError && r.auction_min_to_win == 0.0));
        assert!(settle_round(&[], None).is_empty());
    }

    #[test]
    fn test_loser_pays_winner_price() {
        assert!(approx(loser_min_to_win(&bid(1, Some(5.0))), 5.0));
        assert!(approx(loser_min_to_win(&bid(1, None)), 0.0));
    }
}
