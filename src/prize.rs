//! Proportional prize distribution for competitive events.
//!
//! Pure calculation, no side effects: re-runnable with the same inputs. The
//! `prize_amount` values are authoritative and their sum never exceeds the
//! pool; the basis-point shares are informational and are not re-scaled.

use crate::types::{PrizeContribution, PrizeResult};

/// Split `prize_pool` across participants in proportion to coins burned.
///
/// Shares are floored basis points of the raw ratio; amounts keep full
/// precision. Floating accumulation can push the amount sum past the pool,
/// in which case every amount is scaled down by `pool / sum`.
pub fn distribute(participants: &[PrizeContribution], prize_pool: f64) -> Vec<PrizeResult> {
    let total: i64 = participants.iter().map(|p| p.coins_burned.max(0)).sum();
    if total <= 0 {
        return participants
            .iter()
            .map(|p| PrizeResult {
                wallet_address: p.wallet_address.clone(),
                prize_share_bps: 0,
                prize_amount: 0.0,
            })
            .collect();
    }

    let mut results: Vec<PrizeResult> = participants
        .iter()
        .map(|p| {
            let ratio = p.coins_burned.max(0) as f64 / total as f64;
            PrizeResult {
                wallet_address: p.wallet_address.clone(),
                prize_share_bps: (ratio * 10_000.0).floor() as u32,
                prize_amount: prize_pool * ratio,
            }
        })
        .collect();

    let distributed: f64 = results.iter().map(|r| r.prize_amount).sum();
    if distributed > prize_pool && distributed > 0.0 {
        let scale = prize_pool / distributed;
        for result in &mut results {
            result.prize_amount *= scale;
        }
        tracing::debug!(scale, "scaled prize amounts to honor the pool bound");
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;

    fn burn(wallet: &str, coins: i64) -> PrizeContribution {
        PrizeContribution {
            wallet_address: wallet.to_string(),
            coins_burned: coins,
        }
    }

    #[test]
    fn test_proportional_split() {
        let results = distribute(&[burn("a", 10), burn("b", 20), burn("c", 30)], 100.0);

        assert!((results[0].prize_amount - 16.67).abs() < 0.01);
        assert!((results[1].prize_amount - 33.33).abs() < 0.01);
        assert!((results[2].prize_amount - 50.0).abs() < 0.01);

        assert_eq!(results[0].prize_share_bps, 1666);
        assert_eq!(results[1].prize_share_bps, 3333);
        assert_eq!(results[2].prize_share_bps, 5000);

        let sum: f64 = results.iter().map(|r| r.prize_amount).sum();
        assert!(sum <= 100.0 + 1e-9);
    }

    #[test]
    fn test_zero_total_burn_pays_nothing() {
        let results = distribute(&[burn("a", 0), burn("b", 0)], 500.0);
        for result in results {
            assert_eq!(result.prize_share_bps, 0);
            assert_eq!(result.prize_amount, 0.0);
        }
    }

    #[test]
    fn test_equal_burns_pay_equally() {
        let results = distribute(&[burn("a", 7), burn("b", 7), burn("c", 7)], 100.0);
        for pair in results.windows(2) {
            assert!((pair[0].prize_amount - pair[1].prize_amount).abs() < 1e-9);
        }
    }

    #[test]
    fn test_sum_never_exceeds_pool() {
        // awkward ratios that accumulate rounding error
        let participants: Vec<PrizeContribution> =
            (1..=13).map(|i| burn(&format!("w{i}"), i * 3 + 1)).collect();
        for pool in [1.0, 99.99, 1234.5678] {
            let results = distribute(&participants, pool);
            let sum: f64 = results.iter().map(|r| r.prize_amount).sum();
            assert!(sum <= pool + 1e-9, "sum {sum} exceeded pool {pool}");
        }
    }

    #[test]
    fn test_single_participant_takes_pool() {
        let results = distribute(&[burn("only", 5)], 250.0);
        assert_eq!(results[0].prize_share_bps, 10_000);
        assert!((results[0].prize_amount - 250.0).abs() < 1e-9);
    }

    #[test]
    fn test_rerun_is_deterministic() {
        let participants = [burn("a", 11), burn("b", 29)];
        assert_eq!(distribute(&participants, 77.7), distribute(&participants, 77.7));
    }
}
