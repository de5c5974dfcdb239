//! Tournament settlement: prize calculation plus on-chain payout through
//! the external signer.
//!
//! The engine computes payouts and asks the signer for one transfer per
//! non-zero prize. It persists nothing and knows nothing about chain state,
//! so re-running with the same inputs is safe. Failed transfers are recorded
//! per participant and do not abort the remaining payouts; callers resubmit,
//! nothing is retried here.

use crate::{
    config::SettlementConfig,
    errors::{CoinvaultResult, SettlementError},
    prize,
    traits::ChainSigner,
    types::{PrizeContribution, SettlementRecord},
};

/// Settle a competitive event: distribute `prize_pool` proportionally to
/// coins burned and transfer each payout on-chain.
pub async fn settle_tournament(
    participants: &[PrizeContribution],
    prize_pool: f64,
    config: &SettlementConfig,
    signer: &dyn ChainSigner,
) -> CoinvaultResult<Vec<SettlementRecord>> {
    if config.signer_key.is_none() {
        return Err(SettlementError::SignerNotConfigured.into());
    }

    let prizes = prize::distribute(participants, prize_pool);
    let mut records = Vec::with_capacity(prizes.len());

    for prize in prizes {
        if prize.prize_amount <= 0.0 {
            records.push(SettlementRecord {
                wallet_address: prize.wallet_address,
                prize_share_bps: prize.prize_share_bps,
                prize_amount: prize.prize_amount,
                tx_reference: None,
                error: None,
            });
            continue;
        }

        match signer.transfer(&prize.wallet_address, prize.prize_amount).await {
            Ok(tx_reference) => {
                tracing::info!(
                    wallet = %prize.wallet_address,
                    amount = prize.prize_amount,
                    tx = %tx_reference,
                    "prize transfer submitted"
                );
                records.push(SettlementRecord {
                    wallet_address: prize.wallet_address,
                    prize_share_bps: prize.prize_share_bps,
                    prize_amount: prize.prize_amount,
                    tx_reference: Some(tx_reference),
                    error: None,
                });
            }
            Err(e) => {
                tracing::error!(
                    wallet = %prize.wallet_address,
                    amount = prize.prize_amount,
                    error = %e,
                    "prize transfer failed"
                );
                records.push(SettlementRecord {
                    wallet_address: prize.wallet_address,
                    prize_share_bps: prize.prize_share_bps,
                    prize_amount: prize.prize_amount,
                    tx_reference: None,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::CoinvaultError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct RecordingSigner {
        calls: AtomicU32,
        fail_wallet: Option<String>,
    }

    #[async_trait]
    impl ChainSigner for RecordingSigner {
        async fn transfer(&self, wallet_address: &str, _amount: f64) -> CoinvaultResult<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_wallet.as_deref() == Some(wallet_address) {
                return Err(SettlementError::TransferFailed {
                    wallet: wallet_address.to_string(),
                    reason: "rpc timeout".to_string(),
                }
                .into());
            }
            Ok(format!("tx-{n}"))
        }
    }

    fn burn(wallet: &str, coins: i64) -> PrizeContribution {
        PrizeContribution {
            wallet_address: wallet.to_string(),
            coins_burned: coins,
        }
    }

    fn configured() -> SettlementConfig {
        SettlementConfig {
            signer_key: Some("kp-test".to_string()),
        }
    }

    #[tokio::test]
    async fn test_refuses_without_signer_key() {
        let signer = RecordingSigner {
            calls: AtomicU32::new(0),
            fail_wallet: None,
        };
        let err = settle_tournament(&[burn("a", 10)], 100.0, &SettlementConfig::default(), &signer)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CoinvaultError::Settlement(SettlementError::SignerNotConfigured)
        ));
        assert_eq!(signer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_transfers_each_nonzero_payout() {
        let signer = RecordingSigner {
            calls: AtomicU32::new(0),
            fail_wallet: None,
        };
        let records = settle_tournament(
            &[burn("a", 10), burn("b", 30), burn("zero", 0)],
            100.0,
            &configured(),
            &signer,
        )
        .await
        .unwrap();

        assert_eq!(records.len(), 3);
        assert!(records[0].tx_reference.is_some());
        assert!(records[1].tx_reference.is_some());
        assert!(records[2].tx_reference.is_none());
        assert_eq!(records[2].prize_amount, 0.0);
        assert_eq!(signer.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_one_failed_transfer_does_not_abort_the_rest() {
        let signer = RecordingSigner {
            calls: AtomicU32::new(0),
            fail_wallet: Some("b".to_string()),
        };
        let records = settle_tournament(
            &[burn("a", 10), burn("b", 10), burn("c", 10)],
            90.0,
            &configured(),
            &signer,
        )
        .await
        .unwrap();

        assert!(records[0].tx_reference.is_some());
        assert!(records[1].tx_reference.is_none());
        assert!(records[1].error.as_deref().unwrap().contains("rpc timeout"));
        assert!(records[2].tx_reference.is_some());
    }
}
