//! External collaborator seams.
//!
//! The engine receives already-authenticated wallet addresses; these traits
//! cover the two facts it cannot answer itself: premium membership and
//! on-chain transfers.

use async_trait::async_trait;

use crate::errors::CoinvaultResult;

/// Premium membership lookup, backed by an upstream profile service
pub trait PremiumStatusProvider: Send + Sync {
    fn is_premium(&self, wallet_address: &str) -> CoinvaultResult<bool>;
}

/// On-chain transfer signer used for prize settlement and for reward kinds
/// the ledger cannot issue (NFT, crypto). Returns a transaction reference.
#[async_trait]
pub trait ChainSigner: Send + Sync {
    async fn transfer(&self, wallet_address: &str, amount: f64) -> CoinvaultResult<String>;
}
