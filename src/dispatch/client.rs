//! Chain access used by the dispatcher.

use super::TxIntent;
use alloy::primitives::{Address, Bytes, TxHash, U256};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("rpc error: {0}")]
    Rpc(String),
    #[error("gas estimation failed: {0}")]
    Estimation(String),
    #[error("signing failed: {0}")]
    Signing(String),
    #[error("broadcast failed: {0}")]
    Broadcast(String),
    #[error("no receipt after {0:?}")]
    ReceiptTimeout(Duration),
}

/// Inclusion record for a broadcast transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub tx_hash: TxHash,
    /// `true` for status 1.
    pub success: bool,
    pub block_number: Option<u64>,
    pub gas_used: u64,
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn get_balance(&self, address: Address) -> Result<U256, ChainError>;

    /// Next nonce for `address`, counting transactions still in the mempool.
    async fn get_transaction_count(&self, address: Address) -> Result<u64, ChainError>;

    async fn get_gas_price(&self) -> Result<u128, ChainError>;

    /// Simulate the intent and return its gas limit.
    async fn estimate_gas(&self, intent: &TxIntent) -> Result<u64, ChainError>;

    async fn send_raw(&self, signed: Bytes) -> Result<TxHash, ChainError>;

    /// Block until the transaction is included. Callers bound this with a
    /// timeout. Persistent node errors end the wait with `Err`.
    async fn wait_for_receipt(&self, tx_hash: TxHash) -> Result<Receipt, ChainError>;
}
