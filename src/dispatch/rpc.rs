//! [`ChainClient`] over a JSON-RPC HTTP endpoint.

use super::{ChainClient, ChainError, Receipt, TxIntent};
use alloy::network::{ReceiptResponse, TransactionBuilder};
use alloy::primitives::{Address, Bytes, TxHash, U256};
use alloy::providers::{Provider, RootProvider};
use alloy::rpc::types::TransactionRequest;
use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

/// Consecutive failed receipt lookups before the wait gives up with the
/// node's error.
const MAX_RECEIPT_ERRORS: u32 = 5;

pub struct RpcChainClient {
    provider: RootProvider,
    receipt_poll_interval: Duration,
}

impl RpcChainClient {
    pub fn new_http(url: &str, receipt_poll_interval: Duration) -> Result<Self, ChainError> {
        let url = url
            .parse::<reqwest::Url>()
            .map_err(|e| ChainError::Rpc(format!("invalid rpc url {url}: {e}")))?;
        Ok(Self {
            provider: RootProvider::new_http(url),
            receipt_poll_interval,
        })
    }

    /// `eth_chainId` of the connected node.
    pub async fn chain_id(&self) -> Result<u64, ChainError> {
        self.provider.get_chain_id().await.map_err(rpc_err)
    }
}

fn rpc_err(e: impl std::fmt::Display) -> ChainError {
    ChainError::Rpc(e.to_string())
}

/// Simulation request for an intent. The gas field is left for the node.
fn to_request(intent: &TxIntent) -> TransactionRequest {
    TransactionRequest::default()
        .with_from(intent.sender)
        .with_to(intent.recipient)
        .with_nonce(intent.nonce)
        .with_chain_id(intent.chain_id)
        .with_gas_price(intent.gas_price)
        .with_value(intent.value)
        .with_input(intent.payload.clone())
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn get_balance(&self, address: Address) -> Result<U256, ChainError> {
        self.provider.get_balance(address).await.map_err(rpc_err)
    }

    async fn get_transaction_count(&self, address: Address) -> Result<u64, ChainError> {
        // Pending, so transactions still in the mempool from an earlier
        // batch keep their nonces.
        self.provider
            .get_transaction_count(address)
            .pending()
            .await
            .map_err(rpc_err)
    }

    async fn get_gas_price(&self) -> Result<u128, ChainError> {
        self.provider.get_gas_price().await.map_err(rpc_err)
    }

    async fn estimate_gas(&self, intent: &TxIntent) -> Result<u64, ChainError> {
        self.provider
            .estimate_gas(to_request(intent))
            .await
            .map_err(|e| ChainError::Estimation(e.to_string()))
    }

    async fn send_raw(&self, signed: Bytes) -> Result<TxHash, ChainError> {
        let pending = self
            .provider
            .send_raw_transaction(&signed)
            .await
            .map_err(|e| ChainError::Broadcast(e.to_string()))?;
        Ok(*pending.tx_hash())
    }

    async fn wait_for_receipt(&self, tx_hash: TxHash) -> Result<Receipt, ChainError> {
        let mut consecutive_errors: u32 = 0;
        loop {
            match self.provider.get_transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => {
                    return Ok(Receipt {
                        tx_hash,
                        success: receipt.status(),
                        block_number: receipt.block_number(),
                        gas_used: receipt.gas_used(),
                    });
                }
                Ok(None) => consecutive_errors = 0,
                Err(e) => {
                    consecutive_errors += 1;
                    warn!(
                        tx = %tx_hash,
                        attempt = consecutive_errors,
                        error = %e,
                        "receipt poll failed"
                    );
                    if consecutive_errors >= MAX_RECEIPT_ERRORS {
                        return Err(rpc_err(e));
                    }
                }
            }
            tokio::time::sleep(self.receipt_poll_interval).await;
        }
    }
}
