//! Concurrent batch dispatch from a single account.
//!
//! A batch of N transactions gets N consecutive nonces starting at the
//! account's pending nonce. Nonces are all assigned up front, before any task
//! is spawned, so the concurrent tasks never share a counter. Each task then
//! estimates, signs, broadcasts and waits for its own receipt; the batch
//! returns once every task has a terminal outcome.
//!
//! Only one batch per `Dispatcher` is in flight at a time. Nothing stops a
//! second process from sending with the same key; that breaks the contiguous
//! nonce run and is the operator's responsibility.

pub mod client;
pub mod rpc;
pub mod signer;
pub mod types;

pub use client::{ChainClient, ChainError, Receipt};
pub use rpc::RpcChainClient;
pub use signer::{IntentSigner, LocalSigner};
pub use types::{BatchSummary, DispatchOutcome, DispatchStatus, TxIntent};

use crate::config::{ChainConfig, ConfigError, DispatcherConfig};
use alloy::primitives::utils::format_ether;
use alloy::primitives::{Address, Bytes, U256};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Batch-level failures: nothing was dispatched.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("batch size must be at least 1")]
    EmptyBatch,
    #[error("nonce query failed: {0}")]
    Nonce(ChainError),
    #[error("gas price query failed: {0}")]
    GasPrice(ChainError),
}

/// The fixed part of every transaction in a batch.
#[derive(Debug, Clone)]
pub struct TxTemplate {
    pub chain_id: u64,
    /// `None` sends to the signing account itself.
    pub recipient: Option<Address>,
    pub payload: Bytes,
    pub value: U256,
    pub gas_price_multiplier_pct: u64,
}

impl TxTemplate {
    pub fn from_config(config: &ChainConfig) -> Result<Self, ConfigError> {
        let recipient = if config.recipient.trim().is_empty() {
            None
        } else {
            Some(
                config
                    .recipient
                    .trim()
                    .parse::<Address>()
                    .map_err(|e| ConfigError::Invalid {
                        field: "chain.recipient",
                        reason: e.to_string(),
                    })?,
            )
        };

        let payload = if config.payload.trim().is_empty() {
            Bytes::new()
        } else {
            config
                .payload
                .trim()
                .parse::<Bytes>()
                .map_err(|e| ConfigError::Invalid {
                    field: "chain.payload",
                    reason: e.to_string(),
                })?
        };

        Ok(Self {
            chain_id: config.chain_id,
            recipient,
            payload,
            value: U256::from(config.value_wei),
            gas_price_multiplier_pct: config.gas_price_multiplier_pct,
        })
    }

    fn adjust_gas_price(&self, node_price: u128) -> u128 {
        node_price.saturating_mul(self.gas_price_multiplier_pct as u128) / 100
    }
}

/// How often the outer loop dispatches, and how it backs off.
#[derive(Debug, Clone)]
pub struct BatchCadence {
    pub batch_size: usize,
    pub interval: Duration,
    pub max_backoff: Duration,
    pub max_batches: Option<u64>,
}

impl BatchCadence {
    pub fn from_config(config: &DispatcherConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            interval: Duration::from_millis(config.batch_interval_ms),
            max_backoff: Duration::from_secs(config.max_backoff_secs),
            max_batches: config.max_batches,
        }
    }

    /// Pause before the next batch, doubling per consecutive failed batch.
    pub fn pause_after(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return self.interval;
        }
        let factor = 2u32.pow(consecutive_failures.min(6));
        self.interval
            .saturating_mul(factor)
            .min(self.max_backoff)
            .max(self.interval)
    }
}

pub struct Dispatcher {
    client: Arc<dyn ChainClient>,
    signer: Arc<dyn IntentSigner>,
    template: TxTemplate,
    receipt_timeout: Duration,
    batch_lock: Mutex<()>,
}

impl Dispatcher {
    pub fn new(
        client: Arc<dyn ChainClient>,
        signer: Arc<dyn IntentSigner>,
        template: TxTemplate,
        receipt_timeout: Duration,
    ) -> Self {
        Self {
            client,
            signer,
            template,
            receipt_timeout,
            batch_lock: Mutex::new(()),
        }
    }

    pub fn sender(&self) -> Address {
        self.signer.address()
    }

    /// Dispatch `count` transactions concurrently and return one outcome per
    /// nonce, ordered by nonce.
    ///
    /// Errors only when the batch cannot start (no base nonce or gas price).
    /// Every per-transaction failure is reported in its outcome instead.
    pub async fn dispatch_batch(
        &self,
        count: usize,
    ) -> Result<Vec<DispatchOutcome>, DispatchError> {
        if count == 0 {
            return Err(DispatchError::EmptyBatch);
        }

        let _guard = self.batch_lock.lock().await;
        let sender = self.sender();

        match self.client.get_balance(sender).await {
            Ok(balance) => info!(
                address = %sender,
                balance = %format_ether(balance),
                "account balance"
            ),
            Err(e) => warn!(address = %sender, error = %e, "balance query failed"),
        }

        let base_nonce = self
            .client
            .get_transaction_count(sender)
            .await
            .map_err(DispatchError::Nonce)?;
        let gas_price = self
            .client
            .get_gas_price()
            .await
            .map_err(DispatchError::GasPrice)?;
        let gas_price = self.template.adjust_gas_price(gas_price);

        let intents = self.build_intents(sender, base_nonce, count, gas_price);

        info!(
            base_nonce,
            count,
            gas_price,
            "dispatching batch"
        );

        let (nonces, handles): (Vec<u64>, Vec<_>) = intents
            .into_iter()
            .map(|intent| {
                let nonce = intent.nonce;
                let task = process_intent(
                    self.client.clone(),
                    self.signer.clone(),
                    intent,
                    self.receipt_timeout,
                );
                (nonce, tokio::spawn(task))
            })
            .unzip();

        let outcomes = join_all(handles)
            .await
            .into_iter()
            .zip(nonces)
            .map(|(joined, nonce)| match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(nonce, error = %e, "dispatch task aborted");
                    DispatchOutcome::failed(nonce, None, format!("task aborted: {e}"))
                }
            })
            .collect();

        Ok(outcomes)
    }

    /// Contiguous run `[base_nonce, base_nonce + count)`.
    fn build_intents(
        &self,
        sender: Address,
        base_nonce: u64,
        count: usize,
        gas_price: u128,
    ) -> Vec<TxIntent> {
        (0..count as u64)
            .map(|i| TxIntent {
                nonce: base_nonce + i,
                chain_id: self.template.chain_id,
                sender,
                recipient: self.template.recipient.unwrap_or(sender),
                payload: self.template.payload.clone(),
                gas_price,
                gas_limit: 0,
                value: self.template.value,
            })
            .collect()
    }

    /// Dispatch batches on `cadence` until `max_batches` is reached (or
    /// forever). Nonce and balance are re-read at the start of every batch.
    pub async fn run_batches(&self, cadence: &BatchCadence) {
        let mut batches: u64 = 0;
        let mut consecutive_failures: u32 = 0;

        loop {
            if cadence.max_batches.is_some_and(|max| batches >= max) {
                info!(batches, "batch limit reached, dispatcher stopping");
                return;
            }
            batches += 1;
            let healthy = match self.dispatch_batch(cadence.batch_size).await {
                Ok(outcomes) => {
                    let summary = BatchSummary::from(outcomes.as_slice());
                    info!(batch = batches, %summary, "batch complete");
                    !summary.all_failed()
                }
                Err(e) => {
                    error!(batch = batches, error = %e, "batch could not start");
                    false
                }
            };

            if cadence.max_batches.is_some_and(|max| batches >= max) {
                info!(batches, "batch limit reached, dispatcher stopping");
                return;
            }

            consecutive_failures = if healthy { 0 } else { consecutive_failures + 1 };
            let pause = cadence.pause_after(consecutive_failures);
            if consecutive_failures > 0 {
                warn!(
                    failures = consecutive_failures,
                    backoff_ms = pause.as_millis() as u64,
                    "backing off after failed batch"
                );
            }
            tokio::time::sleep(pause).await;
        }
    }
}

/// Estimate, sign, broadcast and await one intent. Never panics on chain
/// errors; every failure becomes the returned outcome.
async fn process_intent(
    client: Arc<dyn ChainClient>,
    signer: Arc<dyn IntentSigner>,
    intent: TxIntent,
    receipt_timeout: Duration,
) -> DispatchOutcome {
    let nonce = intent.nonce;

    let gas_limit = match client.estimate_gas(&intent).await {
        Ok(g) => g,
        Err(e) => {
            error!(nonce, error = %e, "gas estimation failed");
            return DispatchOutcome::failed(nonce, None, e.to_string());
        }
    };
    let intent = intent.with_gas_limit(gas_limit);

    let signed = match signer.sign(&intent) {
        Ok(b) => b,
        Err(e) => {
            error!(nonce, error = %e, "signing failed");
            return DispatchOutcome::failed(nonce, None, e.to_string());
        }
    };

    let tx_hash = match client.send_raw(signed).await {
        Ok(h) => h,
        Err(e) => {
            error!(nonce, error = %e, "broadcast failed");
            return DispatchOutcome::failed(nonce, None, e.to_string());
        }
    };
    info!(nonce, tx = %tx_hash, gas_limit, "broadcast");

    // Past this point the transaction is out; a timeout only stops waiting.
    match tokio::time::timeout(receipt_timeout, client.wait_for_receipt(tx_hash)).await {
        Ok(Ok(receipt)) if receipt.success => {
            info!(nonce, tx = %tx_hash, block = ?receipt.block_number, "mint success");
            DispatchOutcome::confirmed(nonce, tx_hash)
        }
        Ok(Ok(receipt)) => {
            warn!(nonce, tx = %tx_hash, block = ?receipt.block_number, "mint reverted");
            DispatchOutcome::reverted(nonce, tx_hash)
        }
        Ok(Err(e)) => {
            error!(nonce, tx = %tx_hash, error = %e, "receipt wait failed");
            DispatchOutcome::failed(nonce, Some(tx_hash), e.to_string())
        }
        Err(_) => {
            let e = ChainError::ReceiptTimeout(receipt_timeout);
            error!(nonce, tx = %tx_hash, error = %e, "receipt wait timed out");
            DispatchOutcome::failed(nonce, Some(tx_hash), e.to_string())
        }
    }
}
