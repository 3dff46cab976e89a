//! Transaction intents and their per-nonce outcomes.

use alloy::primitives::{Address, Bytes, TxHash, U256};

/// One transaction slot in a batch. Built with its nonce already assigned;
/// only the gas limit is filled in later, by estimation.
#[derive(Debug, Clone, PartialEq)]
pub struct TxIntent {
    pub nonce: u64,
    pub chain_id: u64,
    pub sender: Address,
    pub recipient: Address,
    pub payload: Bytes,
    pub gas_price: u128,
    /// Zero until estimated.
    pub gas_limit: u64,
    pub value: U256,
}

impl TxIntent {
    pub fn with_gas_limit(self, gas_limit: u64) -> Self {
        Self { gas_limit, ..self }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStatus {
    Pending,
    /// Included with a success receipt.
    Confirmed,
    /// Included, but execution failed on-chain.
    Reverted,
    /// Never reliably made it on-chain: estimation, signing, broadcast or
    /// the receipt wait failed.
    Failed,
}

impl DispatchStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, DispatchStatus::Pending)
    }
}

impl std::fmt::Display for DispatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Confirmed => "CONFIRMED",
            Self::Reverted => "REVERTED",
            Self::Failed => "FAILED",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    pub nonce: u64,
    /// Set once the broadcast returned a hash.
    pub tx_hash: Option<TxHash>,
    pub status: DispatchStatus,
    pub error: Option<String>,
}

impl DispatchOutcome {
    pub fn confirmed(nonce: u64, tx_hash: TxHash) -> Self {
        Self {
            nonce,
            tx_hash: Some(tx_hash),
            status: DispatchStatus::Confirmed,
            error: None,
        }
    }

    pub fn reverted(nonce: u64, tx_hash: TxHash) -> Self {
        Self {
            nonce,
            tx_hash: Some(tx_hash),
            status: DispatchStatus::Reverted,
            error: None,
        }
    }

    pub fn failed(nonce: u64, tx_hash: Option<TxHash>, error: impl Into<String>) -> Self {
        Self {
            nonce,
            tx_hash,
            status: DispatchStatus::Failed,
            error: Some(error.into()),
        }
    }
}

/// Per-status counts for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub confirmed: usize,
    pub reverted: usize,
    pub failed: usize,
}

impl BatchSummary {
    pub fn total(&self) -> usize {
        self.confirmed + self.reverted + self.failed
    }

    /// True when nothing in the batch reached the chain.
    pub fn all_failed(&self) -> bool {
        self.total() > 0 && self.failed == self.total()
    }
}

impl From<&[DispatchOutcome]> for BatchSummary {
    fn from(outcomes: &[DispatchOutcome]) -> Self {
        let mut summary = BatchSummary::default();
        for o in outcomes {
            match o.status {
                DispatchStatus::Confirmed => summary.confirmed += 1,
                DispatchStatus::Reverted => summary.reverted += 1,
                DispatchStatus::Failed => summary.failed += 1,
                DispatchStatus::Pending => {}
            }
        }
        summary
    }
}

impl std::fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} confirmed / {} reverted / {} failed",
            self.confirmed, self.reverted, self.failed
        )
    }
}
