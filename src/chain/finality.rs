//! Finality models of the two chains
//!
//! - L1: classical block confirmations, a receipt is final once enough blocks
//!   are built on top of it
//! - L2: a transaction moves through phases. It is included in an L2 block,
//!   its batch is committed to L1, the batch is proven, and finally executed.
//!   Withdrawals can only be finalized on L1 after the batch is verified.

use super::TransactionDetails;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status string returned by `zks_getTransactionDetails`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum L2TxStatus {
    Pending,
    Included,
    Verified,
    Failed,
}

/// Finer-grained L2 lifecycle derived from the status and the L1 hashes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum L2Phase {
    Pending,
    Included,
    Committed,
    Proven,
    Executed,
    Failed,
}

impl L2Phase {
    pub fn from_details(details: &TransactionDetails) -> Self {
        match details.status {
            L2TxStatus::Failed => L2Phase::Failed,
            L2TxStatus::Pending => L2Phase::Pending,
            L2TxStatus::Verified => L2Phase::Executed,
            L2TxStatus::Included => {
                if details.eth_execute_tx_hash.is_some() {
                    L2Phase::Executed
                } else if details.eth_prove_tx_hash.is_some() {
                    L2Phase::Proven
                } else if details.eth_commit_tx_hash.is_some() {
                    L2Phase::Committed
                } else {
                    L2Phase::Included
                }
            }
        }
    }

    /// Whether a withdrawal in this phase can be finalized on L1
    pub fn allows_finalization(&self) -> bool {
        matches!(self, L2Phase::Executed)
    }
}

impl fmt::Display for L2Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            L2Phase::Pending => "pending",
            L2Phase::Included => "included",
            L2Phase::Committed => "committed",
            L2Phase::Proven => "proven",
            L2Phase::Executed => "executed",
            L2Phase::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Number of confirmations a transaction included at `tx_block` has
pub fn confirmations(current_block: u64, tx_block: u64) -> u64 {
    if current_block < tx_block {
        return 0;
    }
    current_block - tx_block + 1
}
