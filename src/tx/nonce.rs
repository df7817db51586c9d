//! Nonce management for serialized transaction submission
//!
//! Handles:
//! - Local nonce tracking per (chain, account) to avoid collisions
//! - Serialization of allocate -> sign -> send for the same account
//! - Resynchronization with the node after a rejected nonce

use dashmap::DashMap;
use ethers::types::{Address, H256};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

/// Per-account nonce state
#[derive(Debug, Default)]
pub struct AccountNonceState {
    /// Next nonce to use; `None` until loaded from the node
    next: Option<u64>,
}

/// Manages nonces for every (chain, account) pair the process signs for
#[derive(Debug, Default)]
pub struct NonceManager {
    accounts: DashMap<(u64, Address), Arc<Mutex<AccountNonceState>>>,
}

impl NonceManager {
    /// Create a new nonce manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the nonce state of `address` on `chain_id`.
    ///
    /// The guard must be held across allocate, sign and send; a second
    /// submission from the same account waits here.
    pub async fn lock(&self, chain_id: u64, address: Address) -> NonceGuard {
        let state = self
            .accounts
            .entry((chain_id, address))
            .or_default()
            .value()
            .clone();

        NonceGuard {
            chain_id,
            address,
            state: state.lock_owned().await,
        }
    }
}

/// Exclusive access to one account's nonce sequence
pub struct NonceGuard {
    chain_id: u64,
    address: Address,
    state: OwnedMutexGuard<AccountNonceState>,
}

impl NonceGuard {
    /// Next nonce, if the sequence has been loaded
    pub fn next(&self) -> Option<u64> {
        self.state.next
    }

    /// Seed the sequence from the node's pending transaction count
    pub fn initialize(&mut self, on_chain: u64) -> u64 {
        let next = match self.state.next {
            Some(local) if local > on_chain => local,
            _ => on_chain,
        };
        self.state.next = Some(next);
        debug!(
            chain_id = self.chain_id,
            address = ?self.address,
            nonce = next,
            "Initialized nonce"
        );
        next
    }

    /// Record that `nonce` was accepted by the node
    pub fn mark_sent(&mut self, nonce: u64, tx_hash: H256) {
        debug!(
            chain_id = self.chain_id,
            address = ?self.address,
            nonce,
            tx_hash = ?tx_hash,
            "Nonce used"
        );
        self.state.next = Some(nonce + 1);
    }

    /// Forget the local sequence so the next submission reloads it
    pub fn reset(&mut self) {
        warn!(
            chain_id = self.chain_id,
            address = ?self.address,
            "Nonce sequence reset, will resync from node"
        );
        self.state.next = None;
    }
}
