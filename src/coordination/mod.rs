//! Coordination - running operations and waiting on the chains
//!
//! The coordination layer:
//! 1. Polls chain state with bounded transport retries and a deadline
//! 2. Propagates per-operation cancellation into every wait
//! 3. Runs many operations concurrently and snapshots each change

pub mod engine;
pub mod poller;

pub use engine::BridgeEngine;
pub use poller::{CancelHandle, CancelSignal, RetryConfig, StatusPoller};
