//! zkbridge - L1 <-> L2 bridge orchestration for zkSync-stack chains
//!
//! Deposits move funds from L1 into an L2 (including chains whose gas token
//! is an L1 ERC-20, such as Cronos zkEVM). Withdrawals burn on L2, wait for
//! the batch to be proven, and finalize on L1.

pub mod api;
pub mod bridge;
pub mod chain;
pub mod config;
pub mod contracts;
pub mod coordination;
pub mod error;
pub mod events;
pub mod metrics;
pub mod state;
pub mod tx;

#[cfg(test)]
mod testing;
