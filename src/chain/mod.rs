//! Chain module - uniform access to the L1 and L2 endpoints
//!
//! This module provides:
//! - The `ChainClient` read/send/wait interface shared by both chains
//! - The `ZkRpc` extensions only the L2 node exposes
//! - An ethers-backed HTTP client with multi-RPC failover
//! - The L1 confirmation and L2 phase finality models

pub mod account;
pub mod client;
pub mod finality;

pub use account::{Account, Credential};
pub use client::EvmChainClient;
pub use finality::{L2Phase, L2TxStatus};

use crate::error::ChainResult;

use async_trait::async_trait;
use ethers::types::{Address, Bytes, Log, H256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which side of the bridge an endpoint serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainRole {
    L1,
    L2,
}

impl fmt::Display for ChainRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainRole::L1 => f.write_str("L1"),
            ChainRole::L2 => f.write_str("L2"),
        }
    }
}

/// Immutable description of a chain endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainEndpoint {
    pub chain_id: u64,
    pub name: String,
    pub rpc_urls: Vec<String>,
    pub role: ChainRole,
}

/// Balance target: the chain's native coin or an ERC-20
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Asset {
    Native,
    Erc20(Address),
}

/// An unsigned contract call; the client signs and submits it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractCall {
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
    /// Explicit outer gas limit; estimated by the node when `None`
    pub gas_limit: Option<U256>,
    /// Legacy gas price to attach; priced by the sender when `None`
    pub gas_price: Option<U256>,
}

impl ContractCall {
    pub fn new(to: Address, data: Bytes) -> Self {
        Self {
            to,
            data,
            value: U256::zero(),
            gas_limit: None,
            gas_price: None,
        }
    }

    pub fn value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    pub fn gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = Some(U256::from(gas_limit));
        self
    }

    /// Attach exactly `gas_price`; calls whose cost depends on `tx.gasprice` need this
    pub fn gas_price(mut self, gas_price: U256) -> Self {
        self.gas_price = Some(gas_price);
        self
    }
}

/// Handle to a transaction accepted by a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxHandle {
    pub hash: H256,
    pub chain: ChainRole,
    pub nonce: u64,
}

/// Log emitted on L2 for an L2 -> L1 message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct L2ToL1Log {
    pub sender: Address,
    pub key: H256,
    pub value: H256,
}

/// Transaction receipt normalized across both chains
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: H256,
    pub block_number: Option<u64>,
    pub success: bool,
    pub gas_used: U256,
    pub effective_gas_price: U256,
    /// L2 only: batch the transaction was sealed into, once known
    pub l1_batch_number: Option<u64>,
    /// L2 only: index of the transaction inside its batch
    pub l1_batch_tx_index: Option<u64>,
    pub logs: Vec<Log>,
    pub l2_to_l1_logs: Vec<L2ToL1Log>,
}

impl TxReceipt {
    /// Native coin spent on gas
    pub fn fee_paid(&self) -> U256 {
        self.gas_used.saturating_mul(self.effective_gas_price)
    }
}

/// Result of the L2 transaction-details query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionDetails {
    pub status: L2TxStatus,
    pub is_l1_originated: bool,
    pub eth_commit_tx_hash: Option<H256>,
    pub eth_prove_tx_hash: Option<H256>,
    pub eth_execute_tx_hash: Option<H256>,
}

/// Inputs of the L1 finalization call for a withdrawal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeWithdrawalParams {
    pub l1_batch_number: u64,
    pub l2_message_index: u64,
    pub l2_tx_number_in_block: u16,
    pub message: Bytes,
    pub sender: Address,
    pub proof: Vec<H256>,
}

/// Default bridges reported by the L2 node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeAddresses {
    pub l1_erc20_default_bridge: Option<Address>,
    pub l2_erc20_default_bridge: Option<Address>,
}

/// Read/send/wait interface over a chain endpoint.
///
/// Implementations never retry. Every failure is reported as transient or
/// permanent so the caller can decide. `wait` has no timeout of its own.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainClient: Send + Sync {
    fn endpoint(&self) -> &ChainEndpoint;

    /// Sign `call` with `from` and send it
    async fn submit(&self, from: &Account, call: ContractCall) -> ChainResult<TxHandle>;

    /// Block until the transaction is included with `confirmations` blocks on top
    async fn wait(&self, tx: &TxHandle, confirmations: u64) -> ChainResult<TxReceipt>;

    /// Receipt if the transaction is included, `None` while pending
    async fn get_receipt(&self, hash: H256) -> ChainResult<Option<TxReceipt>>;

    async fn get_balance(&self, owner: Address, asset: Asset) -> ChainResult<U256>;

    /// Execute a read-only call against the latest block
    async fn call(&self, call: &ContractCall) -> ChainResult<Bytes>;

    /// Legacy gas price this client attaches to outgoing transactions
    async fn gas_price(&self) -> ChainResult<U256>;
}

/// L2-only RPC extensions (`zks_*` namespace and system contracts)
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ZkRpc: Send + Sync {
    async fn transaction_details(&self, hash: H256) -> ChainResult<Option<TransactionDetails>>;

    /// L2 address of a bridged L1 token; zero when it was never bridged
    async fn l2_token_address(&self, l1_token: Address) -> ChainResult<Address>;

    /// L2 transaction created by the priority operation in `l1_receipt`,
    /// `None` while the relay has not made it visible yet
    async fn l2_transaction_from_priority_op(
        &self,
        l1_receipt: &TxReceipt,
    ) -> ChainResult<Option<H256>>;

    /// Merkle proof parameters for the `index`-th withdrawal in a transaction,
    /// `None` while the proof is not available
    async fn finalize_withdrawal_params(
        &self,
        l2_tx_hash: H256,
        index: usize,
    ) -> ChainResult<Option<FinalizeWithdrawalParams>>;

    async fn bridge_contracts(&self) -> ChainResult<BridgeAddresses>;
}
