//! Bridge module - deposit and withdrawal lifecycles
//!
//! This module provides:
//! - The `BridgeOperation` entity and its two state machines
//! - Allowance management and fee estimation used before funds move
//! - The deposit (L1 -> L2) and withdrawal (L2 -> L1) orchestrators
//! - Balance snapshots and L2 transaction status inspection

pub mod allowance;
pub mod balances;
pub mod deposit;
pub mod fee;
pub mod operation;
pub mod status;
pub mod tokens;
pub mod withdrawal;

pub use allowance::AllowanceManager;
pub use balances::BalanceReport;
pub use deposit::DepositOrchestrator;
pub use fee::{FeeEstimator, FeeQuote};
pub use operation::{
    BridgeOperation, BridgedToken, OperationKind, OperationResult, OperationState, TokenPair,
};
pub use status::L2TransactionStatus;
pub use tokens::TokenRegistry;
pub use withdrawal::WithdrawalOrchestrator;

use crate::chain::{Asset, ChainClient, ZkRpc};
use crate::config::{BaseToken, BridgeConfig, ContractsConfig, PollerConfig};
use crate::coordination::{CancelSignal, RetryConfig, StatusPoller};
use crate::error::{BridgeError, BridgeResult};

use ethers::types::Address;
use std::sync::Arc;
use tokio::time::Instant;

/// Collaborators shared by every operation of one bridge deployment
#[derive(Clone)]
pub struct BridgeContext {
    pub l1: Arc<dyn ChainClient>,
    pub l2: Arc<dyn ChainClient>,
    pub zk: Arc<dyn ZkRpc>,
    pub contracts: ContractsConfig,
    pub bridge: BridgeConfig,
    pub poller: PollerConfig,
    pub tokens: Arc<TokenRegistry>,
}

impl BridgeContext {
    pub fn status_poller(&self, cancel: CancelSignal) -> StatusPoller {
        StatusPoller::new(RetryConfig::from(&self.poller), cancel)
    }

    pub fn allowance_manager(&self) -> AllowanceManager {
        AllowanceManager::new(
            self.bridge.approval_policy,
            self.bridge.l1_confirmations,
            self.bridge.approval_timeout(),
        )
    }

    pub fn fee_estimator(&self) -> FeeEstimator {
        FeeEstimator::new(
            self.contracts.diamond_proxy,
            self.bridge.fee_multiplier_percent,
        )
    }

    /// L1 asset holding the funds of a deposit
    pub fn l1_asset(&self, token: &BridgedToken) -> Asset {
        match (token, self.contracts.base_token) {
            (BridgedToken::Erc20(pair), _) => Asset::Erc20(pair.l1_address),
            (BridgedToken::Base, BaseToken::Eth) => Asset::Native,
            (BridgedToken::Base, BaseToken::Erc20(gas_token)) => Asset::Erc20(gas_token),
        }
    }

    /// L2 ERC-20 bridge, from configuration or the node
    pub async fn l2_erc20_bridge(&self, poller: &StatusPoller) -> BridgeResult<Address> {
        if let Some(bridge) = self.contracts.l2_erc20_bridge {
            return Ok(bridge);
        }
        poller
            .read("bridge contracts", || self.zk.bridge_contracts())
            .await?
            .l2_erc20_default_bridge
            .ok_or_else(|| BridgeError::Config("L2 node reports no ERC-20 bridge".to_string()))
    }
}

/// Receives every change of an operation, e.g. to snapshot it
pub trait OperationObserver: Send + Sync {
    fn on_change(&self, op: &BridgeOperation);
}

/// Observer that ignores changes
pub struct NoopObserver;

impl OperationObserver for NoopObserver {
    fn on_change(&self, _op: &BridgeOperation) {}
}

/// Per-operation cancellation, deadline and change observer
#[derive(Clone)]
pub struct OperationControl {
    pub cancel: CancelSignal,
    /// Bound on every polling wait; `None` waits as long as the chains need
    pub deadline: Option<Instant>,
    pub observer: Arc<dyn OperationObserver>,
}

impl OperationControl {
    pub fn new(cancel: CancelSignal) -> Self {
        Self {
            cancel,
            deadline: None,
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn OperationObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Move `op` to `state` and publish the change
    pub(crate) fn advance(&self, op: &mut BridgeOperation, state: OperationState) -> BridgeResult<()> {
        op.reach(state)?;
        self.observer.on_change(op);
        Ok(())
    }

    /// Fail fast before anything irreversible is sent
    pub(crate) fn check_cancelled(&self) -> BridgeResult<()> {
        if self.cancel.is_cancelled() {
            return Err(BridgeError::Cancelled);
        }
        Ok(())
    }
}
