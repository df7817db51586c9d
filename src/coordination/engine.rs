//! Engine running bridge operations concurrently

use super::poller::{CancelHandle, CancelSignal};
use crate::bridge::{
    BridgeContext, BridgeOperation, BridgedToken, DepositOrchestrator, OperationControl,
    OperationKind, OperationObserver, OperationResult, WithdrawalOrchestrator,
};
use crate::chain::Credential;
use crate::config::{OperationRequest, RequestKind};
use crate::error::{BridgeError, BridgeResult};
use crate::state::OperationStore;

use dashmap::DashMap;
use ethers::types::{Address, U256};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Finished results kept for status queries
const DEFAULT_RESULT_CAPACITY: usize = 1024;

/// Keeps the registry and the snapshot store in step with every change
struct SnapshotObserver {
    registry: Arc<DashMap<Uuid, BridgeOperation>>,
    store: Arc<OperationStore>,
}

impl OperationObserver for SnapshotObserver {
    fn on_change(&self, op: &BridgeOperation) {
        self.registry.insert(op.id, op.clone());
        if let Err(e) = self.store.save(op) {
            warn!(operation_id = %op.id, error = %e, "Failed to snapshot operation");
        }
    }
}

/// Bridge engine
///
/// Each operation runs on its own tokio task with its own cancellation
/// handle. In-flight operations are visible through [`BridgeEngine::get`];
/// terminal ones are dropped from the registry and only their
/// [`OperationResult`] is kept, for the most recent `result_capacity` of them.
pub struct BridgeEngine {
    ctx: BridgeContext,
    credential: Credential,
    store: Arc<OperationStore>,
    registry: Arc<DashMap<Uuid, BridgeOperation>>,
    results: DashMap<Uuid, OperationResult>,
    /// Finish order of `results`, oldest first
    finished: Mutex<VecDeque<Uuid>>,
    result_capacity: usize,
    cancels: DashMap<Uuid, CancelHandle>,
    observer: Arc<dyn OperationObserver>,
    deposits: DepositOrchestrator,
    withdrawals: WithdrawalOrchestrator,
    /// Bound on each run of an operation; `None` waits for the chains
    run_timeout: Option<Duration>,
}

impl BridgeEngine {
    pub fn new(ctx: BridgeContext, credential: Credential, store: Arc<OperationStore>) -> Self {
        let registry = Arc::new(DashMap::new());
        let observer = Arc::new(SnapshotObserver {
            registry: registry.clone(),
            store: store.clone(),
        });

        Self {
            deposits: DepositOrchestrator::new(ctx.clone()),
            withdrawals: WithdrawalOrchestrator::new(ctx.clone()),
            ctx,
            credential,
            store,
            registry,
            results: DashMap::new(),
            finished: Mutex::new(VecDeque::new()),
            result_capacity: DEFAULT_RESULT_CAPACITY,
            cancels: DashMap::new(),
            observer,
            run_timeout: None,
        }
    }

    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = Some(timeout);
        self
    }

    pub fn with_result_capacity(mut self, capacity: usize) -> Self {
        self.result_capacity = capacity.max(1);
        self
    }

    pub fn context(&self) -> &BridgeContext {
        &self.ctx
    }

    /// Signer address, the same on both chains
    pub fn owner(&self) -> Address {
        self.credential.address()
    }

    /// Build the operation a configured request describes
    pub fn plan(&self, request: &OperationRequest) -> BridgeResult<BridgeOperation> {
        let token = if request.token.eq_ignore_ascii_case("base") {
            BridgedToken::Base
        } else {
            let pair = self.ctx.tokens.get(&request.token).ok_or_else(|| {
                BridgeError::InvalidOperation(format!("unknown token {}", request.token))
            })?;
            BridgedToken::Erc20(pair)
        };
        let amount = U256::from_dec_str(&request.amount).map_err(|e| {
            BridgeError::InvalidOperation(format!("invalid amount {:?}: {}", request.amount, e))
        })?;

        let owner = self.credential.address();
        match request.kind {
            RequestKind::Deposit => BridgeOperation::new(
                OperationKind::Deposit,
                token,
                amount,
                owner,
                request.recipient.unwrap_or(owner),
            ),
            RequestKind::Withdrawal => BridgeOperation::new(
                OperationKind::Withdrawal,
                token,
                amount,
                owner,
                request.recipient.unwrap_or(owner),
            ),
            RequestKind::Finalize => {
                let hash = request.l2_tx_hash.ok_or_else(|| {
                    BridgeError::InvalidOperation("finalize request without l2_tx_hash".to_string())
                })?;
                BridgeOperation::from_l2_withdrawal(token, amount, owner, hash)
            }
        }
    }

    /// Register `op` and start driving it
    pub fn submit(self: &Arc<Self>, op: BridgeOperation) -> JoinHandle<OperationResult> {
        let cancel = CancelHandle::new();
        let signal = cancel.signal();
        self.cancels.insert(op.id, cancel);
        self.observer.on_change(&op);

        info!(
            operation_id = %op.id,
            kind = %op.kind,
            token = %op.token.symbol(),
            amount = %op.amount(),
            state = %op.state(),
            "Operation submitted"
        );

        let engine = self.clone();
        tokio::spawn(async move { engine.run(op, signal).await })
    }

    /// Restart every operation the store still holds
    pub fn resume(self: &Arc<Self>) -> BridgeResult<Vec<JoinHandle<OperationResult>>> {
        let pending = self.store.load()?;
        if !pending.is_empty() {
            info!(count = pending.len(), "Resuming operations");
        }
        Ok(pending.into_iter().map(|op| self.submit(op)).collect())
    }

    async fn run(&self, mut op: BridgeOperation, cancel: CancelSignal) -> OperationResult {
        let mut ctl = OperationControl::new(cancel).with_observer(self.observer.clone());
        if let Some(timeout) = self.run_timeout {
            ctl = ctl.with_deadline(Instant::now() + timeout);
        }

        let started = Instant::now();
        crate::metrics::record_operation_started(op.kind);

        let outcome = match op.kind {
            OperationKind::Deposit => self.deposits.drive(&mut op, &self.credential, &ctl).await,
            OperationKind::Withdrawal => {
                self.withdrawals
                    .drive(&mut op, &self.credential, &ctl)
                    .await
            }
        };
        let elapsed = started.elapsed().as_secs_f64();

        match &outcome {
            Ok(()) => {
                crate::metrics::record_operation_completed(op.kind, elapsed);
                info!(operation_id = %op.id, kind = %op.kind, state = %op.state(), "Operation finished");
            }
            Err(e) if e.is_resumable() => {
                crate::metrics::record_operation_suspended(op.kind);
                warn!(operation_id = %op.id, state = %op.state(), error = %e, "Operation suspended");
            }
            Err(e) => {
                crate::metrics::record_operation_failed(op.kind, op.last_error, elapsed);
                error!(operation_id = %op.id, state = %op.state(), error = %e, "Operation failed");
            }
        }

        self.cancels.remove(&op.id);
        let result = op.result();
        if op.state().is_terminal() {
            self.registry.remove(&op.id);
            self.record_result(result.clone());
        }
        result
    }

    fn record_result(&self, result: OperationResult) {
        let mut finished = self.finished.lock().unwrap_or_else(|e| e.into_inner());
        finished.push_back(result.operation_id);
        self.results.insert(result.operation_id, result);
        while finished.len() > self.result_capacity {
            if let Some(oldest) = finished.pop_front() {
                self.results.remove(&oldest);
            }
        }
    }

    /// Request cancellation; `false` when the operation is not running
    pub fn cancel(&self, id: Uuid) -> bool {
        match self.cancels.get(&id) {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Latest snapshot of a non-terminal operation
    pub fn get(&self, id: Uuid) -> Option<BridgeOperation> {
        self.registry.get(&id).map(|op| op.clone())
    }

    /// Non-terminal operations, oldest first
    pub fn operations(&self) -> Vec<BridgeOperation> {
        let mut ops: Vec<_> = self.registry.iter().map(|op| op.clone()).collect();
        ops.sort_by_key(|op| op.created_at);
        ops
    }

    /// Report of a terminal operation
    pub fn result(&self, id: Uuid) -> Option<OperationResult> {
        self.results.get(&id).map(|r| r.clone())
    }

    pub fn running(&self) -> usize {
        self.cancels.len()
    }
}
