//! Bridge operation entity and its state machines

use crate::chain::FinalizeWithdrawalParams;
use crate::error::{BridgeError, BridgeResult, ErrorKind};

use chrono::{DateTime, Utc};
use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::fee::FeeQuote;

/// Direction of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Deposit,
    Withdrawal,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Deposit => f.write_str("deposit"),
            OperationKind::Withdrawal => f.write_str("withdrawal"),
        }
    }
}

/// An ERC-20 known on L1, with its L2 counterpart once resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub symbol: String,
    pub l1_address: Address,
    pub l2_address: Option<Address>,
}

/// What an operation moves
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum BridgedToken {
    /// The L2 chain's gas token (ETH or a custom ERC-20 such as CRO)
    Base,
    Erc20(TokenPair),
}

impl BridgedToken {
    pub fn symbol(&self) -> &str {
        match self {
            BridgedToken::Base => "base",
            BridgedToken::Erc20(pair) => &pair.symbol,
        }
    }
}

/// Lifecycle state, covering both state machines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    Created,
    // Deposit
    AllowanceChecked,
    FeeQuoted,
    Submitted,
    L1Included,
    LinkedToL2,
    Completed,
    // Withdrawal
    L2Included,
    BatchNumbered,
    ProofReady,
    Finalized,
    Failed,
}

const DEPOSIT_PATH: &[OperationState] = &[
    OperationState::Created,
    OperationState::AllowanceChecked,
    OperationState::FeeQuoted,
    OperationState::Submitted,
    OperationState::L1Included,
    OperationState::LinkedToL2,
    OperationState::Completed,
];

const WITHDRAWAL_PATH: &[OperationState] = &[
    OperationState::Created,
    OperationState::Submitted,
    OperationState::L2Included,
    OperationState::BatchNumbered,
    OperationState::ProofReady,
    OperationState::Finalized,
];

impl OperationKind {
    /// States of this kind's happy path, in order
    pub fn path(&self) -> &'static [OperationState] {
        match self {
            OperationKind::Deposit => DEPOSIT_PATH,
            OperationKind::Withdrawal => WITHDRAWAL_PATH,
        }
    }

    fn rank(&self, state: OperationState) -> Option<usize> {
        self.path().iter().position(|s| *s == state)
    }
}

impl OperationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationState::Completed | OperationState::Finalized | OperationState::Failed
        )
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A recorded transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    pub state: OperationState,
    pub at: DateTime<Utc>,
}

/// The central entity: one transfer of one amount in one direction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeOperation {
    pub id: Uuid,
    pub kind: OperationKind,
    pub token: BridgedToken,
    amount: U256,
    /// Owner of the funds on the source chain
    pub source: Address,
    /// Receiver on the destination chain
    pub destination: Address,
    pub l1_tx_hash: Option<H256>,
    pub l2_tx_hash: Option<H256>,
    state: OperationState,
    pub last_error: Option<ErrorKind>,
    pub error_message: Option<String>,
    /// Last fee paid or quoted for L2 execution (deposits only)
    pub fee_quote: Option<FeeQuote>,
    /// Proof parameters once fetched (withdrawals only)
    pub finalize_params: Option<FinalizeWithdrawalParams>,
    history: Vec<StateChange>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BridgeOperation {
    /// Create a new operation in `Created`
    pub fn new(
        kind: OperationKind,
        token: BridgedToken,
        amount: U256,
        source: Address,
        destination: Address,
    ) -> BridgeResult<Self> {
        if amount.is_zero() {
            return Err(BridgeError::InvalidOperation(
                "amount must be greater than zero".to_string(),
            ));
        }

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            kind,
            token,
            amount,
            source,
            destination,
            l1_tx_hash: None,
            l2_tx_hash: None,
            state: OperationState::Created,
            last_error: None,
            error_message: None,
            fee_quote: None,
            finalize_params: None,
            history: vec![StateChange {
                state: OperationState::Created,
                at: now,
            }],
            created_at: now,
            updated_at: now,
        })
    }

    /// Withdrawal known only by its L2 hash, to be finalized
    pub fn from_l2_withdrawal(
        token: BridgedToken,
        amount: U256,
        owner: Address,
        l2_tx_hash: H256,
    ) -> BridgeResult<Self> {
        let mut op = Self::new(OperationKind::Withdrawal, token, amount, owner, owner)?;
        op.l2_tx_hash = Some(l2_tx_hash);
        op.transition(OperationState::Submitted)?;
        Ok(op)
    }

    pub fn amount(&self) -> U256 {
        self.amount
    }

    pub fn state(&self) -> OperationState {
        self.state
    }

    pub fn history(&self) -> &[StateChange] {
        &self.history
    }

    /// Whether the happy path has reached `state` or gone past it
    pub fn has_reached(&self, state: OperationState) -> bool {
        match (self.kind.rank(self.state), self.kind.rank(state)) {
            (Some(current), Some(target)) => current >= target,
            _ => false,
        }
    }

    /// Move forward along the kind's path, or to `Failed`
    pub fn transition(&mut self, to: OperationState) -> BridgeResult<()> {
        let invalid = || BridgeError::InvalidStateTransition {
            from: self.state.to_string(),
            to: to.to_string(),
        };

        if self.state.is_terminal() {
            return Err(invalid());
        }

        if to != OperationState::Failed {
            let from = self.kind.rank(self.state).ok_or_else(invalid)?;
            let target = self.kind.rank(to).ok_or_else(invalid)?;
            if target <= from {
                return Err(invalid());
            }
        }

        let now = Utc::now();
        self.state = to;
        self.updated_at = now;
        self.history.push(StateChange { state: to, at: now });
        crate::metrics::record_transition(self.kind, to);
        tracing::info!(
            operation_id = %self.id,
            kind = %self.kind,
            state = %to,
            "Operation state changed"
        );
        Ok(())
    }

    /// Transition unless the path is already at or past `state`
    pub fn reach(&mut self, state: OperationState) -> BridgeResult<()> {
        if self.has_reached(state) {
            return Ok(());
        }
        self.transition(state)
    }

    /// Record an error; timeouts leave the state untouched, anything else fails
    pub fn record_error(&mut self, err: &BridgeError) {
        self.last_error = Some(err.kind());
        self.error_message = Some(err.to_string());
        self.updated_at = Utc::now();

        if !err.is_resumable() && !self.state.is_terminal() {
            // Cannot fail: Failed is reachable from every non-terminal state
            let _ = self.transition(OperationState::Failed);
        }
    }

    pub fn result(&self) -> OperationResult {
        OperationResult {
            operation_id: self.id,
            kind: self.kind,
            final_state: self.state,
            l1_tx_hash: self.l1_tx_hash,
            l2_tx_hash: self.l2_tx_hash,
            error_kind: self.last_error,
        }
    }
}

/// Terminal report of an operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResult {
    pub operation_id: Uuid,
    pub kind: OperationKind,
    pub final_state: OperationState,
    pub l1_tx_hash: Option<H256>,
    pub l2_tx_hash: Option<H256>,
    pub error_kind: Option<ErrorKind>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deposit() -> BridgeOperation {
        BridgeOperation::new(
            OperationKind::Deposit,
            BridgedToken::Base,
            U256::from(1u64),
            Address::repeat_byte(1),
            Address::repeat_byte(1),
        )
        .unwrap()
    }

    #[test]
    fn test_zero_amount_is_rejected() {
        let result = BridgeOperation::new(
            OperationKind::Deposit,
            BridgedToken::Base,
            U256::zero(),
            Address::zero(),
            Address::zero(),
        );
        assert!(matches!(result, Err(BridgeError::InvalidOperation(_))));
    }

    #[test]
    fn test_transitions_only_move_forward() {
        let mut op = deposit();
        op.transition(OperationState::AllowanceChecked).unwrap();
        op.transition(OperationState::Submitted).unwrap();

        assert!(op.transition(OperationState::FeeQuoted).is_err());
        assert!(op.transition(OperationState::Submitted).is_err());
        // Withdrawal states are not on the deposit path
        assert!(op.transition(OperationState::BatchNumbered).is_err());
        assert_eq!(op.state(), OperationState::Submitted);
    }

    #[test]
    fn test_reach_is_a_noop_when_already_past() {
        let mut op = deposit();
        op.reach(OperationState::FeeQuoted).unwrap();
        op.reach(OperationState::AllowanceChecked).unwrap();
        assert_eq!(op.state(), OperationState::FeeQuoted);
        assert_eq!(op.history().len(), 2);
    }

    #[test]
    fn test_failed_is_terminal_and_reachable() {
        let mut op = deposit();
        op.transition(OperationState::AllowanceChecked).unwrap();
        op.record_error(&BridgeError::Cancelled);

        assert_eq!(op.state(), OperationState::Failed);
        assert_eq!(op.last_error, Some(ErrorKind::Cancelled));
        assert!(op.transition(OperationState::FeeQuoted).is_err());
        assert!(op.transition(OperationState::Failed).is_err());
    }

    #[test]
    fn test_timeout_leaves_state_for_resume() {
        let mut op = deposit();
        op.transition(OperationState::AllowanceChecked).unwrap();
        op.record_error(&BridgeError::timeout("linkage"));

        assert_eq!(op.state(), OperationState::AllowanceChecked);
        assert_eq!(op.last_error, Some(ErrorKind::TimeoutError));
        op.transition(OperationState::FeeQuoted).unwrap();
    }

    #[test]
    fn test_snapshot_roundtrip_keeps_amount_and_history() {
        let mut op = deposit();
        op.transition(OperationState::AllowanceChecked).unwrap();
        let json = serde_json::to_string(&op).unwrap();
        let restored: BridgeOperation = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.amount(), op.amount());
        assert_eq!(restored.state(), OperationState::AllowanceChecked);
        assert_eq!(restored.history(), op.history());
    }

    #[test]
    fn test_finalize_by_hash_starts_submitted() {
        let op = BridgeOperation::from_l2_withdrawal(
            BridgedToken::Base,
            U256::from(5u64),
            Address::repeat_byte(3),
            H256::repeat_byte(4),
        )
        .unwrap();
        assert_eq!(op.state(), OperationState::Submitted);
        assert_eq!(op.kind, OperationKind::Withdrawal);
    }
}
