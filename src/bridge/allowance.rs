//! ERC-20 allowance management shared by every approve-then-call path

use crate::chain::{Account, ChainClient, ContractCall};
use crate::config::ApprovalPolicy;
use crate::contracts::{self, ERC20};
use crate::coordination::StatusPoller;
use crate::error::{BridgeError, BridgeResult};

use ethers::types::{Address, U256};
use futures::FutureExt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Makes sure a spender may move an owner's tokens on one chain
pub struct AllowanceManager {
    policy: ApprovalPolicy,
    confirmations: u64,
    approval_timeout: Duration,
}

impl AllowanceManager {
    pub fn new(policy: ApprovalPolicy, confirmations: u64, approval_timeout: Duration) -> Self {
        Self {
            policy,
            confirmations,
            approval_timeout,
        }
    }

    /// Current allowance of `spender` over `owner`'s `token`
    pub async fn allowance(
        &self,
        chain: &dyn ChainClient,
        poller: &StatusPoller,
        owner: Address,
        spender: Address,
        token: Address,
    ) -> BridgeResult<U256> {
        let data = contracts::encode(&ERC20, "allowance", (owner, spender))?;
        let call = ContractCall::new(token, data);
        let output = poller.read("allowance", || chain.call(&call)).await?;
        contracts::decode_output(&ERC20, "allowance", &output)
    }

    /// Ensure `spender` may move at least `required` of `token` from `owner`.
    ///
    /// Issues no transaction when the current allowance already covers it.
    /// Otherwise approves per the policy and waits for inclusion.
    pub async fn ensure_allowance(
        &self,
        chain: &dyn ChainClient,
        poller: &StatusPoller,
        owner: &Account,
        spender: Address,
        token: Address,
        required: U256,
    ) -> BridgeResult<()> {
        let current = self
            .allowance(chain, poller, owner.address, spender, token)
            .await?;

        if current >= required {
            debug!(token = ?token, spender = ?spender, current = %current, "Allowance sufficient");
            crate::metrics::record_approval(false);
            return Ok(());
        }

        let shortfall = BridgeError::InsufficientAllowance {
            token,
            spender,
            have: current,
            need: required,
        };
        info!(error = %shortfall, "Approving");

        let amount = self.policy.approval_amount(required);
        let data = contracts::encode(&ERC20, "approve", (spender, amount))?;
        let approval_failed = |reason: String| BridgeError::Allowance {
            token,
            spender,
            reason,
        };

        let handle = chain
            .submit(owner, ContractCall::new(token, data))
            .await
            .map_err(|e| approval_failed(e.to_string()))?;
        crate::metrics::record_approval(true);

        // A failed read while waiting is retried; only a revert or the timeout fails the approval
        let deadline = Some(Instant::now() + self.approval_timeout);
        let receipt = poller
            .poll_until("approval inclusion", Duration::ZERO, deadline, || {
                chain.wait(&handle, self.confirmations).map(|r| r.map(Some))
            })
            .await
            .map_err(|e| match e {
                BridgeError::Timeout { .. } => approval_failed(e.to_string()),
                other => other,
            })?;

        if !receipt.success {
            return Err(approval_failed(format!(
                "approval {:?} reverted",
                receipt.tx_hash
            )));
        }

        info!(token = ?token, spender = ?spender, amount = %amount, tx_hash = ?receipt.tx_hash, "Approval confirmed");
        Ok(())
    }
}
