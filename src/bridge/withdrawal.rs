//! Withdrawal orchestrator: L2 -> L1
//!
//! `Created -> Submitted -> L2Included -> BatchNumbered -> ProofReady ->
//! Finalized`. Batch numbering and batch verification are separate signals:
//! the first comes from the L2 receipt, the second from the transaction
//! details. Both waits are open-ended unless the caller supplies a deadline.

use super::operation::{BridgeOperation, BridgedToken, OperationKind, OperationState};
use super::{BridgeContext, OperationControl};
use crate::chain::{Account, Asset, ContractCall, Credential, FinalizeWithdrawalParams, L2Phase};
use crate::contracts::{
    self, DIAMOND_PROXY, L1_ERC20_BRIDGE, L2_BASE_TOKEN, L2_BASE_TOKEN_ADDRESS, L2_ERC20_BRIDGE,
};
use crate::coordination::StatusPoller;
use crate::error::{BridgeError, BridgeResult, ChainError};

use ethers::contract::BaseContract;
use ethers::types::{Address, H256, U256};
use tracing::{debug, info, warn};

/// Drives withdrawals through their state machine
pub struct WithdrawalOrchestrator {
    ctx: BridgeContext,
}

impl WithdrawalOrchestrator {
    pub fn new(ctx: BridgeContext) -> Self {
        Self { ctx }
    }

    /// Advance `op` from its current state to `Finalized`.
    ///
    /// An operation created with [`BridgeOperation::from_l2_withdrawal`]
    /// starts at `Submitted` and only waits and finalizes.
    pub async fn drive(
        &self,
        op: &mut BridgeOperation,
        credential: &Credential,
        ctl: &OperationControl,
    ) -> BridgeResult<()> {
        let result = self.run(op, credential, ctl).await;
        if let Err(e) = &result {
            warn!(operation_id = %op.id, state = %op.state(), error = %e, "Withdrawal stopped");
            op.record_error(e);
            ctl.observer.on_change(op);
        }
        result
    }

    async fn run(
        &self,
        op: &mut BridgeOperation,
        credential: &Credential,
        ctl: &OperationControl,
    ) -> BridgeResult<()> {
        if op.kind != OperationKind::Withdrawal {
            return Err(BridgeError::InvalidOperation(format!(
                "operation {} is not a withdrawal",
                op.id
            )));
        }

        let poller = self.ctx.status_poller(ctl.cancel.clone());

        if !op.has_reached(OperationState::Submitted) {
            let account = credential.account(self.ctx.l2.endpoint());
            self.submit(op, &account, &poller, ctl).await?;
        }

        let l2_hash = op
            .l2_tx_hash
            .ok_or_else(|| BridgeError::Internal(format!("withdrawal {} has no L2 hash", op.id)))?;

        if !op.has_reached(OperationState::L2Included) {
            let l2 = &self.ctx.l2;
            let receipt = poller
                .poll_until(
                    "withdrawal l2 receipt",
                    self.ctx.poller.receipt_interval(),
                    ctl.deadline,
                    || l2.get_receipt(l2_hash),
                )
                .await?;
            if !receipt.success {
                return Err(BridgeError::PermanentChain {
                    chain: l2.endpoint().role,
                    message: format!("withdrawal transaction {:?} reverted", l2_hash),
                });
            }
            ctl.advance(op, OperationState::L2Included)?;
        }

        if !op.has_reached(OperationState::BatchNumbered) {
            let batch = self.wait_for_batch(l2_hash, &poller, ctl).await?;
            info!(operation_id = %op.id, l1_batch_number = batch, "Withdrawal batched");
            ctl.advance(op, OperationState::BatchNumbered)?;
        }

        if !op.has_reached(OperationState::ProofReady) {
            self.wait_for_verification(l2_hash, &poller, ctl).await?;
            let zk = &self.ctx.zk;
            let params = poller
                .poll_until(
                    "withdrawal proof",
                    self.ctx.poller.proof_interval(),
                    ctl.deadline,
                    || zk.finalize_withdrawal_params(l2_hash, 0),
                )
                .await?;
            op.finalize_params = Some(params);
            ctl.advance(op, OperationState::ProofReady)?;
        }

        let account = credential.account(self.ctx.l1.endpoint());
        self.finalize(op, &account, &poller, ctl).await
    }

    async fn submit(
        &self,
        op: &mut BridgeOperation,
        account: &Account,
        poller: &StatusPoller,
        ctl: &OperationControl,
    ) -> BridgeResult<()> {
        let l2 = self.ctx.l2.as_ref();
        let amount = op.amount();

        let (asset, call) = match &op.token {
            BridgedToken::Base => {
                let data = contracts::encode(&L2_BASE_TOKEN, "withdraw", op.destination)?;
                let call = ContractCall::new(L2_BASE_TOKEN_ADDRESS, data).value(amount);
                (Asset::Native, call)
            }
            BridgedToken::Erc20(pair) => {
                let l2_token = self
                    .ctx
                    .tokens
                    .resolve_l2(self.ctx.zk.as_ref(), poller, pair)
                    .await?
                    .ok_or_else(|| {
                        BridgeError::InvalidOperation(format!(
                            "{} has no L2 counterpart; deposit it first",
                            pair.symbol
                        ))
                    })?;
                let bridge = self.ctx.l2_erc20_bridge(poller).await?;
                let data = contracts::encode(
                    &L2_ERC20_BRIDGE,
                    "withdraw",
                    (op.destination, l2_token, amount),
                )?;
                (Asset::Erc20(l2_token), ContractCall::new(bridge, data))
            }
        };

        let balance = poller
            .read("l2 asset balance", || l2.get_balance(account.address, asset))
            .await?;
        if balance < amount {
            let token = match asset {
                Asset::Native => None,
                Asset::Erc20(token) => Some(token),
            };
            return Err(BridgeError::InsufficientBalance {
                token,
                have: balance,
                need: amount,
            });
        }

        ctl.check_cancelled()?;
        let handle = l2.submit(account, call).await?;

        op.l2_tx_hash = Some(handle.hash);
        ctl.advance(op, OperationState::Submitted)?;
        crate::metrics::record_submission(handle.chain, OperationKind::Withdrawal);
        Ok(())
    }

    /// Poll the L2 receipt until it carries a batch number
    async fn wait_for_batch(
        &self,
        l2_hash: H256,
        poller: &StatusPoller,
        ctl: &OperationControl,
    ) -> BridgeResult<u64> {
        let l2 = &self.ctx.l2;
        poller
            .poll_until(
                "l1 batch number",
                self.ctx.poller.batch_interval(),
                ctl.deadline,
                || async move {
                    let receipt = l2.get_receipt(l2_hash).await?;
                    Ok::<_, ChainError>(receipt.and_then(|r| r.l1_batch_number))
                },
            )
            .await
    }

    /// Poll the transaction details until the batch is verified on L1
    async fn wait_for_verification(
        &self,
        l2_hash: H256,
        poller: &StatusPoller,
        ctl: &OperationControl,
    ) -> BridgeResult<()> {
        let zk = &self.ctx.zk;
        let phase = poller
            .poll_until(
                "batch verification",
                self.ctx.poller.batch_interval(),
                ctl.deadline,
                || async move {
                    let phase = zk
                        .transaction_details(l2_hash)
                        .await?
                        .map(|details| L2Phase::from_details(&details));
                    debug!(l2_tx_hash = ?l2_hash, phase = ?phase, "Withdrawal phase");
                    Ok::<_, ChainError>(
                        phase.filter(|p| p.allows_finalization() || *p == L2Phase::Failed),
                    )
                },
            )
            .await?;

        if phase == L2Phase::Failed {
            return Err(BridgeError::PermanentChain {
                chain: self.ctx.l2.endpoint().role,
                message: format!("withdrawal {:?} failed on L2", l2_hash),
            });
        }
        Ok(())
    }

    /// Submit the L1 finalization at most once.
    ///
    /// A recorded L1 hash means the call was already sent; only its receipt
    /// is awaited. Otherwise the on-chain finalization flag is checked first.
    async fn finalize(
        &self,
        op: &mut BridgeOperation,
        account: &Account,
        poller: &StatusPoller,
        ctl: &OperationControl,
    ) -> BridgeResult<()> {
        let l1 = self.ctx.l1.as_ref();
        let l2_hash = op.l2_tx_hash.unwrap_or_default();

        let l1_hash = match op.l1_tx_hash {
            Some(hash) => {
                info!(operation_id = %op.id, l1_tx_hash = ?hash, "Resuming finalization");
                hash
            }
            None => {
                let params = op.finalize_params.clone().ok_or_else(|| {
                    BridgeError::Internal(format!("withdrawal {} has no proof", op.id))
                })?;
                let finalizer = self.finalizer(&op.token);

                if self.is_finalized(&finalizer, &params, poller).await? {
                    return Err(BridgeError::AlreadyFinalized { l2_tx_hash: l2_hash });
                }

                let data = contracts::encode(
                    finalizer.contract,
                    finalizer.finalize,
                    (
                        U256::from(params.l1_batch_number),
                        U256::from(params.l2_message_index),
                        params.l2_tx_number_in_block,
                        params.message.clone(),
                        params.proof.clone(),
                    ),
                )?;
                let call =
                    ContractCall::new(finalizer.target, data).gas_limit(self.ctx.bridge.finalize_gas_limit);

                ctl.check_cancelled()?;
                let handle = l1.submit(account, call).await?;
                op.l1_tx_hash = Some(handle.hash);
                // Persist the hash before waiting so a restart never sends twice
                ctl.observer.on_change(op);
                crate::metrics::record_submission(handle.chain, OperationKind::Withdrawal);
                handle.hash
            }
        };

        let receipt = poller
            .poll_until(
                "finalization receipt",
                self.ctx.poller.receipt_interval(),
                ctl.deadline,
                || l1.get_receipt(l1_hash),
            )
            .await?;
        if !receipt.success {
            return Err(BridgeError::PermanentChain {
                chain: l1.endpoint().role,
                message: format!("finalization {:?} reverted", l1_hash),
            });
        }

        ctl.advance(op, OperationState::Finalized)?;
        info!(
            operation_id = %op.id,
            l1_tx_hash = ?l1_hash,
            l2_tx_hash = ?l2_hash,
            "Withdrawal finalized"
        );
        Ok(())
    }

    /// Contract finalizing withdrawals of `token` on L1
    fn finalizer(&self, token: &BridgedToken) -> Finalizer {
        match token {
            BridgedToken::Base => Finalizer {
                contract: &*DIAMOND_PROXY,
                target: self.ctx.contracts.diamond_proxy,
                finalize: "finalizeEthWithdrawal",
                is_finalized: "isEthWithdrawalFinalized",
            },
            BridgedToken::Erc20(_) => Finalizer {
                contract: &*L1_ERC20_BRIDGE,
                target: self.ctx.contracts.l1_erc20_bridge,
                finalize: "finalizeWithdrawal",
                is_finalized: "isWithdrawalFinalized",
            },
        }
    }

    async fn is_finalized(
        &self,
        finalizer: &Finalizer,
        params: &FinalizeWithdrawalParams,
        poller: &StatusPoller,
    ) -> BridgeResult<bool> {
        let data = contracts::encode(
            finalizer.contract,
            finalizer.is_finalized,
            (
                U256::from(params.l1_batch_number),
                U256::from(params.l2_message_index),
            ),
        )?;
        let call = ContractCall::new(finalizer.target, data);
        let l1 = self.ctx.l1.as_ref();
        let output = poller.read("finalization status", || l1.call(&call)).await?;
        contracts::decode_output(finalizer.contract, finalizer.is_finalized, &output)
    }
}

struct Finalizer {
    contract: &'static BaseContract,
    target: Address,
    finalize: &'static str,
    is_finalized: &'static str,
}
