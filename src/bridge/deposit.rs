//! Deposit orchestrator: L1 -> L2
//!
//! `Created -> AllowanceChecked -> FeeQuoted -> Submitted -> L1Included ->
//! LinkedToL2 -> Completed`. Completion means the L2 transaction created by
//! the priority operation has been observed on L2; it does not wait for the
//! L2 batch to be verified on L1.

use super::operation::{BridgeOperation, BridgedToken, OperationKind, OperationState};
use super::{BridgeContext, FeeQuote, OperationControl};
use crate::chain::{Account, Asset, ContractCall, Credential};
use crate::config::BaseToken;
use crate::contracts::{
    self, DIAMOND_PROXY, DIAMOND_PROXY_CUSTOM_GAS, L1_ERC20_BRIDGE, L1_ERC20_BRIDGE_CUSTOM_GAS,
};
use crate::coordination::StatusPoller;
use crate::error::{BridgeError, BridgeResult};

use ethers::types::{Bytes, U256};
use tracing::{info, warn};

/// Drives deposits through their state machine
pub struct DepositOrchestrator {
    ctx: BridgeContext,
}

impl DepositOrchestrator {
    pub fn new(ctx: BridgeContext) -> Self {
        Self { ctx }
    }

    /// Advance `op` from its current state to `Completed`.
    ///
    /// Errors are recorded on the operation: a timeout leaves it in its last
    /// known state for a later resume, anything else moves it to `Failed`.
    pub async fn drive(
        &self,
        op: &mut BridgeOperation,
        credential: &Credential,
        ctl: &OperationControl,
    ) -> BridgeResult<()> {
        let result = self.run(op, credential, ctl).await;
        if let Err(e) = &result {
            warn!(operation_id = %op.id, state = %op.state(), error = %e, "Deposit stopped");
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
        if op.kind != OperationKind::Deposit {
            return Err(BridgeError::InvalidOperation(format!(
                "operation {} is not a deposit",
                op.id
            )));
        }

        let poller = self.ctx.status_poller(ctl.cancel.clone());

        if !op.has_reached(OperationState::Submitted) {
            let account = credential.account(self.ctx.l1.endpoint());
            self.submit(op, &account, &poller, ctl).await?;
        }

        let l1_hash = op
            .l1_tx_hash
            .ok_or_else(|| BridgeError::Internal(format!("deposit {} has no L1 hash", op.id)))?;

        if !op.has_reached(OperationState::LinkedToL2) {
            let l1 = &self.ctx.l1;
            let receipt = poller
                .poll_until(
                    "deposit l1 receipt",
                    self.ctx.poller.receipt_interval(),
                    ctl.deadline,
                    || l1.get_receipt(l1_hash),
                )
                .await?;
            if !receipt.success {
                return Err(BridgeError::PermanentChain {
                    chain: l1.endpoint().role,
                    message: format!("deposit transaction {:?} reverted", l1_hash),
                });
            }
            ctl.advance(op, OperationState::L1Included)?;

            // Relay latency is open-ended; "not visible yet" is not a failure
            let zk = &self.ctx.zk;
            let l2_hash = poller
                .poll_until(
                    "l2 transaction linkage",
                    self.ctx.poller.linkage_interval(),
                    ctl.deadline,
                    || zk.l2_transaction_from_priority_op(&receipt),
                )
                .await?;
            op.l2_tx_hash = Some(l2_hash);
            ctl.advance(op, OperationState::LinkedToL2)?;
        }

        let l2_hash = op
            .l2_tx_hash
            .ok_or_else(|| BridgeError::Internal(format!("deposit {} has no L2 hash", op.id)))?;
        let l2 = &self.ctx.l2;
        let l2_receipt = poller
            .poll_until(
                "deposit l2 receipt",
                self.ctx.poller.receipt_interval(),
                ctl.deadline,
                || l2.get_receipt(l2_hash),
            )
            .await?;
        if !l2_receipt.success {
            return Err(BridgeError::PermanentChain {
                chain: l2.endpoint().role,
                message: format!("L2 priority transaction {:?} failed", l2_hash),
            });
        }

        ctl.advance(op, OperationState::Completed)?;
        info!(
            operation_id = %op.id,
            l1_tx_hash = ?l1_hash,
            l2_tx_hash = ?l2_hash,
            "Deposit completed"
        );
        Ok(())
    }

    /// Everything up to and including the L1 submission
    async fn submit(
        &self,
        op: &mut BridgeOperation,
        account: &Account,
        poller: &StatusPoller,
        ctl: &OperationControl,
    ) -> BridgeResult<()> {
        let l1 = self.ctx.l1.as_ref();
        let amount = op.amount();
        let asset = self.ctx.l1_asset(&op.token);

        // Every balance check runs before the first approval is sent
        let balance = poller
            .read("l1 asset balance", || l1.get_balance(account.address, asset))
            .await?;
        if balance < amount {
            return Err(insufficient(asset, balance, amount));
        }

        let quote = self
            .ctx
            .fee_estimator()
            .quote(
                l1,
                poller,
                self.ctx.bridge.l2_gas_limit,
                self.ctx.bridge.gas_per_pubdata_limit,
            )
            .await?;

        let gas_asset = match self.ctx.contracts.base_token {
            BaseToken::Eth => Asset::Native,
            BaseToken::Erc20(gas_token) => Asset::Erc20(gas_token),
        };
        let gas_required = match op.token {
            BridgedToken::Base => amount_plus_fee(amount, &quote)?,
            BridgedToken::Erc20(_) => quote.fee,
        };
        let gas_balance = if gas_asset == asset {
            balance
        } else {
            poller
                .read("l1 gas token balance", || l1.get_balance(account.address, gas_asset))
                .await?
        };
        if gas_balance < gas_required {
            return Err(insufficient(gas_asset, gas_balance, gas_required));
        }

        let allowances = self.ctx.allowance_manager();
        if let BridgedToken::Erc20(pair) = &op.token {
            allowances
                .ensure_allowance(
                    l1,
                    poller,
                    account,
                    self.ctx.contracts.l1_erc20_bridge,
                    pair.l1_address,
                    amount,
                )
                .await?;
        }
        ctl.advance(op, OperationState::AllowanceChecked)?;

        // The gas token is pulled by the diamond proxy on custom gas token chains
        if let BaseToken::Erc20(gas_token) = self.ctx.contracts.base_token {
            allowances
                .ensure_allowance(
                    l1,
                    poller,
                    account,
                    self.ctx.contracts.diamond_proxy,
                    gas_token,
                    gas_required,
                )
                .await?;
        }
        op.fee_quote = Some(quote);
        ctl.advance(op, OperationState::FeeQuoted)?;

        let call = self.deposit_call(op, &quote)?;
        ctl.check_cancelled()?;
        let handle = l1.submit(account, call).await?;

        op.l1_tx_hash = Some(handle.hash);
        ctl.advance(op, OperationState::Submitted)?;
        crate::metrics::record_submission(handle.chain, OperationKind::Deposit);
        Ok(())
    }

    /// Deposit entry point for the token and the chain's fee model.
    ///
    /// The mailbox charges the base cost at `tx.gasprice`, so the call carries
    /// the exact price the fee was quoted at.
    pub fn deposit_call(&self, op: &BridgeOperation, quote: &FeeQuote) -> BridgeResult<ContractCall> {
        let bridge = &self.ctx.bridge;
        let contracts_cfg = &self.ctx.contracts;
        let amount = op.amount();
        let l2_gas_limit = U256::from(bridge.l2_gas_limit);
        let pubdata = U256::from(bridge.gas_per_pubdata_limit);
        let refund = op.destination;

        let call = match (&op.token, contracts_cfg.base_token) {
            (BridgedToken::Erc20(pair), BaseToken::Eth) => {
                let data = contracts::encode(
                    &L1_ERC20_BRIDGE,
                    "deposit",
                    (op.destination, pair.l1_address, amount, l2_gas_limit, pubdata, refund),
                )?;
                ContractCall::new(contracts_cfg.l1_erc20_bridge, data)
                    .value(quote.fee)
                    .gas_limit(bridge.deposit_gas_limit)
            }
            (BridgedToken::Erc20(pair), BaseToken::Erc20(_)) => {
                let data = contracts::encode(
                    &L1_ERC20_BRIDGE_CUSTOM_GAS,
                    "deposit",
                    (
                        op.destination,
                        pair.l1_address,
                        amount,
                        l2_gas_limit,
                        pubdata,
                        refund,
                        quote.fee,
                    ),
                )?;
                ContractCall::new(contracts_cfg.l1_erc20_bridge, data)
                    .gas_limit(bridge.deposit_gas_limit)
            }
            (BridgedToken::Base, BaseToken::Eth) => {
                let data = contracts::encode(
                    &DIAMOND_PROXY,
                    "requestL2Transaction",
                    (
                        op.destination,
                        amount,
                        Bytes::new(),
                        l2_gas_limit,
                        pubdata,
                        Vec::<Bytes>::new(),
                        refund,
                    ),
                )?;
                ContractCall::new(contracts_cfg.diamond_proxy, data)
                    .value(amount_plus_fee(amount, quote)?)
                    .gas_limit(bridge.base_deposit_gas_limit)
            }
            (BridgedToken::Base, BaseToken::Erc20(_)) => {
                let data = contracts::encode(
                    &DIAMOND_PROXY_CUSTOM_GAS,
                    "requestL2Transaction",
                    (
                        (op.destination, amount, l2_gas_limit, pubdata),
                        Bytes::new(),
                        Vec::<Bytes>::new(),
                        refund,
                        amount_plus_fee(amount, quote)?,
                    ),
                )?;
                ContractCall::new(contracts_cfg.diamond_proxy, data)
                    .gas_limit(bridge.base_deposit_gas_limit)
            }
        };

        Ok(call.gas_price(quote.gas_price))
    }
}

fn amount_plus_fee(amount: U256, quote: &FeeQuote) -> BridgeResult<U256> {
    amount.checked_add(quote.fee).ok_or_else(|| {
        BridgeError::InvalidOperation(format!(
            "amount {} plus fee {} overflows",
            amount, quote.fee
        ))
    })
}

fn insufficient(asset: Asset, have: U256, need: U256) -> BridgeError {
    let token = match asset {
        Asset::Native => None,
        Asset::Erc20(token) => Some(token),
    };
    BridgeError::InsufficientBalance { token, have, need }
}
