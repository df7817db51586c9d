//! In-memory L1/L2 pair for end-to-end orchestrator tests
//!
//! Models balances, allowances, the bridge and diamond proxy entry points,
//! priority operations, batch numbering and verification, and the on-chain
//! finalization flag. Gas is free so balance deltas are exactly the bridged
//! amounts and the quoted fees.

use crate::bridge::{BridgeContext, TokenPair, TokenRegistry};
use crate::chain::account::tests::{endpoint, TEST_KEY};
use crate::chain::{
    Account, Asset, BridgeAddresses, ChainClient, ChainEndpoint, ChainRole, ContractCall,
    Credential, FinalizeWithdrawalParams, L2TxStatus, TransactionDetails, TxHandle, TxReceipt,
    ZkRpc,
};
use crate::config::{BaseToken, BridgeConfig, ContractsConfig, PollerConfig, TokenConfig};
use crate::contracts::{
    is_call_to, DIAMOND_PROXY, DIAMOND_PROXY_CUSTOM_GAS, ERC20, L1_ERC20_BRIDGE,
    L1_ERC20_BRIDGE_CUSTOM_GAS, L2_BASE_TOKEN, L2_BASE_TOKEN_ADDRESS, L2_ERC20_BRIDGE,
};
use crate::error::{ChainError, ChainResult};

use async_trait::async_trait;
use ethers::abi::{self, Detokenize, Token};
use ethers::contract::BaseContract;
use ethers::types::{Address, Bytes, H256, U256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

pub const GWEI: u64 = 1_000_000_000;

const L1_CHAIN_ID: u64 = 11155111;

/// Mailbox base cost: L2 gas priced at the L1 `tx.gasprice`
fn base_cost(gas_price: U256, l2_gas_limit: U256) -> U256 {
    gas_price.saturating_mul(l2_gas_limit)
}
const L2_CHAIN_ID: u64 = 240;

/// What an L1 deposit call carried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepositRecord {
    pub amount: U256,
    pub fee: U256,
    /// `msg.value`, or the base amount pulled on custom gas token chains
    pub value: U256,
    pub asset_allowance_at_call: U256,
    pub gas_allowance_at_call: U256,
    /// `tx.gasprice` the mailbox charged the base cost at
    pub gas_price: U256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Withdrawn {
    Base,
    Token(Address),
}

#[derive(Debug)]
struct SimWithdrawal {
    receiver: Address,
    asset: Withdrawn,
    amount: U256,
    batch: u64,
    tx_number: u16,
    batch_polls: u32,
    detail_polls: u32,
    finalized: bool,
}

#[derive(Debug)]
struct SimTx {
    receipt: TxReceipt,
    polls: u32,
}

#[derive(Debug)]
struct PriorityOp {
    l2_hash: H256,
    polls: u32,
}

#[derive(Debug, Default)]
struct SimState {
    base_token: BaseToken,
    gas_price: HashMap<ChainRole, U256>,
    /// L1 price reported once the next L1 transaction is sent
    next_l1_gas_price: Option<U256>,
    native: HashMap<(ChainRole, Address), U256>,
    erc20: HashMap<(ChainRole, Address, Address), U256>,
    allowances: HashMap<(Address, Address, Address), U256>,
    txs: HashMap<H256, SimTx>,
    priority_ops: HashMap<H256, PriorityOp>,
    withdrawals: HashMap<H256, SimWithdrawal>,
    deposits: Vec<DepositRecord>,
    submissions: HashMap<ChainRole, usize>,
    finalize_submissions: usize,
    linkage_polls: u32,
    l1_receipt_delay: u32,
    visibility_delay: u32,
    batch_delay: u32,
    verify_delay: u32,
    hold_receipts: bool,
    next_tx: u64,
    next_batch: u64,
}

impl SimState {
    fn balance(&self, role: ChainRole, owner: Address, asset: Asset) -> U256 {
        match asset {
            Asset::Native => self.native.get(&(role, owner)).copied().unwrap_or_default(),
            Asset::Erc20(token) => self
                .erc20
                .get(&(role, token, owner))
                .copied()
                .unwrap_or_default(),
        }
    }

    fn credit(&mut self, role: ChainRole, owner: Address, asset: Asset, amount: U256) {
        let entry = match asset {
            Asset::Native => self.native.entry((role, owner)).or_default(),
            Asset::Erc20(token) => self.erc20.entry((role, token, owner)).or_default(),
        };
        *entry += amount;
    }

    fn debit(&mut self, role: ChainRole, owner: Address, asset: Asset, amount: U256) -> bool {
        let entry = match asset {
            Asset::Native => self.native.entry((role, owner)).or_default(),
            Asset::Erc20(token) => self.erc20.entry((role, token, owner)).or_default(),
        };
        if *entry < amount {
            return false;
        }
        *entry -= amount;
        true
    }

    fn allowance(&self, token: Address, owner: Address, spender: Address) -> U256 {
        self.allowances
            .get(&(token, owner, spender))
            .copied()
            .unwrap_or_default()
    }

    /// Consume allowance and balance together, or neither
    fn pull(&mut self, token: Address, owner: Address, spender: Address, amount: U256) -> bool {
        if self.allowance(token, owner, spender) < amount
            || self.balance(ChainRole::L1, owner, Asset::Erc20(token)) < amount
        {
            return false;
        }
        let remaining = self.allowance(token, owner, spender) - amount;
        self.allowances.insert((token, owner, spender), remaining);
        self.debit(ChainRole::L1, owner, Asset::Erc20(token), amount)
    }

    fn record_tx(&mut self, success: bool, l1_batch_number: Option<u64>) -> H256 {
        self.next_tx += 1;
        let hash = H256::from_low_u64_be(self.next_tx);
        self.txs.insert(
            hash,
            SimTx {
                receipt: TxReceipt {
                    tx_hash: hash,
                    block_number: Some(self.next_tx),
                    success,
                    gas_used: U256::from(21_000u64),
                    effective_gas_price: U256::zero(),
                    l1_batch_number,
                    l1_batch_tx_index: l1_batch_number.map(|_| 0),
                    logs: vec![],
                    l2_to_l1_logs: vec![],
                },
                polls: 0,
            },
        );
        hash
    }

    fn record_withdrawal(&mut self, receiver: Address, asset: Withdrawn, amount: U256) -> H256 {
        let hash = self.record_tx(true, None);
        self.next_batch += 1;
        self.withdrawals.insert(
            hash,
            SimWithdrawal {
                receiver,
                asset,
                amount,
                batch: self.next_batch,
                tx_number: 3,
                batch_polls: 0,
                detail_polls: 0,
                finalized: false,
            },
        );
        hash
    }

    /// L2 transaction created by an L1 priority operation
    fn record_priority_op(&mut self, l1_hash: H256) {
        let l2_hash = self.record_tx(true, Some(1));
        self.priority_ops.insert(l1_hash, PriorityOp { l2_hash, polls: 0 });
    }

    fn batch_visible(&self, w: &SimWithdrawal) -> bool {
        w.batch_polls > self.batch_delay
    }

    fn withdrawal_by_batch(&mut self, batch: U256) -> Option<&mut SimWithdrawal> {
        self.withdrawals
            .values_mut()
            .find(|w| U256::from(w.batch) == batch)
    }
}

/// Shared handles onto one simulated deployment
pub struct SimBridge {
    state: Arc<Mutex<SimState>>,
    l1: Arc<SimChain>,
    l2: Arc<SimChain>,
    contracts: ContractsConfig,
    tokens: Arc<TokenRegistry>,
    credential: Credential,
}

pub fn l1_bridge() -> Address {
    Address::repeat_byte(0xb1)
}

pub fn diamond_proxy() -> Address {
    Address::repeat_byte(0xd1)
}

pub fn l2_bridge() -> Address {
    Address::repeat_byte(0xb2)
}

pub fn gas_token() -> Address {
    Address::repeat_byte(0xc0)
}

pub fn l1_token() -> Address {
    Address::repeat_byte(0xaa)
}

pub fn l2_token() -> Address {
    Address::repeat_byte(0xbb)
}

impl SimBridge {
    /// Cronos-style chain paying L2 fees in an L1 ERC-20
    pub fn custom_gas_token() -> Self {
        Self::new(BaseToken::Erc20(gas_token()))
    }

    pub fn eth_based() -> Self {
        Self::new(BaseToken::Eth)
    }

    fn new(base_token: BaseToken) -> Self {
        let credential: Credential = TEST_KEY.parse().expect("test key parses");
        let owner = credential.address();

        let mut state = SimState {
            base_token,
            ..Default::default()
        };
        state.gas_price.insert(ChainRole::L1, U256::from(GWEI));
        state.gas_price.insert(ChainRole::L2, U256::from(GWEI / 10));
        state.native.insert((ChainRole::L1, owner), U256::exp10(19));
        state
            .erc20
            .insert((ChainRole::L1, l1_token(), owner), U256::from(1_000_000u64));
        state
            .erc20
            .insert((ChainRole::L1, gas_token(), owner), U256::exp10(21));
        state.next_batch = 100;

        let state = Arc::new(Mutex::new(state));
        let contracts = ContractsConfig {
            l1_erc20_bridge: l1_bridge(),
            diamond_proxy: diamond_proxy(),
            l2_erc20_bridge: None,
            base_token,
        };
        let tokens = Arc::new(TokenRegistry::from_config(&[TokenConfig {
            symbol: "MYT".to_string(),
            l1_address: l1_token(),
            l2_address: None,
        }]));

        Self {
            l1: Arc::new(SimChain {
                endpoint: endpoint(ChainRole::L1, L1_CHAIN_ID),
                state: state.clone(),
            }),
            l2: Arc::new(SimChain {
                endpoint: endpoint(ChainRole::L2, L2_CHAIN_ID),
                state: state.clone(),
            }),
            state,
            contracts,
            tokens,
            credential,
        }
    }

    pub fn context(&self) -> BridgeContext {
        BridgeContext {
            l1: self.l1.clone(),
            l2: self.l2.clone(),
            zk: self.l2.clone(),
            contracts: self.contracts.clone(),
            bridge: BridgeConfig::default(),
            poller: PollerConfig::default(),
            tokens: self.tokens.clone(),
        }
    }

    pub fn credential(&self) -> Credential {
        self.credential.clone()
    }

    pub fn owner(&self) -> Address {
        self.credential.address()
    }

    pub fn token_pair(&self) -> TokenPair {
        TokenPair {
            symbol: "MYT".to_string(),
            l1_address: l1_token(),
            l2_address: None,
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().expect("sim state lock")
    }

    pub fn set_l1_gas_price(&self, price: U256) {
        self.state().gas_price.insert(ChainRole::L1, price);
    }

    /// Move the L1 gas price as soon as the next L1 transaction is sent
    pub fn move_l1_gas_price_after_next_send(&self, price: U256) {
        self.state().next_l1_gas_price = Some(price);
    }

    pub fn l1_gas_price(&self) -> U256 {
        self.state()
            .gas_price
            .get(&ChainRole::L1)
            .copied()
            .unwrap_or_default()
    }

    pub fn set_l1_gas_token_balance(&self, amount: U256) {
        let owner = self.owner();
        self.state()
            .erc20
            .insert((ChainRole::L1, gas_token(), owner), amount);
    }

    pub fn fund_l2_token(&self, amount: U256) {
        let owner = self.owner();
        self.state()
            .credit(ChainRole::L2, owner, Asset::Erc20(l2_token()), amount);
    }

    pub fn fund_l2_native(&self, amount: U256) {
        let owner = self.owner();
        self.state().credit(ChainRole::L2, owner, Asset::Native, amount);
    }

    pub fn grant_all_allowances(&self) {
        let owner = self.owner();
        let mut state = self.state();
        for (token, spender) in [
            (l1_token(), l1_bridge()),
            (gas_token(), diamond_proxy()),
        ] {
            state.allowances.insert((token, owner, spender), U256::MAX);
        }
    }

    /// Receipts become visible only after this many polls
    pub fn set_l1_receipt_delay(&self, polls: u32) {
        self.state().l1_receipt_delay = polls;
    }

    /// Priority operations become visible on L2 only after this many polls
    pub fn set_l2_visibility_delay(&self, polls: u32) {
        self.state().visibility_delay = polls;
    }

    pub fn set_batch_delay(&self, polls: u32) {
        self.state().batch_delay = polls;
    }

    pub fn set_verify_delay(&self, polls: u32) {
        self.state().verify_delay = polls;
    }

    /// Make `wait` block forever, as for a transaction stuck in the mempool
    pub fn hold_receipts(&self, hold: bool) {
        self.state().hold_receipts = hold;
    }

    /// ERC-20 withdrawal sent by someone else, known here only by its hash
    pub fn withdraw_out_of_band(&self, amount: U256) -> H256 {
        let owner = self.owner();
        let mut state = self.state();
        assert!(state.debit(ChainRole::L2, owner, Asset::Erc20(l2_token()), amount));
        *state.submissions.entry(ChainRole::L2).or_default() += 1;
        state.record_withdrawal(owner, Withdrawn::Token(l1_token()), amount)
    }

    pub fn l1_token_balance(&self) -> U256 {
        self.state()
            .balance(ChainRole::L1, self.owner(), Asset::Erc20(l1_token()))
    }

    pub fn l1_gas_token_balance(&self) -> U256 {
        self.state()
            .balance(ChainRole::L1, self.owner(), Asset::Erc20(gas_token()))
    }

    pub fn l2_token_balance(&self) -> U256 {
        self.state()
            .balance(ChainRole::L2, self.owner(), Asset::Erc20(l2_token()))
    }

    pub fn l2_native_balance(&self) -> U256 {
        self.state().balance(ChainRole::L2, self.owner(), Asset::Native)
    }

    pub fn last_l1_deposit(&self) -> Option<DepositRecord> {
        self.state().deposits.last().copied()
    }

    pub fn l1_submissions(&self) -> usize {
        self.state()
            .submissions
            .get(&ChainRole::L1)
            .copied()
            .unwrap_or_default()
    }

    pub fn l2_submissions(&self) -> usize {
        self.state()
            .submissions
            .get(&ChainRole::L2)
            .copied()
            .unwrap_or_default()
    }

    pub fn finalize_submissions(&self) -> usize {
        self.state().finalize_submissions
    }

    pub fn linkage_polls(&self) -> u32 {
        self.state().linkage_polls
    }

    /// Receipt queries answered for a withdrawal's L2 transaction
    pub fn withdrawal_receipt_polls(&self, l2_hash: H256) -> u32 {
        self.state()
            .withdrawals
            .get(&l2_hash)
            .map(|w| w.batch_polls)
            .unwrap_or_default()
    }
}

/// One side of the simulated deployment
pub struct SimChain {
    endpoint: ChainEndpoint,
    state: Arc<Mutex<SimState>>,
}

fn decode<D: Detokenize>(
    role: ChainRole,
    contract: &BaseContract,
    name: &str,
    data: &Bytes,
) -> ChainResult<D> {
    contract
        .decode(name, data)
        .map_err(|e| ChainError::permanent(role, e.to_string()))
}

fn unknown_call(role: ChainRole, call: &ContractCall) -> ChainError {
    ChainError::permanent(role, format!("execution reverted: unknown call to {:?}", call.to))
}

impl SimChain {
    fn role(&self) -> ChainRole {
        self.endpoint.role
    }

    fn lock(&self) -> ChainResult<MutexGuard<'_, SimState>> {
        self.state
            .lock()
            .map_err(|_| ChainError::permanent(self.role(), "sim state poisoned"))
    }

    fn submit_l1(&self, state: &mut SimState, from: Address, call: &ContractCall) -> ChainResult<H256> {
        let role = ChainRole::L1;
        let gas_price = call
            .gas_price
            .or_else(|| state.gas_price.get(&role).copied())
            .unwrap_or_default();

        if is_call_to(&ERC20, "approve", &call.data) {
            let (spender, amount): (Address, U256) = decode(role, &ERC20, "approve", &call.data)?;
            state.allowances.insert((call.to, from, spender), amount);
            return Ok(state.record_tx(true, None));
        }

        if call.to == l1_bridge() && is_call_to(&L1_ERC20_BRIDGE, "deposit", &call.data) {
            let (receiver, token, amount, l2_gas, _pubdata, _refund): (
                Address,
                Address,
                U256,
                U256,
                U256,
                Address,
            ) = decode(role, &L1_ERC20_BRIDGE, "deposit", &call.data)?;
            let record = DepositRecord {
                amount,
                fee: call.value,
                value: call.value,
                asset_allowance_at_call: state.allowance(token, from, l1_bridge()),
                gas_allowance_at_call: U256::zero(),
                gas_price,
            };
            let ok = record.fee >= base_cost(gas_price, l2_gas)
                && state.balance(role, from, Asset::Native) >= call.value
                && state.pull(token, from, l1_bridge(), amount)
                && state.debit(role, from, Asset::Native, call.value);
            return Ok(self.finish_deposit(state, ok, record, receiver, Asset::Erc20(l2_token())));
        }

        if call.to == l1_bridge() && is_call_to(&L1_ERC20_BRIDGE_CUSTOM_GAS, "deposit", &call.data) {
            let (receiver, token, amount, l2_gas, _pubdata, _refund, l1_amount): (
                Address,
                Address,
                U256,
                U256,
                U256,
                Address,
                U256,
            ) = decode(role, &L1_ERC20_BRIDGE_CUSTOM_GAS, "deposit", &call.data)?;
            let gas = state.base_token.erc20().unwrap_or_default();
            let record = DepositRecord {
                amount,
                fee: l1_amount,
                value: l1_amount,
                asset_allowance_at_call: state.allowance(token, from, l1_bridge()),
                gas_allowance_at_call: state.allowance(gas, from, diamond_proxy()),
                gas_price,
            };
            let ok = record.fee >= base_cost(gas_price, l2_gas)
                && state.allowance(gas, from, diamond_proxy()) >= l1_amount
                && state.balance(role, from, Asset::Erc20(gas)) >= l1_amount
                && state.pull(token, from, l1_bridge(), amount)
                && state.pull(gas, from, diamond_proxy(), l1_amount);
            return Ok(self.finish_deposit(state, ok, record, receiver, Asset::Erc20(l2_token())));
        }

        if call.to == diamond_proxy() && is_call_to(&DIAMOND_PROXY, "requestL2Transaction", &call.data) {
            let (contract, l2_value, _data, l2_gas, _pubdata, _deps, _refund): (
                Address,
                U256,
                Bytes,
                U256,
                U256,
                Vec<Bytes>,
                Address,
            ) = decode(role, &DIAMOND_PROXY, "requestL2Transaction", &call.data)?;
            let record = DepositRecord {
                amount: l2_value,
                fee: call.value.saturating_sub(l2_value),
                value: call.value,
                asset_allowance_at_call: U256::zero(),
                gas_allowance_at_call: U256::zero(),
                gas_price,
            };
            let ok = call.value >= l2_value
                && record.fee >= base_cost(gas_price, l2_gas)
                && state.debit(role, from, Asset::Native, call.value);
            return Ok(self.finish_deposit(state, ok, record, contract, Asset::Native));
        }

        if call.to == diamond_proxy()
            && is_call_to(&DIAMOND_PROXY_CUSTOM_GAS, "requestL2Transaction", &call.data)
        {
            let ((contract, l2_value, l2_gas, _pubdata), _data, _deps, _refund, base_amount): (
                (Address, U256, U256, U256),
                Bytes,
                Vec<Bytes>,
                Address,
                U256,
            ) = decode(role, &DIAMOND_PROXY_CUSTOM_GAS, "requestL2Transaction", &call.data)?;
            let gas = state.base_token.erc20().unwrap_or_default();
            let record = DepositRecord {
                amount: l2_value,
                fee: base_amount.saturating_sub(l2_value),
                value: base_amount,
                asset_allowance_at_call: U256::zero(),
                gas_allowance_at_call: state.allowance(gas, from, diamond_proxy()),
                gas_price,
            };
            let ok = base_amount >= l2_value
                && record.fee >= base_cost(gas_price, l2_gas)
                && state.pull(gas, from, diamond_proxy(), base_amount);
            return Ok(self.finish_deposit(state, ok, record, contract, Asset::Native));
        }

        let finalizers: [(&BaseContract, Address, &str); 2] = [
            (&*DIAMOND_PROXY, diamond_proxy(), "finalizeEthWithdrawal"),
            (&*L1_ERC20_BRIDGE, l1_bridge(), "finalizeWithdrawal"),
        ];
        for (contract, target, name) in finalizers {
            if call.to != target || !is_call_to(contract, name, &call.data) {
                continue;
            }
            let (batch, _index, _tx_number, _message, _proof): (U256, U256, u16, Bytes, Vec<H256>) =
                decode(role, contract, name, &call.data)?;
            state.finalize_submissions += 1;
            let base_token = state.base_token;
            let credit = match state.withdrawal_by_batch(batch) {
                Some(w) if !w.finalized => {
                    w.finalized = true;
                    let asset = match (w.asset, base_token) {
                        (Withdrawn::Token(token), _) => Asset::Erc20(token),
                        (Withdrawn::Base, BaseToken::Eth) => Asset::Native,
                        (Withdrawn::Base, BaseToken::Erc20(gas)) => Asset::Erc20(gas),
                    };
                    Some((w.receiver, asset, w.amount))
                }
                _ => None,
            };
            let success = credit.is_some();
            if let Some((receiver, asset, amount)) = credit {
                state.credit(role, receiver, asset, amount);
            }
            return Ok(state.record_tx(success, None));
        }

        Err(unknown_call(role, call))
    }

    fn finish_deposit(
        &self,
        state: &mut SimState,
        ok: bool,
        record: DepositRecord,
        receiver: Address,
        l2_asset: Asset,
    ) -> H256 {
        state.deposits.push(record);
        let hash = state.record_tx(ok, None);
        if ok {
            state.credit(ChainRole::L2, receiver, l2_asset, record.amount);
            state.record_priority_op(hash);
        }
        hash
    }

    fn submit_l2(&self, state: &mut SimState, from: Address, call: &ContractCall) -> ChainResult<H256> {
        let role = ChainRole::L2;

        if call.to == L2_BASE_TOKEN_ADDRESS && is_call_to(&L2_BASE_TOKEN, "withdraw", &call.data) {
            let receiver: Address = decode(role, &L2_BASE_TOKEN, "withdraw", &call.data)?;
            if !state.debit(role, from, Asset::Native, call.value) {
                return Ok(state.record_tx(false, None));
            }
            return Ok(state.record_withdrawal(receiver, Withdrawn::Base, call.value));
        }

        if call.to == l2_bridge() && is_call_to(&L2_ERC20_BRIDGE, "withdraw", &call.data) {
            let (receiver, token, amount): (Address, Address, U256) =
                decode(role, &L2_ERC20_BRIDGE, "withdraw", &call.data)?;
            if token != l2_token() || !state.debit(role, from, Asset::Erc20(token), amount) {
                return Ok(state.record_tx(false, None));
            }
            return Ok(state.record_withdrawal(receiver, Withdrawn::Token(l1_token()), amount));
        }

        Err(unknown_call(role, call))
    }

    fn view_l1(&self, state: &SimState, call: &ContractCall) -> ChainResult<Bytes> {
        let role = ChainRole::L1;
        let data = &call.data;

        let token = if is_call_to(&ERC20, "allowance", data) {
            let (owner, spender): (Address, Address) = decode(role, &ERC20, "allowance", data)?;
            Token::Uint(state.allowance(call.to, owner, spender))
        } else if is_call_to(&ERC20, "balanceOf", data) {
            let owner: Address = decode(role, &ERC20, "balanceOf", data)?;
            Token::Uint(state.balance(role, owner, Asset::Erc20(call.to)))
        } else if call.to == diamond_proxy()
            && is_call_to(&DIAMOND_PROXY, "l2TransactionBaseCost", data)
        {
            let (gas_price, l2_gas_limit, _pubdata): (U256, U256, U256) =
                decode(role, &DIAMOND_PROXY, "l2TransactionBaseCost", data)?;
            Token::Uint(base_cost(gas_price, l2_gas_limit))
        } else if call.to == diamond_proxy()
            && is_call_to(&DIAMOND_PROXY, "isEthWithdrawalFinalized", data)
        {
            let (batch, _index): (U256, U256) =
                decode(role, &DIAMOND_PROXY, "isEthWithdrawalFinalized", data)?;
            Token::Bool(self.finalized(state, batch))
        } else if call.to == l1_bridge() && is_call_to(&L1_ERC20_BRIDGE, "isWithdrawalFinalized", data)
        {
            let (batch, _index): (U256, U256) =
                decode(role, &L1_ERC20_BRIDGE, "isWithdrawalFinalized", data)?;
            Token::Bool(self.finalized(state, batch))
        } else {
            return Err(unknown_call(role, call));
        };

        Ok(Bytes::from(abi::encode(&[token])))
    }

    fn finalized(&self, state: &SimState, batch: U256) -> bool {
        state
            .withdrawals
            .values()
            .any(|w| U256::from(w.batch) == batch && w.finalized)
    }
}

#[async_trait]
impl ChainClient for SimChain {
    fn endpoint(&self) -> &ChainEndpoint {
        &self.endpoint
    }

    async fn submit(&self, from: &Account, call: ContractCall) -> ChainResult<TxHandle> {
        let role = self.role();
        if from.role != role {
            return Err(ChainError::permanent(role, "account bound to another chain"));
        }

        let mut state = self.lock()?;
        let hash = match role {
            ChainRole::L1 => self.submit_l1(&mut state, from.address, &call)?,
            ChainRole::L2 => self.submit_l2(&mut state, from.address, &call)?,
        };
        if role == ChainRole::L1 {
            if let Some(price) = state.next_l1_gas_price.take() {
                state.gas_price.insert(role, price);
            }
        }
        let submissions = state.submissions.entry(role).or_default();
        *submissions += 1;

        Ok(TxHandle {
            hash,
            chain: role,
            nonce: *submissions as u64 - 1,
        })
    }

    async fn wait(&self, tx: &TxHandle, _confirmations: u64) -> ChainResult<TxReceipt> {
        let receipt = {
            let state = self.lock()?;
            if state.hold_receipts {
                None
            } else {
                Some(
                    state
                        .txs
                        .get(&tx.hash)
                        .map(|t| t.receipt.clone())
                        .ok_or_else(|| ChainError::permanent(self.role(), "unknown transaction"))?,
                )
            }
        };

        match receipt {
            Some(receipt) => Ok(receipt),
            None => std::future::pending().await,
        }
    }

    async fn get_receipt(&self, hash: H256) -> ChainResult<Option<TxReceipt>> {
        let role = self.role();
        let mut state = self.lock()?;
        let delay = match role {
            ChainRole::L1 => state.l1_receipt_delay,
            ChainRole::L2 => 0,
        };

        let Some(tx) = state.txs.get_mut(&hash) else {
            return Ok(None);
        };
        tx.polls += 1;
        if tx.polls <= delay {
            return Ok(None);
        }
        let mut receipt = tx.receipt.clone();

        let batch_delay = state.batch_delay;
        if let Some(w) = state.withdrawals.get_mut(&hash) {
            w.batch_polls += 1;
            if w.batch_polls > batch_delay {
                receipt.l1_batch_number = Some(w.batch);
                receipt.l1_batch_tx_index = Some(w.tx_number as u64);
            }
        }

        Ok(Some(receipt))
    }

    async fn get_balance(&self, owner: Address, asset: Asset) -> ChainResult<U256> {
        Ok(self.lock()?.balance(self.role(), owner, asset))
    }

    async fn call(&self, call: &ContractCall) -> ChainResult<Bytes> {
        let state = self.lock()?;
        match self.role() {
            ChainRole::L1 => self.view_l1(&state, call),
            ChainRole::L2 => Err(unknown_call(ChainRole::L2, call)),
        }
    }

    async fn gas_price(&self) -> ChainResult<U256> {
        Ok(self
            .lock()?
            .gas_price
            .get(&self.role())
            .copied()
            .unwrap_or_default())
    }
}

#[async_trait]
impl ZkRpc for SimChain {
    async fn transaction_details(&self, hash: H256) -> ChainResult<Option<TransactionDetails>> {
        let mut state = self.lock()?;
        let verify_delay = state.verify_delay;
        let batch_delay = state.batch_delay;

        if let Some(w) = state.withdrawals.get_mut(&hash) {
            w.detail_polls += 1;
            let batched = w.batch_polls > batch_delay;
            let verified = batched && w.detail_polls > verify_delay;
            return Ok(Some(TransactionDetails {
                status: if verified {
                    L2TxStatus::Verified
                } else {
                    L2TxStatus::Included
                },
                is_l1_originated: false,
                eth_commit_tx_hash: batched.then(|| H256::repeat_byte(0xc1)),
                eth_prove_tx_hash: verified.then(|| H256::repeat_byte(0xc2)),
                eth_execute_tx_hash: verified.then(|| H256::repeat_byte(0xc3)),
            }));
        }

        let is_priority = state.priority_ops.values().any(|op| op.l2_hash == hash);
        Ok(state.txs.contains_key(&hash).then(|| TransactionDetails {
            status: L2TxStatus::Verified,
            is_l1_originated: is_priority,
            eth_commit_tx_hash: Some(H256::repeat_byte(0xc1)),
            eth_prove_tx_hash: Some(H256::repeat_byte(0xc2)),
            eth_execute_tx_hash: Some(H256::repeat_byte(0xc3)),
        }))
    }

    async fn l2_token_address(&self, l1: Address) -> ChainResult<Address> {
        Ok(if l1 == l1_token() {
            l2_token()
        } else {
            Address::zero()
        })
    }

    async fn l2_transaction_from_priority_op(
        &self,
        l1_receipt: &TxReceipt,
    ) -> ChainResult<Option<H256>> {
        let mut state = self.lock()?;
        state.linkage_polls += 1;
        let delay = state.visibility_delay;

        let op = state
            .priority_ops
            .get_mut(&l1_receipt.tx_hash)
            .ok_or_else(|| ChainError::permanent(ChainRole::L2, "no priority operation in receipt"))?;
        op.polls += 1;
        Ok((op.polls > delay).then_some(op.l2_hash))
    }

    async fn finalize_withdrawal_params(
        &self,
        l2_tx_hash: H256,
        index: usize,
    ) -> ChainResult<Option<FinalizeWithdrawalParams>> {
        let state = self.lock()?;
        let Some(w) = state.withdrawals.get(&l2_tx_hash) else {
            return Ok(None);
        };
        if !state.batch_visible(w) {
            return Ok(None);
        }

        let sender = match w.asset {
            Withdrawn::Base => L2_BASE_TOKEN_ADDRESS,
            Withdrawn::Token(_) => l2_bridge(),
        };
        let mut message = w.receiver.as_bytes().to_vec();
        let mut amount = [0u8; 32];
        w.amount.to_big_endian(&mut amount);
        message.extend_from_slice(&amount);

        Ok(Some(FinalizeWithdrawalParams {
            l1_batch_number: w.batch,
            l2_message_index: index as u64,
            l2_tx_number_in_block: w.tx_number,
            message: Bytes::from(message),
            sender,
            proof: vec![H256::repeat_byte(0x77); 3],
        }))
    }

    async fn bridge_contracts(&self) -> ChainResult<BridgeAddresses> {
        Ok(BridgeAddresses {
            l1_erc20_default_bridge: Some(l1_bridge()),
            l2_erc20_default_bridge: Some(l2_bridge()),
        })
    }
}
