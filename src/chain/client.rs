//! Ethers-backed chain client with multi-RPC support and automatic failover

use super::{
    Account, Asset, BridgeAddresses, ChainClient, ChainEndpoint, ChainRole, ContractCall,
    FinalizeWithdrawalParams, L2ToL1Log, L2TxStatus, TransactionDetails, TxHandle, TxReceipt,
    ZkRpc,
};
use crate::config::ChainConfig;
use crate::contracts::{self, ERC20, L1_MESSENGER_ADDRESS, L2_ERC20_BRIDGE};
use crate::error::{classify_rpc_error, ChainError, ChainResult};
use crate::events::{BridgeEvent, EventParser};
use crate::tx::{GasPricer, NonceManager, TransactionSender};

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::types::transaction::eip2718::TypedTransaction;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Raw `zks_getTransactionDetails` response
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTransactionDetails {
    status: L2TxStatus,
    #[serde(default)]
    is_l1_originated: bool,
    eth_commit_tx_hash: Option<H256>,
    eth_prove_tx_hash: Option<H256>,
    eth_execute_tx_hash: Option<H256>,
}

/// Raw `zks_getL2ToL1LogProof` response
#[derive(Debug, Serialize, Deserialize)]
struct RawLogProof {
    proof: Vec<H256>,
    id: u64,
}

/// Multi-provider chain client
pub struct EvmChainClient {
    endpoint: ChainEndpoint,
    config: ChainConfig,
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
    sender: TransactionSender,
    events: EventParser,
    /// L2 ERC-20 bridge, when known from configuration
    l2_erc20_bridge: Option<Address>,
}

impl EvmChainClient {
    /// Create a new chain client.
    ///
    /// `diamond_proxy` identifies the L2 chain's contract on L1; it is used to
    /// recognise priority requests in L1 receipts.
    pub fn new(
        role: ChainRole,
        config: ChainConfig,
        nonces: Arc<NonceManager>,
        diamond_proxy: Address,
    ) -> ChainResult<Self> {
        let mut http_providers = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let provider = provider.interval(Duration::from_millis(config.poll_interval_ms));
                    http_providers.push(provider);
                    debug!(chain = %role, chain_id = config.chain_id, url = %url, "Added HTTP provider");
                }
                Err(e) => {
                    warn!(chain = %role, url = %url, error = %e, "Failed to create provider");
                }
            }
        }

        if http_providers.is_empty() {
            return Err(ChainError::permanent(role, "No valid RPC providers"));
        }

        let endpoint = ChainEndpoint {
            chain_id: config.chain_id,
            name: config.name.clone(),
            rpc_urls: config.rpc_urls.clone(),
            role,
        };
        let sender = TransactionSender::new(
            role,
            config.chain_id,
            nonces,
            GasPricer::new(role, &config),
        );

        Ok(Self {
            endpoint,
            config,
            http_providers,
            current_provider: AtomicUsize::new(0),
            sender,
            events: EventParser::new(diamond_proxy),
            l2_erc20_bridge: None,
        })
    }

    /// Use a configured L2 ERC-20 bridge instead of asking the node
    pub fn with_l2_erc20_bridge(mut self, bridge: Option<Address>) -> Self {
        self.l2_erc20_bridge = bridge;
        self
    }

    fn role(&self) -> ChainRole {
        self.endpoint.role
    }

    /// Get the active HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    pub fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!(chain = %self.role(), provider = next, "Failover to next provider");
    }

    /// Run a read against the active provider, failing over on transport errors
    async fn read<T, F, Fut>(&self, what: &str, f: F) -> ChainResult<T>
    where
        F: Fn(Provider<Http>) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut last_error = None;

        for _ in 0..self.http_providers.len() {
            match f(self.http().clone()).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    let err = classify_rpc_error(self.role(), &e.to_string());
                    if !err.is_transient() {
                        return Err(err);
                    }
                    warn!(chain = %self.role(), what, error = %e, "RPC read failed");
                    last_error = Some(err);
                    self.failover();
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            ChainError::transient(self.role(), format!("All providers failed: {}", what))
        }))
    }

    /// Get current block number with failover
    pub async fn block_number(&self) -> ChainResult<u64> {
        self.read("block number", |p| async move { p.get_block_number().await })
            .await
            .map(|b| b.as_u64())
    }

    /// Health check
    pub async fn health_check(&self) -> bool {
        match self.block_number().await {
            Ok(_) => true,
            Err(e) => {
                error!(chain = %self.role(), error = %e, "Health check failed");
                false
            }
        }
    }

    async fn raw_receipt(&self, hash: H256) -> ChainResult<Option<TransactionReceipt>> {
        self.read("receipt", |p| async move { p.get_transaction_receipt(hash).await })
            .await
    }

    async fn l2_bridge(&self) -> ChainResult<Address> {
        if let Some(bridge) = self.l2_erc20_bridge {
            return Ok(bridge);
        }
        self.bridge_contracts()
            .await?
            .l2_erc20_default_bridge
            .ok_or_else(|| ChainError::permanent(self.role(), "Node reports no L2 ERC-20 bridge"))
    }
}

/// Normalize an ethers receipt, reading the L2-specific extra fields when present
fn normalize_receipt(receipt: TransactionReceipt) -> TxReceipt {
    let l1_batch_number = receipt
        .other
        .get_deserialized::<Option<U64>>("l1BatchNumber")
        .and_then(|r| r.ok())
        .flatten()
        .map(|n| n.as_u64());
    let l1_batch_tx_index = receipt
        .other
        .get_deserialized::<Option<U64>>("l1BatchTxIndex")
        .and_then(|r| r.ok())
        .flatten()
        .map(|n| n.as_u64());
    let l2_to_l1_logs = receipt
        .other
        .get_deserialized::<Vec<L2ToL1Log>>("l2ToL1Logs")
        .and_then(|r| r.ok())
        .unwrap_or_default();

    TxReceipt {
        tx_hash: receipt.transaction_hash,
        block_number: receipt.block_number.map(|b| b.as_u64()),
        success: receipt.status == Some(U64::from(1u64)),
        gas_used: receipt.gas_used.unwrap_or_default(),
        effective_gas_price: receipt.effective_gas_price.unwrap_or_default(),
        l1_batch_number,
        l1_batch_tx_index,
        logs: receipt.logs,
        l2_to_l1_logs,
    }
}

#[async_trait]
impl ChainClient for EvmChainClient {
    fn endpoint(&self) -> &ChainEndpoint {
        &self.endpoint
    }

    async fn submit(&self, from: &Account, call: ContractCall) -> ChainResult<TxHandle> {
        self.sender.send(self.http(), from, call).await
    }

    async fn wait(&self, tx: &TxHandle, confirmations: u64) -> ChainResult<TxReceipt> {
        let interval = Duration::from_millis(self.config.poll_interval_ms);

        loop {
            if let Some(receipt) = self.get_receipt(tx.hash).await? {
                if let Some(block) = receipt.block_number {
                    if confirmations <= 1 {
                        return Ok(receipt);
                    }
                    let current = self.block_number().await?;
                    if super::finality::confirmations(current, block) >= confirmations {
                        return Ok(receipt);
                    }
                }
            }
            tokio::time::sleep(interval).await;
        }
    }

    async fn get_receipt(&self, hash: H256) -> ChainResult<Option<TxReceipt>> {
        Ok(self.raw_receipt(hash).await?.map(normalize_receipt))
    }

    async fn get_balance(&self, owner: Address, asset: Asset) -> ChainResult<U256> {
        match asset {
            Asset::Native => {
                self.read("balance", |p| async move { p.get_balance(owner, None).await })
                    .await
            }
            Asset::Erc20(token) => {
                let data = contracts::encode(&ERC20, "balanceOf", owner)
                    .map_err(|e| ChainError::permanent(self.role(), e.to_string()))?;
                let output = self.call(&ContractCall::new(token, data)).await?;
                contracts::decode_output(&ERC20, "balanceOf", &output)
                    .map_err(|e| ChainError::permanent(self.role(), e.to_string()))
            }
        }
    }

    async fn call(&self, call: &ContractCall) -> ChainResult<Bytes> {
        let tx: TypedTransaction = TransactionRequest::new()
            .to(call.to)
            .data(call.data.clone())
            .value(call.value)
            .into();

        self.read("call", |p| {
            let tx = tx.clone();
            async move { p.call(&tx, None).await }
        })
        .await
    }

    async fn gas_price(&self) -> ChainResult<U256> {
        let node_price = self
            .read("gas price", |p| async move { p.get_gas_price().await })
            .await?;
        Ok(self.sender.legacy_price(node_price))
    }
}

#[async_trait]
impl ZkRpc for EvmChainClient {
    async fn transaction_details(&self, hash: H256) -> ChainResult<Option<TransactionDetails>> {
        let raw: Option<RawTransactionDetails> = self
            .read("transaction details", |p| async move {
                p.request("zks_getTransactionDetails", [hash]).await
            })
            .await?;

        Ok(raw.map(|d| TransactionDetails {
            status: d.status,
            is_l1_originated: d.is_l1_originated,
            eth_commit_tx_hash: d.eth_commit_tx_hash,
            eth_prove_tx_hash: d.eth_prove_tx_hash,
            eth_execute_tx_hash: d.eth_execute_tx_hash,
        }))
    }

    async fn l2_token_address(&self, l1_token: Address) -> ChainResult<Address> {
        let bridge = self.l2_bridge().await?;
        let data = contracts::encode(&L2_ERC20_BRIDGE, "l2TokenAddress", l1_token)
            .map_err(|e| ChainError::permanent(self.role(), e.to_string()))?;
        let output = self.call(&ContractCall::new(bridge, data)).await?;
        contracts::decode_output(&L2_ERC20_BRIDGE, "l2TokenAddress", &output)
            .map_err(|e| ChainError::permanent(self.role(), e.to_string()))
    }

    async fn l2_transaction_from_priority_op(
        &self,
        l1_receipt: &TxReceipt,
    ) -> ChainResult<Option<H256>> {
        let l2_hash = self
            .events
            .priority_op_l2_hash(&l1_receipt.logs)
            .ok_or_else(|| {
                ChainError::permanent(
                    self.role(),
                    format!("No priority request in L1 receipt {:?}", l1_receipt.tx_hash),
                )
            })?;

        let seen = self
            .read("transaction", |p| async move { p.get_transaction(l2_hash).await })
            .await?;

        Ok(seen.map(|_| l2_hash))
    }

    async fn finalize_withdrawal_params(
        &self,
        l2_tx_hash: H256,
        index: usize,
    ) -> ChainResult<Option<FinalizeWithdrawalParams>> {
        let receipt = match self.get_receipt(l2_tx_hash).await? {
            Some(receipt) => receipt,
            None => return Ok(None),
        };
        let (l1_batch_number, l2_tx_number_in_block) =
            match (receipt.l1_batch_number, receipt.l1_batch_tx_index) {
                (Some(batch), Some(index)) => (batch, index),
                _ => return Ok(None),
            };

        let (sender, message) = match self.events.l1_message(&receipt.logs, index) {
            Some((_, BridgeEvent::L1MessageSent { sender, message, .. })) => (sender, message),
            _ => {
                return Err(ChainError::permanent(
                    self.role(),
                    format!("Transaction {:?} has no withdrawal message #{}", l2_tx_hash, index),
                ))
            }
        };

        let log_index = receipt
            .l2_to_l1_logs
            .iter()
            .enumerate()
            .filter(|(_, log)| log.sender == L1_MESSENGER_ADDRESS)
            .nth(index)
            .map(|(pos, _)| pos)
            .ok_or_else(|| {
                ChainError::permanent(self.role(), "Withdrawal message has no L2 -> L1 log")
            })?;

        let proof: Option<RawLogProof> = self
            .read("log proof", |p| async move {
                p.request("zks_getL2ToL1LogProof", (l2_tx_hash, log_index)).await
            })
            .await?;

        let l2_tx_number_in_block = u16::try_from(l2_tx_number_in_block).map_err(|_| {
            ChainError::permanent(self.role(), "Batch transaction index exceeds u16")
        })?;

        Ok(proof.map(|p| FinalizeWithdrawalParams {
            l1_batch_number,
            l2_message_index: p.id,
            l2_tx_number_in_block,
            message,
            sender,
            proof: p.proof,
        }))
    }

    async fn bridge_contracts(&self) -> ChainResult<BridgeAddresses> {
        self.read("bridge contracts", |p| async move {
            p.request("zks_getBridgecontracts", ()).await
        })
        .await
    }
}
