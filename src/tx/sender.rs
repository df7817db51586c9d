//! Transaction sender: build, sign and broadcast under the account's nonce lock

use super::gas::{GasPrice, GasPricer};
use super::nonce::NonceManager;
use crate::chain::{Account, ChainRole, ContractCall, TxHandle};
use crate::error::{classify_rpc_error, ChainError, ChainResult};

use ethers::prelude::*;
use ethers::types::transaction::eip2718::TypedTransaction;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Sends contract calls on one chain.
///
/// A send is never retried: once `eth_sendRawTransaction` has been issued the
/// node may have accepted it, and a retry risks a second spend.
pub struct TransactionSender {
    role: ChainRole,
    chain_id: u64,
    nonces: Arc<NonceManager>,
    gas: GasPricer,
}

impl TransactionSender {
    /// Create a new transaction sender
    pub fn new(role: ChainRole, chain_id: u64, nonces: Arc<NonceManager>, gas: GasPricer) -> Self {
        Self {
            role,
            chain_id,
            nonces,
            gas,
        }
    }

    /// Sign `call` with `from` and broadcast it through `provider`
    pub async fn send(
        &self,
        provider: &Provider<Http>,
        from: &Account,
        call: ContractCall,
    ) -> ChainResult<TxHandle> {
        if from.chain_id != self.chain_id {
            return Err(ChainError::permanent(
                self.role,
                format!(
                    "account is bound to chain {} but this endpoint is chain {}",
                    from.chain_id, self.chain_id
                ),
            ));
        }

        let mut nonce_guard = self.nonces.lock(self.chain_id, from.address).await;
        let nonce = match nonce_guard.next() {
            Some(nonce) => nonce,
            None => {
                let on_chain = provider
                    .get_transaction_count(from.address, Some(BlockNumber::Pending.into()))
                    .await
                    .map_err(|e| classify_rpc_error(self.role, &e.to_string()))?;
                nonce_guard.initialize(on_chain.as_u64())
            }
        };

        let gas_price = match call.gas_price {
            Some(price) => GasPrice::Legacy(price),
            None => self.gas.price(provider).await?,
        };
        let gas_limit = match call.gas_limit {
            Some(limit) => limit,
            None => {
                let probe: TypedTransaction = TransactionRequest::new()
                    .from(from.address)
                    .to(call.to)
                    .data(call.data.clone())
                    .value(call.value)
                    .into();
                let estimate = provider
                    .estimate_gas(&probe, None)
                    .await
                    .map_err(|e| classify_rpc_error(self.role, &e.to_string()))?;
                self.gas.buffered_limit(estimate)
            }
        };

        let tx = self.build(from.address, &call, nonce, gas_limit, &gas_price);
        let signature = from
            .wallet()
            .sign_transaction(&tx)
            .await
            .map_err(|e| ChainError::permanent(self.role, format!("signing failed: {}", e)))?;
        let raw = tx.rlp_signed(&signature);

        match provider.send_raw_transaction(raw).await {
            Ok(pending) => {
                let hash = pending.tx_hash();
                nonce_guard.mark_sent(nonce, hash);
                info!(
                    chain = %self.role,
                    tx_hash = ?hash,
                    nonce,
                    to = ?call.to,
                    "Transaction sent"
                );
                Ok(TxHandle {
                    hash,
                    chain: self.role,
                    nonce,
                })
            }
            Err(e) => {
                let message = e.to_string();
                let lower = message.to_lowercase();
                if lower.contains("nonce too low") || lower.contains("already known") {
                    warn!(chain = %self.role, nonce, "Node rejected nonce");
                    nonce_guard.reset();
                    return Err(ChainError::permanent(self.role, message));
                }

                let err = classify_rpc_error(self.role, &message);
                if err.is_transient() {
                    // The node may hold the transaction; reload the sequence next time
                    nonce_guard.reset();
                }
                Err(err)
            }
        }
    }

    /// Legacy price attached for a node quote of `node_price`
    pub fn legacy_price(&self, node_price: U256) -> U256 {
        self.gas.buffered_price(node_price)
    }

    /// Build the typed transaction for `call`
    pub fn build(
        &self,
        from: Address,
        call: &ContractCall,
        nonce: u64,
        gas_limit: U256,
        gas_price: &GasPrice,
    ) -> TypedTransaction {
        let tx: TypedTransaction = match gas_price {
            GasPrice::Legacy(price) => TransactionRequest::new()
                .from(from)
                .to(call.to)
                .data(call.data.clone())
                .value(call.value)
                .nonce(nonce)
                .gas(gas_limit)
                .gas_price(*price)
                .chain_id(self.chain_id)
                .into(),
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => Eip1559TransactionRequest::new()
                .from(from)
                .to(call.to)
                .data(call.data.clone())
                .value(call.value)
                .nonce(nonce)
                .gas(gas_limit)
                .max_fee_per_gas(*max_fee_per_gas)
                .max_priority_fee_per_gas(*max_priority_fee_per_gas)
                .chain_id(self.chain_id)
                .into(),
        };

        debug!(chain = %self.role, nonce, gas_limit = %gas_limit, "Built transaction");
        tx
    }
}
