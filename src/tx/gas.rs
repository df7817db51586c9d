//! Gas pricing for legacy and EIP-1559 chains

use crate::chain::ChainRole;
use crate::config::{ChainConfig, GasPriceStrategy};
use crate::error::{classify_rpc_error, ChainError, ChainResult};

use ethers::providers::Middleware;
use ethers::types::{BlockNumber, U256};
use tracing::debug;

const GWEI: u64 = 1_000_000_000;

/// Gas price types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GasPrice {
    Legacy(U256),
    Eip1559 {
        max_fee_per_gas: U256,
        max_priority_fee_per_gas: U256,
    },
}

/// Computes the price attached to outgoing transactions of one chain
#[derive(Debug, Clone)]
pub struct GasPricer {
    role: ChainRole,
    strategy: GasPriceStrategy,
    /// Buffer percentage for gas price
    price_buffer_percent: u64,
    /// Buffer percentage for estimated gas limits
    limit_buffer_percent: u64,
    max_gas_price: U256,
    priority_fee: U256,
}

impl GasPricer {
    pub fn new(role: ChainRole, config: &ChainConfig) -> Self {
        Self {
            role,
            strategy: config.gas_price_strategy,
            price_buffer_percent: 10,
            limit_buffer_percent: 20,
            max_gas_price: U256::from(config.max_gas_price_gwei) * U256::from(GWEI),
            priority_fee: U256::from(2 * GWEI),
        }
    }

    /// Current price for this chain, buffered and capped
    pub async fn price<M: Middleware>(&self, provider: &M) -> ChainResult<GasPrice> {
        let price = match self.strategy {
            GasPriceStrategy::Legacy => {
                let price = provider
                    .get_gas_price()
                    .await
                    .map_err(|e| classify_rpc_error(self.role, &e.to_string()))?;
                self.legacy(price)
            }
            GasPriceStrategy::Eip1559 => {
                let block = provider
                    .get_block(BlockNumber::Latest)
                    .await
                    .map_err(|e| classify_rpc_error(self.role, &e.to_string()))?
                    .ok_or_else(|| ChainError::transient(self.role, "No latest block"))?;
                let base_fee = block.base_fee_per_gas.ok_or_else(|| {
                    ChainError::permanent(self.role, "Chain has no base fee, use legacy pricing")
                })?;
                self.eip1559(base_fee)
            }
        };

        debug!(chain = %self.role, ?price, "Gas price");
        Ok(price)
    }

    /// Buffered legacy price, capped at the configured maximum
    pub fn legacy(&self, node_price: U256) -> GasPrice {
        GasPrice::Legacy(self.buffered_price(node_price))
    }

    pub fn buffered_price(&self, node_price: U256) -> U256 {
        let buffer = node_price.saturating_mul(U256::from(self.price_buffer_percent)) / 100;
        node_price.saturating_add(buffer).min(self.max_gas_price)
    }

    /// Max fee = 2 * base fee + priority fee, capped at the configured maximum
    pub fn eip1559(&self, base_fee: U256) -> GasPrice {
        let max_fee = (base_fee * U256::from(2u64) + self.priority_fee).min(self.max_gas_price);
        GasPrice::Eip1559 {
            max_fee_per_gas: max_fee,
            max_priority_fee_per_gas: self.priority_fee.min(max_fee),
        }
    }

    /// Headroom added to a node gas estimate
    pub fn buffered_limit(&self, estimate: U256) -> U256 {
        estimate + estimate * self.limit_buffer_percent / 100
    }
}
