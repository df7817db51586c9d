//! L2 execution fee, priced on L1 in the chain's gas token

use crate::chain::{ChainClient, ContractCall};
use crate::contracts::{self, DIAMOND_PROXY};
use crate::coordination::StatusPoller;
use crate::error::{BridgeError, BridgeResult};

use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Gas-token amount covering L2 execution of one priority operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeQuote {
    /// Gas price the base cost was computed with; the deposit attaches exactly this
    pub gas_price: U256,
    pub l2_gas_limit: U256,
    pub gas_per_pubdata_limit: U256,
    /// `l2TransactionBaseCost` as reported by the diamond proxy
    pub base_cost: U256,
    pub multiplier_percent: u64,
    /// `base_cost * multiplier_percent / 100`
    pub fee: U256,
}

/// Quotes the L2 execution fee of deposits.
///
/// Quotes are never cached: the L1 gas price moves between operations.
pub struct FeeEstimator {
    diamond_proxy: Address,
    multiplier_percent: u64,
}

impl FeeEstimator {
    pub fn new(diamond_proxy: Address, multiplier_percent: u64) -> Self {
        Self {
            diamond_proxy,
            multiplier_percent,
        }
    }

    /// Quote the fee for an L2 transaction requested from `source`.
    ///
    /// The gas price is the one the source chain's client attaches to its
    /// transactions, since that is where the fee is paid.
    pub async fn quote(
        &self,
        source: &dyn ChainClient,
        poller: &StatusPoller,
        l2_gas_limit: u64,
        gas_per_pubdata_limit: u64,
    ) -> BridgeResult<FeeQuote> {
        let gas_price = poller
            .read("source gas price", || source.gas_price())
            .await
            .map_err(|e| match e {
                BridgeError::PermanentChain { message, .. } => BridgeError::FeeEstimation(message),
                other => other,
            })?;

        let l2_gas_limit = U256::from(l2_gas_limit);
        let gas_per_pubdata_limit = U256::from(gas_per_pubdata_limit);
        let data = contracts::encode(
            &DIAMOND_PROXY,
            "l2TransactionBaseCost",
            (gas_price, l2_gas_limit, gas_per_pubdata_limit),
        )?;
        let call = ContractCall::new(self.diamond_proxy, data);

        let output = poller
            .read("l2 transaction base cost", || source.call(&call))
            .await
            .map_err(|e| match e {
                BridgeError::PermanentChain { message, .. } => {
                    BridgeError::FeeEstimation(format!("base cost query reverted: {}", message))
                }
                other => other,
            })?;
        let base_cost: U256 = contracts::decode_output(&DIAMOND_PROXY, "l2TransactionBaseCost", &output)
            .map_err(|e| BridgeError::FeeEstimation(e.to_string()))?;

        let fee = base_cost
            .checked_mul(U256::from(self.multiplier_percent))
            .map(|scaled| scaled / U256::from(100u64))
            .ok_or_else(|| {
                BridgeError::FeeEstimation(format!(
                    "base cost {} overflows at {}%",
                    base_cost, self.multiplier_percent
                ))
            })?;

        info!(
            gas_price = %gas_price,
            base_cost = %base_cost,
            multiplier_percent = self.multiplier_percent,
            fee = %fee,
            "Fee quoted"
        );
        crate::metrics::record_fee_quote(fee);

        Ok(FeeQuote {
            gas_price,
            l2_gas_limit,
            gas_per_pubdata_limit,
            base_cost,
            multiplier_percent: self.multiplier_percent,
            fee,
        })
    }
}
