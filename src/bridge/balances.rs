//! Balance snapshots on both sides of the bridge

use super::operation::BridgedToken;
use super::BridgeContext;
use crate::chain::Asset;
use crate::coordination::StatusPoller;
use crate::error::BridgeResult;

use chrono::{DateTime, Utc};
use ethers::types::{Address, U256};
use serde::Serialize;

/// Point-in-time balances of one account for one bridged token
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceReport {
    pub owner: Address,
    pub token: String,
    pub l1_native: U256,
    /// Custom gas token on L1, when the chain has one
    pub l1_gas_token: Option<U256>,
    /// The ERC-20 on L1; `None` for base token reports
    pub l1_token: Option<U256>,
    /// Native coin of L2, which is the base token
    pub l2_native: U256,
    /// The ERC-20 on L2; `None` for base token reports or never-bridged tokens
    pub l2_token: Option<U256>,
    pub taken_at: DateTime<Utc>,
}

impl BalanceReport {
    pub async fn snapshot(
        ctx: &BridgeContext,
        poller: &StatusPoller,
        owner: Address,
        token: &BridgedToken,
    ) -> BridgeResult<Self> {
        let l1 = ctx.l1.as_ref();
        let l2 = ctx.l2.as_ref();

        let l1_native = poller
            .read("l1 native balance", || l1.get_balance(owner, Asset::Native))
            .await?;
        let l1_gas_token = match ctx.contracts.base_token.erc20() {
            Some(gas_token) => Some(
                poller
                    .read("l1 gas token balance", || {
                        l1.get_balance(owner, Asset::Erc20(gas_token))
                    })
                    .await?,
            ),
            None => None,
        };
        let l2_native = poller
            .read("l2 native balance", || l2.get_balance(owner, Asset::Native))
            .await?;

        let (l1_token, l2_token) = match token {
            BridgedToken::Base => (None, None),
            BridgedToken::Erc20(pair) => {
                let l1_token = poller
                    .read("l1 token balance", || {
                        l1.get_balance(owner, Asset::Erc20(pair.l1_address))
                    })
                    .await?;
                let l2_token = match ctx.tokens.resolve_l2(ctx.zk.as_ref(), poller, pair).await? {
                    Some(l2_address) => Some(
                        poller
                            .read("l2 token balance", || {
                                l2.get_balance(owner, Asset::Erc20(l2_address))
                            })
                            .await?,
                    ),
                    None => None,
                };
                (Some(l1_token), l2_token)
            }
        };

        Ok(Self {
            owner,
            token: token.symbol().to_string(),
            l1_native,
            l1_gas_token,
            l1_token,
            l2_native,
            l2_token,
            taken_at: Utc::now(),
        })
    }
}
