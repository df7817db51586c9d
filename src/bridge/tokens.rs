//! Token registry with lazily derived L2 addresses

use super::operation::TokenPair;
use crate::chain::ZkRpc;
use crate::config::TokenConfig;
use crate::coordination::StatusPoller;
use crate::error::BridgeResult;

use dashmap::DashMap;
use ethers::types::Address;
use tracing::info;

/// Known tokens and their resolved L2 counterparts.
///
/// An L2 address, once resolved, is stable for the lifetime of the bridge
/// deployment, so it is cached. An unresolved (zero) answer is not.
#[derive(Debug, Default)]
pub struct TokenRegistry {
    symbols: DashMap<String, Address>,
    pairs: DashMap<Address, TokenPair>,
}

impl TokenRegistry {
    pub fn from_config(tokens: &[TokenConfig]) -> Self {
        let registry = Self::default();
        for token in tokens {
            registry
                .symbols
                .insert(token.symbol.to_lowercase(), token.l1_address);
            registry.pairs.insert(
                token.l1_address,
                TokenPair {
                    symbol: token.symbol.clone(),
                    l1_address: token.l1_address,
                    l2_address: token.l2_address.filter(|a| !a.is_zero()),
                },
            );
        }
        registry
    }

    pub fn get(&self, symbol: &str) -> Option<TokenPair> {
        let l1 = *self.symbols.get(&symbol.to_lowercase())?;
        self.by_l1(l1)
    }

    pub fn by_l1(&self, l1_address: Address) -> Option<TokenPair> {
        self.pairs.get(&l1_address).map(|p| p.clone())
    }

    /// L2 address of `pair`, queried from the L2 node when not yet known.
    ///
    /// `None` means the token has never been bridged.
    pub async fn resolve_l2(
        &self,
        zk: &dyn ZkRpc,
        poller: &StatusPoller,
        pair: &TokenPair,
    ) -> BridgeResult<Option<Address>> {
        if let Some(l2) = pair.l2_address {
            return Ok(Some(l2));
        }
        if let Some(l2) = self.pairs.get(&pair.l1_address).and_then(|p| p.l2_address) {
            return Ok(Some(l2));
        }

        let l2 = poller
            .read("l2 token address", || zk.l2_token_address(pair.l1_address))
            .await?;
        if l2.is_zero() {
            return Ok(None);
        }

        info!(symbol = %pair.symbol, l1 = ?pair.l1_address, l2 = ?l2, "Resolved L2 token address");
        self.pairs
            .entry(pair.l1_address)
            .and_modify(|p| p.l2_address = Some(l2))
            .or_insert_with(|| TokenPair {
                l2_address: Some(l2),
                ..pair.clone()
            });
        Ok(Some(l2))
    }
}
