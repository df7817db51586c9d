//! Signing credential and the per-chain accounts derived from it

use crate::chain::{ChainEndpoint, ChainRole};
use crate::error::{BridgeError, BridgeResult};

use ethers::signers::{LocalWallet, Signer};
use ethers::types::Address;
use std::fmt;
use std::str::FromStr;

/// Private signing credential.
///
/// The same key derives the L1 and the L2 account. Orchestrators only ever
/// hold `Account`s borrowed from it.
#[derive(Clone)]
pub struct Credential {
    wallet: LocalWallet,
}

impl Credential {
    /// Load the hex private key from the named environment variable
    pub fn from_env(var: &str) -> BridgeResult<Self> {
        let key = std::env::var(var)
            .map_err(|_| BridgeError::Wallet(format!("{} is not set", var)))?;
        Self::from_str(&key)
    }

    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    /// Account bound to `endpoint`
    pub fn account(&self, endpoint: &ChainEndpoint) -> Account {
        Account {
            address: self.wallet.address(),
            chain_id: endpoint.chain_id,
            role: endpoint.role,
            wallet: self.wallet.clone().with_chain_id(endpoint.chain_id),
        }
    }
}

impl FromStr for Credential {
    type Err = BridgeError;

    fn from_str(key: &str) -> Result<Self, Self::Err> {
        let key = key.trim().trim_start_matches("0x");
        let wallet = key
            .parse::<LocalWallet>()
            .map_err(|e| BridgeError::Wallet(format!("Invalid private key: {}", e)))?;
        Ok(Self { wallet })
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("address", &self.wallet.address())
            .finish_non_exhaustive()
    }
}

/// Address plus signing capability, bound to exactly one chain
#[derive(Clone)]
pub struct Account {
    pub address: Address,
    pub chain_id: u64,
    pub role: ChainRole,
    wallet: LocalWallet,
}

impl Account {
    pub(crate) fn wallet(&self) -> &LocalWallet {
        &self.wallet
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("address", &self.address)
            .field("chain_id", &self.chain_id)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}
