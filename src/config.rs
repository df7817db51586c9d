//! Configuration management for the bridge orchestrator
//!
//! Loads configuration from TOML files with environment variable substitution.
//! Every slack parameter the bridge flows depend on (gas limits, pubdata limit,
//! fee multiplier, poll intervals) is an explicit named field here.

use anyhow::{Context, Result};
use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub l1: ChainConfig,
    pub l2: ChainConfig,
    pub contracts: ContractsConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub poller: PollerConfig,
    pub wallet: WalletConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub tokens: Vec<TokenConfig>,
    #[serde(default)]
    pub operations: Vec<OperationRequest>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    pub rpc_urls: Vec<String>,
    #[serde(default = "default_gas_price_strategy")]
    pub gas_price_strategy: GasPriceStrategy,
    #[serde(default = "default_max_gas_price_gwei")]
    pub max_gas_price_gwei: u64,
    /// Interval used by `wait` when polling for inclusion
    #[serde(default = "default_chain_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GasPriceStrategy {
    Legacy,
    Eip1559,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContractsConfig {
    /// L1 ERC-20 bridge proxy
    pub l1_erc20_bridge: Address,
    /// Diamond proxy of the L2 chain on L1 (mailbox, base cost, ETH finalization)
    pub diamond_proxy: Address,
    /// L2 ERC-20 bridge; discovered through `zks_getBridgeContracts` when unset
    #[serde(default)]
    pub l2_erc20_bridge: Option<Address>,
    /// Gas token of the L2 chain
    #[serde(default)]
    pub base_token: BaseToken,
}

/// Token paying for L2 execution
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "type", content = "l1_address")]
pub enum BaseToken {
    /// Fees are paid as `msg.value` in ETH
    #[default]
    Eth,
    /// Fees are paid in an ERC-20 on L1 (custom gas token chains)
    Erc20(Address),
}

impl BaseToken {
    pub fn erc20(&self) -> Option<Address> {
        match self {
            BaseToken::Eth => None,
            BaseToken::Erc20(address) => Some(*address),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalPolicy {
    /// Approve exactly the amount the step needs
    #[default]
    Exact,
    /// Approve `U256::MAX` once
    Unlimited,
}

impl ApprovalPolicy {
    pub fn approval_amount(&self, required: U256) -> U256 {
        match self {
            ApprovalPolicy::Exact => required,
            ApprovalPolicy::Unlimited => U256::MAX,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_l2_gas_limit")]
    pub l2_gas_limit: u64,
    #[serde(default = "default_gas_per_pubdata_limit")]
    pub gas_per_pubdata_limit: u64,
    /// Safety multiplier applied to the base cost, in percent
    #[serde(default = "default_fee_multiplier_percent")]
    pub fee_multiplier_percent: u64,
    /// Outer gas limit of the L1 ERC-20 deposit call
    #[serde(default = "default_deposit_gas_limit")]
    pub deposit_gas_limit: u64,
    /// Outer gas limit of the L1 base token deposit call
    #[serde(default = "default_base_deposit_gas_limit")]
    pub base_deposit_gas_limit: u64,
    /// Outer gas limit of the L1 finalization call
    #[serde(default = "default_finalize_gas_limit")]
    pub finalize_gas_limit: u64,
    #[serde(default)]
    pub approval_policy: ApprovalPolicy,
    #[serde(default = "default_l1_confirmations")]
    pub l1_confirmations: u64,
    #[serde(default = "default_approval_timeout_secs")]
    pub approval_timeout_secs: u64,
}

impl BridgeConfig {
    pub fn approval_timeout(&self) -> Duration {
        Duration::from_secs(self.approval_timeout_secs)
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            l2_gas_limit: default_l2_gas_limit(),
            gas_per_pubdata_limit: default_gas_per_pubdata_limit(),
            fee_multiplier_percent: default_fee_multiplier_percent(),
            deposit_gas_limit: default_deposit_gas_limit(),
            base_deposit_gas_limit: default_base_deposit_gas_limit(),
            finalize_gas_limit: default_finalize_gas_limit(),
            approval_policy: ApprovalPolicy::default(),
            l1_confirmations: default_l1_confirmations(),
            approval_timeout_secs: default_approval_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollerConfig {
    #[serde(default = "default_receipt_interval_ms")]
    pub receipt_interval_ms: u64,
    #[serde(default = "default_linkage_interval_ms")]
    pub linkage_interval_ms: u64,
    #[serde(default = "default_batch_interval_secs")]
    pub batch_interval_secs: u64,
    #[serde(default = "default_proof_interval_secs")]
    pub proof_interval_secs: u64,
    #[serde(default = "default_max_transport_retries")]
    pub max_transport_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl PollerConfig {
    pub fn receipt_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_interval_ms)
    }

    pub fn linkage_interval(&self) -> Duration {
        Duration::from_millis(self.linkage_interval_ms)
    }

    pub fn batch_interval(&self) -> Duration {
        Duration::from_secs(self.batch_interval_secs)
    }

    pub fn proof_interval(&self) -> Duration {
        Duration::from_secs(self.proof_interval_secs)
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            receipt_interval_ms: default_receipt_interval_ms(),
            linkage_interval_ms: default_linkage_interval_ms(),
            batch_interval_secs: default_batch_interval_secs(),
            proof_interval_secs: default_proof_interval_secs(),
            max_transport_retries: default_max_transport_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    /// Name of the environment variable holding the hex private key
    #[serde(default = "default_private_key_env")]
    pub private_key_env: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StateConfig {
    /// Snapshot file for resumable operations
    #[serde(default = "default_state_path")]
    pub path: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: default_state_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_api_host")]
    pub host: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_api_host(),
            port: default_api_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    pub symbol: String,
    pub l1_address: Address,
    /// Known once the token has been bridged at least once
    #[serde(default)]
    pub l2_address: Option<Address>,
}

/// Bridge intent read from the configuration file
#[derive(Debug, Clone, Deserialize)]
pub struct OperationRequest {
    pub kind: RequestKind,
    /// Token symbol from `[[tokens]]`, or `base` for the chain's gas token
    pub token: String,
    /// Amount in the token's smallest unit, decimal string
    pub amount: String,
    /// Defaults to the signer's own address on the destination chain
    #[serde(default)]
    pub recipient: Option<Address>,
    /// L2 withdrawal to finalize (`finalize` only)
    #[serde(default)]
    pub l2_tx_hash: Option<H256>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    Deposit,
    Withdrawal,
    /// Finish a withdrawal submitted earlier, known by its L2 hash
    Finalize,
}

fn default_gas_price_strategy() -> GasPriceStrategy {
    GasPriceStrategy::Legacy
}
fn default_max_gas_price_gwei() -> u64 {
    500
}
fn default_chain_poll_interval_ms() -> u64 {
    2_000
}
fn default_l2_gas_limit() -> u64 {
    10_000_000
}
fn default_gas_per_pubdata_limit() -> u64 {
    800
}
fn default_fee_multiplier_percent() -> u64 {
    120
}
fn default_deposit_gas_limit() -> u64 {
    410_000
}
fn default_base_deposit_gas_limit() -> u64 {
    210_000
}
fn default_finalize_gas_limit() -> u64 {
    410_000
}
fn default_l1_confirmations() -> u64 {
    1
}
fn default_approval_timeout_secs() -> u64 {
    600
}
fn default_receipt_interval_ms() -> u64 {
    5_000
}
fn default_linkage_interval_ms() -> u64 {
    5_000
}
fn default_batch_interval_secs() -> u64 {
    180
}
fn default_proof_interval_secs() -> u64 {
    180
}
fn default_max_transport_retries() -> u32 {
    5
}
fn default_initial_backoff_ms() -> u64 {
    1_000
}
fn default_max_backoff_ms() -> u64 {
    30_000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_private_key_env() -> String {
    "WALLET_PRIVATE_KEY".to_string()
}
fn default_state_path() -> PathBuf {
    PathBuf::from("data/operations.json")
}
fn default_api_host() -> String {
    "127.0.0.1".to_string()
}
fn default_api_port() -> u16 {
    8080
}
fn default_metrics_port() -> u16 {
    9090
}

impl Settings {
    /// Load settings from the file named by `ZKBRIDGE_CONFIG`
    pub fn load() -> Result<Self> {
        let config_path = env::var("ZKBRIDGE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from an explicit path
    pub fn load_from(config_path: &std::path::Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::parse(&config_str)
    }

    /// Parse settings from TOML text, substituting `${VAR}` references first
    pub fn parse(config_str: &str) -> Result<Self> {
        let config_str = substitute_env_vars(config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        for (role, chain) in [("l1", &self.l1), ("l2", &self.l2)] {
            if chain.rpc_urls.is_empty() {
                anyhow::bail!("Chain {} ({}) has no RPC URLs configured", role, chain.name);
            }
        }

        if self.l1.chain_id == self.l2.chain_id {
            anyhow::bail!("L1 and L2 must have different chain ids");
        }

        if !(100..=200).contains(&self.bridge.fee_multiplier_percent) {
            anyhow::bail!(
                "fee_multiplier_percent must be within 100..=200, got {}",
                self.bridge.fee_multiplier_percent
            );
        }

        if self.bridge.l2_gas_limit == 0 || self.bridge.gas_per_pubdata_limit == 0 {
            anyhow::bail!("l2_gas_limit and gas_per_pubdata_limit must be non-zero");
        }

        if self.poller.max_transport_retries == 0 {
            anyhow::bail!("poller.max_transport_retries must be at least 1");
        }

        for request in &self.operations {
            if request.token != "base" && self.token(&request.token).is_none() {
                anyhow::bail!("Operation references unknown token {}", request.token);
            }
            U256::from_dec_str(&request.amount)
                .with_context(|| format!("Invalid amount {:?}", request.amount))?;
            match (request.kind, request.l2_tx_hash) {
                (RequestKind::Finalize, None) => {
                    anyhow::bail!("finalize operation needs l2_tx_hash")
                }
                (RequestKind::Deposit | RequestKind::Withdrawal, Some(_)) => {
                    anyhow::bail!("l2_tx_hash is only valid for finalize operations")
                }
                _ => {}
            }
        }

        if self.contracts.l2_erc20_bridge.is_none() {
            tracing::debug!("No L2 ERC-20 bridge configured - will discover it from the L2 node");
        }

        Ok(())
    }

    /// Get token config by symbol
    pub fn token(&self, symbol: &str) -> Option<&TokenConfig> {
        self.tokens
            .iter()
            .find(|t| t.symbol.eq_ignore_ascii_case(symbol))
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();
    let re = match regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}") {
        Ok(re) => re,
        Err(_) => return result,
    };

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}
