//! Configuration cho Katana bridge backend
//!
//! Cấu hình được đọc từ file YAML, sau đó các biến môi trường (và `.env`)
//! ghi đè endpoint, địa chỉ contract và secrets. Secrets không bao giờ được
//! ghi ngược ra file.

use std::env;
use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use common::bridge_types::Network;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BridgeConfig {
    /// General settings
    pub general: GeneralConfig,

    /// HTTP API settings
    pub api: ApiConfig,

    /// Source and destination networks
    pub networks: NetworksConfig,

    /// Contract addresses
    pub contracts: ContractsConfig,

    /// Ledger store settings
    pub ledger: LedgerConfig,

    /// Transaction confirmation polling
    pub confirmation: ConfirmationConfig,

    /// Claim reconciliation job
    pub reconciler: ReconcilerConfig,

    /// Native asset price feed
    pub price_feed: PriceFeedConfig,

    /// Remote merkle-proof service
    pub proof_service: ProofServiceConfig,

    /// Operator signing key, only ever read from `OPERATOR_PRIVATE_KEY`
    #[serde(skip)]
    pub operator_private_key: Option<String>,
}

/// General settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Emit JSON log lines instead of plain text
    pub json_logs: bool,
}

impl GeneralConfig {
    /// Command line flags take precedence over the file
    pub fn with_cli(mut self, log_level: Option<String>, json_logs: bool) -> Self {
        if let Some(level) = log_level {
            self.log_level = level;
        }
        self.json_logs |= json_logs;
        self
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Enable API server
    pub enable_api: bool,

    /// Listen port
    pub port: u16,

    /// Default page size for history endpoints
    pub default_page_size: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enable_api: true,
            port: 3001,
            default_page_size: 10,
        }
    }
}

/// One side of the bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Human-readable name
    pub name: String,

    /// Bridge network id (0 = Sepolia, 29 = Katana)
    pub network_id: u32,

    /// JSON-RPC endpoint
    pub rpc_url: String,
}

impl NetworkConfig {
    /// The bridged network behind `network_id`
    pub fn network(&self) -> Result<Network> {
        Network::from_id(self.network_id)
            .ok_or_else(|| anyhow!("Unsupported bridge network id {} for {}", self.network_id, self.name))
    }
}

/// Source and destination networks
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworksConfig {
    /// Chain deposits start from
    pub source: NetworkConfig,

    /// Chain hosting the vault
    pub destination: NetworkConfig,
}

impl Default for NetworksConfig {
    fn default() -> Self {
        Self {
            source: NetworkConfig {
                name: "Sepolia".to_string(),
                network_id: 0,
                rpc_url: "https://ethereum-sepolia-rpc.publicnode.com".to_string(),
            },
            destination: NetworkConfig {
                name: "Katana Tatara".to_string(),
                network_id: 29,
                rpc_url: "https://rpc.tatara.katanarpc.com/".to_string(),
            },
        }
    }
}

/// Contract addresses (hex strings, checked by `ContractsConfig::parse`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContractsConfig {
    /// Unified bridge contract on the source chain
    pub bridge_address: String,

    /// Vault-bridge contract doing deposit + bridge in one transaction
    pub vault_bridge_address: String,

    /// Vault contract on the destination chain (admin-gated withdrawals)
    pub vault_address: String,

    /// Sentinel address standing for the native asset
    pub native_token_address: String,

    /// WETH on the source chain
    pub weth_address: String,

    /// USDC on the source chain
    pub usdc_address: String,

    /// Contract exposing `claimAndRedeem` on the destination chain
    pub bank_address: Option<String>,
}

impl Default for ContractsConfig {
    fn default() -> Self {
        Self {
            bridge_address: "0x528e26b25a34a4A5d0dbDa1d57D318153d2ED582".to_string(),
            vault_bridge_address: "0x0000000000000000000000000000000000000000".to_string(),
            vault_address: "0x5d7F21089decc3145C603eC3cdC4D6330dE89DF2".to_string(),
            native_token_address: "0x0000000000000000000000000000000000000000".to_string(),
            weth_address: "0x7b79995e5f793A07Bc00c21412e50Ecae098E7f9".to_string(),
            usdc_address: "0x1c7D4B196Cb0C7B01d743Fbc6116a902379C7238".to_string(),
            bank_address: None,
        }
    }
}

/// Parsed contract addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContractAddresses {
    pub bridge: Address,
    pub vault_bridge: Address,
    pub vault: Address,
    pub native_token: Address,
    pub weth: Address,
    pub usdc: Address,
    pub bank: Option<Address>,
}

impl ContractsConfig {
    /// Parse every configured address
    pub fn parse(&self) -> Result<ContractAddresses> {
        Ok(ContractAddresses {
            bridge: parse_address("contracts.bridge_address", &self.bridge_address)?,
            vault_bridge: parse_address("contracts.vault_bridge_address", &self.vault_bridge_address)?,
            vault: parse_address("contracts.vault_address", &self.vault_address)?,
            native_token: parse_address("contracts.native_token_address", &self.native_token_address)?,
            weth: parse_address("contracts.weth_address", &self.weth_address)?,
            usdc: parse_address("contracts.usdc_address", &self.usdc_address)?,
            bank: self
                .bank_address
                .as_deref()
                .map(|addr| parse_address("contracts.bank_address", addr))
                .transpose()?,
        })
    }
}

/// Ledger backend kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerBackend {
    /// Hosted Supabase (PostgREST)
    Supabase,
    /// In-process store, lost on restart
    Memory,
}

/// Ledger settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Which backend to use
    pub backend: LedgerBackend,

    /// Supabase project URL
    pub supabase_url: String,

    /// Supabase anon/service key, only read from the environment
    #[serde(skip)]
    pub supabase_key: Option<String>,

    /// Table holding bridge deposits
    pub transaction_table: String,

    /// Table holding withdrawals
    pub withdraw_table: String,

    /// HTTP timeout for store requests (seconds)
    pub request_timeout_secs: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            backend: LedgerBackend::Memory,
            supabase_url: String::new(),
            supabase_key: None,
            transaction_table: "transaction_history".to_string(),
            withdraw_table: "withdraw_history".to_string(),
            request_timeout_secs: 10,
        }
    }
}

/// Confirmation polling settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfirmationConfig {
    /// Give up waiting for a receipt after this many seconds
    pub timeout_secs: u64,

    /// First poll interval (ms)
    pub initial_interval_ms: u64,

    /// Poll interval cap (ms)
    pub max_interval_ms: u64,

    /// Exponential backoff factor
    pub backoff_factor: f64,

    /// Add ±20% jitter to poll intervals
    pub add_jitter: bool,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 180,
            initial_interval_ms: 1000,
            max_interval_ms: 10_000,
            backoff_factor: 2.0,
            add_jitter: true,
        }
    }
}

/// Reconciliation job settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Run the job inside `serve`
    pub enabled: bool,

    /// Seconds between scans
    pub interval_secs: u64,

    /// First block to scan on the destination chain
    pub from_block: u64,

    /// Bridged token whose mint Transfer events mark a claim
    pub token_address: String,

    /// Claim recipient, also the payout contract
    pub claim_recipient: String,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 600,
            from_block: 15_132_989,
            token_address: "0x17B8Ee96E3bcB3b04b3e8334de4524520C51caB4".to_string(),
            claim_recipient: "0x9758163C44D813FEc380798A11CCf4531A3Fa3D3".to_string(),
        }
    }
}

/// Price feed settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceFeedConfig {
    /// Simple-price endpoint returning `{"ethereum": {"usd": ...}}`
    pub url: String,

    /// Refresh interval (seconds)
    pub refresh_interval_secs: u64,
}

impl Default for PriceFeedConfig {
    fn default() -> Self {
        Self {
            url: "https://api.coingecko.com/api/v3/simple/price?ids=ethereum&vs_currencies=usd"
                .to_string(),
            refresh_interval_secs: 300,
        }
    }
}

/// Merkle-proof service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProofServiceConfig {
    /// Base URL of the bridge service
    pub url: String,
}

impl Default for ProofServiceConfig {
    fn default() -> Self {
        Self {
            url: "https://rpc-bridge-tatara-s4atxtv7sq.t.conduit.xyz".to_string(),
        }
    }
}

impl BridgeConfig {
    /// Override fields from environment variables
    pub fn apply_env_overrides(&mut self) {
        if let Some(value) = env_var("OPERATOR_PRIVATE_KEY") {
            self.operator_private_key = Some(value);
        }
        if let Some(value) = env_var("SUPABASE_URL") {
            self.ledger.supabase_url = value;
            self.ledger.backend = LedgerBackend::Supabase;
        }
        if let Some(value) = env_var("SUPABASE_ANON_KEY").or_else(|| env_var("SUPABASE_KEY")) {
            self.ledger.supabase_key = Some(value);
        }
        if let Some(value) = env_var("RPC_URL") {
            self.networks.destination.rpc_url = value;
        }
        if let Some(value) = env_var("SOURCE_RPC_URL") {
            self.networks.source.rpc_url = value;
        }
        if let Some(value) = env_var("CONTRACT_ADDRESS") {
            self.contracts.vault_address = value;
        }
        if let Some(value) = env_var("VAULT_BRIDGE_ADDRESS") {
            self.contracts.vault_bridge_address = value;
        }
        if let Some(value) = env_var("BANK_CONTRACT_ADDRESS") {
            self.contracts.bank_address = Some(value);
        }
        if let Some(port) = env_var("PORT").and_then(|p| p.parse().ok()) {
            self.api.port = port;
        }
    }
}

fn env_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Parse a hex address, naming the config field on failure
pub fn parse_address(field: &str, value: &str) -> Result<Address> {
    value
        .trim()
        .parse::<Address>()
        .with_context(|| format!("Invalid address for {}: {}", field, value))
}

/// Configuration manager
pub struct ConfigManager {
    /// Current configuration
    config: RwLock<BridgeConfig>,

    /// Configuration file path
    pub config_path: String,
}

impl ConfigManager {
    /// Create a new configuration manager
    pub fn new(config_path: &str) -> Self {
        Self {
            config: RwLock::new(BridgeConfig::default()),
            config_path: config_path.to_string(),
        }
    }

    /// Load configuration from file, then apply environment overrides
    pub async fn load(&self) -> Result<()> {
        let path = Path::new(&self.config_path);

        let mut config = if path.exists() {
            let config_content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read configuration file: {}", self.config_path))?;

            let config: BridgeConfig = serde_yaml::from_str(&config_content)
                .context("Failed to parse configuration file")?;
            info!("Configuration loaded from {}", self.config_path);
            config
        } else {
            info!("Configuration file not found, using default configuration");
            BridgeConfig::default()
        };

        config.apply_env_overrides();
        debug!(
            "Ledger backend: {:?}, source RPC: {}, destination RPC: {}",
            config.ledger.backend, config.networks.source.rpc_url, config.networks.destination.rpc_url
        );

        *self.config.write().await = config;
        Ok(())
    }

    /// Save configuration to file
    pub async fn save(&self) -> Result<()> {
        let config = self.config.read().await;
        let config_yaml =
            serde_yaml::to_string(&*config).context("Failed to serialize configuration")?;

        let path = Path::new(&self.config_path);

        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory: {:?}", parent))?;
            }
        }

        fs::write(path, config_yaml)
            .with_context(|| format!("Failed to write configuration to file: {}", self.config_path))?;

        info!("Configuration saved to {}", self.config_path);
        Ok(())
    }

    /// Get the current configuration
    pub async fn get_config(&self) -> BridgeConfig {
        self.config.read().await.clone()
    }

    /// Update the configuration
    pub async fn update_config(&self, config: BridgeConfig) -> Result<()> {
        *self.config.write().await = config;
        self.save().await?;
        Ok(())
    }
}

/// Initialize default configuration
pub fn initialize_default_config() -> BridgeConfig {
    BridgeConfig::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = initialize_default_config();

        assert_eq!(config.api.port, 3001);
        assert_eq!(config.networks.source.network_id, 0);
        assert_eq!(config.networks.destination.network_id, 29);
        assert_eq!(config.reconciler.interval_secs, 600);
        assert_eq!(config.reconciler.from_block, 15_132_989);
        assert_eq!(config.price_feed.refresh_interval_secs, 300);
        assert_eq!(config.ledger.backend, LedgerBackend::Memory);
        assert!(config.operator_private_key.is_none());
    }

    #[test]
    fn test_default_addresses_parse() {
        let addresses = BridgeConfig::default().contracts.parse().unwrap();

        assert_eq!(addresses.native_token, Address::zero());
        assert_eq!(
            addresses.bridge,
            "0x528e26b25a34a4A5d0dbDa1d57D318153d2ED582".parse::<Address>().unwrap()
        );
        assert!(addresses.bank.is_none());
    }

    #[test]
    fn test_invalid_address_names_field() {
        let mut contracts = ContractsConfig::default();
        contracts.vault_address = "0x1234".to_string();

        let err = contracts.parse().unwrap_err();
        assert!(err.to_string().contains("contracts.vault_address"));
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "api:\n  port: 8080\nledger:\n  backend: supabase\n  supabase_url: https://x.supabase.co\n";
        let config: BridgeConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.api.port, 8080);
        assert!(config.api.enable_api);
        assert_eq!(config.ledger.backend, LedgerBackend::Supabase);
        assert_eq!(config.ledger.transaction_table, "transaction_history");
        assert_eq!(config.confirmation.timeout_secs, 180);
    }

    #[test]
    fn test_network_ids_resolve() {
        let networks = NetworksConfig::default();
        assert_eq!(networks.source.network().unwrap(), Network::Sepolia);
        assert_eq!(networks.destination.network().unwrap(), Network::Katana);

        let mut unknown = networks.destination.clone();
        unknown.network_id = 1;
        let err = unknown.network().unwrap_err();
        assert!(err.to_string().contains("Unsupported bridge network id 1"));
    }

    #[test]
    fn test_general_section_and_cli_overrides() {
        let yaml = "general:\n  log_level: debug\n  json_logs: true\n";
        let config: BridgeConfig = serde_yaml::from_str(yaml).unwrap();

        let from_file = config.general.clone().with_cli(None, false);
        assert_eq!(from_file.log_level, "debug");
        assert!(from_file.json_logs);

        let overridden = GeneralConfig::default().with_cli(Some("warn".to_string()), true);
        assert_eq!(overridden.log_level, "warn");
        assert!(overridden.json_logs);
    }

    #[test]
    fn test_secrets_not_serialized() {
        let mut config = BridgeConfig::default();
        config.operator_private_key = Some("0xdeadbeef".to_string());
        config.ledger.supabase_key = Some("secret".to_string());

        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(!yaml.contains("deadbeef"));
        assert!(!yaml.contains("secret"));
    }
}
