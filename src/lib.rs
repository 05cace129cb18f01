//! Katana Bridge Backend Library
//!
//! Backend cho bridge Sepolia -> Katana: rút tiền từ vault bằng operator
//! key, điều phối bridge deposit, ledger giao dịch, đọc số dư, đối soát
//! claim và claim thủ công.

pub mod api;
pub mod balance;
pub mod chain;
pub mod claim;
pub mod config;
pub mod contracts;
pub mod error;
pub mod events;
pub mod ledger;
pub mod notifications;
pub mod orchestrator;
pub mod price;
pub mod reconciler;
pub mod withdrawal;

// Re-export của common::bridge_types để các module sử dụng chung
pub use common::bridge_types;

pub use crate::config::initialize_default_config;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::ApiContext;
use crate::balance::{BalanceReader, TrackedToken};
use crate::chain::{ChainReader, ConfirmationPolicy, EvmReader, LocalSigner, TransactionSender};
use crate::claim::{ClaimService, MerkleProofClient};
use crate::config::{BridgeConfig, ConfigManager, ContractAddresses, GeneralConfig};
use crate::contracts::VaultContract;
use crate::events::EventBus;
use crate::ledger::{create_ledger, Ledger};
use crate::notifications::NotificationCenter;
use crate::orchestrator::BridgeOrchestrator;
use crate::price::{CoinGeckoFeed, PriceTracker};
use crate::reconciler::Reconciler;
use crate::withdrawal::WithdrawalService;

/// Services built from one configuration
pub struct Services {
    pub addresses: ContractAddresses,
    pub policy: ConfirmationPolicy,

    /// Source chain (deposits, wallet balances)
    pub source: Arc<dyn ChainReader>,

    /// Destination chain (vault, claims)
    pub destination: Arc<dyn ChainReader>,

    /// Operator key on the destination chain, if configured
    pub operator: Option<Arc<dyn TransactionSender>>,

    pub ledger: Arc<dyn Ledger>,
    pub withdrawals: Arc<WithdrawalService>,
    pub balances: Arc<BalanceReader>,
    pub prices: Arc<PriceTracker>,
    pub orchestrator: Arc<BridgeOrchestrator>,
    pub reconciler: Arc<Reconciler>,
}

impl Services {
    /// Connect to both chains and wire every service
    pub async fn connect(config: &BridgeConfig, events: EventBus) -> Result<Self> {
        let addresses = config.contracts.parse()?;
        let source_network = config.networks.source.network()?;
        let destination_network = config.networks.destination.network()?;
        info!("Bridging {} -> {}", source_network, destination_network);
        let policy = ConfirmationPolicy::from_config(&config.confirmation);

        let source: Arc<dyn ChainReader> = Arc::new(
            EvmReader::connect(&config.networks.source.rpc_url)
                .with_context(|| format!("Failed to connect to {}", config.networks.source.name))?,
        );
        let destination: Arc<dyn ChainReader> = Arc::new(
            EvmReader::connect(&config.networks.destination.rpc_url)
                .with_context(|| format!("Failed to connect to {}", config.networks.destination.name))?,
        );

        let operator: Option<Arc<dyn TransactionSender>> = match config.operator_private_key.as_deref() {
            Some(key) => {
                let signer = LocalSigner::connect(&config.networks.destination.rpc_url, key)
                    .await
                    .context("Failed to load operator key")?;
                Some(Arc::new(signer))
            }
            None => {
                warn!("OPERATOR_PRIVATE_KEY not set: withdrawals and payouts are disabled");
                None
            }
        };

        let ledger = create_ledger(&config.ledger).context("Failed to create ledger")?;
        debug!("Ledger backend: {:?}", config.ledger.backend);

        let withdrawals = Arc::new(WithdrawalService::new(
            destination.clone(),
            operator.clone(),
            addresses.vault,
            ledger.clone(),
            policy.clone(),
        ));

        let balances = Arc::new(
            BalanceReader::new(
                source.clone(),
                vec![
                    TrackedToken::new("WETH", addresses.weth),
                    TrackedToken::new("USDC", addresses.usdc),
                ],
            )
            .with_vault(VaultContract::new(addresses.vault, destination.clone())),
        );

        let prices = Arc::new(PriceTracker::new(Arc::new(CoinGeckoFeed::from_config(
            &config.price_feed,
        ))));

        let orchestrator = Arc::new(BridgeOrchestrator::new(
            source.clone(),
            ledger.clone(),
            &addresses,
            policy.clone(),
            events,
        ));

        let reconciler = Arc::new(Reconciler::from_config(
            &config.reconciler,
            destination.clone(),
            ledger.clone(),
            operator.clone(),
            policy.clone(),
        )?);

        Ok(Self {
            addresses,
            policy,
            source,
            destination,
            operator,
            ledger,
            withdrawals,
            balances,
            prices,
            orchestrator,
            reconciler,
        })
    }

    pub fn api_context(&self, default_page_size: usize) -> ApiContext {
        ApiContext {
            withdrawals: self.withdrawals.clone(),
            ledger: self.ledger.clone(),
            balances: self.balances.clone(),
            prices: self.prices.clone(),
            default_page_size,
        }
    }

    /// Operator claim; needs the bank contract and the operator key
    pub fn claim_service(&self, config: &BridgeConfig) -> Result<ClaimService> {
        let bank = self
            .addresses
            .bank
            .ok_or_else(|| anyhow!("BANK_CONTRACT_ADDRESS is not configured"))?;
        let operator = self
            .operator
            .clone()
            .ok_or_else(|| anyhow!("OPERATOR_PRIVATE_KEY is not configured"))?;
        let proofs = MerkleProofClient::new(&config.proof_service.url)?;

        Ok(ClaimService::new(
            Arc::new(proofs),
            self.destination.clone(),
            operator,
            bank,
            self.policy.clone(),
        ))
    }
}

/// Application state
///
/// Giữ config, event bus, các service và background task. Vòng đời:
/// `new` -> `init` -> `start` -> `stop`.
pub struct AppState {
    /// Global configuration manager
    pub config: Arc<ConfigManager>,

    /// Bridge progress updates
    pub events: EventBus,

    /// Toast store following `events`
    pub notifications: Arc<NotificationCenter>,

    /// Set by `init`
    pub services: Option<Arc<Services>>,

    /// Stops the API server gracefully
    pub shutdown_tx: Option<oneshot::Sender<()>>,

    /// Handles to background tasks spawned by `start`
    pub background_tasks: Vec<JoinHandle<()>>,
}

impl AppState {
    pub fn new(config_manager: Arc<ConfigManager>) -> Self {
        Self {
            config: config_manager,
            events: EventBus::default(),
            notifications: Arc::new(NotificationCenter::new()),
            services: None,
            shutdown_tx: None,
            background_tasks: Vec::new(),
        }
    }

    /// Build every service from the loaded configuration
    pub async fn init(&mut self) -> Result<()> {
        info!("Initializing Katana bridge backend");

        let config = self.config.get_config().await;
        let services = Services::connect(&config, self.events.clone()).await?;
        self.services = Some(Arc::new(services));

        info!("Initialization complete");
        Ok(())
    }

    pub fn services(&self) -> Result<Arc<Services>> {
        self.services
            .clone()
            .ok_or_else(|| anyhow!("AppState is not initialized"))
    }

    /// Start the API server and background jobs
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting services");
        let config = self.config.get_config().await;
        let services = self.services()?;

        self.background_tasks
            .push(self.notifications.clone().follow(&self.events));

        self.background_tasks.push(
            services
                .prices
                .clone()
                .spawn(Duration::from_secs(config.price_feed.refresh_interval_secs)),
        );

        if config.reconciler.enabled {
            self.background_tasks.push(
                services
                    .reconciler
                    .clone()
                    .spawn(Duration::from_secs(config.reconciler.interval_secs)),
            );
        } else {
            info!("Reconciler is disabled in config");
        }

        if config.api.enable_api {
            let (shutdown_tx, shutdown_rx) = oneshot::channel();
            self.shutdown_tx = Some(shutdown_tx);

            let ctx = Arc::new(services.api_context(config.api.default_page_size));
            let (addr, task) = init_api_server(ctx, config.api.port, shutdown_rx)?;
            info!("API server listening on {}", addr);
            self.background_tasks.push(task);
        } else {
            info!("API server is disabled in config");
        }

        info!("All services started");
        Ok(())
    }

    /// Stop the API server and abort background jobs
    pub async fn stop(&mut self) -> Result<()> {
        info!("Stopping Katana bridge backend");

        if let Some(tx) = self.shutdown_tx.take() {
            if tx.send(()).is_err() {
                debug!("API server already stopped");
            }
        }

        // Đợi API server đóng kết nối
        tokio::time::sleep(Duration::from_millis(500)).await;

        for task in self.background_tasks.drain(..) {
            task.abort();
        }

        info!("Stopped");
        Ok(())
    }
}

fn level_directive(log_level: &str) -> &'static str {
    match log_level.to_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" => "warn",
        "error" => "error",
        _ => "info",
    }
}

/// Initialize logging from the `general` section. `RUST_LOG` overrides
/// `log_level` when set.
pub fn init_logging(general: &GeneralConfig) -> Result<()> {
    let log_level = general.log_level.as_str();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_directive(log_level)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let result = if general.json_logs {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| anyhow!("Failed to set global default subscriber: {}", e))?;

    info!("Logging initialized at {} level", log_level);
    Ok(())
}

/// Version information
pub mod version {
    /// Current version from Cargo.toml
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");

    /// Package name from Cargo.toml
    pub const NAME: &str = env!("CARGO_PKG_NAME");
}

/// Get a greeting message with version info
pub fn greeting() -> String {
    format!("Katana Bridge Backend ({} v{}) starting up", version::NAME, version::VERSION)
}

/// Bind the REST API and serve it until `shutdown_rx` fires
pub fn init_api_server(
    ctx: Arc<ApiContext>,
    port: u16,
    shutdown_rx: oneshot::Receiver<()>,
) -> Result<(SocketAddr, JoinHandle<()>)> {
    let (addr, server) = warp::serve(api::routes(ctx))
        .try_bind_with_graceful_shutdown(([0, 0, 0, 0], port), async move {
            shutdown_rx.await.ok();
        })
        .with_context(|| format!("Failed to bind API server on port {}", port))?;

    Ok((addr, tokio::spawn(server)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_directive() {
        assert_eq!(level_directive("DEBUG"), "debug");
        assert_eq!(level_directive("warn"), "warn");
        assert_eq!(level_directive("verbose"), "info");
    }

    #[test]
    fn test_greeting_has_version() {
        assert!(greeting().contains(version::VERSION));
        assert!(greeting().contains("katana-bridge"));
    }

    #[tokio::test]
    async fn test_services_required_before_start() {
        let mut state = AppState::new(Arc::new(ConfigManager::new("does-not-exist.yaml")));

        assert!(state.services().is_err());
        assert!(state.start().await.is_err());
        assert!(state.background_tasks.is_empty());
    }
}
