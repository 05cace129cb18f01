/// Katana Bridge Backend - Main entry point
///
/// REST server, reconciliation job and operator commands.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use ethers::types::U256;
use tokio::signal;
use tracing::{error, info, warn};

use katana_bridge::{
    chain::{LocalSigner, TransactionSender},
    claim::{encode_token_metadata, ClaimRequest},
    config::{parse_address, ConfigManager},
    greeting, init_logging, initialize_default_config,
    orchestrator::BridgeParams,
    AppState, Services,
};

/// Command line arguments
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "config/bridge_config.yaml")]
    config: String,

    /// Log level (trace, debug, info, warn, error), overrides `general.log_level`
    #[arg(short, long)]
    log_level: Option<String>,

    /// Emit JSON log lines, overrides `general.json_logs`
    #[arg(long)]
    json_logs: bool,

    /// Subcommand
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Subcommands
#[derive(Subcommand)]
enum Commands {
    /// Generate default configuration
    Init,

    /// Run the API server and background jobs
    Serve,

    /// Reconcile claims with the ledger
    Reconcile {
        /// Scan once and exit
        #[arg(long)]
        once: bool,
    },

    /// Claim a deposit through the bank contract with the operator key
    Claim {
        /// Deposit count of the bridged deposit
        #[arg(long)]
        deposit_count: u32,

        /// Network the deposit was made on
        #[arg(long, default_value_t = 29)]
        net_id: u32,

        /// Amount in base units
        #[arg(long)]
        amount: String,

        /// Token address on the origin network
        #[arg(long)]
        origin_token: String,

        /// Recipient, defaults to the operator
        #[arg(long)]
        destination: Option<String>,

        #[arg(long, default_value = "Vault Bridge Wrapped Ether")]
        token_name: String,

        #[arg(long, default_value = "WETH")]
        token_symbol: String,

        #[arg(long, default_value_t = 18)]
        decimals: u8,
    },

    /// Bridge from the source chain with the operator key
    Bridge {
        /// Token address, defaults to the native asset
        #[arg(long)]
        token: Option<String>,

        /// Amount in base units
        #[arg(long)]
        amount: String,

        /// Use the vault-bridge deposit (native asset only)
        #[arg(long)]
        deposit: bool,

        /// Do not force a global exit root update
        #[arg(long)]
        no_exit_root_update: bool,
    },

    /// Print balances of an address
    Balances {
        address: String,
    },

    /// Print the vault contract's addresses
    ContractInfo,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    let config_manager = Arc::new(ConfigManager::new(&cli.config));

    // `init` phải chạy được cả khi file config hỏng
    if let Err(e) = config_manager.load().await {
        eprintln!("Failed to load {}: {:#}", cli.config, e);
    }
    let general = config_manager
        .get_config()
        .await
        .general
        .with_cli(cli.log_level.clone(), cli.json_logs);
    init_logging(&general)?;
    println!("{}", greeting());

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Init => init_config(config_manager).await?,
        Commands::Serve => run_server(config_manager).await?,
        Commands::Reconcile { once } => run_reconciler(config_manager, once).await?,
        Commands::Claim {
            deposit_count,
            net_id,
            amount,
            origin_token,
            destination,
            token_name,
            token_symbol,
            decimals,
        } => {
            let services = connect(&config_manager).await?;
            let config = config_manager.get_config().await;
            let claim = services.claim_service(&config)?;

            let destination = match destination {
                Some(addr) => parse_address("--destination", &addr)?,
                None => services
                    .operator
                    .as_ref()
                    .map(|op| op.address())
                    .ok_or_else(|| anyhow!("OPERATOR_PRIVATE_KEY is not configured"))?,
            };

            let request = ClaimRequest {
                deposit_count,
                net_id,
                destination,
                amount: parse_amount(&amount)?,
                origin_token: parse_address("--origin-token", &origin_token)?,
                metadata: encode_token_metadata(&token_name, &token_symbol, decimals),
            };

            let receipt = claim.claim_and_redeem(&request).await?;
            info!(
                "Claim confirmed: {:?} in block {:?}",
                receipt.transaction_hash, receipt.block_number
            );
        }
        Commands::Bridge {
            token,
            amount,
            deposit,
            no_exit_root_update,
        } => {
            run_bridge(config_manager, token, &amount, deposit, !no_exit_root_update).await?;
        }
        Commands::Balances { address } => {
            let services = connect(&config_manager).await?;
            let owner = parse_address("address", &address)?;

            let (snapshot, price) = futures::join!(services.balances.snapshot(owner), services.prices.current());
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            match price {
                Ok(quote) => println!("ETH/USD: {:.2}", quote.usd),
                Err(e) => warn!("{}", e),
            }
        }
        Commands::ContractInfo => {
            let services = connect(&config_manager).await?;
            let info = services.withdrawals.contract_info().await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
    }

    Ok(())
}

/// Initialize configuration with defaults
async fn init_config(config_manager: Arc<ConfigManager>) -> Result<()> {
    info!("Initializing default configuration at {}", config_manager.config_path);

    config_manager.update_config(initialize_default_config()).await?;

    info!("Default configuration generated successfully");
    Ok(())
}

async fn connect(config_manager: &ConfigManager) -> Result<Services> {
    config_manager.load().await?;
    let config = config_manager.get_config().await;
    Services::connect(&config, Default::default()).await
}

fn parse_amount(amount: &str) -> Result<U256> {
    let value = U256::from_dec_str(amount.trim()).map_err(|e| anyhow!("Invalid amount {}: {:?}", amount, e))?;
    if value.is_zero() {
        return Err(anyhow!("Amount must be greater than 0"));
    }
    Ok(value)
}

/// Run the API server and background jobs until Ctrl+C
async fn run_server(config_manager: Arc<ConfigManager>) -> Result<()> {
    config_manager.load().await?;

    let mut app_state = AppState::new(config_manager);
    app_state.init().await?;
    app_state.start().await?;

    info!("Server started. Press Ctrl+C to stop");
    wait_for_shutdown().await;

    app_state.stop().await?;
    Ok(())
}

async fn run_reconciler(config_manager: Arc<ConfigManager>, once: bool) -> Result<()> {
    let services = connect(&config_manager).await?;

    if once {
        let report = services.reconciler.run_once().await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let config = config_manager.get_config().await;
    let task = services
        .reconciler
        .clone()
        .spawn(std::time::Duration::from_secs(config.reconciler.interval_secs));

    wait_for_shutdown().await;
    task.abort();
    Ok(())
}

async fn run_bridge(
    config_manager: Arc<ConfigManager>,
    token: Option<String>,
    amount: &str,
    deposit: bool,
    force_update_global_exit_root: bool,
) -> Result<()> {
    config_manager.load().await?;
    let config = config_manager.get_config().await;

    let key = config
        .operator_private_key
        .as_deref()
        .ok_or_else(|| anyhow!("OPERATOR_PRIVATE_KEY is not configured"))?;
    let signer = LocalSigner::connect(&config.networks.source.rpc_url, key)
        .await
        .context("Failed to load operator key on the source chain")?;

    info!("Bridging from {:?}", signer.address());

    let app_state = AppState::new(config_manager.clone());
    let services = Services::connect(&config, app_state.events.clone()).await?;
    let mut updates = app_state.events.subscribe();

    let token = match token {
        Some(addr) => parse_address("--token", &addr)?,
        None => services.addresses.native_token,
    };
    if deposit && !services.orchestrator.is_native(token) {
        return Err(anyhow!("--deposit only bridges the native asset"));
    }

    let params = BridgeParams {
        token,
        amount: parse_amount(amount)?,
        source_network: config.networks.source.network()?.id(),
        destination_network: config.networks.destination.network()?.id(),
        force_update_global_exit_root,
    };

    let result = if deposit {
        services.orchestrator.deposit_and_bridge(&params, &signer).await
    } else {
        services.orchestrator.bridge_asset(&params, &signer).await
    };

    while let Ok(update) = updates.try_recv() {
        app_state.notifications.apply(&update).await;
    }
    for toast in app_state.notifications.active().await {
        println!("[{:?}] {}: {}", toast.kind, toast.title, toast.message);
    }

    let outcome = result?;
    info!(
        "Bridge confirmed: {:?} (deposit count {:?}, block {:?})",
        outcome.transaction_hash, outcome.deposit_count, outcome.block_number
    );
    if outcome.record.is_none() {
        warn!("Bridge succeeded but was not recorded in the ledger");
    }
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C)
async fn wait_for_shutdown() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }
}
