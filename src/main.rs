//! Edition Lister
//!
//! Entry point. Loads configuration, initialises structured logging,
//! connects to the marketplace, then bootstraps and runs the listing loop
//! until supply runs out or Ctrl+C is pressed.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

use edition_lister::config::AppConfig;
use edition_lister::engine::clock::{Shutdown, SystemClock, Timer};
use edition_lister::engine::scheduler::ListingScheduler;
use edition_lister::error::ListerError;
use edition_lister::marketplace::thirdweb::ThirdwebMarketplace;
use edition_lister::marketplace::{DryRunMarketplace, Marketplace};
use edition_lister::pricing::currency::ThreadRandom;

const DEFAULT_CONFIG: &str = "config.toml";

const BANNER: &str = r#"
  edition-lister v0.1.0
  ERC-1155 editions -> thirdweb MarketplaceV3
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let cfg = AppConfig::load(&config_path)?;

    init_logging(&cfg)?;

    println!("{BANNER}");
    if let Err(e) = run(&cfg, &config_path).await {
        error!(error = %format!("{e:#}"), "Fatal error");
        return Err(e);
    }
    Ok(())
}

async fn run(cfg: &AppConfig, config_path: &str) -> Result<()> {
    info!(
        name = %cfg.lister.name,
        config = %config_path,
        dry_run = cfg.lister.dry_run,
        log_file = %cfg.lister.log_file,
        "edition-lister starting up"
    );

    // -- Chain connection ------------------------------------------------

    let secrets = cfg.secrets()?;
    let gas = cfg.gas_settings()?;
    let contracts = cfg.contracts()?;

    info!(
        edition = %contracts.edition,
        marketplace = %contracts.marketplace,
        token_id = cfg.chain.token_id,
        max_fee_gwei = format!("{:.2}", gas.max_fee_per_gas as f64 / 1e9),
        max_priority_fee_gwei = format!("{:.2}", gas.max_priority_fee_per_gas as f64 / 1e9),
        "Chain settings"
    );

    let client = ThirdwebMarketplace::connect(&secrets.rpc_url, &secrets.private_key, contracts, gas)
        .context("Failed to set up marketplace client")?;
    let marketplace: Arc<dyn Marketplace> = if cfg.lister.dry_run {
        warn!("Dry-run mode: no transactions will be sent");
        Arc::new(DryRunMarketplace::new(client))
    } else {
        Arc::new(client)
    };

    // -- Scheduler -------------------------------------------------------

    let curve = cfg.bonding_curve()?;
    if curve.is_some() {
        warn!("Curve progress (sold_count, last_index) is read from config, not chain history; update it before restarting");
    }

    let (trigger, shutdown) = Shutdown::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received.");
            trigger.trigger();
        }
    });

    let timer = Timer::new(Arc::new(SystemClock), shutdown);
    let mut scheduler = ListingScheduler::new(
        marketplace,
        cfg.price_policy()?,
        cfg.scheduler_settings()?,
        timer,
        Box::new(ThreadRandom),
    );

    let state = match scheduler.bootstrap(curve).await {
        Ok(state) => state,
        Err(ListerError::Cancelled) => {
            info!("Shutdown during startup.");
            return Ok(());
        }
        Err(e) => return Err(e).context("Startup failed"),
    };

    info!("Entering listing loop. Press Ctrl+C to stop.");
    let summary = scheduler.run(state).await?;

    info!(
        outcome = ?summary.outcome,
        listings = summary.listings_created,
        cycles = summary.cycles,
        "edition-lister shut down cleanly."
    );
    Ok(())
}

/// Initialise the `tracing` subscriber: console plus an append-only log file.
fn init_logging(cfg: &AppConfig) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("edition_lister=info"));

    let json_logging = std::env::var("LISTER_LOG_JSON").is_ok();

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&cfg.lister.log_file)
        .with_context(|| format!("Failed to open log file: {}", cfg.lister.log_file))?;

    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_target(false)
        .with_writer(Mutex::new(file));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_logging.then(|| fmt::layer().json().with_target(true).with_thread_ids(true)))
        .with((!json_logging).then(|| fmt::layer().with_target(true)))
        .with(file_layer)
        .try_init()
        .context("Failed to initialise logging")?;

    Ok(())
}
