//! BotCoordinator - Main Entry Point
//!
//! Coordinates automated trading bots against a shared broker account:
//! pools credentials, schedules evaluations and distributes market data.

use anyhow::Result;
use clap::Parser;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use bot_coordinator::broker::{BrokerGateway, BrokerStreamOpener};
use bot_coordinator::config;
use bot_coordinator::distributor::MarketDataDistributor;
use bot_coordinator::scheduler::{
    CredentialPool, EvaluationScheduler, InMemoryBotRepository, LiveEvaluationWorker,
    PassiveDecisionEngine,
};

/// CLI arguments for the application
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Ignore the config file and read a single credential from the
    /// BROKER_* environment variables
    #[arg(long)]
    env_only: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting BotCoordinator");

    // Load environment variables from .env file if present
    dotenvy::dotenv().ok();

    let app_config = if args.env_only {
        config::load_from_env()?
    } else {
        info!("Configuration file: {}", args.config);
        config::load_config(Some(&args.config))?
    };

    if app_config.credentials.is_empty() {
        anyhow::bail!("no broker credentials configured");
    }
    info!(
        credentials = app_config.credentials.len(),
        "credential pool configured"
    );

    // One gateway per credential, keyed by credential id
    let mut gateways = HashMap::new();
    for credential in &app_config.credentials {
        let gateway = BrokerGateway::with_timeout(
            &app_config.broker.rest_url,
            credential.clone(),
            &app_config.scheduler,
            std::time::Duration::from_secs(app_config.broker.request_timeout_seconds),
        )?;
        gateways.insert(credential.id.clone(), Arc::new(gateway));
    }

    let pool = Arc::new(CredentialPool::new(&app_config.credentials));
    let repository = Arc::new(InMemoryBotRepository::new());
    let worker = Arc::new(LiveEvaluationWorker::new(
        gateways,
        repository.clone(),
        Arc::new(PassiveDecisionEngine),
    ));

    let scheduler = EvaluationScheduler::new(
        pool,
        repository,
        worker,
        &app_config.scheduler,
    );
    scheduler.start();

    let opener = Arc::new(BrokerStreamOpener::new(
        &app_config.broker.stream_url,
        &app_config.settings,
    ));
    let distributor = MarketDataDistributor::start(opener);

    info!("Application initialized successfully");

    // Keep the application running
    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal, cleaning up...");

    scheduler.shutdown();
    // Dropping the last distributor handle stops its intake task and
    // closes every upstream feed.
    drop(distributor);

    Ok(())
}
