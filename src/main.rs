//! Storage Ops control plane
//!
//! Loads the driver configuration, populates the registry and serves the
//! volume API until interrupted.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use storage_ops::{
    ApiServer, ApiServerConfig, BackendFactory, ControlPlaneConfig, Dispatcher, Metrics, Result,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Storage Ops - pluggable block-storage provisioning
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(long, env = "STORAGE_OPS_CONFIG")]
    config: Option<PathBuf>,

    /// REST API bind address, overrides the configuration file
    #[arg(long, env = "API_ADDR")]
    api_addr: Option<String>,

    /// Base driver name, overrides the configuration file
    #[arg(long, env = "BASE_NAME")]
    base_name: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let mut config = match &args.config {
        Some(path) => ControlPlaneConfig::from_file(path)?,
        None => ControlPlaneConfig::default(),
    };
    if let Some(addr) = &args.api_addr {
        config.api_addr = addr.clone();
    }
    if let Some(base_name) = &args.base_name {
        config.base_name = base_name.clone();
    }
    config.validate()?;

    info!("Starting Storage Ops control plane");
    info!("  Version: {}", storage_ops::VERSION);
    info!("  REST API: {}", config.api_addr);
    info!("  Base driver: {}", config.base_name);

    let metrics = Arc::new(Metrics::new()?);
    let registry = Arc::new(BackendFactory::build_registry(&config, &metrics)?);
    let dispatcher = Arc::new(Dispatcher::new(registry, config.base_name.clone(), metrics));

    let api_server = Arc::new(ApiServer::new(
        ApiServerConfig::from_addr(&config.api_addr)?,
        dispatcher,
    ));

    let signal_server = api_server.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received");
                signal_server.shutdown();
            }
            Err(e) => error!("Failed to listen for interrupt: {}", e),
        }
    });

    api_server.run().await?;

    info!("Control plane shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "tower=warn", "tower_http=info", "axum=info"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
