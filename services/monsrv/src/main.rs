//! Modbus Monitoring Service (monsrv)
//!
//! Loads configuration, connects to the device and monitors until Ctrl+C.

use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use errors::VoltageResult;
use monsrv::{MonitorService, MonitorState, MonsrvConfig, SERVICE_NAME, SERVICE_VERSION};

/// Command line arguments
#[derive(Parser, Debug, Clone)]
#[command(
    name = "monsrv",
    version = env!("CARGO_PKG_VERSION"),
    about = "Modbus register monitoring service",
    long_about = None
)]
struct Args {
    /// Configuration file (YAML); `MONSRV_*` environment variables override it
    #[arg(short = 'c', long, env = "MONSRV_CONFIG", default_value = "config/monsrv.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short = 'l', long)]
    log_level: Option<String>,

    /// Validation mode - only validate configuration without starting service
    #[arg(long)]
    validate: bool,
}

fn init_logging(level: &str, json: bool) {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().with_target(false)).init();
    }
}

#[tokio::main]
async fn main() -> VoltageResult<()> {
    let args = Args::parse();

    let config = MonsrvConfig::load(&args.config)?;
    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    init_logging(&level, config.logging.json);

    info!(
        "Starting {} v{} (config: {})",
        SERVICE_NAME,
        SERVICE_VERSION,
        args.config.display()
    );

    if args.validate {
        info!(
            "Configuration valid: device {}, {} registers, {:?} storage",
            config.connection.endpoint(),
            config.registers.len(),
            config.storage.backend
        );
        return Ok(());
    }

    // The first connect happens inside the monitor loop so it counts
    // toward max_consecutive_errors
    let service = MonitorService::from_config(&config).await?;
    service.start_monitoring().await?;

    let mut state_rx = service.subscribe();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Shutdown signal received"),
        _ = state_rx.wait_for(|s| matches!(s, MonitorState::Error(_))) => {},
    }

    let stopped = service.stop_monitoring().await;
    service.shutdown().await;
    if let Err(e) = stopped {
        error!("Monitoring halted: {}", e);
        return Err(e.into());
    }

    info!("{} stopped", SERVICE_NAME);
    Ok(())
}
