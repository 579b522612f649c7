// src/main.rs
use anyhow::{Context, Result};
use clap::Parser;
use moment_gateway::{
    config::{LogFormat, LoggingConfig},
    Gateway, GatewayConfig, GatewayError, GatewayServer, VERSION,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "moment-gateway", version, about = "Prefix-routing HTTP gateway")]
struct Args {
    /// Configuration file (YAML, JSON or TOML)
    #[arg(short, long, env = "CONFIG_FILE", default_value = "config.yml")]
    config: PathBuf,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = GatewayConfig::load_from_file(&args.config)
        .with_context(|| format!("failed to load configuration from {}", args.config.display()))?;

    init_logging(&config.logging);
    tracing::info!("Starting moment-gateway v{}", VERSION);

    if args.check {
        Gateway::from_config(&config).map_err(startup_error)?;
        tracing::info!("Configuration {} is valid", args.config.display());
        return Ok(());
    }

    let server = GatewayServer::new(config).map_err(startup_error)?;
    server.run().await.map_err(startup_error)?;

    Ok(())
}

/// Attach context separating a bad configuration from a runtime failure.
fn startup_error(err: GatewayError) -> anyhow::Error {
    let context = if err.is_configuration() {
        "invalid gateway configuration"
    } else {
        "gateway failed"
    };
    anyhow::Error::new(err).context(context)
}

/// RUST_LOG overrides the configured level.
fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match logging.format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Text => subscriber.init(),
    }
}
