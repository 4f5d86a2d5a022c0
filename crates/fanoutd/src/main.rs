//! fanoutd: fanout worker daemon
//!
//! Usage:
//!   fanoutd [--config fanout.toml] [--listen 0.0.0.0:50051] [--secure]
//!
//! Serves until killed; there is no shutdown RPC.

use anyhow::Result;
use clap::{Parser, ValueEnum};
use prometheus_client::registry::Registry;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use fanout_core::config::FanoutConfig;
use fanoutd::{EncryptionWorker, WorkerMetrics};

#[derive(Parser, Debug)]
#[command(name = "fanoutd", version, about = "fanout chunk cipher worker")]
struct Cli {
    /// Path to fanout.toml configuration file
    #[arg(long, short = 'c', env = "FANOUT_CONFIG", default_value = "fanout.toml")]
    config: PathBuf,

    /// gRPC listen address (overrides config)
    #[arg(long, short = 'l')]
    listen: Option<String>,

    /// Identifier reported to the coordinator (overrides config)
    #[arg(long)]
    worker_id: Option<String>,

    /// Serve over TLS using server.crt, server.key and ca.crt
    #[arg(long)]
    secure: bool,

    /// Directory holding the TLS files (overrides config)
    #[arg(long)]
    tls_dir: Option<PathBuf>,

    /// Prometheus metrics address, e.g. 127.0.0.1:9100 (overrides config)
    #[arg(long)]
    metrics_addr: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "FANOUT_LOG")]
    log: Option<String>,

    /// Log format (json, text)
    #[arg(long, env = "FANOUT_LOG_FORMAT")]
    log_format: Option<LogFormat>,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = FanoutConfig::load_or_default(&cli.config)?;
    apply_overrides(&mut config, &cli);

    let format = cli.log_format.clone().unwrap_or(match config.log.format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    });
    init_logging(&config.log.level, &format);

    let worker_id = config.worker.resolved_worker_id();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        worker_id = %worker_id,
        listen = %config.worker.listen,
        tls = config.tls.enabled,
        "fanoutd starting"
    );

    let mut registry = Registry::default();
    let metrics = WorkerMetrics::new(&mut registry);
    let registry = Arc::new(registry);

    if let Some(addr) = config.worker.metrics_addr.clone() {
        let registry = registry.clone();
        tokio::spawn(async move {
            if let Err(e) = fanoutd::metrics::serve(addr, registry).await {
                error!("metrics server failed: {e}");
            }
        });
    }

    let worker = EncryptionWorker::new(worker_id, metrics);
    let tls = config.tls.enabled.then_some(&config.tls);
    fanoutd::run_server(&config.worker.listen, worker, tls).await?;
    Ok(())
}

fn apply_overrides(config: &mut FanoutConfig, cli: &Cli) {
    if let Some(listen) = &cli.listen {
        config.worker.listen = listen.clone();
    }
    if let Some(id) = &cli.worker_id {
        config.worker.worker_id = Some(id.clone());
    }
    if cli.secure {
        config.tls.enabled = true;
    }
    if let Some(dir) = &cli.tls_dir {
        config.tls.dir = dir.clone();
    }
    if let Some(addr) = &cli.metrics_addr {
        config.worker.metrics_addr = Some(addr.clone());
    }
    if let Some(level) = &cli.log {
        config.log.level = level.clone();
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
        }
    }
}
