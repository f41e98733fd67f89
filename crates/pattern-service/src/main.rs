mod input;
mod runner;

use anyhow::{Context, Result};
use clap::Parser;
use pattern_engine::{
    EngineConfig, HttpClassifier, LogSink, MemoryGateway, PatternClassifier, RuleBasedClassifier,
    SessionHub, SharedGateway,
};
use runner::Runner;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config file (environment overrides still apply)
    #[arg(long)]
    config: Option<PathBuf>,

    /// JSON-lines input file; stdin when omitted
    #[arg(long)]
    input: Option<PathBuf>,

    /// Base URL of the external classifier service
    #[arg(long)]
    classifier_url: Option<String>,

    /// Path to RocksDB state directory (requires the rocksdb-store feature)
    #[arg(long)]
    state_path: Option<PathBuf>,

    /// Print the effective configuration and exit
    #[arg(long, default_value_t = false)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pattern_engine=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => EngineConfig::default(),
    }
    .with_env_overrides()
    .context("applying environment overrides")?;
    config.validate().context("invalid configuration")?;

    if args.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let classifier: Arc<dyn PatternClassifier> = match &args.classifier_url {
        Some(url) => {
            let client = HttpClassifier::new(url, pattern_engine::pattern::http::DEFAULT_TIMEOUT)
                .context("building classifier client")?;
            match client.health().await {
                Ok(health) => info!(
                    url = %client.base_url(),
                    status = %health.status,
                    model_loaded = health.model_loaded,
                    "Classifier service reachable"
                ),
                Err(e) => warn!(url = %client.base_url(), error = %e, "Classifier health check failed"),
            }
            Arc::new(client)
        }
        None => {
            info!("Using rule-based classifier");
            Arc::new(RuleBasedClassifier::default())
        }
    };

    let gateway = open_gateway(args.state_path.as_ref())?;
    let hub = SessionHub::new(config, classifier, gateway, Arc::new(LogSink))
        .context("building session hub")?
        .shared();
    let runner = Runner::new(hub);

    let stats = match &args.input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("opening input {}", path.display()))?;
            runner.run(BufReader::new(file), tokio::io::stdout()).await?
        }
        None => {
            runner
                .run(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
                .await?
        }
    };

    info!(lines = stats.lines, failed = stats.failed, "Input drained");
    Ok(())
}

#[cfg(feature = "rocksdb-store")]
fn open_gateway(state_path: Option<&PathBuf>) -> Result<SharedGateway> {
    match state_path {
        Some(path) => {
            info!("State path: {}", path.display());
            let store = pattern_engine::RocksGateway::open(path)
                .with_context(|| format!("opening state store at {}", path.display()))?;
            Ok(store.shared())
        }
        None => Ok(MemoryGateway::new().shared()),
    }
}

#[cfg(not(feature = "rocksdb-store"))]
fn open_gateway(state_path: Option<&PathBuf>) -> Result<SharedGateway> {
    if let Some(path) = state_path {
        warn!(
            "Ignoring --state-path {} (built without rocksdb-store)",
            path.display()
        );
    }
    Ok(MemoryGateway::new().shared())
}
