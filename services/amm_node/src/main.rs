use amm_node::Node;
use anyhow::{Context, Result};
use clap::Parser;
use kestrel_config::NodeConfig;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Base configuration file
    #[arg(short, long, default_value = "config/node.toml")]
    config: PathBuf,

    /// Environment override from `environments/<name>.toml`
    #[arg(short, long)]
    environment: Option<String>,
}

fn init_tracing(config: &NodeConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.global.log_level.as_str()));
    let json = config.global.json_logs;

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = NodeConfig::load(Some(args.config.as_path()), args.environment.as_deref())
        .with_context(|| format!("Failed to load {:?}", args.config))?;
    config.expand_env_vars()?;
    config.validate()?;

    init_tracing(&config);
    info!("Starting Kestrel node");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let node = Arc::new(Node::build(config)?);

    let snapshots = tokio::spawn(node.clone().snapshot_loop());
    let resume = tokio::spawn(node.clone().resume_loop());

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            info!("Shutdown requested");
        }
        result = snapshots => error!("Snapshot loop exited: {:?}", result),
        result = resume => error!("Resume loop exited: {:?}", result),
    }

    node.persist()?;
    info!("Kestrel node stopped");
    Ok(())
}
