//! Tessera node binary.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tessera_consensus::Identity;
use tessera_node::node::{EmbeddedNode, RemoteNode, Sequencer};
use tessera_node::observability::{init_logging, LogFormat};
use tessera_node::{api, NodeConfig};

/// Tessera node - ordered blocks in, deterministic state out
#[derive(Parser, Debug)]
#[command(name = "tessera-node")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Data directory (overrides the configuration file)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run state, API and the solo ordering service in one process
    Embedded,
    /// Run state and API, taking blocks from a remote sequencer
    Remote,
    /// Run the solo ordering service for a remote node
    Sequencer,
    /// Generate a node key
    Keygen {
        /// Where to write the key (defaults to the configured key file)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Print the effective configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = NodeConfig::load(Some(args.config.as_path()))
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(level) = args.log_level {
        config.log.level = level;
    }
    config.validate()?;

    match &args.command {
        Command::ShowConfig => {
            print!("{}", config.to_yaml()?);
            return Ok(());
        }
        Command::Keygen { out } => {
            let path = out.clone().unwrap_or_else(|| config.key_file());
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
            let identity = Identity::generate();
            identity.write_key_file(&path)?;
            println!("{}", identity.public_key_hex());
            return Ok(());
        }
        _ => {}
    }

    init_logging(&config.log.level, LogFormat::parse(&config.log.format));
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Tessera node");
    tracing::info!(
        api_addr = %config.api.listen_addr,
        data_dir = %config.data_dir.display(),
        command = ?args.command,
        "Node configuration"
    );

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    };

    let result = match args.command {
        Command::Embedded => {
            let listener = api::bind(config.api.listen_addr).await?;
            let node = EmbeddedNode::start(&config)?;
            node.run(listener, shutdown).await
        }
        Command::Remote => {
            let listener = api::bind(config.api.listen_addr).await?;
            let node = RemoteNode::new(&config)?;
            node.run(listener, shutdown).await
        }
        Command::Sequencer => {
            let sequencer = Sequencer::start(&config).await?;
            tracing::info!(addr = %sequencer.local_addr(), "sequencer ready");
            sequencer.run(shutdown).await
        }
        Command::Keygen { .. } | Command::ShowConfig => return Ok(()),
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "node stopped with a fatal error");
    } else {
        tracing::info!("node stopped");
    }
    Ok(result?)
}
