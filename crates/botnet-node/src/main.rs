//! BotNet node daemon.
//!
//! Loads `botnet.toml`, boots the kernel and keeps its background loops
//! (discovery, neighbor health, cache sweeps) running until Ctrl+C.

mod cli;

use anyhow::{bail, Context};
use botnet_kernel::config::{default_config_path, load_config};
use botnet_kernel::BotnetNode;
use botnet_types::config::NodeConfig;
use clap::Parser;
use cli::{Cli, Commands};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

fn init_tracing(filter: &str, json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref());

    let filter = cli.log_level.clone().unwrap_or_else(|| config.log_level.clone());
    init_tracing(&filter, cli.json_logs || config.log_format == "json");

    match cli.command.unwrap_or(Commands::Start) {
        Commands::Init { force } => {
            let path = cli.config.unwrap_or_else(default_config_path);
            cmd_init(&path, force)
        }
        Commands::Start => cmd_start(config),
        Commands::Identity => cmd_identity(config),
    }
}

fn cmd_init(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let rendered = render_default_config()?;
    std::fs::write(path, rendered).with_context(|| format!("writing {}", path.display()))?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn render_default_config() -> anyhow::Result<String> {
    let mut config = NodeConfig::default();
    config.data_dir = default_data_dir();
    toml::to_string_pretty(&config).context("serializing default config")
}

fn default_data_dir() -> PathBuf {
    default_config_path()
        .parent()
        .map(|p| p.join("data"))
        .unwrap_or_else(|| PathBuf::from("./data"))
}

fn cmd_start(config: NodeConfig) -> anyhow::Result<()> {
    let rt = tokio::runtime::Runtime::new().context("starting tokio runtime")?;
    rt.block_on(async move {
        let node = Arc::new(BotnetNode::boot(config).context("booting node")?);
        node.start();
        info!(
            node_id = %node.node_id(),
            public_key = %node.get_node_public_key(),
            tasks = ?node.running_tasks(),
            "Node running, press Ctrl+C to stop"
        );

        tokio::signal::ctrl_c()
            .await
            .context("waiting for Ctrl+C")?;
        info!("Ctrl+C received, shutting down");
        node.shutdown().await;
        Ok(())
    })
}

fn cmd_identity(config: NodeConfig) -> anyhow::Result<()> {
    let rt = tokio::runtime::Runtime::new().context("starting tokio runtime")?;
    let node = rt.block_on(async move { BotnetNode::boot(config) }).context("booting node")?;
    println!("node_id     {}", node.node_id());
    println!("public_key  {}", node.get_node_public_key());
    for (name, value) in node.dns_records() {
        println!("{name} TXT \"{value}\"");
    }
    Ok(())
}
