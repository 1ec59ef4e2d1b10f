// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use header_relayer::config::RelayerNodeConfig;
use header_relayer::metrics::start_prometheus_server;
use header_relayer::node::{get_init_data, run_relayer_node};
use header_relayer_config::Config;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(rename_all = "kebab-case")]
#[clap(name = env!("CARGO_BIN_NAME"))]
#[clap(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    #[clap(long)]
    pub config_path: PathBuf,
    /// Passphrase for JSON keystore wallets; unused for raw hex keys.
    #[clap(long, default_value = "")]
    pub password: String,
    /// Print the destination contract's init payload for the given chain as
    /// hex and exit instead of running the relayer.
    #[clap(long)]
    pub init_data_chain: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = RelayerNodeConfig::load(&args.config_path)?;

    if let Some(chain) = args.init_data_chain {
        let data = get_init_data(&config, &args.password, &chain).await?;
        println!("{}", hex::encode(data));
        return Ok(());
    }

    let prometheus_registry = prometheus::Registry::new();
    let _metrics_server = start_prometheus_server(config.metrics_port, prometheus_registry.clone());
    info!("Metrics server started at port {}", config.metrics_port);

    let handle = run_relayer_node(config, &args.password, prometheus_registry).await?;
    handle
        .await
        .map_err(|e| anyhow::anyhow!("Task join error: {e}"))?
}
