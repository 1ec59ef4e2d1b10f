// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::beacon_client::BeaconClient;
use crate::dest_client::DestinationClient;
use crate::metered_provider::{new_metered_provider, MeteredHttpProvider};
use crate::metrics::RelayerMetrics;
use crate::source_client::SourceClient;
use crate::sync::RelayTiming;
use crate::types::ChainKind;
use anyhow::{anyhow, Context};
use ethers::providers::{Middleware, Provider};
use ethers::signers::LocalWallet;
use ethers::types::Address as EthAddress;
use header_relayer_config::Config;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Key of the destination chain in the `chains` table. Every other entry is a
/// source pairing toward it.
pub const MAIN_CHAIN: &str = "main";

// Retry budget for the startup validation RPCs.
const STARTUP_RETRY_MAX_ELAPSED: Duration = Duration::from_secs(60);

#[serde_as]
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DelayConfig {
    #[serde(default = "default_success_delay")]
    pub success_delay_secs: u64,
    #[serde(default = "default_wait_delay")]
    pub wait_delay_secs: u64,
    #[serde(default = "default_error_delay")]
    pub error_delay_secs: u64,
    #[serde(default = "default_fatal_timeout")]
    pub fatal_timeout_hours: u64,
}

fn default_success_delay() -> u64 {
    15
}
fn default_wait_delay() -> u64 {
    60
}
fn default_error_delay() -> u64 {
    10
}
fn default_fatal_timeout() -> u64 {
    24
}

impl Default for DelayConfig {
    fn default() -> Self {
        Self {
            success_delay_secs: default_success_delay(),
            wait_delay_secs: default_wait_delay(),
            error_delay_secs: default_error_delay(),
            fatal_timeout_hours: default_fatal_timeout(),
        }
    }
}

impl From<&DelayConfig> for RelayTiming {
    fn from(delays: &DelayConfig) -> Self {
        RelayTiming {
            success_delay: Duration::from_secs(delays.success_delay_secs),
            wait_delay: Duration::from_secs(delays.wait_delay_secs),
            error_delay: Duration::from_secs(delays.error_delay_secs),
            fatal_timeout: Duration::from_secs(delays.fatal_timeout_hours * 3600),
        }
    }
}

fn default_kind() -> ChainKind {
    ChainKind::PlainEvm
}

fn default_batch_num() -> u64 {
    10
}

fn default_confirm_num() -> u64 {
    5
}

fn default_max_rewind_depth() -> u64 {
    1000
}

#[serde_as]
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ChainConfig {
    // How headers of this chain are encoded and proven.
    #[serde(default = "default_kind")]
    pub kind: ChainKind,
    // JSON-RPC endpoints; the first is used, the rest are spares for the
    // operator to rotate in.
    pub urls: Vec<String>,
    // Beacon REST endpoint, eth-beacon pairings only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beacon_url: Option<String>,
    // Light-client contract receiving this chain's headers.
    #[serde(default)]
    pub contract: String,
    // Expected chain id of the endpoint; validated at startup when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    // Path of the relayer wallet key (hex private key or JSON keystore).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_path: Option<PathBuf>,
    #[serde(default = "default_batch_num")]
    pub batch_num: u64,
    #[serde(default = "default_confirm_num")]
    pub confirm_num: u64,
    // How far the fork resolver may walk back before giving up on the cycle.
    #[serde(default = "default_max_rewind_depth")]
    pub max_rewind_depth: u64,
    #[serde(default)]
    pub delays: DelayConfig,
    // Drive the beacon pairing through the admin HTTP endpoints instead of
    // the automatic loop.
    #[serde(default)]
    pub admin_mode: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct VerifyServerConfig {
    pub url: String,
    #[serde(default)]
    pub enable: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RelayerNodeConfig {
    // Either MAIN_CHAIN (relay every configured source toward the main
    // chain) or the name of a source chain (relay main-chain blocks to it).
    pub relayer_to_run: String,
    pub chains: BTreeMap<String, ChainConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify_server: Option<VerifyServerConfig>,
    #[serde(default = "default_server_listen_port")]
    pub server_listen_port: u16,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

fn default_server_listen_port() -> u16 {
    8065
}

fn default_metrics_port() -> u16 {
    9184
}

impl Config for RelayerNodeConfig {}

/// Wallet key material: a bare hex private key, or a JSON keystore decrypted
/// with the passphrase given on the command line.
pub fn load_wallet(path: &Path, password: &str) -> anyhow::Result<LocalWallet> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read key file {path:?}"))?;
    let trimmed = content.trim();
    let hex_key = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    if hex_key.len() == 64 && hex_key.chars().all(|c| c.is_ascii_hexdigit()) {
        return LocalWallet::from_str(hex_key).map_err(|e| anyhow!("bad private key: {e}"));
    }
    LocalWallet::decrypt_keystore(path, password)
        .map_err(|e| anyhow!("failed to decrypt keystore {path:?}: {e}"))
}

/// One source chain wired to its destination contract.
#[derive(Debug)]
pub struct PairingRuntime {
    pub name: String,
    pub kind: ChainKind,
    pub source: Arc<SourceClient<MeteredHttpProvider>>,
    pub beacon: Option<BeaconClient>,
    pub dest: Arc<DestinationClient<MeteredHttpProvider>>,
    pub batch_num: u64,
    pub confirm_num: u64,
    pub max_rewind_depth: u64,
    pub timing: RelayTiming,
    pub admin_mode: bool,
}

/// The reverse direction: main-chain blocks relayed to one foreign chain.
#[derive(Debug)]
pub struct CrossChainRuntime {
    pub name: String,
    pub source: Arc<SourceClient<MeteredHttpProvider>>,
    pub dest: Arc<DestinationClient<MeteredHttpProvider>>,
    pub verify_url: Option<String>,
    pub timing: RelayTiming,
}

#[derive(Debug)]
pub struct RelayerRuntime {
    pub pairings: Vec<PairingRuntime>,
    pub cross_chain: Option<CrossChainRuntime>,
    pub server_listen_port: u16,
    pub metrics_port: u16,
}

impl RelayerNodeConfig {
    fn chain(&self, name: &str) -> anyhow::Result<&ChainConfig> {
        self.chains
            .get(name)
            .ok_or_else(|| anyhow!("chain {name:?} not found in config"))
    }

    async fn dest_client(
        &self,
        endpoint_url: &str,
        endpoint_label: &str,
        chain: &ChainConfig,
        password: &str,
        metrics: Arc<RelayerMetrics>,
    ) -> anyhow::Result<Arc<DestinationClient<MeteredHttpProvider>>> {
        let contract = EthAddress::from_str(&chain.contract)
            .with_context(|| format!("bad contract address {:?}", chain.contract))?;
        let key_path = chain
            .key_path
            .as_ref()
            .ok_or_else(|| anyhow!("missing key-path for {endpoint_label}"))?;
        let wallet = load_wallet(key_path, password)?;
        let provider = Arc::new(new_metered_provider(
            endpoint_url,
            endpoint_label,
            metrics.clone(),
        )?);
        let chain_id = match crate::retry_with_max_elapsed_time!(
            provider.get_chainid(),
            STARTUP_RETRY_MAX_ELAPSED
        ) {
            Ok(Ok(chain_id)) => chain_id.as_u64(),
            Ok(Err(e)) | Err(e) => {
                return Err(anyhow!("{endpoint_label}: failed to get chain id: {e}"))
            }
        };
        Ok(Arc::new(DestinationClient::new(
            provider,
            contract,
            wallet,
            chain_id,
            endpoint_label,
            metrics,
        )))
    }

    fn source_client(
        &self,
        url: &str,
        name: &str,
        expected_chain_id: Option<u64>,
        metrics: Arc<RelayerMetrics>,
    ) -> anyhow::Result<Arc<SourceClient<MeteredHttpProvider>>> {
        let provider: Arc<Provider<MeteredHttpProvider>> =
            Arc::new(new_metered_provider(url, name, metrics)?);
        Ok(Arc::new(SourceClient::new(
            provider,
            name,
            expected_chain_id,
        )))
    }

    /// Build every runtime client this node will drive, validating endpoints
    /// and key material up front so misconfiguration fails at startup.
    pub async fn validate(
        &self,
        password: &str,
        metrics: Arc<RelayerMetrics>,
    ) -> anyhow::Result<RelayerRuntime> {
        tracing::info!("Starting config validation");
        let main = self.chain(MAIN_CHAIN)?;
        let main_url = main
            .urls
            .first()
            .ok_or_else(|| anyhow!("main chain has no endpoint url"))?;

        let mut runtime = RelayerRuntime {
            pairings: Vec::new(),
            cross_chain: None,
            server_listen_port: self.server_listen_port,
            metrics_port: self.metrics_port,
        };

        if self.relayer_to_run == MAIN_CHAIN {
            for (name, chain) in &self.chains {
                if name == MAIN_CHAIN {
                    continue;
                }
                let url = chain
                    .urls
                    .first()
                    .ok_or_else(|| anyhow!("chain {name:?} has no endpoint url"))?;
                let source = self.source_client(url, name, chain.chain_id, metrics.clone())?;
                match crate::retry_with_max_elapsed_time!(
                    source.describe(),
                    STARTUP_RETRY_MAX_ELAPSED
                ) {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) | Err(e) => return Err(anyhow!("{name}: {e}")),
                }
                let beacon = match chain.kind {
                    ChainKind::EthBeacon => {
                        let beacon_url = chain.beacon_url.as_ref().ok_or_else(|| {
                            anyhow!("chain {name:?} is eth-beacon but has no beacon-url")
                        })?;
                        Some(BeaconClient::new(beacon_url.clone()))
                    }
                    _ => None,
                };
                let dest = self
                    .dest_client(main_url, &format!("{name}-client"), chain, password, metrics.clone())
                    .await?;
                runtime.pairings.push(PairingRuntime {
                    name: name.clone(),
                    kind: chain.kind,
                    source,
                    beacon,
                    dest,
                    batch_num: chain.batch_num,
                    confirm_num: chain.confirm_num,
                    max_rewind_depth: chain.max_rewind_depth,
                    timing: (&chain.delays).into(),
                    admin_mode: chain.admin_mode,
                });
            }
            if runtime.pairings.is_empty() {
                return Err(anyhow!("no source chains configured"));
            }
        } else {
            let chain = self
                .chain(&self.relayer_to_run)
                .map_err(|_| anyhow!("Invalid relayer-to-run {:?}", self.relayer_to_run))?;
            let foreign_url = chain
                .urls
                .first()
                .ok_or_else(|| anyhow!("chain {:?} has no endpoint url", self.relayer_to_run))?;
            let source =
                self.source_client(main_url, MAIN_CHAIN, main.chain_id, metrics.clone())?;
            let dest = self
                .dest_client(
                    foreign_url,
                    self.relayer_to_run.as_str(),
                    chain,
                    password,
                    metrics.clone(),
                )
                .await?;
            let verify_url = self
                .verify_server
                .as_ref()
                .filter(|server| server.enable && !server.url.is_empty())
                .map(|server| server.url.clone());
            runtime.cross_chain = Some(CrossChainRuntime {
                name: self.relayer_to_run.clone(),
                source,
                dest,
                verify_url,
                timing: (&chain.delays).into(),
            });
        }

        tracing::info!("Config validation complete");
        Ok(runtime)
    }
}

/// Config template with the fields an operator must fill in.
pub fn generate_relayer_config_template() -> RelayerNodeConfig {
    let mut chains = BTreeMap::new();
    chains.insert(
        MAIN_CHAIN.to_string(),
        ChainConfig {
            kind: ChainKind::PlainEvm,
            urls: vec!["your_main_chain_rpc_url".to_string()],
            beacon_url: None,
            contract: String::new(),
            chain_id: None,
            key_path: None,
            batch_num: default_batch_num(),
            confirm_num: default_confirm_num(),
            max_rewind_depth: default_max_rewind_depth(),
            delays: DelayConfig::default(),
            admin_mode: false,
        },
    );
    chains.insert(
        "bsc".to_string(),
        ChainConfig {
            kind: ChainKind::Parlia,
            urls: vec!["your_bsc_rpc_url".to_string()],
            beacon_url: None,
            contract: "0x0000000000000000000000000000000000000000".to_string(),
            chain_id: Some(56),
            key_path: Some(PathBuf::from("/path/to/your/relayer_key")),
            batch_num: default_batch_num(),
            confirm_num: 15,
            max_rewind_depth: default_max_rewind_depth(),
            delays: DelayConfig::default(),
            admin_mode: false,
        },
    );
    chains.insert(
        "eth".to_string(),
        ChainConfig {
            kind: ChainKind::EthBeacon,
            urls: vec!["your_eth_rpc_url".to_string()],
            beacon_url: Some("your_beacon_rest_url".to_string()),
            contract: "0x0000000000000000000000000000000000000000".to_string(),
            chain_id: Some(1),
            key_path: Some(PathBuf::from("/path/to/your/relayer_key")),
            batch_num: default_batch_num(),
            confirm_num: default_confirm_num(),
            max_rewind_depth: default_max_rewind_depth(),
            delays: DelayConfig::default(),
            admin_mode: false,
        },
    );
    RelayerNodeConfig {
        relayer_to_run: MAIN_CHAIN.to_string(),
        chains,
        verify_server: Some(VerifyServerConfig {
            url: String::new(),
            enable: false,
        }),
        server_listen_port: default_server_listen_port(),
        metrics_port: default_metrics_port(),
    }
}
