// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Supervisor: one independent task per configured pairing. Not a scheduler;
//! a pairing that hits its fatal timeout takes the process down so the outer
//! service manager can restart it.

use crate::adapter::{BeaconAdapter, ChainAdapter, ParliaAdapter, PlainEvmAdapter};
use crate::beacon_relay::BeaconSyncer;
use crate::config::{PairingRuntime, RelayerNodeConfig, MAIN_CHAIN};
use crate::cross_chain::CrossChainRelayer;
use crate::dest_client::DestinationReader;
use crate::error::RelayError;
use crate::metrics::RelayerMetrics;
use crate::server::run_server;
use crate::sync::HeaderRelayer;
use crate::types::ChainKind;
use anyhow::anyhow;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

fn spawn_header_relayer(
    tasks: &mut JoinSet<Result<(), RelayError>>,
    pairing: PairingRuntime,
    metrics: Arc<RelayerMetrics>,
    cancel: CancellationToken,
) {
    match pairing.kind {
        ChainKind::PlainEvm => {
            let adapter = PlainEvmAdapter::new(pairing.source.clone());
            let relayer = HeaderRelayer::new(
                pairing.name,
                pairing.source,
                pairing.dest,
                adapter,
                pairing.batch_num,
                pairing.confirm_num,
                pairing.timing,
                metrics,
            )
            .with_max_rewind_depth(pairing.max_rewind_depth);
            tasks.spawn(relayer.run(cancel));
        }
        ChainKind::Parlia => {
            let adapter = ParliaAdapter::new(pairing.source.clone());
            let relayer = HeaderRelayer::new(
                pairing.name,
                pairing.source,
                pairing.dest,
                adapter,
                pairing.batch_num,
                pairing.confirm_num,
                pairing.timing,
                metrics,
            )
            .with_max_rewind_depth(pairing.max_rewind_depth);
            tasks.spawn(relayer.run(cancel));
        }
        ChainKind::EthBeacon => unreachable!("beacon pairings are spawned separately"),
    }
}

/// Launch every configured pairing and return the supervising task. The task
/// resolves with an error as soon as any pairing dies fatally.
pub async fn run_relayer_node(
    config: RelayerNodeConfig,
    password: &str,
    prometheus_registry: prometheus::Registry,
) -> anyhow::Result<JoinHandle<anyhow::Result<()>>> {
    let metrics = Arc::new(RelayerMetrics::new(&prometheus_registry));
    let runtime = config.validate(password, metrics.clone()).await?;

    let cancel = CancellationToken::new();
    let mut tasks: JoinSet<Result<(), RelayError>> = JoinSet::new();

    for pairing in runtime.pairings {
        if pairing.kind == ChainKind::EthBeacon {
            let beacon = pairing
                .beacon
                .clone()
                .expect("validate() guarantees a beacon client for eth-beacon pairings");
            let adapter = BeaconAdapter::new(pairing.source.clone(), beacon);
            let syncer = BeaconSyncer::new(
                pairing.name.clone(),
                adapter,
                pairing.dest.clone(),
                pairing.timing.clone(),
                metrics.clone(),
            );
            if pairing.admin_mode {
                // operator drives submissions through the admin endpoints;
                // no automatic loop
                let socket_address = SocketAddr::new(
                    IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
                    runtime.server_listen_port,
                );
                let server = run_server(&socket_address, Arc::new(syncer));
                tasks.spawn(async move {
                    server
                        .await
                        .map_err(|e| RelayError::Generic(format!("admin server died: {e}")))
                });
            } else {
                tasks.spawn(syncer.run(cancel.child_token()));
            }
        } else {
            spawn_header_relayer(&mut tasks, pairing, metrics.clone(), cancel.child_token());
        }
    }

    if let Some(cross) = runtime.cross_chain {
        let relayer = CrossChainRelayer::new(
            cross.name,
            cross.source,
            cross.dest,
            cross.verify_url,
            cross.timing,
            metrics.clone(),
        );
        tasks.spawn(relayer.run(cancel.child_token()));
    }

    let handle = tokio::spawn(async move {
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => {
                    cancel.cancel();
                    return Err(anyhow!("relayer task failed: {e}"));
                }
                Err(e) => {
                    cancel.cancel();
                    return Err(anyhow!("relayer task panicked: {e}"));
                }
            }
        }
        Ok(())
    });
    Ok(handle)
}

/// One-shot extraction of the destination contract's init payload for
/// `chain_name`, for the operator to seed the contract out of band.
pub async fn get_init_data(
    config: &RelayerNodeConfig,
    password: &str,
    chain_name: &str,
) -> anyhow::Result<Vec<u8>> {
    if config.relayer_to_run != MAIN_CHAIN {
        return Err(anyhow!("init data is only available when relaying toward {MAIN_CHAIN}"));
    }
    let metrics = Arc::new(RelayerMetrics::new(&prometheus::Registry::new()));
    let runtime = config.validate(password, metrics).await?;
    let pairing = runtime
        .pairings
        .into_iter()
        .find(|pairing| pairing.name == chain_name)
        .ok_or_else(|| anyhow!("chain {chain_name:?} does not support init data"))?;

    let dest_height = pairing.dest.get_height().await?;
    let data = match pairing.kind {
        ChainKind::PlainEvm => {
            PlainEvmAdapter::new(pairing.source.clone())
                .get_init_data(dest_height)
                .await?
        }
        ChainKind::Parlia => {
            ParliaAdapter::new(pairing.source.clone())
                .get_init_data(dest_height)
                .await?
        }
        ChainKind::EthBeacon => {
            let beacon = pairing
                .beacon
                .clone()
                .expect("validate() guarantees a beacon client for eth-beacon pairings");
            BeaconAdapter::new(pairing.source.clone(), beacon)
                .get_init_data(dest_height)
                .await?
        }
    };
    Ok(data)
}
