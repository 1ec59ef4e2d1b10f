// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Beacon-chain syncer. Runs beside nothing else that touches its signing
//! key: one state machine per Ethereum pairing, dispatching on the
//! destination's `clientMode`. A sync-committee rotation is always submitted
//! before execution headers of the new period because the contract keeps
//! `clientMode` at `SubmitLightClientUpdate` until the rotation lands.

use crate::adapter::BeaconAdapter;
use crate::dest_client::{DestinationReader, DestinationWriter};
use crate::encoding::encode_header_batch;
use crate::error::{RelayError, RelayResult};
use crate::metrics::RelayerMetrics;
use crate::sync::{CycleOutcome, FatalWatchdog, RelayTiming};
use crate::types::{period_for_slot, ClientMode, ExecutionHeader, LightClientUpdate};
use async_trait::async_trait;
use ethers::providers::JsonRpcClient;
use ethers::types::H256;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Execution payload reference inside a beacon block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionPayloadRef {
    pub block_number: u64,
    pub block_hash: H256,
}

/// What the beacon syncer needs from the consensus + execution layers.
#[async_trait]
pub trait BeaconSource: Send + Sync {
    async fn init_data(&self) -> RelayResult<Vec<u8>>;
    async fn last_finalized_slot(&self) -> RelayResult<u64>;
    async fn light_client_update(&self, period: u64) -> RelayResult<LightClientUpdate>;
    async fn finality_update(&self) -> RelayResult<LightClientUpdate>;
    async fn execution_payload_at_slot(&self, slot: u64) -> RelayResult<ExecutionPayloadRef>;
    async fn execution_headers(
        &self,
        from: u64,
        to: u64,
        to_hash: H256,
    ) -> RelayResult<Vec<ExecutionHeader>>;
}

#[async_trait]
impl<P> BeaconSource for BeaconAdapter<P>
where
    P: JsonRpcClient + 'static,
{
    async fn init_data(&self) -> RelayResult<Vec<u8>> {
        self.build_init_input().await?.encode()
    }

    async fn last_finalized_slot(&self) -> RelayResult<u64> {
        self.beacon().get_last_finalized_slot_number().await
    }

    async fn light_client_update(&self, period: u64) -> RelayResult<LightClientUpdate> {
        self.beacon().get_light_client_update(period).await
    }

    async fn finality_update(&self) -> RelayResult<LightClientUpdate> {
        self.beacon().get_finalized_light_client_update().await
    }

    async fn execution_payload_at_slot(&self, slot: u64) -> RelayResult<ExecutionPayloadRef> {
        let payload = self
            .beacon()
            .get_beacon_block_body_for_block_id(&slot.to_string())
            .await?;
        Ok(ExecutionPayloadRef {
            block_number: payload.block_number,
            block_hash: payload.block_hash,
        })
    }

    async fn execution_headers(
        &self,
        from: u64,
        to: u64,
        to_hash: H256,
    ) -> RelayResult<Vec<ExecutionHeader>> {
        self.build_execution_header_chain(from, to, to_hash).await
    }
}

pub struct BeaconSyncer<B, D> {
    chain_name: String,
    beacon_source: B,
    dest: Arc<D>,
    timing: RelayTiming,
    metrics: Arc<RelayerMetrics>,
}

impl<B, D> BeaconSyncer<B, D>
where
    B: BeaconSource,
    D: DestinationReader + DestinationWriter,
{
    pub fn new(
        chain_name: impl Into<String>,
        beacon_source: B,
        dest: Arc<D>,
        timing: RelayTiming,
        metrics: Arc<RelayerMetrics>,
    ) -> Self {
        Self {
            chain_name: chain_name.into(),
            beacon_source,
            dest,
            timing,
            metrics,
        }
    }

    pub async fn get_client_mode(&self) -> RelayResult<ClientMode> {
        self.dest.client_mode().await
    }

    /// Headers between the destination's last-finalized execution block and
    /// the execution block of its finalized beacon slot.
    pub async fn build_eth_headers(&self) -> RelayResult<Vec<ExecutionHeader>> {
        let last_submitted = self.dest.finalized_execution_height().await?;
        let dest_slot = self.dest.finalized_beacon_slot().await?;
        let target = self
            .beacon_source
            .execution_payload_at_slot(dest_slot)
            .await?;
        if target.block_number <= last_submitted {
            return Ok(Vec::new());
        }
        self.beacon_source
            .execution_headers(last_submitted, target.block_number, target.block_hash)
            .await
    }

    pub async fn submit_eth_headers(&self, headers: &[ExecutionHeader]) -> RelayResult<H256> {
        if headers.is_empty() {
            return Err(RelayError::Encoding("no headers to submit".to_string()));
        }
        let payload = encode_header_batch(headers);
        let tx_hash = self.dest.sync(&payload).await?;
        self.metrics
            .submitted_batches
            .with_label_values(&[&self.chain_name])
            .inc();
        self.metrics
            .submitted_headers
            .with_label_values(&[&self.chain_name])
            .inc_by(headers.len() as u64);
        Ok(tx_hash)
    }

    /// Fetch the update the destination needs next and submit it, skipping
    /// stale updates that would not move finality forward.
    ///
    /// The update is requested for the destination's own finalized period —
    /// not `period + 1` — because the contract advances one period at a time.
    pub async fn send_light_client_updates_with_checks(&self) -> RelayResult<bool> {
        let dest_slot = self.dest.finalized_beacon_slot().await?;
        let src_slot = self.beacon_source.last_finalized_slot().await?;
        if src_slot <= dest_slot {
            tracing::debug!(
                "[{}] source finality {src_slot} not beyond destination {dest_slot}",
                self.chain_name
            );
            return Ok(false);
        }

        let dest_period = period_for_slot(dest_slot);
        let src_period = period_for_slot(src_slot);
        let update = if src_period == dest_period {
            self.beacon_source.finality_update().await?
        } else {
            self.beacon_source.light_client_update(dest_period).await?
        };

        let update_slot = update.finalized_update.header_update.beacon_header.slot;
        if update_slot <= dest_slot {
            tracing::debug!(
                "[{}] update finalized slot {update_slot} already known, skipping",
                self.chain_name
            );
            return Ok(false);
        }

        let payload = update.encode()?;
        self.dest
            .submit_beacon_light_client_update(&payload)
            .await?;
        self.metrics
            .submitted_light_client_updates
            .with_label_values(&[&self.chain_name])
            .inc();
        tracing::info!(
            "[{}] light client update submitted, finalized slot {update_slot}",
            self.chain_name
        );
        Ok(true)
    }

    async fn cycle(&self, watchdog: &mut FatalWatchdog) -> RelayResult<CycleOutcome> {
        if !self.dest.initialized().await? {
            tracing::info!("[{}] destination not initialized, seeding", self.chain_name);
            let data = self.beacon_source.init_data().await?;
            self.dest.init_client(&data).await?;
            watchdog.rearm();
            return Ok(CycleOutcome::Submitted { full_batch: false });
        }

        match self.dest.client_mode().await? {
            ClientMode::SubmitLightClientUpdate => {
                if self.send_light_client_updates_with_checks().await? {
                    watchdog.rearm();
                    Ok(CycleOutcome::Submitted { full_batch: false })
                } else {
                    watchdog.rearm();
                    Ok(CycleOutcome::Waiting)
                }
            }
            ClientMode::SubmitHeader => {
                let headers = self.build_eth_headers().await?;
                if headers.is_empty() {
                    watchdog.rearm();
                    return Ok(CycleOutcome::Waiting);
                }
                self.submit_eth_headers(&headers).await?;
                watchdog.rearm();
                Ok(CycleOutcome::Submitted { full_batch: false })
            }
        }
    }

    pub async fn run(self, cancel: CancellationToken) -> RelayResult<()> {
        tracing::info!("[{}] beacon syncer starting", self.chain_name);
        let mut watchdog = FatalWatchdog::new(self.timing.fatal_timeout);
        let mut delay = Duration::from_secs(1);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(delay) => {}
            }
            if watchdog.expired() {
                let idle_secs = watchdog.idle_for().as_secs();
                self.metrics
                    .fatal_timeouts
                    .with_label_values(&[&self.chain_name])
                    .inc();
                tracing::error!("[{}] watchdog expired after {idle_secs}s", self.chain_name);
                return Err(RelayError::FatalTimeout { idle_secs });
            }
            match self.cycle(&mut watchdog).await {
                Ok(CycleOutcome::Waiting) | Ok(CycleOutcome::AwaitingInit) => {
                    delay = self.timing.wait_delay
                }
                Ok(CycleOutcome::Submitted { .. }) => delay = self.timing.success_delay,
                Err(e) => {
                    tracing::error!("[{}] cycle failed: {e}", self.chain_name);
                    self.metrics.record_error(&self.chain_name, &e);
                    delay = self.timing.error_delay;
                }
            }
        }
    }
}
