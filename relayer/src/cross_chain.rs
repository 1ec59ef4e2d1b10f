// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Reverse-direction relayer: watches the destination-side chain and forwards
//! election blocks (and aggregate blocks committing state for the target
//! chain) to the light client deployed there. Fundamentally different state
//! from the header loop — a verify queue instead of a height cursor — so it
//! keeps its own capability surface.

use crate::dest_client::{DestinationReader, DestinationWriter};
use crate::encoding::encode_cross_chain_header;
use crate::error::{RelayError, RelayResult};
use crate::metrics::RelayerMetrics;
use crate::source_client::SourceClient;
use crate::sync::{CycleOutcome, FatalWatchdog, RelayTiming};
use crate::types::{send_flag, CrossChainBlock, VerifyInfo, AGGREGATE_BLOCK, ELECTION_BLOCK};
use async_trait::async_trait;
use ethers::providers::JsonRpcClient;
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[async_trait]
pub trait CrossChainSource: Send + Sync {
    async fn latest_height(&self) -> RelayResult<u64>;
    async fn block_by_number(&self, height: u64) -> RelayResult<CrossChainBlock>;
}

#[async_trait]
impl<P> CrossChainSource for SourceClient<P>
where
    P: JsonRpcClient + 'static,
{
    async fn latest_height(&self) -> RelayResult<u64> {
        self.cross_chain_block_number().await
    }

    async fn block_by_number(&self, height: u64) -> RelayResult<CrossChainBlock> {
        self.cross_chain_block_by_number(height).await
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct VerifyResponse {
    #[serde(default)]
    pub code: i32,
    #[serde(default)]
    pub logno: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub result: bool,
    #[serde(default)]
    pub servertime: String,
}

pub struct CrossChainRelayer<S, D> {
    chain_name: String,
    source: Arc<S>,
    dest: Arc<D>,
    flag: u64,
    verify_url: Option<String>,
    http_client: reqwest::Client,
    queue: VecDeque<VerifyInfo>,
    last_sub: u64,
    last_unsub: u64,
    timing: RelayTiming,
    metrics: Arc<RelayerMetrics>,
}

impl<S, D> CrossChainRelayer<S, D>
where
    S: CrossChainSource,
    D: DestinationReader + DestinationWriter,
{
    pub fn new(
        chain_name: impl Into<String>,
        source: Arc<S>,
        dest: Arc<D>,
        verify_url: Option<String>,
        timing: RelayTiming,
        metrics: Arc<RelayerMetrics>,
    ) -> Self {
        let chain_name = chain_name.into();
        let flag = send_flag(&chain_name);
        Self {
            chain_name,
            source,
            dest,
            flag,
            verify_url,
            http_client: reqwest::Client::new(),
            queue: VecDeque::new(),
            last_sub: 0,
            last_unsub: 0,
            timing,
            metrics,
        }
    }

    /// Scan `[lo, hi]` until the first block worth relaying. Election blocks
    /// always qualify; aggregate blocks only when their chain bitmap covers
    /// the target chain. The scan stops at the first hit so blocks are
    /// verified one per cycle, in order.
    async fn scan_blocks(&mut self, lo: u64, hi: u64) {
        for height in lo..=hi {
            let block = match self.source.block_by_number(height).await {
                Ok(block) => block,
                Err(e) => {
                    tracing::warn!(
                        "[{}] block fetch failed at {height}, stopping scan: {e}",
                        self.chain_name
                    );
                    break;
                }
            };
            tracing::debug!(
                "[{}] block {height} type {} chain bits {:?}",
                self.chain_name,
                block.block_type,
                block.chain_bits
            );
            let verify = if block.block_type == ELECTION_BLOCK {
                true
            } else if block.block_type == AGGREGATE_BLOCK {
                match block.chain_bits_u64() {
                    Ok(bits) => bits & self.flag != 0,
                    Err(e) => {
                        tracing::warn!("[{}] bad chain bits at {height}: {e}", self.chain_name);
                        break;
                    }
                }
            } else {
                false
            };
            if verify {
                if height > self.last_sub {
                    tracing::info!(
                        "[{}] last submitted height {} => {height}",
                        self.chain_name,
                        self.last_sub
                    );
                    self.last_sub = height;
                }
                let related_hashes = block
                    .related_list
                    .iter()
                    .filter(|related| related.hash != block.hash)
                    .map(|related| related.hash.clone())
                    .collect();
                self.queue.push_back(VerifyInfo {
                    block,
                    related_hashes,
                });
                break;
            } else if height > self.last_unsub {
                self.last_unsub = height;
            }
        }
    }

    async fn server_verify(&self, url: &str, related_hashes: &[String]) -> bool {
        let body = serde_json::json!({ "relayBlockHashs": related_hashes });
        let response = match self.http_client.post(url).json(&body).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!("[{}] verify server unreachable: {e}", self.chain_name);
                return false;
            }
        };
        match response.json::<VerifyResponse>().await {
            Ok(verdict) => {
                tracing::info!(
                    "[{}] verify server answered result={} message={:?}",
                    self.chain_name,
                    verdict.result,
                    verdict.message
                );
                verdict.result
            }
            Err(e) => {
                tracing::error!("[{}] bad verify server response: {e}", self.chain_name);
                false
            }
        }
    }

    /// Pop the queue head: drop it when the destination already covers its
    /// height, gate on the verify server when one is configured, then submit.
    /// A block that fails the gate stays queued and is retried next cycle.
    async fn verify_and_send(&mut self, dest_height: u64) -> RelayResult<()> {
        let Some(info) = self.queue.front().cloned() else {
            return Ok(());
        };
        let block_height = info.block.number_u64()?;
        if block_height <= dest_height {
            tracing::warn!(
                "[{}] queued height {block_height} already covered by destination {dest_height}, dropping",
                self.chain_name
            );
            self.queue.pop_front();
            return Ok(());
        }
        if let Some(url) = self.verify_url.clone() {
            if !self.server_verify(&url, &info.related_hashes).await {
                tracing::info!("[{}] {} verify not pass", self.chain_name, info.block.hash);
                return Ok(());
            }
            tracing::info!("[{}] {} verify pass", self.chain_name, info.block.hash);
        }
        let payload = encode_cross_chain_header(&info.block.header_bytes()?);
        self.dest.add_light_client_blocks(&payload).await?;
        self.metrics
            .submitted_batches
            .with_label_values(&[&self.chain_name])
            .inc();
        self.queue.pop_front();
        Ok(())
    }

    async fn cycle(&mut self, watchdog: &mut FatalWatchdog) -> RelayResult<CycleOutcome> {
        let to_height = self.dest.max_main_height().await?;
        self.metrics
            .verify_queue_depth
            .with_label_values(&[&self.chain_name])
            .set(self.queue.len() as i64);
        tracing::info!(
            "[{}] destination main height {to_height}",
            self.chain_name
        );

        if !self.queue.is_empty() {
            self.verify_and_send(to_height).await?;
            return Ok(CycleOutcome::Waiting);
        }

        let from_height = self.source.latest_height().await?;
        // resume the scan above already-skipped blocks instead of rereading
        // them every cycle
        let mut effective_to = to_height;
        if self.last_sub <= to_height && to_height < self.last_unsub {
            effective_to = self.last_unsub;
        }
        if effective_to + 1 > from_height {
            watchdog.rearm();
            tracing::debug!("[{}] waiting for source to advance", self.chain_name);
            return Ok(CycleOutcome::Waiting);
        }

        self.scan_blocks(effective_to + 1, from_height).await;
        watchdog.rearm();
        Ok(CycleOutcome::Submitted { full_batch: true })
    }

    pub async fn run(mut self, cancel: CancellationToken) -> RelayResult<()> {
        tracing::info!("[{}] cross-chain relayer starting", self.chain_name);
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
                Ok(CycleOutcome::Submitted { .. }) => delay = self.timing.success_delay,
                Ok(_) => delay = self.timing.wait_delay,
                Err(e) => {
                    tracing::error!("[{}] cycle failed: {e}", self.chain_name);
                    self.metrics.record_error(&self.chain_name, &e);
                    delay = self.timing.error_delay;
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn queue_len(&self) -> usize {
        self.queue.len()
    }

    #[cfg(test)]
    pub(crate) fn cursors(&self) -> (u64, u64) {
        (self.last_sub, self.last_unsub)
    }
}
