// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The per-pairing sync loop: read the destination's tip, find the safe
//! confirmed span on the source, rewind past reorgs, encode and submit one
//! batch, and pick the next delay. Strictly serial within a pairing.

use crate::adapter::ChainAdapter;
use crate::dest_client::{DestinationReader, DestinationWriter};
use crate::error::{RelayError, RelayResult};
use crate::metrics::RelayerMetrics;
use crate::source_client::SourceClient;
use async_trait::async_trait;
use ethers::providers::JsonRpcClient;
use ethers::types::H256;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Minimal view of the source chain the loop itself needs; the adapter owns
/// the rest of the source surface.
#[async_trait]
pub trait SourceReader: Send + Sync {
    async fn latest_height(&self) -> RelayResult<u64>;
    async fn header_hash_at(&self, height: u64) -> RelayResult<H256>;
}

#[async_trait]
impl<P> SourceReader for SourceClient<P>
where
    P: JsonRpcClient + 'static,
{
    async fn latest_height(&self) -> RelayResult<u64> {
        self.block_number().await
    }

    async fn header_hash_at(&self, height: u64) -> RelayResult<H256> {
        Ok(self.header_by_number(height).await?.hash())
    }
}

/// Per-pairing delays. The fatal timeout is hours-scale; the rest are the
/// inter-cycle sleeps.
#[derive(Debug, Clone)]
pub struct RelayTiming {
    pub success_delay: Duration,
    pub wait_delay: Duration,
    pub error_delay: Duration,
    pub fatal_timeout: Duration,
}

impl Default for RelayTiming {
    fn default() -> Self {
        Self {
            success_delay: Duration::from_secs(15),
            wait_delay: Duration::from_secs(60),
            error_delay: Duration::from_secs(10),
            fatal_timeout: Duration::from_secs(24 * 3600),
        }
    }
}

/// The fatal watchdog, kept as plain data. The loop checks `expired()` at the
/// top of each cycle, so there is no fired-timer reset race: a re-arm is just
/// a store.
#[derive(Debug)]
pub struct FatalWatchdog {
    armed_at: Instant,
    timeout: Duration,
}

impl FatalWatchdog {
    pub fn new(timeout: Duration) -> Self {
        Self {
            armed_at: Instant::now(),
            timeout,
        }
    }

    pub fn rearm(&mut self) {
        self.armed_at = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.armed_at.elapsed()
    }

    pub fn expired(&self) -> bool {
        self.idle_for() >= self.timeout
    }
}

/// Walk `dest_height` downward until the destination recognizes the source
/// hash at that height. The destination is the oracle of truth; no local
/// cache, so a restarted relayer still converges. Strictly decreasing, never
/// returns genesis.
pub async fn resolve_fork<S, D>(
    source: &S,
    dest: &D,
    dest_height: u64,
    max_rewind_depth: u64,
) -> RelayResult<u64>
where
    S: SourceReader + ?Sized,
    D: DestinationReader + ?Sized,
{
    let mut height = dest_height;
    for _ in 0..=max_rewind_depth {
        if height == 0 {
            return Err(RelayError::ForkExhausted);
        }
        let hash = source.header_hash_at(height).await?;
        if dest.is_known(height, hash).await? {
            tracing::debug!("{height} hash is known");
            return Ok(height);
        }
        tracing::warn!("{height} hash is not known, rewinding");
        height -= 1;
    }
    Err(RelayError::ForkExhausted)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CycleOutcome {
    // destination reports height zero; its operator has not seeded it yet
    AwaitingInit,
    // source has no confirmed headers beyond the destination tip
    Waiting,
    Submitted { full_batch: bool },
}

pub struct HeaderRelayer<S, D, A> {
    chain_name: String,
    source: Arc<S>,
    dest: Arc<D>,
    adapter: A,
    batch_num: u64,
    confirm_num: u64,
    max_rewind_depth: u64,
    timing: RelayTiming,
    metrics: Arc<RelayerMetrics>,
}

impl<S, D, A> HeaderRelayer<S, D, A>
where
    S: SourceReader,
    D: DestinationReader + DestinationWriter,
    A: ChainAdapter,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chain_name: impl Into<String>,
        source: Arc<S>,
        dest: Arc<D>,
        adapter: A,
        batch_num: u64,
        confirm_num: u64,
        timing: RelayTiming,
        metrics: Arc<RelayerMetrics>,
    ) -> Self {
        Self {
            chain_name: chain_name.into(),
            source,
            dest,
            adapter,
            batch_num,
            confirm_num,
            max_rewind_depth: 1000,
            timing,
            metrics,
        }
    }

    pub fn with_max_rewind_depth(mut self, depth: u64) -> Self {
        self.max_rewind_depth = depth;
        self
    }

    /// Block until the destination reports a non-zero height, then run the
    /// adapter's init hook. Failures retry with the error delay; this phase
    /// runs without the watchdog, restarts are the operator's concern here.
    async fn await_initialized(&mut self, cancel: &CancellationToken) -> bool {
        loop {
            if cancel.is_cancelled() {
                return false;
            }
            match self.dest.get_height().await {
                Ok(0) => {
                    tracing::info!("[{}] destination not initialized yet", self.chain_name);
                }
                Ok(dest_height) => match self.adapter.init(dest_height).await {
                    Ok(()) => {
                        tracing::info!(
                            "[{}] adapter initialized at destination height {dest_height}",
                            self.chain_name
                        );
                        return true;
                    }
                    Err(e) => {
                        tracing::error!("[{}] adapter init failed: {e}", self.chain_name);
                        self.metrics.record_error(&self.chain_name, &e);
                    }
                },
                Err(e) => {
                    tracing::error!("[{}] get height failed: {e}", self.chain_name);
                    self.metrics.record_error(&self.chain_name, &e);
                }
            }
            tokio::time::sleep(self.timing.error_delay).await;
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) -> RelayResult<()> {
        tracing::info!(
            "[{}] relayer starting, batch {} confirmations {}",
            self.chain_name,
            self.batch_num,
            self.confirm_num
        );
        if !self.await_initialized(&cancel).await {
            return Ok(());
        }

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
                Ok(CycleOutcome::AwaitingInit) => delay = self.timing.error_delay,
                Ok(CycleOutcome::Waiting) => delay = self.timing.wait_delay,
                Ok(CycleOutcome::Submitted { full_batch }) => {
                    delay = if full_batch {
                        self.timing.success_delay
                    } else {
                        self.timing.wait_delay
                    };
                }
                Err(e) => {
                    tracing::error!("[{}] cycle failed: {e}", self.chain_name);
                    self.metrics.record_error(&self.chain_name, &e);
                    delay = self.timing.error_delay;
                }
            }
        }
    }

    pub(crate) async fn cycle(&mut self, watchdog: &mut FatalWatchdog) -> RelayResult<CycleOutcome> {
        let dest_height = self.dest.get_height().await?;
        if dest_height == 0 {
            // the contract was reset underneath us; keep polling
            watchdog.rearm();
            tracing::info!("[{}] destination reports height 0", self.chain_name);
            return Ok(CycleOutcome::AwaitingInit);
        }
        self.metrics
            .dest_synced_height
            .with_label_values(&[&self.chain_name])
            .set(dest_height.min(i64::MAX as u64) as i64);

        let src_height = self.source.latest_height().await?;
        self.metrics
            .src_latest_height
            .with_label_values(&[&self.chain_name])
            .set(src_height.min(i64::MAX as u64) as i64);
        tracing::info!(
            "[{}] heights: destination {dest_height}, source {src_height}",
            self.chain_name
        );

        // guard runs before the subtraction below; with it, the confirmed
        // span arithmetic cannot wrap
        if dest_height + 1 + self.confirm_num > src_height {
            watchdog.rearm();
            tracing::debug!("[{}] waiting for source to advance", self.chain_name);
            return Ok(CycleOutcome::Waiting);
        }

        let dest_height = resolve_fork(
            self.source.as_ref(),
            self.dest.as_ref(),
            dest_height,
            self.max_rewind_depth,
        )
        .await?;

        let sync_start = dest_height + 1;
        let sync_num = (src_height - self.confirm_num - dest_height).min(self.batch_num);
        let sync_end = sync_start + sync_num - 1;
        tracing::info!("[{}] sync from {sync_start} to {sync_end}", self.chain_name);

        let batch = self.adapter.encode_batch(sync_start, sync_end).await?;
        if batch.payload.is_empty() {
            return Err(RelayError::Encoding("adapter produced empty batch".to_string()));
        }
        self.dest.sync(&batch.payload).await?;
        self.metrics
            .submitted_batches
            .with_label_values(&[&self.chain_name])
            .inc();
        self.metrics
            .submitted_headers
            .with_label_values(&[&self.chain_name])
            .inc_by(batch.header_count);

        if batch.truncated {
            // the prefix went out; the failed tail is a cycle error so the
            // next cycle re-reads the destination height and retries
            return Err(RelayError::Rpc(format!(
                "batch truncated at {} of {sync_end}",
                batch.last_height
            )));
        }
        watchdog.rearm();
        tracing::info!("[{}] sync round finished", self.chain_name);
        Ok(CycleOutcome::Submitted {
            full_batch: batch.header_count == self.batch_num,
        })
    }
}
