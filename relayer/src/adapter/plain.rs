// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use super::{ChainAdapter, EncodedBatch};
use crate::error::{RelayError, RelayResult};
use crate::source_client::SourceClient;
use async_trait::async_trait;
use ethers::providers::JsonRpcClient;
use std::sync::Arc;

/// Adapter for sources whose contract verifies bare RLP headers: the batch is
/// a concatenation of canonical encodings, nothing else.
pub struct PlainEvmAdapter<P> {
    source: Arc<SourceClient<P>>,
    // init payloads start at an epoch boundary so the contract sees a full
    // signer rotation window
    epoch_length: u64,
}

pub const INIT_HEADER_WINDOW: u64 = 12;

impl<P> PlainEvmAdapter<P>
where
    P: JsonRpcClient + 'static,
{
    pub fn new(source: Arc<SourceClient<P>>) -> Self {
        Self {
            source,
            epoch_length: 200,
        }
    }

    pub fn with_epoch_length(mut self, epoch_length: u64) -> Self {
        self.epoch_length = epoch_length;
        self
    }
}

/// First height of the init window: the nearest epoch boundary at or below
/// `dest_height − (INIT_HEADER_WINDOW − 1)`.
pub fn init_window_start(dest_height: u64, epoch_length: u64) -> u64 {
    dest_height.saturating_sub(INIT_HEADER_WINDOW - 1) / epoch_length * epoch_length
}

#[async_trait]
impl<P> ChainAdapter for PlainEvmAdapter<P>
where
    P: JsonRpcClient + 'static,
{
    async fn init(&mut self, _dest_height: u64) -> RelayResult<()> {
        Ok(())
    }

    async fn get_init_data(&self, dest_height: u64) -> RelayResult<Vec<u8>> {
        let start = init_window_start(dest_height, self.epoch_length);
        let mut batch = Vec::new();
        for height in start..start + INIT_HEADER_WINDOW {
            let header = self.source.header_by_number(height).await?;
            batch.extend_from_slice(&rlp::encode(&header));
        }
        Ok(batch)
    }

    async fn encode_batch(&mut self, lo: u64, hi: u64) -> RelayResult<EncodedBatch> {
        let mut payload = Vec::new();
        let mut last_height = lo;
        let mut header_count = 0u64;
        let mut truncated = false;
        for height in lo..=hi {
            let header = match self.source.header_by_number(height).await {
                Ok(header) => header,
                Err(e) => {
                    tracing::warn!(
                        "[{}] header fetch failed at {height}, truncating batch: {e}",
                        self.source.chain_name()
                    );
                    truncated = true;
                    break;
                }
            };
            payload.extend_from_slice(&rlp::encode(&header));
            last_height = height;
            header_count += 1;
        }
        if header_count == 0 {
            return Err(RelayError::Rpc(format!(
                "no header could be fetched from {lo}"
            )));
        }
        Ok(EncodedBatch {
            payload,
            first_height: lo,
            last_height,
            header_count,
            truncated,
        })
    }
}
