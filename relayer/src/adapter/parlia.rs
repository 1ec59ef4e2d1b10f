// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Parlia (BSC/HECO) adapter. Seal verification on the destination needs the
//! validator-set snapshot that was active when a header was sealed, so every
//! header is shipped as an `rlp([header, snapshot])` tuple. Snapshots live in
//! a bounded ring keyed by epoch number, owned exclusively by this adapter.

use super::{ChainAdapter, EncodedBatch};
use crate::error::{RelayError, RelayResult};
use crate::source_client::SourceClient;
use crate::types::ExecutionHeader;
use async_trait::async_trait;
use ethers::providers::JsonRpcClient;
use ethers::types::{Address as EthAddress, Bytes};
use rlp::{Encodable, RlpStream};
use std::collections::BTreeMap;
use std::sync::Arc;

const EXTRA_VANITY: usize = 32;
const EXTRA_SEAL: usize = 65;
const VALIDATOR_ADDRESS_BYTES: usize = 20;
const VALIDATOR_VOTE_KEY_BYTES: usize = 48;
const VALIDATOR_BYTES: usize = VALIDATOR_ADDRESS_BYTES + VALIDATOR_VOTE_KEY_BYTES;

/// Validator-set state at one epoch boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub epoch_number: u64,
    pub validator_set: Vec<EthAddress>,
    pub vote_addresses: Vec<Bytes>,
    pub turn_length: u8,
}

impl Encodable for Snapshot {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(4);
        s.begin_list(self.validator_set.len());
        for validator in &self.validator_set {
            s.append(validator);
        }
        s.begin_list(self.vote_addresses.len());
        for key in &self.vote_addresses {
            s.append(&key.to_vec());
        }
        s.append(&self.turn_length);
        s.append(&self.epoch_number);
    }
}

/// Bounded ring of the most recent snapshots. Oldest epoch is evicted first;
/// the ring never grows past `capacity`.
#[derive(Debug, Default)]
pub struct SnapshotRing {
    capacity: usize,
    snapshots: BTreeMap<u64, Snapshot>,
}

impl SnapshotRing {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "snapshot ring capacity must be positive");
        Self {
            capacity,
            snapshots: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, snapshot: Snapshot) {
        self.snapshots.insert(snapshot.epoch_number, snapshot);
        while self.snapshots.len() > self.capacity {
            let oldest = *self.snapshots.keys().next().unwrap();
            self.snapshots.remove(&oldest);
        }
    }

    pub fn get(&self, epoch_number: u64) -> Option<&Snapshot> {
        self.snapshots.get(&epoch_number)
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

/// Extract the validator set from an epoch header's extra data:
/// 32-byte vanity, 1-byte validator count, `count * 68` validator entries
/// (address || BLS vote key), optional turn-length byte, 65-byte seal.
pub fn parse_epoch_extra(extra: &[u8]) -> RelayResult<(Vec<EthAddress>, Vec<Bytes>, u8)> {
    if extra.len() < EXTRA_VANITY + 1 + EXTRA_SEAL {
        return Err(RelayError::Encoding(format!(
            "epoch extra data too short: {}",
            extra.len()
        )));
    }
    let count = extra[EXTRA_VANITY] as usize;
    let validators_end = EXTRA_VANITY + 1 + count * VALIDATOR_BYTES;
    if count == 0 || extra.len() < validators_end + EXTRA_SEAL {
        return Err(RelayError::Encoding(format!(
            "epoch extra data declares {count} validators but holds {} bytes",
            extra.len()
        )));
    }
    let mut validator_set = Vec::with_capacity(count);
    let mut vote_addresses = Vec::with_capacity(count);
    for i in 0..count {
        let offset = EXTRA_VANITY + 1 + i * VALIDATOR_BYTES;
        validator_set.push(EthAddress::from_slice(
            &extra[offset..offset + VALIDATOR_ADDRESS_BYTES],
        ));
        vote_addresses.push(Bytes::from(
            extra[offset + VALIDATOR_ADDRESS_BYTES..offset + VALIDATOR_BYTES].to_vec(),
        ));
    }
    let turn_length = if extra.len() > validators_end + EXTRA_SEAL {
        extra[validators_end]
    } else {
        1
    };
    Ok((validator_set, vote_addresses, turn_length))
}

pub struct ParliaAdapter<P> {
    source: Arc<SourceClient<P>>,
    epoch_length: u64,
    ring: SnapshotRing,
    initialized: bool,
}

impl<P> ParliaAdapter<P>
where
    P: JsonRpcClient + 'static,
{
    pub fn new(source: Arc<SourceClient<P>>) -> Self {
        Self {
            source,
            epoch_length: 200,
            ring: SnapshotRing::new(8),
            initialized: false,
        }
    }

    pub fn with_epoch_length(mut self, epoch_length: u64) -> Self {
        self.epoch_length = epoch_length;
        self
    }

    fn snapshot_from_header(&self, header: &ExecutionHeader) -> RelayResult<Snapshot> {
        let number = header.number.as_u64();
        if number % self.epoch_length != 0 {
            return Err(RelayError::Encoding(format!(
                "header {number} is not an epoch boundary"
            )));
        }
        let (validator_set, vote_addresses, turn_length) =
            parse_epoch_extra(header.extra_data.as_ref())?;
        Ok(Snapshot {
            epoch_number: number / self.epoch_length,
            validator_set,
            vote_addresses,
            turn_length,
        })
    }

    async fn fetch_snapshot(&mut self, epoch_number: u64) -> RelayResult<()> {
        let boundary = epoch_number * self.epoch_length;
        let header = self.source.header_by_number(boundary).await?;
        let snapshot = self.snapshot_from_header(&header)?;
        self.ring.insert(snapshot);
        Ok(())
    }

    /// Snapshot active for `header`, fetching the epoch boundary on demand
    /// when the ring misses. Epoch headers themselves rotate the ring.
    async fn snapshot_for(&mut self, header: &ExecutionHeader) -> RelayResult<Snapshot> {
        let number = header.number.as_u64();
        if number % self.epoch_length == 0 {
            let snapshot = self.snapshot_from_header(header)?;
            self.ring.insert(snapshot);
        }
        let epoch_number = number / self.epoch_length;
        if self.ring.get(epoch_number).is_none() {
            self.fetch_snapshot(epoch_number).await?;
        }
        Ok(self.ring.get(epoch_number).unwrap().clone())
    }

    fn encode_tuple(header: &ExecutionHeader, snapshot: &Snapshot) -> Vec<u8> {
        let mut s = RlpStream::new();
        s.begin_list(2);
        s.append(header);
        s.append(snapshot);
        s.out().to_vec()
    }

    #[cfg(test)]
    pub(crate) fn ring(&self) -> &SnapshotRing {
        &self.ring
    }
}

#[async_trait]
impl<P> ChainAdapter for ParliaAdapter<P>
where
    P: JsonRpcClient + 'static,
{
    /// Seed the ring from the nearest epoch boundary at or below
    /// `dest_height`, plus the previous epoch for headers still sealed under
    /// the outgoing set.
    async fn init(&mut self, dest_height: u64) -> RelayResult<()> {
        let epoch_number = dest_height / self.epoch_length;
        self.fetch_snapshot(epoch_number).await?;
        if epoch_number > 0 {
            self.fetch_snapshot(epoch_number - 1).await?;
        }
        self.initialized = true;
        tracing::info!(
            "[{}] parlia snapshot ring seeded at epoch {epoch_number} (height {})",
            self.source.chain_name(),
            epoch_number * self.epoch_length
        );
        Ok(())
    }

    async fn get_init_data(&self, dest_height: u64) -> RelayResult<Vec<u8>> {
        let start = super::plain::init_window_start(dest_height, self.epoch_length);
        let mut batch = Vec::new();
        for height in start..start + super::plain::INIT_HEADER_WINDOW {
            let header = self.source.header_by_number(height).await?;
            batch.extend_from_slice(&rlp::encode(&header));
        }
        Ok(batch)
    }

    async fn encode_batch(&mut self, lo: u64, hi: u64) -> RelayResult<EncodedBatch> {
        if !self.initialized {
            return Err(RelayError::Generic(
                "parlia adapter used before init".to_string(),
            ));
        }
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
            let snapshot = self.snapshot_for(&header).await?;
            payload.extend_from_slice(&Self::encode_tuple(&header, &snapshot));
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
