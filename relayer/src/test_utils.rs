// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Scripted in-memory sources and destinations, enabled by the reader/writer
//! trait seams. Used by the loop, beacon and cross-chain tests.

use crate::adapter::{ChainAdapter, EncodedBatch};
use crate::beacon_relay::{BeaconSource, ExecutionPayloadRef};
use crate::cross_chain::CrossChainSource;
use crate::dest_client::{DestinationReader, DestinationWriter};
use crate::encoding::decode_header_batch;
use crate::error::{RelayError, RelayResult};
use crate::sync::SourceReader;
use crate::types::{
    BeaconBlockHeader, ClientMode, CrossChainBlock, ExecutionHeader, FinalizedHeaderUpdate,
    HeaderUpdate, LightClientUpdate, SyncAggregate, SyncCommittee, SyncCommitteeUpdate,
    EPOCHS_PER_PERIOD, SLOTS_PER_EPOCH,
};
use async_trait::async_trait;
use ethers::types::{Bytes, H256, H64, U64};
use ethers::utils::keccak256;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub fn sample_execution_header(number: u64) -> ExecutionHeader {
    ExecutionHeader {
        parent_hash: H256::repeat_byte(1),
        number: U64::from(number),
        gas_limit: U64::from(30_000_000u64),
        gas_used: U64::from(21_000u64),
        timestamp: U64::from(1_700_000_000 + number),
        extra_data: Bytes::from(number.to_be_bytes().to_vec()),
        nonce: H64::repeat_byte(2),
        base_fee_per_gas: Some(7u64.into()),
        ..Default::default()
    }
}

/// Deterministic per-height hash shared by the fake source and destination.
pub fn fake_hash(height: u64) -> H256 {
    H256::from(keccak256(height.to_be_bytes()))
}

#[derive(Default)]
pub struct FakeSource {
    latest: Mutex<u64>,
    fail_next_latest: AtomicBool,
    fail_all_latest: AtomicBool,
    probes: Mutex<Vec<u64>>,
}

impl FakeSource {
    pub fn new(latest: u64) -> Self {
        Self {
            latest: Mutex::new(latest),
            ..Default::default()
        }
    }

    pub fn set_latest(&self, latest: u64) {
        *self.latest.lock().unwrap() = latest;
    }

    pub fn fail_next_latest_height(&self) {
        self.fail_next_latest.store(true, Ordering::SeqCst);
    }

    pub fn fail_all_latest_height(&self) {
        self.fail_all_latest.store(true, Ordering::SeqCst);
    }

    /// Heights probed through `header_hash_at`, in call order.
    pub fn hash_probes(&self) -> Vec<u64> {
        self.probes.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceReader for FakeSource {
    async fn latest_height(&self) -> RelayResult<u64> {
        if self.fail_all_latest.load(Ordering::SeqCst)
            || self.fail_next_latest.swap(false, Ordering::SeqCst)
        {
            return Err(RelayError::Rpc("scripted failure".to_string()));
        }
        Ok(*self.latest.lock().unwrap())
    }

    async fn header_hash_at(&self, height: u64) -> RelayResult<H256> {
        self.probes.lock().unwrap().push(height);
        Ok(fake_hash(height))
    }
}

/// Adapter whose payload is just the covered heights, 8 bytes each. Keeps the
/// loop tests about the loop.
pub struct NullAdapter {
    source: Arc<FakeSource>,
    init_calls: Arc<AtomicUsize>,
}

impl NullAdapter {
    pub fn new(source: Arc<FakeSource>) -> Self {
        Self {
            source,
            init_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn init_call_counter(&self) -> Arc<AtomicUsize> {
        self.init_calls.clone()
    }
}

#[async_trait]
impl ChainAdapter for NullAdapter {
    async fn init(&mut self, _dest_height: u64) -> RelayResult<()> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_init_data(&self, _dest_height: u64) -> RelayResult<Vec<u8>> {
        Ok(vec![0x01])
    }

    async fn encode_batch(&mut self, lo: u64, hi: u64) -> RelayResult<EncodedBatch> {
        let latest = self.source.latest_height().await?;
        let hi = hi.min(latest);
        let mut payload = Vec::new();
        for height in lo..=hi {
            payload.extend_from_slice(&height.to_be_bytes());
        }
        Ok(EncodedBatch {
            payload,
            first_height: lo,
            last_height: hi,
            header_count: hi - lo + 1,
            truncated: false,
        })
    }
}

#[derive(Debug)]
struct DestState {
    height: u64,
    knows_source: bool,
    forgotten: HashSet<u64>,
    initialized: bool,
    client_mode: ClientMode,
    finalized_beacon_slot: u64,
    finalized_execution_height: u64,
    max_main_height: u64,
    submissions: Vec<(u64, u64)>,
    init_payloads: Vec<Vec<u8>>,
    update_payloads: Vec<Vec<u8>>,
    light_client_payloads: Vec<Vec<u8>>,
}

/// One fake serving every destination surface: header sync, beacon client
/// state, and the reverse-direction main-height view.
pub struct FakeDestination {
    state: Mutex<DestState>,
}

impl FakeDestination {
    pub fn new(height: u64) -> Self {
        Self {
            state: Mutex::new(DestState {
                height,
                knows_source: false,
                forgotten: HashSet::new(),
                initialized: height > 0,
                client_mode: ClientMode::SubmitLightClientUpdate,
                finalized_beacon_slot: 0,
                finalized_execution_height: 0,
                max_main_height: 0,
                submissions: Vec::new(),
                init_payloads: Vec::new(),
                update_payloads: Vec::new(),
                light_client_payloads: Vec::new(),
            }),
        }
    }

    /// Mark every source hash as known, mirroring a destination fully in
    /// agreement with `fake_hash`.
    pub fn know_all_source_hashes(&self, _source: &FakeSource) {
        self.state.lock().unwrap().knows_source = true;
    }

    /// Simulate a reorg: the destination's stored hash at `height` no longer
    /// matches the source.
    pub fn forget_height(&self, height: u64) {
        self.state.lock().unwrap().forgotten.insert(height);
    }

    /// Simulate the operator seeding the contract out of band.
    pub fn set_height(&self, height: u64) {
        self.state.lock().unwrap().height = height;
    }

    pub fn set_initialized(&self, initialized: bool) {
        self.state.lock().unwrap().initialized = initialized;
    }

    pub fn set_client_mode(&self, mode: ClientMode) {
        self.state.lock().unwrap().client_mode = mode;
    }

    pub fn set_finalized_beacon_slot(&self, slot: u64) {
        self.state.lock().unwrap().finalized_beacon_slot = slot;
    }

    pub fn set_finalized_execution_height(&self, height: u64) {
        self.state.lock().unwrap().finalized_execution_height = height;
    }

    pub fn set_max_main_height(&self, height: u64) {
        self.state.lock().unwrap().max_main_height = height;
    }

    /// `(first, last)` height spans accepted through `sync`, in order.
    pub fn submissions(&self) -> Vec<(u64, u64)> {
        self.state.lock().unwrap().submissions.clone()
    }

    pub fn init_payloads(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().init_payloads.clone()
    }

    pub fn update_payloads(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().update_payloads.clone()
    }

    pub fn light_client_payloads(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().light_client_payloads.clone()
    }
}

// A payload is either a batch of real RLP headers or the null adapter's
// 8-byte height chunks.
fn span_from_payload(payload: &[u8]) -> RelayResult<(u64, u64)> {
    if let Ok(headers) = decode_header_batch(payload) {
        if !headers.is_empty() {
            return Ok((
                headers.first().unwrap().number.as_u64(),
                headers.last().unwrap().number.as_u64(),
            ));
        }
    }
    if !payload.is_empty() && payload.len() % 8 == 0 {
        let first = u64::from_be_bytes(payload[..8].try_into().unwrap());
        let last = u64::from_be_bytes(payload[payload.len() - 8..].try_into().unwrap());
        return Ok((first, last));
    }
    Err(RelayError::Encoding("unrecognized payload".to_string()))
}

#[async_trait]
impl DestinationReader for FakeDestination {
    async fn get_height(&self) -> RelayResult<u64> {
        Ok(self.state.lock().unwrap().height)
    }

    async fn is_known(&self, height: u64, hash: H256) -> RelayResult<bool> {
        let state = self.state.lock().unwrap();
        Ok(state.knows_source
            && !state.forgotten.contains(&height)
            && hash == fake_hash(height))
    }

    async fn initialized(&self) -> RelayResult<bool> {
        Ok(self.state.lock().unwrap().initialized)
    }

    async fn client_mode(&self) -> RelayResult<ClientMode> {
        Ok(self.state.lock().unwrap().client_mode)
    }

    async fn finalized_beacon_slot(&self) -> RelayResult<u64> {
        Ok(self.state.lock().unwrap().finalized_beacon_slot)
    }

    async fn finalized_execution_height(&self) -> RelayResult<u64> {
        Ok(self.state.lock().unwrap().finalized_execution_height)
    }

    async fn max_main_height(&self) -> RelayResult<u64> {
        Ok(self.state.lock().unwrap().max_main_height)
    }
}

#[async_trait]
impl DestinationWriter for FakeDestination {
    async fn sync(&self, payload: &[u8]) -> RelayResult<H256> {
        let (first, last) = span_from_payload(payload)?;
        let mut state = self.state.lock().unwrap();
        state.submissions.push((first, last));
        // the contract advances its tip once the batch verifies
        state.height = last;
        Ok(fake_hash(last))
    }

    async fn add_light_client_blocks(&self, payload: &[u8]) -> RelayResult<H256> {
        let mut state = self.state.lock().unwrap();
        state.light_client_payloads.push(payload.to_vec());
        Ok(H256::repeat_byte(0xcc))
    }

    async fn submit_beacon_light_client_update(&self, payload: &[u8]) -> RelayResult<H256> {
        let mut state = self.state.lock().unwrap();
        state.update_payloads.push(payload.to_vec());
        Ok(H256::repeat_byte(0xdd))
    }

    async fn init_client(&self, payload: &[u8]) -> RelayResult<H256> {
        let mut state = self.state.lock().unwrap();
        state.init_payloads.push(payload.to_vec());
        state.initialized = true;
        Ok(H256::repeat_byte(0xee))
    }
}

const PERIOD_SLOTS: u64 = SLOTS_PER_EPOCH * EPOCHS_PER_PERIOD;

/// Scripted consensus-layer view for the beacon syncer tests.
pub struct FakeBeaconSource {
    finalized_slot: u64,
    execution_block: u64,
    requested_periods: Mutex<Vec<u64>>,
    finality_requests: AtomicUsize,
}

impl FakeBeaconSource {
    pub fn new(finalized_slot: u64) -> Self {
        Self {
            finalized_slot,
            execution_block: 0,
            requested_periods: Mutex::new(Vec::new()),
            finality_requests: AtomicUsize::new(0),
        }
    }

    pub fn with_execution_block(mut self, block_number: u64) -> Self {
        self.execution_block = block_number;
        self
    }

    pub fn requested_update_periods(&self) -> Vec<u64> {
        self.requested_periods.lock().unwrap().clone()
    }

    pub fn finality_update_requests(&self) -> usize {
        self.finality_requests.load(Ordering::SeqCst)
    }

    fn update_with_finalized_slot(finalized_slot: u64, committee: bool) -> LightClientUpdate {
        let sync_committee_update = committee.then(|| SyncCommitteeUpdate {
            next_sync_committee: SyncCommittee {
                pubkeys: vec![Bytes::from(vec![1u8; 48]); 2],
                aggregate_pubkey: Bytes::from(vec![2u8; 48]),
            },
            next_sync_committee_branch: vec![H256::repeat_byte(3); 5],
        });
        LightClientUpdate {
            attested_beacon_header: BeaconBlockHeader {
                slot: finalized_slot + 2 * SLOTS_PER_EPOCH,
                ..Default::default()
            },
            sync_aggregate: SyncAggregate {
                sync_committee_bits: Bytes::from(vec![0xff; 64]),
                sync_committee_signature: Bytes::from(vec![4u8; 96]),
            },
            signature_slot: finalized_slot + 2 * SLOTS_PER_EPOCH + 1,
            finalized_update: FinalizedHeaderUpdate {
                header_update: HeaderUpdate {
                    beacon_header: BeaconBlockHeader {
                        slot: finalized_slot,
                        ..Default::default()
                    },
                    execution_block_hash: fake_hash(finalized_slot),
                },
                finality_branch: vec![H256::repeat_byte(5); 6],
            },
            sync_committee_update,
        }
    }
}

#[async_trait]
impl BeaconSource for FakeBeaconSource {
    async fn init_data(&self) -> RelayResult<Vec<u8>> {
        Ok(vec![0xab; 4])
    }

    async fn last_finalized_slot(&self) -> RelayResult<u64> {
        Ok(self.finalized_slot)
    }

    async fn light_client_update(&self, period: u64) -> RelayResult<LightClientUpdate> {
        self.requested_periods.lock().unwrap().push(period);
        // a rotation update finalizes the tail of its own period
        let finalized_slot = (period + 1) * PERIOD_SLOTS - 1;
        Ok(Self::update_with_finalized_slot(finalized_slot, true))
    }

    async fn finality_update(&self) -> RelayResult<LightClientUpdate> {
        self.finality_requests.fetch_add(1, Ordering::SeqCst);
        Ok(Self::update_with_finalized_slot(self.finalized_slot, false))
    }

    async fn execution_payload_at_slot(&self, _slot: u64) -> RelayResult<ExecutionPayloadRef> {
        Ok(ExecutionPayloadRef {
            block_number: self.execution_block,
            block_hash: fake_hash(self.execution_block),
        })
    }

    async fn execution_headers(
        &self,
        from: u64,
        to: u64,
        _to_hash: H256,
    ) -> RelayResult<Vec<ExecutionHeader>> {
        Ok(((from + 1)..=to).map(sample_execution_header).collect())
    }
}

/// Scripted reverse-direction source chain.
#[derive(Default)]
pub struct FakeCrossChainSource {
    latest: u64,
    blocks: Mutex<HashMap<u64, CrossChainBlock>>,
    fetched: Mutex<Vec<u64>>,
}

impl FakeCrossChainSource {
    pub fn new(latest: u64) -> Self {
        Self {
            latest,
            ..Default::default()
        }
    }

    pub fn put_block(&self, block: CrossChainBlock) {
        let height = block.number_u64().expect("block number must parse");
        self.blocks.lock().unwrap().insert(height, block);
    }

    pub fn fetched_heights(&self) -> Vec<u64> {
        self.fetched.lock().unwrap().clone()
    }

    pub fn reset_fetches(&self) {
        self.fetched.lock().unwrap().clear();
    }
}

#[async_trait]
impl CrossChainSource for FakeCrossChainSource {
    async fn latest_height(&self) -> RelayResult<u64> {
        Ok(self.latest)
    }

    async fn block_by_number(&self, height: u64) -> RelayResult<CrossChainBlock> {
        self.fetched.lock().unwrap().push(height);
        self.blocks
            .lock()
            .unwrap()
            .get(&height)
            .cloned()
            .ok_or_else(|| RelayError::Rpc(format!("no block at {height}")))
    }
}
