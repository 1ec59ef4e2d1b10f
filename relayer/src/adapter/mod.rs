// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Per-source-chain payload builders. Each variant turns native headers into
//! the opaque byte payload its destination contract verifies.

use crate::error::RelayResult;
use async_trait::async_trait;

pub mod beacon;
pub mod parlia;
pub mod plain;

pub use beacon::BeaconAdapter;
pub use parlia::ParliaAdapter;
pub use plain::PlainEvmAdapter;

/// Result of encoding a header span. A mid-batch fetch failure truncates the
/// batch to the successful prefix instead of dropping the whole cycle's work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedBatch {
    pub payload: Vec<u8>,
    pub first_height: u64,
    pub last_height: u64,
    pub header_count: u64,
    pub truncated: bool,
}

#[async_trait]
pub trait ChainAdapter: Send {
    /// Invoked once when the destination first reports a non-zero height.
    /// Until this succeeds the sync loop must not submit.
    async fn init(&mut self, dest_height: u64) -> RelayResult<()>;

    /// One-shot seed payload for the destination contract's `init`.
    async fn get_init_data(&self, dest_height: u64) -> RelayResult<Vec<u8>>;

    /// Encode the span `[lo, hi]` in submission order.
    async fn encode_batch(&mut self, lo: u64, hi: u64) -> RelayResult<EncodedBatch>;
}
