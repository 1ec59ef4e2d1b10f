// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Ethereum beacon adapter. The generic loop path ships execution headers;
//! the light-client update path belongs to the beacon syncer, which calls
//! into this adapter for payload assembly.

use super::{ChainAdapter, EncodedBatch};
use crate::beacon_client::BeaconClient;
use crate::error::{RelayError, RelayResult};
use crate::source_client::SourceClient;
use crate::types::{
    period_for_slot, BeaconBlockHeader, ExecutionHeader, ExtendedBeaconBlockHeader,
    LightClientInitInput,
};
use async_trait::async_trait;
use ethers::providers::JsonRpcClient;
use ethers::types::H256;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// SSZ hash-tree-root of a beacon block header: five 32-byte leaves (u64s
/// little-endian zero-padded), padded to eight, merkleized with sha256.
pub fn beacon_header_root(header: &BeaconBlockHeader) -> H256 {
    fn u64_leaf(value: u64) -> [u8; 32] {
        let mut leaf = [0u8; 32];
        leaf[..8].copy_from_slice(&value.to_le_bytes());
        leaf
    }
    let mut nodes: Vec<[u8; 32]> = vec![
        u64_leaf(header.slot),
        u64_leaf(header.proposer_index),
        header.parent_root.0,
        header.state_root.0,
        header.body_root.0,
        [0u8; 32],
        [0u8; 32],
        [0u8; 32],
    ];
    while nodes.len() > 1 {
        nodes = nodes
            .chunks(2)
            .map(|pair| {
                let mut hasher = Sha256::new();
                hasher.update(pair[0]);
                hasher.update(pair[1]);
                let digest = hasher.finalize();
                let mut node = [0u8; 32];
                node.copy_from_slice(&digest);
                node
            })
            .collect();
    }
    H256::from(nodes[0])
}

pub struct BeaconAdapter<P> {
    source: Arc<SourceClient<P>>,
    beacon: BeaconClient,
}

impl<P> BeaconAdapter<P>
where
    P: JsonRpcClient + 'static,
{
    pub fn new(source: Arc<SourceClient<P>>, beacon: BeaconClient) -> Self {
        Self { source, beacon }
    }

    pub fn beacon(&self) -> &BeaconClient {
        &self.beacon
    }

    /// Ascending chain of execution headers `(from, to]`, ending exactly at
    /// `to_hash`. Parent linkage is verified while building so a reorged
    /// source surfaces here instead of as a contract revert.
    pub async fn build_execution_header_chain(
        &self,
        from: u64,
        to: u64,
        to_hash: H256,
    ) -> RelayResult<Vec<ExecutionHeader>> {
        if to < from {
            return Err(RelayError::Generic(format!(
                "bad execution header range {from}..{to}"
            )));
        }
        let mut headers = Vec::with_capacity((to - from) as usize);
        for height in (from + 1)..=to {
            headers.push(self.source.header_by_number(height).await?);
        }
        for pair in headers.windows(2) {
            if pair[1].parent_hash != pair[0].hash() {
                return Err(RelayError::Provider(format!(
                    "execution header chain broken between {} and {}",
                    pair[0].number, pair[1].number
                )));
            }
        }
        if let Some(last) = headers.last() {
            if last.hash() != to_hash {
                return Err(RelayError::Provider(format!(
                    "execution header {} does not match finalized hash",
                    last.number
                )));
            }
        }
        Ok(headers)
    }

    /// One-shot init seed: the finalized update of the latest period plus the
    /// committee that became current with it.
    pub async fn build_init_input(&self) -> RelayResult<LightClientInitInput> {
        let last_slot = self.beacon.get_last_finalized_slot_number().await?;
        let last_period = period_for_slot(last_slot);
        if last_period == 0 {
            return Err(RelayError::Provider(
                "cannot build init data before the first committee rotation".to_string(),
            ));
        }
        let last_update = self.beacon.get_light_client_update(last_period).await?;
        let prev_update = self
            .beacon
            .get_next_sync_committee_update(last_period - 1)
            .await?;

        let header_update = &last_update.finalized_update.header_update;
        let finalized_beacon_header = ExtendedBeaconBlockHeader {
            beacon_block_root: beacon_header_root(&header_update.beacon_header),
            header: header_update.beacon_header.clone(),
            execution_block_hash: header_update.execution_block_hash,
        };

        let finalized_slot = header_update.beacon_header.slot;
        let execution_number = self.beacon.get_block_number_for_slot(finalized_slot).await?;
        let finalized_execution_header =
            self.source.header_by_number(execution_number).await?;

        let next_sync_committee = last_update
            .sync_committee_update
            .ok_or_else(|| {
                RelayError::Provider(format!(
                    "update for period {last_period} lacks committee rotation"
                ))
            })?
            .next_sync_committee;

        Ok(LightClientInitInput {
            finalized_execution_header,
            finalized_beacon_header,
            current_sync_committee: prev_update.next_sync_committee,
            next_sync_committee,
        })
    }
}

#[async_trait]
impl<P> ChainAdapter for BeaconAdapter<P>
where
    P: JsonRpcClient + 'static,
{
    async fn init(&mut self, _dest_height: u64) -> RelayResult<()> {
        Ok(())
    }

    async fn get_init_data(&self, _dest_height: u64) -> RelayResult<Vec<u8>> {
        self.build_init_input().await?.encode()
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_provider::MockJsonRpcClient;
    use crate::test_utils::sample_execution_header;
    use ethers::providers::Provider;

    fn adapter(mock: &MockJsonRpcClient) -> BeaconAdapter<MockJsonRpcClient> {
        let provider = Arc::new(Provider::new(mock.clone()));
        BeaconAdapter::new(
            Arc::new(SourceClient::new(provider, "eth", None)),
            BeaconClient::new("http://localhost:9596"),
        )
    }

    #[test]
    fn test_beacon_header_root_is_deterministic_and_field_sensitive() {
        let header = BeaconBlockHeader {
            slot: 969_983,
            proposer_index: 12,
            parent_root: H256::repeat_byte(1),
            state_root: H256::repeat_byte(2),
            body_root: H256::repeat_byte(3),
        };
        let root = beacon_header_root(&header);
        assert_eq!(root, beacon_header_root(&header));
        assert_ne!(
            root,
            beacon_header_root(&BeaconBlockHeader {
                slot: 969_984,
                ..header.clone()
            })
        );
        assert_ne!(
            root,
            beacon_header_root(&BeaconBlockHeader {
                body_root: H256::repeat_byte(4),
                ..header
            })
        );
    }

    #[tokio::test]
    async fn test_execution_chain_linkage_is_verified() {
        let mock = MockJsonRpcClient::new();
        // build a properly linked chain 101..=103
        let h101 = sample_execution_header(101);
        let mut h102 = sample_execution_header(102);
        h102.parent_hash = h101.hash();
        let mut h103 = sample_execution_header(103);
        h103.parent_hash = h102.hash();
        for h in [&h101, &h102, &h103] {
            mock.add_response(
                "eth_getBlockByNumber",
                (format!("{:#x}", h.number.as_u64()), false),
                h,
            );
        }
        let adapter = adapter(&mock);
        let chain = adapter
            .build_execution_header_chain(100, 103, h103.hash())
            .await
            .unwrap();
        assert_eq!(chain.len(), 3);
        assert_eq!(chain[0].number.as_u64(), 101);

        // wrong tip hash is rejected
        let err = adapter
            .build_execution_header_chain(100, 103, H256::repeat_byte(9))
            .await
            .unwrap_err();
        assert_eq!(err.error_type(), "provider");
    }

    #[tokio::test]
    async fn test_execution_chain_detects_broken_linkage() {
        let mock = MockJsonRpcClient::new();
        let h101 = sample_execution_header(101);
        // 102's parent hash does not match 101
        let h102 = sample_execution_header(102);
        for h in [&h101, &h102] {
            mock.add_response(
                "eth_getBlockByNumber",
                (format!("{:#x}", h.number.as_u64()), false),
                h,
            );
        }
        let adapter = adapter(&mock);
        let err = adapter
            .build_execution_header_chain(100, 102, h102.hash())
            .await
            .unwrap_err();
        assert_eq!(err.error_type(), "provider");
    }
}
