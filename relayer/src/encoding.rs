// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Wire formats accepted by the destination light-client contracts.
//!
//! Two different layouts are in play:
//!
//! 1. Header batches are *concatenations* of canonical RLP items with no
//!    outer list; the contract reads items until the buffer is exhausted.
//! 2. The beacon init and `ExtendedBeaconBlockHeader` payloads are
//!    concatenations of individually-RLP-encoded byte strings. This is not a
//!    standard RLP list; the contract expects exactly this layout.

use crate::error::{RelayError, RelayResult};
use crate::types::{
    BeaconBlockHeader, ExecutionHeader, ExtendedBeaconBlockHeader, FinalizedHeaderUpdate,
    HeaderUpdate, LightClientInitInput, LightClientUpdate, SyncAggregate, SyncCommittee,
    SyncCommitteeUpdate,
};
use ethers::types::H256;
use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};

/// Concatenate canonical RLP header encodings, submission order preserved.
pub fn encode_header_batch(headers: &[ExecutionHeader]) -> Vec<u8> {
    let mut batch = Vec::new();
    for header in headers {
        batch.extend_from_slice(&rlp::encode(header));
    }
    batch
}

/// Split a concatenated batch back into headers.
pub fn decode_header_batch(mut buf: &[u8]) -> RelayResult<Vec<ExecutionHeader>> {
    let mut headers = Vec::new();
    while !buf.is_empty() {
        let info = rlp::PayloadInfo::from(buf)?;
        let total = info.total();
        if total > buf.len() {
            return Err(RelayError::Encoding("truncated header batch".to_string()));
        }
        headers.push(rlp::decode(&buf[..total])?);
        buf = &buf[total..];
    }
    Ok(headers)
}

/// The reverse-direction contract takes a one-element RLP list holding the
/// raw source header bytes.
pub fn encode_cross_chain_header(raw_header: &[u8]) -> Vec<u8> {
    let mut s = RlpStream::new();
    s.begin_list(1);
    s.append(&raw_header.to_vec());
    s.out().to_vec()
}

impl Encodable for BeaconBlockHeader {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(5);
        s.append(&self.slot);
        s.append(&self.proposer_index);
        s.append(&self.parent_root);
        s.append(&self.state_root);
        s.append(&self.body_root);
    }
}

impl Decodable for BeaconBlockHeader {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        Ok(BeaconBlockHeader {
            slot: rlp.val_at(0)?,
            proposer_index: rlp.val_at(1)?,
            parent_root: rlp.val_at(2)?,
            state_root: rlp.val_at(3)?,
            body_root: rlp.val_at(4)?,
        })
    }
}

impl Encodable for SyncCommittee {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(2);
        s.begin_list(self.pubkeys.len());
        for key in &self.pubkeys {
            s.append(&key.to_vec());
        }
        s.append(&self.aggregate_pubkey.to_vec());
    }
}

impl Encodable for SyncAggregate {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(2);
        s.append(&self.sync_committee_bits.to_vec());
        s.append(&self.sync_committee_signature.to_vec());
    }
}

impl Encodable for HeaderUpdate {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(2);
        s.append(&self.beacon_header);
        s.append(&self.execution_block_hash);
    }
}

impl Encodable for FinalizedHeaderUpdate {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(2);
        s.append(&self.header_update);
        s.append_list(&self.finality_branch);
    }
}

impl Encodable for SyncCommitteeUpdate {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(2);
        s.append(&self.next_sync_committee);
        s.append_list(&self.next_sync_committee_branch);
    }
}

impl LightClientUpdate {
    pub fn encode(&self) -> RelayResult<Vec<u8>> {
        let mut s = RlpStream::new();
        let item_count = if self.sync_committee_update.is_some() {
            5
        } else {
            4
        };
        s.begin_list(item_count);
        s.append(&self.attested_beacon_header);
        s.append(&self.sync_aggregate);
        s.append(&self.signature_slot);
        s.append(&self.finalized_update);
        if let Some(committee_update) = &self.sync_committee_update {
            s.append(committee_update);
        }
        let out = s.out().to_vec();
        if out.is_empty() {
            return Err(RelayError::Encoding("empty light client update".to_string()));
        }
        Ok(out)
    }
}

// Reads one top-level item off the front of `buf`, returning the item slice
// and the remainder.
fn split_first_item(buf: &[u8]) -> RelayResult<(&[u8], &[u8])> {
    let info = rlp::PayloadInfo::from(buf)?;
    let total = info.total();
    if total > buf.len() {
        return Err(RelayError::Encoding("truncated payload".to_string()));
    }
    Ok((&buf[..total], &buf[total..]))
}

fn h256_from_vec(bytes: Vec<u8>) -> RelayResult<H256> {
    if bytes.len() != 32 {
        return Err(RelayError::Encoding(format!(
            "expected 32-byte root, got {}",
            bytes.len()
        )));
    }
    Ok(H256::from_slice(&bytes))
}

impl ExtendedBeaconBlockHeader {
    /// `rlp(header_bytes) || rlp(beacon_block_root) || rlp(execution_block_hash)`
    /// appended back to back. Preserve this layout bit-exactly.
    pub fn encode(&self) -> RelayResult<Vec<u8>> {
        let header_bytes = rlp::encode(&self.header).to_vec();
        let mut out = Vec::new();
        out.extend_from_slice(&rlp::encode(&header_bytes));
        out.extend_from_slice(&rlp::encode(&self.beacon_block_root.as_bytes().to_vec()));
        out.extend_from_slice(&rlp::encode(&self.execution_block_hash.as_bytes().to_vec()));
        Ok(out)
    }

    pub fn decode(buf: &[u8]) -> RelayResult<Self> {
        let (item, rest) = split_first_item(buf)?;
        let header_bytes: Vec<u8> = rlp::decode(item)?;
        let header: BeaconBlockHeader = rlp::decode(&header_bytes)?;

        let (item, rest) = split_first_item(rest)?;
        let beacon_block_root = h256_from_vec(rlp::decode(item)?)?;

        let (item, rest) = split_first_item(rest)?;
        let execution_block_hash = h256_from_vec(rlp::decode(item)?)?;

        if !rest.is_empty() {
            return Err(RelayError::Encoding(
                "trailing bytes after extended beacon header".to_string(),
            ));
        }
        Ok(ExtendedBeaconBlockHeader {
            header,
            beacon_block_root,
            execution_block_hash,
        })
    }
}

impl LightClientInitInput {
    /// Same concat-of-RLPs shape as `ExtendedBeaconBlockHeader::encode`, four
    /// items in order: execution header bytes, beacon header bytes, current
    /// committee, next committee.
    pub fn encode(&self) -> RelayResult<Vec<u8>> {
        let execution_bytes = rlp::encode(&self.finalized_execution_header).to_vec();
        let beacon_bytes = self.finalized_beacon_header.encode()?;
        let current_bytes = rlp::encode(&self.current_sync_committee).to_vec();
        let next_bytes = rlp::encode(&self.next_sync_committee).to_vec();

        let mut out = Vec::new();
        out.extend_from_slice(&rlp::encode(&execution_bytes));
        out.extend_from_slice(&rlp::encode(&beacon_bytes));
        out.extend_from_slice(&rlp::encode(&current_bytes));
        out.extend_from_slice(&rlp::encode(&next_bytes));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::{Bytes, H64, U64};

    fn sample_header(number: u64) -> ExecutionHeader {
        ExecutionHeader {
            number: U64::from(number),
            gas_limit: U64::from(30_000_000u64),
            extra_data: Bytes::from(vec![number as u8]),
            nonce: H64::repeat_byte(1),
            base_fee_per_gas: Some(7u64.into()),
            ..Default::default()
        }
    }

    fn sample_beacon_header(slot: u64) -> BeaconBlockHeader {
        BeaconBlockHeader {
            slot,
            proposer_index: 12,
            parent_root: H256::repeat_byte(1),
            state_root: H256::repeat_byte(2),
            body_root: H256::repeat_byte(3),
        }
    }

    #[test]
    fn test_header_batch_round_trip() {
        let headers: Vec<_> = (100u64..105).map(sample_header).collect();
        let batch = encode_header_batch(&headers);
        let decoded = decode_header_batch(&batch).unwrap();
        assert_eq!(decoded, headers);
    }

    #[test]
    fn test_header_batch_is_plain_concatenation() {
        let headers: Vec<_> = (1u64..3).map(sample_header).collect();
        let batch = encode_header_batch(&headers);
        let first = rlp::encode(&headers[0]).to_vec();
        let second = rlp::encode(&headers[1]).to_vec();
        assert_eq!(batch, [first, second].concat());
    }

    #[test]
    fn test_decode_rejects_truncated_batch() {
        let batch = encode_header_batch(&[sample_header(1)]);
        assert!(decode_header_batch(&batch[..batch.len() - 1]).is_err());
    }

    #[test]
    fn test_extended_beacon_header_round_trip() {
        let extended = ExtendedBeaconBlockHeader {
            header: sample_beacon_header(1000),
            beacon_block_root: H256::repeat_byte(0xaa),
            execution_block_hash: H256::repeat_byte(0xbb),
        };
        let encoded = extended.encode().unwrap();
        let decoded = ExtendedBeaconBlockHeader::decode(&encoded).unwrap();
        assert_eq!(decoded, extended);
    }

    #[test]
    fn test_extended_beacon_header_is_not_an_rlp_list() {
        let extended = ExtendedBeaconBlockHeader {
            header: sample_beacon_header(1),
            beacon_block_root: H256::repeat_byte(1),
            execution_block_hash: H256::repeat_byte(2),
        };
        let encoded = extended.encode().unwrap();
        // the first top-level item ends well before the buffer does
        let info = rlp::PayloadInfo::from(&encoded[..]).unwrap();
        assert!(info.total() < encoded.len());
    }

    #[test]
    fn test_init_input_layout() {
        let init = LightClientInitInput {
            finalized_execution_header: sample_header(42),
            finalized_beacon_header: ExtendedBeaconBlockHeader {
                header: sample_beacon_header(2000),
                beacon_block_root: H256::repeat_byte(4),
                execution_block_hash: H256::repeat_byte(5),
            },
            current_sync_committee: SyncCommittee {
                pubkeys: vec![Bytes::from(vec![1u8; 48]); 4],
                aggregate_pubkey: Bytes::from(vec![2u8; 48]),
            },
            next_sync_committee: SyncCommittee {
                pubkeys: vec![Bytes::from(vec![3u8; 48]); 4],
                aggregate_pubkey: Bytes::from(vec![4u8; 48]),
            },
        };
        let encoded = init.encode().unwrap();

        // four top-level byte-string items, nothing more
        let mut rest: &[u8] = &encoded;
        let mut items = Vec::new();
        while !rest.is_empty() {
            let (item, r) = split_first_item(rest).unwrap();
            items.push(item);
            rest = r;
        }
        assert_eq!(items.len(), 4);

        // first item re-parses as the execution header
        let execution_bytes: Vec<u8> = rlp::decode(items[0]).unwrap();
        let header: ExecutionHeader = rlp::decode(&execution_bytes).unwrap();
        assert_eq!(header, init.finalized_execution_header);

        // second item re-parses as the extended beacon header
        let beacon_bytes: Vec<u8> = rlp::decode(items[1]).unwrap();
        let extended = ExtendedBeaconBlockHeader::decode(&beacon_bytes).unwrap();
        assert_eq!(extended, init.finalized_beacon_header);
    }

    #[test]
    fn test_light_client_update_item_count_tracks_committee() {
        let update = LightClientUpdate {
            attested_beacon_header: sample_beacon_header(8192),
            sync_aggregate: SyncAggregate {
                sync_committee_bits: Bytes::from(vec![0xff; 64]),
                sync_committee_signature: Bytes::from(vec![1u8; 96]),
            },
            signature_slot: 8193,
            finalized_update: FinalizedHeaderUpdate {
                header_update: HeaderUpdate {
                    beacon_header: sample_beacon_header(8100),
                    execution_block_hash: H256::repeat_byte(6),
                },
                finality_branch: vec![H256::repeat_byte(7); 6],
            },
            sync_committee_update: None,
        };
        let finality_only = update.encode().unwrap();
        assert_eq!(rlp::Rlp::new(&finality_only).item_count().unwrap(), 4);

        let with_committee = LightClientUpdate {
            sync_committee_update: Some(SyncCommitteeUpdate {
                next_sync_committee: SyncCommittee {
                    pubkeys: vec![Bytes::from(vec![1u8; 48]); 2],
                    aggregate_pubkey: Bytes::from(vec![2u8; 48]),
                },
                next_sync_committee_branch: vec![H256::repeat_byte(8); 5],
            }),
            ..update
        };
        let rotation = with_committee.encode().unwrap();
        assert_eq!(rlp::Rlp::new(&rotation).item_count().unwrap(), 5);
    }

    #[test]
    fn test_cross_chain_header_is_single_element_list() {
        let raw = vec![0xde, 0xad, 0xbe, 0xef];
        let encoded = encode_cross_chain_header(&raw);
        let rlp = rlp::Rlp::new(&encoded);
        assert_eq!(rlp.item_count().unwrap(), 1);
        assert_eq!(rlp.val_at::<Vec<u8>>(0).unwrap(), raw);
    }
}
