// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::error::{RelayError, RelayResult};
use ethers::types::{Address as EthAddress, Bloom, Bytes, H256, H64, U256, U64};
use ethers::utils::keccak256;
use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};

/// Slots per sync-committee period on Ethereum mainnet (8192).
pub const SLOTS_PER_EPOCH: u64 = 32;
pub const EPOCHS_PER_PERIOD: u64 = 256;

pub fn period_for_slot(slot: u64) -> u64 {
    slot / (SLOTS_PER_EPOCH * EPOCHS_PER_PERIOD)
}

/// The kind of source chain a pairing observes. Dispatch happens on this
/// variant instead of a name-keyed registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChainKind {
    // RLP header batches, no extra payload
    PlainEvm,
    // RLP header + validator snapshot tuples
    Parlia,
    // beacon light-client updates + execution headers
    EthBeacon,
}

/// What the destination light-client contract wants next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientMode {
    SubmitLightClientUpdate = 0,
    SubmitHeader = 1,
}

impl TryFrom<u8> for ClientMode {
    type Error = RelayError;

    fn try_from(value: u8) -> RelayResult<Self> {
        match value {
            0 => Ok(ClientMode::SubmitLightClientUpdate),
            1 => Ok(ClientMode::SubmitHeader),
            other => Err(RelayError::Provider(format!(
                "unknown client mode {other}"
            ))),
        }
    }
}

/// Execution-layer block header, canonical RLP-hashable form.
///
/// Trailing fields appeared with later forks and are only present when the
/// source block has them; RLP encoding stops at the first absent field so the
/// keccak hash of the encoding equals the block hash.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionHeader {
    pub parent_hash: H256,
    #[serde(rename = "sha3Uncles")]
    pub uncles_hash: H256,
    pub miner: EthAddress,
    pub state_root: H256,
    pub transactions_root: H256,
    pub receipts_root: H256,
    pub logs_bloom: Bloom,
    pub difficulty: U256,
    pub number: U64,
    pub gas_limit: U64,
    pub gas_used: U64,
    pub timestamp: U64,
    pub extra_data: Bytes,
    pub mix_hash: H256,
    pub nonce: H64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_fee_per_gas: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub withdrawals_root: Option<H256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob_gas_used: Option<U64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excess_blob_gas: Option<U64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_beacon_block_root: Option<H256>,
}

impl ExecutionHeader {
    /// Number of RLP items, honoring the fork ladder: a later field is only
    /// encoded when every earlier one is present.
    fn rlp_item_count(&self) -> usize {
        let mut count = 15;
        if self.base_fee_per_gas.is_some() {
            count += 1;
            if self.withdrawals_root.is_some() {
                count += 1;
                if self.blob_gas_used.is_some() && self.excess_blob_gas.is_some() {
                    count += 2;
                    if self.parent_beacon_block_root.is_some() {
                        count += 1;
                    }
                }
            }
        }
        count
    }

    pub fn hash(&self) -> H256 {
        H256::from(keccak256(rlp::encode(self)))
    }
}

impl Encodable for ExecutionHeader {
    fn rlp_append(&self, s: &mut RlpStream) {
        let item_count = self.rlp_item_count();
        s.begin_list(item_count);
        s.append(&self.parent_hash);
        s.append(&self.uncles_hash);
        s.append(&self.miner);
        s.append(&self.state_root);
        s.append(&self.transactions_root);
        s.append(&self.receipts_root);
        s.append(&self.logs_bloom);
        s.append(&self.difficulty);
        s.append(&self.number);
        s.append(&self.gas_limit);
        s.append(&self.gas_used);
        s.append(&self.timestamp);
        s.append(&self.extra_data.to_vec());
        s.append(&self.mix_hash);
        s.append(&self.nonce);
        if item_count > 15 {
            s.append(self.base_fee_per_gas.as_ref().unwrap());
        }
        if item_count > 16 {
            s.append(self.withdrawals_root.as_ref().unwrap());
        }
        if item_count > 17 {
            s.append(self.blob_gas_used.as_ref().unwrap());
            s.append(self.excess_blob_gas.as_ref().unwrap());
        }
        if item_count > 19 {
            s.append(self.parent_beacon_block_root.as_ref().unwrap());
        }
    }
}

impl Decodable for ExecutionHeader {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        let item_count = rlp.item_count()?;
        if !(15..=20).contains(&item_count) {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        Ok(ExecutionHeader {
            parent_hash: rlp.val_at(0)?,
            uncles_hash: rlp.val_at(1)?,
            miner: rlp.val_at(2)?,
            state_root: rlp.val_at(3)?,
            transactions_root: rlp.val_at(4)?,
            receipts_root: rlp.val_at(5)?,
            logs_bloom: rlp.val_at(6)?,
            difficulty: rlp.val_at(7)?,
            number: rlp.val_at(8)?,
            gas_limit: rlp.val_at(9)?,
            gas_used: rlp.val_at(10)?,
            timestamp: rlp.val_at(11)?,
            extra_data: Bytes::from(rlp.val_at::<Vec<u8>>(12)?),
            mix_hash: rlp.val_at(13)?,
            nonce: rlp.val_at(14)?,
            base_fee_per_gas: if item_count > 15 {
                Some(rlp.val_at(15)?)
            } else {
                None
            },
            withdrawals_root: if item_count > 16 {
                Some(rlp.val_at(16)?)
            } else {
                None
            },
            blob_gas_used: if item_count > 17 {
                Some(rlp.val_at(17)?)
            } else {
                None
            },
            excess_blob_gas: if item_count > 18 {
                Some(rlp.val_at(18)?)
            } else {
                None
            },
            parent_beacon_block_root: if item_count > 19 {
                Some(rlp.val_at(19)?)
            } else {
                None
            },
        })
    }
}

/// Consensus-layer block header.
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconBlockHeader {
    #[serde_as(as = "DisplayFromStr")]
    pub slot: u64,
    #[serde_as(as = "DisplayFromStr")]
    pub proposer_index: u64,
    pub parent_root: H256,
    pub state_root: H256,
    pub body_root: H256,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCommittee {
    pub pubkeys: Vec<Bytes>,
    pub aggregate_pubkey: Bytes,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncAggregate {
    pub sync_committee_bits: Bytes,
    pub sync_committee_signature: Bytes,
}

/// A beacon header paired with the execution block it commits to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderUpdate {
    pub beacon_header: BeaconBlockHeader,
    pub execution_block_hash: H256,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinalizedHeaderUpdate {
    pub header_update: HeaderUpdate,
    pub finality_branch: Vec<H256>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncCommitteeUpdate {
    pub next_sync_committee: SyncCommittee,
    pub next_sync_committee_branch: Vec<H256>,
}

/// Everything the destination light client needs to advance by one finality
/// step, plus the committee rotation when the update crosses a period.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LightClientUpdate {
    pub attested_beacon_header: BeaconBlockHeader,
    pub sync_aggregate: SyncAggregate,
    pub signature_slot: u64,
    pub finalized_update: FinalizedHeaderUpdate,
    pub sync_committee_update: Option<SyncCommitteeUpdate>,
}

/// Tuple used to seed the destination contract's view of beacon finality.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtendedBeaconBlockHeader {
    pub header: BeaconBlockHeader,
    pub beacon_block_root: H256,
    pub execution_block_hash: H256,
}

/// One-shot init seed for the destination light-client contract.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LightClientInitInput {
    pub finalized_execution_header: ExecutionHeader,
    pub finalized_beacon_header: ExtendedBeaconBlockHeader,
    pub current_sync_committee: SyncCommittee,
    pub next_sync_committee: SyncCommittee,
}

pub const ELECTION_BLOCK: &str = "election";
pub const AGGREGATE_BLOCK: &str = "aggregate";
pub const TRANSACTION_BLOCK: &str = "transactions";

/// Bitmap flag marking which foreign chain an aggregate block commits state
/// for. Matches the contract-side chain registry.
pub fn send_flag(chain_name: &str) -> u64 {
    match chain_name {
        "eth" => 0x1,
        "bsc" => 0x2,
        "heco" => 0x4,
        _ => 0,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedHash {
    pub hash: String,
}

/// Block summary returned by the reverse-direction source chain. Numeric
/// fields arrive as strings in whatever base the node chose, so they are kept
/// raw and parsed on demand.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossChainBlock {
    pub number: String,
    pub hash: String,
    pub header: String,
    pub block_type: String,
    #[serde(default)]
    pub chain_bits: String,
    #[serde(default)]
    pub related_list: Vec<RelatedHash>,
}

fn parse_auto_radix(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if let Some(hex) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        raw.parse().ok()
    }
}

impl CrossChainBlock {
    pub fn number_u64(&self) -> RelayResult<u64> {
        parse_auto_radix(&self.number)
            .ok_or_else(|| RelayError::Provider(format!("bad block number {:?}", self.number)))
    }

    pub fn chain_bits_u64(&self) -> RelayResult<u64> {
        parse_auto_radix(&self.chain_bits)
            .ok_or_else(|| RelayError::Provider(format!("bad chain bits {:?}", self.chain_bits)))
    }

    pub fn header_bytes(&self) -> RelayResult<Vec<u8>> {
        let raw = self.header.strip_prefix("0x").unwrap_or(&self.header);
        hex::decode(raw).map_err(|e| RelayError::Provider(format!("bad header hex: {e}")))
    }
}

/// A block queued for verification before relaying to the foreign chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyInfo {
    pub block: CrossChainBlock,
    pub related_hashes: Vec<String>,
}
