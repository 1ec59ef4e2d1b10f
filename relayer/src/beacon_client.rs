// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! REST client for the beacon node (Altair light-client API). Uses a shared
//! pooled HTTP client; per-request timeouts are the backpressure mechanism,
//! the sync loops never cancel a call mid-flight.

use crate::error::{RelayError, RelayResult};
use crate::types::{
    BeaconBlockHeader, FinalizedHeaderUpdate, HeaderUpdate, LightClientUpdate, SyncAggregate,
    SyncCommittee, SyncCommitteeUpdate,
};
use ethers::types::H256;
use serde::Deserialize;
use serde_with::{serde_as, DisplayFromStr};
use std::sync::OnceLock;
use std::time::Duration;

const NO_BLOCK_FOR_SLOT: &str = "no block for slot";

/// True when the error is the beacon node telling us the slot was missed
/// (empty slot), which callers should skip rather than retry.
pub fn is_no_block_for_slot(err: &RelayError) -> bool {
    matches!(err, RelayError::Http(msg) if msg.contains(NO_BLOCK_FOR_SLOT))
}

#[derive(Debug, Clone)]
pub struct BeaconClient {
    http_client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ApiData<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct HeaderEnvelope {
    header: SignedHeader,
}

#[derive(Debug, Deserialize)]
struct SignedHeader {
    message: BeaconBlockHeader,
}

#[derive(Debug, Deserialize)]
struct BlockEnvelope {
    message: BlockMessage,
}

#[derive(Debug, Deserialize)]
struct BlockMessage {
    body: BlockBody,
}

#[derive(Debug, Deserialize)]
struct BlockBody {
    execution_payload: ExecutionPayloadDto,
}

#[serde_as]
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionPayloadDto {
    #[serde_as(as = "DisplayFromStr")]
    pub block_number: u64,
    pub block_hash: H256,
}

#[derive(Debug, Deserialize)]
struct LightClientHeaderDto {
    beacon: BeaconBlockHeader,
    #[serde(default)]
    execution: Option<ExecutionPayloadDto>,
}

#[serde_as]
#[derive(Debug, Deserialize)]
struct LightClientUpdateDto {
    attested_header: LightClientHeaderDto,
    #[serde(default)]
    next_sync_committee: Option<SyncCommittee>,
    #[serde(default)]
    next_sync_committee_branch: Option<Vec<H256>>,
    finalized_header: LightClientHeaderDto,
    finality_branch: Vec<H256>,
    sync_aggregate: SyncAggregate,
    #[serde_as(as = "DisplayFromStr")]
    signature_slot: u64,
}

impl LightClientUpdateDto {
    fn into_update(self, keep_committee: bool) -> RelayResult<LightClientUpdate> {
        let execution_block_hash = self
            .finalized_header
            .execution
            .as_ref()
            .map(|e| e.block_hash)
            .ok_or_else(|| {
                RelayError::Provider("light client update lacks execution payload".to_string())
            })?;
        let sync_committee_update = if keep_committee {
            match (self.next_sync_committee, self.next_sync_committee_branch) {
                (Some(next_sync_committee), Some(next_sync_committee_branch)) => {
                    Some(SyncCommitteeUpdate {
                        next_sync_committee,
                        next_sync_committee_branch,
                    })
                }
                _ => None,
            }
        } else {
            None
        };
        Ok(LightClientUpdate {
            attested_beacon_header: self.attested_header.beacon,
            sync_aggregate: self.sync_aggregate,
            signature_slot: self.signature_slot,
            finalized_update: FinalizedHeaderUpdate {
                header_update: HeaderUpdate {
                    beacon_header: self.finalized_header.beacon,
                    execution_block_hash,
                },
                finality_branch: self.finality_branch,
            },
            sync_committee_update,
        })
    }
}

fn shared_http_client() -> reqwest::Client {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
    CLIENT
        .get_or_init(|| {
            reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(5))
                .timeout(Duration::from_secs(60))
                .build()
                .expect("Failed to build reqwest client")
        })
        .clone()
}

impl BeaconClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            http_client: shared_http_client(),
            base_url,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> RelayResult<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.http_client.get(&url).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(RelayError::Http(format!("{url}: {NO_BLOCK_FOR_SLOT}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::Http(format!("{url}: {status}: {body}")));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| RelayError::Provider(format!("{url}: bad response: {e}")))
    }

    pub async fn get_beacon_block_header_for_block_id(
        &self,
        block_id: &str,
    ) -> RelayResult<BeaconBlockHeader> {
        let envelope: ApiData<HeaderEnvelope> = self
            .get_json(&format!("/eth/v1/beacon/headers/{block_id}"))
            .await?;
        Ok(envelope.data.header.message)
    }

    pub async fn get_last_slot_number(&self) -> RelayResult<u64> {
        Ok(self.get_beacon_block_header_for_block_id("head").await?.slot)
    }

    pub async fn get_last_finalized_slot_number(&self) -> RelayResult<u64> {
        Ok(self
            .get_beacon_block_header_for_block_id("finalized")
            .await?
            .slot)
    }

    /// Execution payload summary of the block at `block_id`. Missed slots
    /// surface the `no block for slot` marker.
    pub async fn get_beacon_block_body_for_block_id(
        &self,
        block_id: &str,
    ) -> RelayResult<ExecutionPayloadDto> {
        let envelope: ApiData<BlockEnvelope> = self
            .get_json(&format!("/eth/v2/beacon/blocks/{block_id}"))
            .await?;
        Ok(envelope.data.message.body.execution_payload)
    }

    pub async fn get_block_number_for_slot(&self, slot: u64) -> RelayResult<u64> {
        Ok(self
            .get_beacon_block_body_for_block_id(&slot.to_string())
            .await?
            .block_number)
    }

    /// Light-client update for one sync-committee period, committee rotation
    /// included.
    pub async fn get_light_client_update(&self, period: u64) -> RelayResult<LightClientUpdate> {
        let updates: Vec<ApiData<LightClientUpdateDto>> = self
            .get_json(&format!(
                "/eth/v1/beacon/light_client/updates?start_period={period}&count=1"
            ))
            .await?;
        let update = updates.into_iter().next().ok_or_else(|| {
            RelayError::Provider(format!("no light client update for period {period}"))
        })?;
        update.data.into_update(true)
    }

    /// The committee-rotation part of the update for `period`; used to learn
    /// the committee that becomes current in `period + 1`.
    pub async fn get_next_sync_committee_update(
        &self,
        period: u64,
    ) -> RelayResult<SyncCommitteeUpdate> {
        let update = self.get_light_client_update(period).await?;
        update.sync_committee_update.ok_or_else(|| {
            RelayError::Provider(format!(
                "light client update for period {period} lacks committee rotation"
            ))
        })
    }

    /// Latest finality update; carries no committee rotation.
    pub async fn get_finalized_light_client_update(&self) -> RelayResult<LightClientUpdate> {
        let update: ApiData<LightClientUpdateDto> = self
            .get_json("/eth/v1/beacon/light_client/finality_update")
            .await?;
        update.data.into_update(false)
    }
}
