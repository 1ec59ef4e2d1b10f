// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::beacon_relay::{BeaconSource, BeaconSyncer};
use crate::dest_client::{DestinationReader, DestinationWriter};
use crate::error::{RelayError, RelayResult};
use crate::types::ExecutionHeader;
use async_trait::async_trait;

/// The operations the admin endpoints expose. A trait so the routes can be
/// tested against a scripted handler.
#[async_trait]
pub trait AdminRequestHandlerTrait {
    async fn get_client_mode(&self) -> RelayResult<u8>;
    async fn get_eth_headers(&self) -> RelayResult<Vec<ExecutionHeader>>;
    async fn submit_eth_headers(&self, headers: Vec<ExecutionHeader>) -> RelayResult<()>;
    async fn submit_light_client_update(&self) -> RelayResult<()>;
}

#[async_trait]
impl<B, D> AdminRequestHandlerTrait for BeaconSyncer<B, D>
where
    B: BeaconSource,
    D: DestinationReader + DestinationWriter,
{
    async fn get_client_mode(&self) -> RelayResult<u8> {
        Ok(BeaconSyncer::get_client_mode(self).await? as u8)
    }

    async fn get_eth_headers(&self) -> RelayResult<Vec<ExecutionHeader>> {
        self.build_eth_headers().await
    }

    async fn submit_eth_headers(&self, headers: Vec<ExecutionHeader>) -> RelayResult<()> {
        BeaconSyncer::submit_eth_headers(self, &headers).await?;
        Ok(())
    }

    async fn submit_light_client_update(&self) -> RelayResult<()> {
        if self.send_light_client_updates_with_checks().await? {
            Ok(())
        } else {
            Err(RelayError::Generic(
                "no light client update to submit".to_string(),
            ))
        }
    }
}
