// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::error::{RelayError, RelayResult};
use crate::types::{CrossChainBlock, ExecutionHeader};
use ethers::providers::{JsonRpcClient, Middleware, Provider};
use ethers::types::{H256, U64};
use std::sync::Arc;

/// Read-only view of the source chain's execution layer. Headers are fetched
/// with raw requests so they deserialize into the RLP-hashable header type
/// instead of the provider's transaction-bearing block type.
#[derive(Debug)]
pub struct SourceClient<P> {
    provider: Arc<Provider<P>>,
    chain_name: String,
    expected_chain_id: Option<u64>,
}

impl<P> SourceClient<P>
where
    P: JsonRpcClient + 'static,
{
    pub fn new(
        provider: Arc<Provider<P>>,
        chain_name: impl Into<String>,
        expected_chain_id: Option<u64>,
    ) -> Self {
        Self {
            provider,
            chain_name: chain_name.into(),
            expected_chain_id,
        }
    }

    pub fn chain_name(&self) -> &str {
        &self.chain_name
    }

    pub async fn chain_id(&self) -> RelayResult<u64> {
        let chain_id = self.provider.get_chainid().await.map_err(|e| {
            RelayError::Rpc(format!("get_chainid failed: {e}"))
        })?;
        Ok(chain_id.as_u64())
    }

    /// Validate the configured chain id against the node and log connection
    /// info. Connecting a pairing to the wrong network is unrecoverable, so
    /// this runs once at startup.
    pub async fn describe(&self) -> RelayResult<()> {
        let chain_id = self.chain_id().await?;
        let block_number = self.block_number().await?;
        if let Some(expected) = self.expected_chain_id {
            if chain_id != expected {
                return Err(RelayError::Provider(format!(
                    "[{}] chain id mismatch: expected {expected}, got {chain_id}",
                    self.chain_name
                )));
            }
            tracing::info!(
                "[{}] connected to chain {} (verified), current block: {}",
                self.chain_name,
                chain_id,
                block_number
            );
        } else {
            tracing::warn!(
                "[{}] connected to chain {} (NOT VERIFIED - no expected chain id set), current block: {}",
                self.chain_name,
                chain_id,
                block_number
            );
        }
        Ok(())
    }

    pub async fn block_number(&self) -> RelayResult<u64> {
        let number = self.provider.get_block_number().await?;
        Ok(number.as_u64())
    }

    pub async fn header_by_number(&self, number: u64) -> RelayResult<ExecutionHeader> {
        let header: Option<ExecutionHeader> = self
            .provider
            .request(
                "eth_getBlockByNumber",
                (format!("{:#x}", number), false),
            )
            .await?;
        header.ok_or_else(|| {
            RelayError::Provider(format!(
                "[{}] no block at height {number}",
                self.chain_name
            ))
        })
    }

    pub async fn header_by_hash(&self, hash: H256) -> RelayResult<ExecutionHeader> {
        let header: Option<ExecutionHeader> = self
            .provider
            .request("eth_getBlockByHash", (hash, false))
            .await?;
        header.ok_or_else(|| {
            RelayError::Provider(format!("[{}] no block with hash {hash:?}", self.chain_name))
        })
    }

    /// Latest height of the reverse-direction source chain.
    pub async fn cross_chain_block_number(&self) -> RelayResult<u64> {
        let number: U64 = self.provider.request("top_blockNumber", ()).await?;
        Ok(number.as_u64())
    }

    /// Block summary (type, chain bits, related hashes) of the
    /// reverse-direction source chain.
    pub async fn cross_chain_block_by_number(&self, number: u64) -> RelayResult<CrossChainBlock> {
        let block: Option<CrossChainBlock> = self
            .provider
            .request("top_getBlockByNumber", (format!("{:#x}", number),))
            .await?;
        block.ok_or_else(|| {
            RelayError::Provider(format!(
                "[{}] no cross-chain block at height {number}",
                self.chain_name
            ))
        })
    }
}
