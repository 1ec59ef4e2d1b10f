// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::error::{RelayError, RelayResult};
use crate::metrics::RelayerMetrics;
use crate::types::ClientMode;
use async_trait::async_trait;
use ethers::contract::abigen;
use ethers::providers::{JsonRpcClient, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{
    Address as EthAddress, BlockId, BlockNumber, Bytes, Eip1559TransactionRequest, Signature,
    H256, U256,
};
use std::sync::Arc;

abigen!(
    HeaderLightClient,
    r#"[
        function getHeight() external view returns (uint64)
        function isKnown(uint256 height, bytes32 data) external view returns (bool)
        function initialized() external view returns (bool)
        function getClientMode() external view returns (uint8)
        function finalizedBeaconBlockSlot() external view returns (uint64)
        function lastBlockNumber() external view returns (uint64)
        function maxMainHeight() external view returns (uint64)
        function init(bytes data) external
        function sync(bytes data) external
        function addLightClientBlocks(bytes data) external
        function submitBeaconChainLightClientUpdate(bytes update) external
        function reset() external
    ]"#
);

/// Read side of the destination light-client contract.
#[async_trait]
pub trait DestinationReader: Send + Sync {
    async fn get_height(&self) -> RelayResult<u64>;
    async fn is_known(&self, height: u64, hash: H256) -> RelayResult<bool>;
    async fn initialized(&self) -> RelayResult<bool>;
    async fn client_mode(&self) -> RelayResult<ClientMode>;
    async fn finalized_beacon_slot(&self) -> RelayResult<u64>;
    async fn finalized_execution_height(&self) -> RelayResult<u64>;
    async fn max_main_height(&self) -> RelayResult<u64>;
}

/// Write side of the destination light-client contract. All payloads are
/// opaque adapter-encoded bytes.
#[async_trait]
pub trait DestinationWriter: Send + Sync {
    async fn sync(&self, payload: &[u8]) -> RelayResult<H256>;
    async fn add_light_client_blocks(&self, payload: &[u8]) -> RelayResult<H256>;
    async fn submit_beacon_light_client_update(&self, payload: &[u8]) -> RelayResult<H256>;
    async fn init_client(&self, payload: &[u8]) -> RelayResult<H256>;
}

// Abort before signing when the wallet cannot cover the projected gas cost.
pub(crate) fn check_balance(balance: U256, gas_price: U256, gas_limit: U256) -> RelayResult<()> {
    let required = gas_price.saturating_mul(gas_limit);
    if balance <= required {
        return Err(RelayError::InsufficientFunds { balance, required });
    }
    Ok(())
}

#[derive(Debug)]
pub struct DestinationClient<P> {
    provider: Arc<Provider<P>>,
    contract: HeaderLightClient<Provider<P>>,
    contract_address: EthAddress,
    wallet: LocalWallet,
    chain_name: String,
    chain_id: u64,
    metrics: Arc<RelayerMetrics>,
}

impl<P> DestinationClient<P>
where
    P: JsonRpcClient + 'static,
{
    pub fn new(
        provider: Arc<Provider<P>>,
        contract_address: EthAddress,
        wallet: LocalWallet,
        chain_id: u64,
        chain_name: impl Into<String>,
        metrics: Arc<RelayerMetrics>,
    ) -> Self {
        let contract = HeaderLightClient::new(contract_address, provider.clone());
        Self {
            provider,
            contract,
            contract_address,
            wallet: wallet.with_chain_id(chain_id),
            chain_name: chain_name.into(),
            chain_id,
            metrics,
        }
    }

    pub fn wallet_address(&self) -> EthAddress {
        self.wallet.address()
    }

    /// Signer callback: refuse to sign for any address the wallet does not
    /// own. Addresses compare as raw bytes, which subsumes the
    /// case-insensitive hex comparison.
    pub(crate) fn sign_for(
        &self,
        requested: EthAddress,
        tx: &TypedTransaction,
    ) -> RelayResult<Signature> {
        if requested != self.wallet.address() {
            return Err(RelayError::SignerAddressMismatch {
                requested,
                wallet: self.wallet.address(),
            });
        }
        self.wallet
            .sign_transaction_sync(tx)
            .map_err(|e| RelayError::Generic(format!("sign failed: {e}")))
    }

    /// One submission: pending nonce, gas price, calldata, gas estimate,
    /// balance gate, EIP-1559 with zero tip, sign, send. Nothing is cached
    /// between submissions; the nonce tolerates external spends and relayer
    /// restarts.
    async fn submit(&self, calldata: Bytes, what: &str) -> RelayResult<H256> {
        let from = self.wallet.address();
        let nonce = self
            .provider
            .get_transaction_count(from, Some(BlockId::Number(BlockNumber::Pending)))
            .await?;
        let gas_price = self.provider.get_gas_price().await?;

        let request = Eip1559TransactionRequest::new()
            .from(from)
            .to(self.contract_address)
            .data(calldata)
            .nonce(nonce)
            .max_fee_per_gas(gas_price)
            .max_priority_fee_per_gas(U256::zero())
            .chain_id(self.chain_id);
        let mut tx: TypedTransaction = request.into();

        let gas_limit = self.provider.estimate_gas(&tx, None).await?;
        tx.set_gas(gas_limit);

        let balance = self.provider.get_balance(from, None).await?;
        let balance_gwei = balance / U256::exp10(9);
        self.metrics
            .wallet_balance_gwei
            .with_label_values(&[&self.chain_name])
            .set(if balance_gwei > U256::from(i64::MAX) {
                i64::MAX
            } else {
                balance_gwei.as_u64() as i64
            });
        check_balance(balance, gas_price, gas_limit)?;

        let signature = self.sign_for(from, &tx)?;
        let raw = tx.rlp_signed(&signature);
        let pending = self.provider.send_raw_transaction(raw).await?;
        let tx_hash = pending.tx_hash();

        tracing::info!(
            "[{}] {what} submitted, account {from:?} nonce {nonce} gas_price {gas_price} gas_limit {gas_limit} hash {tx_hash:?}",
            self.chain_name
        );
        Ok(tx_hash)
    }

    fn non_empty(&self, payload: &[u8], what: &str) -> RelayResult<()> {
        if payload.is_empty() {
            return Err(RelayError::Encoding(format!("empty {what} payload")));
        }
        Ok(())
    }

    /// Operator escape hatch mirroring the contract's `reset()`.
    pub async fn reset(&self) -> RelayResult<H256> {
        let calldata = self
            .contract
            .reset()
            .calldata()
            .ok_or_else(|| RelayError::Encoding("reset calldata".to_string()))?;
        self.submit(calldata, "reset").await
    }
}

fn rpc_err<E: std::fmt::Display>(what: &str) -> impl FnOnce(E) -> RelayError + '_ {
    move |e| RelayError::Rpc(format!("{what} failed: {e}"))
}

#[async_trait]
impl<P> DestinationReader for DestinationClient<P>
where
    P: JsonRpcClient + 'static,
{
    async fn get_height(&self) -> RelayResult<u64> {
        self.contract
            .get_height()
            .call()
            .await
            .map_err(rpc_err("getHeight"))
    }

    async fn is_known(&self, height: u64, hash: H256) -> RelayResult<bool> {
        self.contract
            .is_known(U256::from(height), hash.0)
            .call()
            .await
            .map_err(rpc_err("isKnown"))
    }

    async fn initialized(&self) -> RelayResult<bool> {
        self.contract
            .initialized()
            .call()
            .await
            .map_err(rpc_err("initialized"))
    }

    async fn client_mode(&self) -> RelayResult<ClientMode> {
        let mode = self
            .contract
            .get_client_mode()
            .call()
            .await
            .map_err(rpc_err("getClientMode"))?;
        ClientMode::try_from(mode)
    }

    async fn finalized_beacon_slot(&self) -> RelayResult<u64> {
        self.contract
            .finalized_beacon_block_slot()
            .call()
            .await
            .map_err(rpc_err("finalizedBeaconBlockSlot"))
    }

    async fn finalized_execution_height(&self) -> RelayResult<u64> {
        self.contract
            .last_block_number()
            .call()
            .await
            .map_err(rpc_err("lastBlockNumber"))
    }

    async fn max_main_height(&self) -> RelayResult<u64> {
        self.contract
            .max_main_height()
            .call()
            .await
            .map_err(rpc_err("maxMainHeight"))
    }
}

#[async_trait]
impl<P> DestinationWriter for DestinationClient<P>
where
    P: JsonRpcClient + 'static,
{
    async fn sync(&self, payload: &[u8]) -> RelayResult<H256> {
        self.non_empty(payload, "sync")?;
        let calldata = self
            .contract
            .sync(Bytes::from(payload.to_vec()))
            .calldata()
            .ok_or_else(|| RelayError::Encoding("sync calldata".to_string()))?;
        self.submit(calldata, "sync").await
    }

    async fn add_light_client_blocks(&self, payload: &[u8]) -> RelayResult<H256> {
        self.non_empty(payload, "addLightClientBlocks")?;
        let calldata = self
            .contract
            .add_light_client_blocks(Bytes::from(payload.to_vec()))
            .calldata()
            .ok_or_else(|| RelayError::Encoding("addLightClientBlocks calldata".to_string()))?;
        self.submit(calldata, "addLightClientBlocks").await
    }

    async fn submit_beacon_light_client_update(&self, payload: &[u8]) -> RelayResult<H256> {
        self.non_empty(payload, "submitBeaconChainLightClientUpdate")?;
        let calldata = self
            .contract
            .submit_beacon_chain_light_client_update(Bytes::from(payload.to_vec()))
            .calldata()
            .ok_or_else(|| {
                RelayError::Encoding("submitBeaconChainLightClientUpdate calldata".to_string())
            })?;
        self.submit(calldata, "submitBeaconChainLightClientUpdate")
            .await
    }

    async fn init_client(&self, payload: &[u8]) -> RelayResult<H256> {
        self.non_empty(payload, "init")?;
        let calldata = self
            .contract
            .init(Bytes::from(payload.to_vec()))
            .calldata()
            .ok_or_else(|| RelayError::Encoding("init calldata".to_string()))?;
        self.submit(calldata, "init")
            .await
            .map_err(|e| match e {
                RelayError::Rpc(msg) => RelayError::InitFailure(msg),
                other => other,
            })
    }
}
