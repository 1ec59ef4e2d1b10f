// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Canned-response JSON-RPC transport for tests. Responses are keyed by
//! `(method, serialized params)`; an unmatched request fails the way a node
//! would fail an unknown method.

use ethers::providers::{HttpClientError, JsonRpcClient, JsonRpcError};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Default)]
pub struct MockJsonRpcClient {
    responses: Arc<Mutex<HashMap<(String, String), serde_json::Value>>>,
}

impl MockJsonRpcClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_response<P: Serialize, R: Serialize>(&self, method: &str, params: P, response: R) {
        let key = (
            method.to_string(),
            serde_json::to_string(&params).expect("params must serialize"),
        );
        let value = serde_json::to_value(response).expect("response must serialize");
        self.responses.lock().unwrap().insert(key, value);
    }
}

#[async_trait::async_trait]
impl JsonRpcClient for MockJsonRpcClient {
    type Error = HttpClientError;

    async fn request<T: Serialize + Send + Sync + Debug, R: DeserializeOwned + Send>(
        &self,
        method: &str,
        params: T,
    ) -> Result<R, HttpClientError> {
        let key = (
            method.to_string(),
            serde_json::to_string(&params).map_err(|err| HttpClientError::SerdeJson {
                err,
                text: String::new(),
            })?,
        );
        let value = self
            .responses
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .ok_or_else(|| {
                HttpClientError::JsonRpcError(JsonRpcError {
                    code: -32601,
                    message: format!("no mock response for {method} with params {}", key.1),
                    data: None,
                })
            })?;
        serde_json::from_value(value.clone()).map_err(|err| HttpClientError::SerdeJson {
            err,
            text: value.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::U64;

    #[tokio::test]
    async fn test_mock_round_trip() {
        let mock = MockJsonRpcClient::new();
        mock.add_response("eth_blockNumber", (), U64::from(7u64));
        let got: U64 = mock.request("eth_blockNumber", ()).await.unwrap();
        assert_eq!(got, U64::from(7u64));
    }

    #[tokio::test]
    async fn test_unmatched_request_errors() {
        let mock = MockJsonRpcClient::new();
        let err = mock
            .request::<_, U64>("eth_blockNumber", ())
            .await
            .unwrap_err();
        assert!(matches!(err, HttpClientError::JsonRpcError(_)));
    }
}
