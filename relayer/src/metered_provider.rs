// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::metrics::RelayerMetrics;
use ethers::providers::{Http, HttpClientError, JsonRpcClient, Provider};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;
use std::sync::Arc;
use url::{ParseError, Url};

/// JSON-RPC transport that counts and times every query, and keeps the
/// per-endpoint connectivity gauge up to date.
#[derive(Debug, Clone)]
pub struct MeteredHttpProvider {
    inner: Http,
    endpoint_label: String,
    metrics: Arc<RelayerMetrics>,
}

#[async_trait::async_trait]
impl JsonRpcClient for MeteredHttpProvider {
    type Error = HttpClientError;

    async fn request<T: Serialize + Send + Sync + Debug, R: DeserializeOwned + Send>(
        &self,
        method: &str,
        params: T,
    ) -> Result<R, HttpClientError> {
        self.metrics
            .rpc_queries
            .with_label_values(&[&self.endpoint_label, method])
            .inc();
        let _guard = self
            .metrics
            .rpc_queries_latency
            .with_label_values(&[&self.endpoint_label, method])
            .start_timer();

        let result = self.inner.request(method, params).await;
        self.metrics
            .node_connected
            .with_label_values(&[&self.endpoint_label])
            .set(if result.is_ok() { 1 } else { 0 });
        result
    }
}

impl MeteredHttpProvider {
    pub fn new(
        url: impl Into<Url>,
        endpoint_label: impl Into<String>,
        metrics: Arc<RelayerMetrics>,
    ) -> Self {
        Self {
            inner: Http::new(url),
            endpoint_label: endpoint_label.into(),
            metrics,
        }
    }
}

pub fn new_metered_provider(
    url: &str,
    endpoint_label: &str,
    metrics: Arc<RelayerMetrics>,
) -> Result<Provider<MeteredHttpProvider>, ParseError> {
    let transport = MeteredHttpProvider::new(Url::parse(url)?, endpoint_label, metrics);
    Ok(Provider::new(transport))
}
