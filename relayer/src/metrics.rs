// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use prometheus::{
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry,
    register_int_gauge_vec_with_registry, HistogramVec, IntCounterVec, IntGaugeVec, Registry,
    TextEncoder,
};
use std::net::SocketAddr;

const RPC_LATENCY_SEC_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10., 20., 30., 60., 120.,
];

#[derive(Clone, Debug)]
pub struct RelayerMetrics {
    pub(crate) rpc_queries: IntCounterVec,
    pub(crate) rpc_queries_latency: HistogramVec,
    pub(crate) node_connected: IntGaugeVec,

    pub(crate) dest_synced_height: IntGaugeVec,
    pub(crate) src_latest_height: IntGaugeVec,

    pub(crate) submitted_batches: IntCounterVec,
    pub(crate) submitted_headers: IntCounterVec,
    pub(crate) submitted_light_client_updates: IntCounterVec,
    pub(crate) relay_errors: IntCounterVec,
    pub(crate) fatal_timeouts: IntCounterVec,

    pub(crate) wallet_balance_gwei: IntGaugeVec,
    pub(crate) verify_queue_depth: IntGaugeVec,
}

impl RelayerMetrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            rpc_queries: register_int_counter_vec_with_registry!(
                "relayer_rpc_queries",
                "Total number of JSON-RPC queries, by endpoint and method",
                &["endpoint", "method"],
                registry,
            )
            .unwrap(),
            rpc_queries_latency: register_histogram_vec_with_registry!(
                "relayer_rpc_queries_latency",
                "Latency of JSON-RPC queries, by endpoint and method",
                &["endpoint", "method"],
                RPC_LATENCY_SEC_BUCKETS.to_vec(),
                registry,
            )
            .unwrap(),
            node_connected: register_int_gauge_vec_with_registry!(
                "relayer_node_connected",
                "1 when the last query to the endpoint succeeded, 0 otherwise",
                &["endpoint"],
                registry,
            )
            .unwrap(),
            dest_synced_height: register_int_gauge_vec_with_registry!(
                "relayer_dest_synced_height",
                "Last height (or slot) the destination contract reported as synced",
                &["chain"],
                registry,
            )
            .unwrap(),
            src_latest_height: register_int_gauge_vec_with_registry!(
                "relayer_src_latest_height",
                "Latest height (or slot) observed on the source chain",
                &["chain"],
                registry,
            )
            .unwrap(),
            submitted_batches: register_int_counter_vec_with_registry!(
                "relayer_submitted_batches",
                "Total number of header batches submitted to the destination",
                &["chain"],
                registry,
            )
            .unwrap(),
            submitted_headers: register_int_counter_vec_with_registry!(
                "relayer_submitted_headers",
                "Total number of individual headers submitted to the destination",
                &["chain"],
                registry,
            )
            .unwrap(),
            submitted_light_client_updates: register_int_counter_vec_with_registry!(
                "relayer_submitted_light_client_updates",
                "Total number of beacon light-client updates submitted",
                &["chain"],
                registry,
            )
            .unwrap(),
            relay_errors: register_int_counter_vec_with_registry!(
                "relayer_errors",
                "Total number of relay cycle errors, by chain and error type",
                &["chain", "error_type"],
                registry,
            )
            .unwrap(),
            fatal_timeouts: register_int_counter_vec_with_registry!(
                "relayer_fatal_timeouts",
                "Total number of fatal watchdog expirations",
                &["chain"],
                registry,
            )
            .unwrap(),
            wallet_balance_gwei: register_int_gauge_vec_with_registry!(
                "relayer_wallet_balance_gwei",
                "Relayer wallet balance in gwei, observed at submission time",
                &["chain"],
                registry,
            )
            .unwrap(),
            verify_queue_depth: register_int_gauge_vec_with_registry!(
                "relayer_verify_queue_depth",
                "Depth of the cross-chain verify queue",
                &["chain"],
                registry,
            )
            .unwrap(),
        }
    }

    pub fn new_for_testing() -> Self {
        Self::new(&Registry::new())
    }

    pub fn record_error(&self, chain: &str, error: &crate::error::RelayError) {
        self.relay_errors
            .with_label_values(&[chain, error.error_type()])
            .inc();
    }
}

/// Serve the registry on `0.0.0.0:port/metrics` in the Prometheus text format.
pub fn start_prometheus_server(port: u16, registry: Registry) -> tokio::task::JoinHandle<()> {
    let socket_address: SocketAddr = ([0, 0, 0, 0], port).into();
    tokio::spawn(async move {
        let app = axum::Router::new().route(
            "/metrics",
            axum::routing::get(move || {
                let registry = registry.clone();
                async move {
                    let encoder = TextEncoder::new();
                    encoder
                        .encode_to_string(&registry.gather())
                        .unwrap_or_else(|e| format!("failed to encode metrics: {e}"))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind(socket_address).await.unwrap();
        axum::serve(listener, app.into_make_service()).await.unwrap();
    })
}
