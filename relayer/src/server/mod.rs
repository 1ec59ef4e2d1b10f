// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Admin HTTP endpoints for operator-driven beacon submissions. Every
//! response uses the `{data, success, message}` envelope.

use crate::server::handler::AdminRequestHandlerTrait;
use crate::types::ExecutionHeader;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;

pub mod handler;

#[cfg(test)]
pub(crate) mod mock_handler;

pub type AdminState = Arc<dyn AdminRequestHandlerTrait + Send + Sync>;

pub const CLIENT_MODE_PATH: &str = "/getClientMode";
pub const GET_ETH_HEADERS_PATH: &str = "/getEthHeaders";
pub const SUBMIT_ETH_HEADERS_PATH: &str = "/submitEthHeaders";
pub const SUBMIT_LIGHT_CLIENT_UPDATE_PATH: &str = "/submitLightClientUpdate";

#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub data: T,
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct BaseData {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClientModeData {
    pub mode: u8,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct HeadersData {
    pub headers: Vec<ExecutionHeader>,
}

#[derive(Debug, Deserialize)]
pub struct SubmitHeadersRequest {
    pub data: HeadersData,
}

pub fn run_server(
    socket_address: &SocketAddr,
    handler: AdminState,
) -> tokio::task::JoinHandle<()> {
    let socket_address = *socket_address;
    tokio::spawn(async move {
        let listener = tokio::net::TcpListener::bind(socket_address).await.unwrap();
        tracing::info!("admin server listening on {socket_address}");
        axum::serve(listener, make_router(handler).into_make_service())
            .await
            .unwrap();
    })
}

pub(crate) fn make_router(handler: AdminState) -> Router {
    Router::new()
        .route("/", get(hello))
        .route(CLIENT_MODE_PATH, get(get_client_mode))
        .route(GET_ETH_HEADERS_PATH, get(get_eth_headers))
        .route(SUBMIT_ETH_HEADERS_PATH, post(submit_eth_headers))
        .route(
            SUBMIT_LIGHT_CLIENT_UPDATE_PATH,
            post(submit_light_client_update),
        )
        .with_state(handler)
}

async fn hello() -> &'static str {
    "Hello, world!"
}

pub(crate) async fn get_client_mode(
    State(handler): State<AdminState>,
) -> Json<Envelope<Option<ClientModeData>>> {
    match handler.get_client_mode().await {
        Ok(mode) => Json(Envelope {
            data: Some(ClientModeData { mode }),
            success: true,
            message: "success".to_string(),
        }),
        Err(e) => {
            tracing::error!("getClientMode failed: {e}");
            Json(Envelope {
                data: None,
                success: false,
                message: e.to_string(),
            })
        }
    }
}

pub(crate) async fn get_eth_headers(
    State(handler): State<AdminState>,
) -> Json<Envelope<HeadersData>> {
    match handler.get_eth_headers().await {
        Ok(headers) => Json(Envelope {
            data: HeadersData { headers },
            success: true,
            message: "success".to_string(),
        }),
        Err(e) => {
            tracing::error!("getEthHeaders failed: {e}");
            Json(Envelope {
                data: HeadersData::default(),
                success: false,
                message: e.to_string(),
            })
        }
    }
}

pub(crate) async fn submit_eth_headers(
    State(handler): State<AdminState>,
    Json(request): Json<SubmitHeadersRequest>,
) -> Json<BaseData> {
    match handler.submit_eth_headers(request.data.headers).await {
        Ok(()) => Json(BaseData {
            success: true,
            message: "success".to_string(),
        }),
        Err(e) => {
            tracing::error!("submitEthHeaders failed: {e}");
            Json(BaseData {
                success: false,
                message: e.to_string(),
            })
        }
    }
}

pub(crate) async fn submit_light_client_update(
    State(handler): State<AdminState>,
) -> Json<BaseData> {
    match handler.submit_light_client_update().await {
        Ok(()) => Json(BaseData {
            success: true,
            message: "success".to_string(),
        }),
        Err(e) => {
            tracing::error!("submitLightClientUpdate failed: {e}");
            Json(BaseData {
                success: false,
                message: e.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::mock_handler::MockAdminHandler;
    use crate::test_utils::sample_execution_header;
    use header_relayer_config::local_ip_utils;

    fn state(mock: MockAdminHandler) -> AdminState {
        Arc::new(mock)
    }

    #[tokio::test]
    async fn test_get_client_mode_envelope() {
        let mock = MockAdminHandler::new().with_client_mode(1);
        let Json(envelope) = get_client_mode(State(state(mock))).await;
        assert!(envelope.success);
        assert_eq!(envelope.data.unwrap().mode, 1);
        assert_eq!(envelope.message, "success");
    }

    #[tokio::test]
    async fn test_get_client_mode_failure_envelope() {
        let mock = MockAdminHandler::new(); // no mode scripted
        let Json(envelope) = get_client_mode(State(state(mock))).await;
        assert!(!envelope.success);
        assert!(envelope.data.is_none());
        assert!(!envelope.message.is_empty());
    }

    #[tokio::test]
    async fn test_get_eth_headers_envelope() {
        let headers = vec![sample_execution_header(1), sample_execution_header(2)];
        let mock = MockAdminHandler::new().with_headers(headers.clone());
        let Json(envelope) = get_eth_headers(State(state(mock))).await;
        assert!(envelope.success);
        assert_eq!(envelope.data.headers, headers);
    }

    #[tokio::test]
    async fn test_submit_eth_headers_round_trip() {
        let mock = MockAdminHandler::new();
        let submitted = mock.submitted();
        let request = SubmitHeadersRequest {
            data: HeadersData {
                headers: vec![sample_execution_header(7)],
            },
        };
        let Json(response) = submit_eth_headers(State(state(mock)), Json(request)).await;
        assert!(response.success);
        assert_eq!(submitted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_submit_light_client_update_envelope() {
        let mock = MockAdminHandler::new().with_client_mode(0);
        let Json(response) = submit_light_client_update(State(state(mock))).await;
        assert!(response.success);
    }

    #[tokio::test]
    async fn test_routes_served_over_http() {
        let host = local_ip_utils::localhost_for_testing();
        let port = local_ip_utils::get_available_port(&host);
        let socket_address = SocketAddr::new(host, port);
        let mock = MockAdminHandler::new().with_client_mode(1);
        let _server = run_server(&socket_address, Arc::new(mock));

        let url = format!("http://{socket_address}{CLIENT_MODE_PATH}");
        let mut response = None;
        for _ in 0..50 {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            if let Ok(r) = reqwest::get(&url).await {
                response = Some(r);
                break;
            }
        }
        let body: serde_json::Value = response
            .expect("admin server did not come up")
            .json()
            .await
            .unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["mode"], 1);
        assert_eq!(body["message"], "success");
    }

    #[test]
    fn test_envelope_json_shape() {
        let envelope = Envelope {
            data: Some(ClientModeData { mode: 0 }),
            success: true,
            message: "success".to_string(),
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["data"]["mode"], 0);
        assert_eq!(json["success"], true);
        assert_eq!(json["message"], "success");
    }
}
