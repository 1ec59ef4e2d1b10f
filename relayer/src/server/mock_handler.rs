// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use super::handler::AdminRequestHandlerTrait;
use crate::error::{RelayError, RelayResult};
use crate::types::ExecutionHeader;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// Scripted admin handler for route tests.
pub struct MockAdminHandler {
    client_mode: Option<u8>,
    headers: Vec<ExecutionHeader>,
    submitted: Arc<Mutex<Vec<Vec<ExecutionHeader>>>>,
}

impl MockAdminHandler {
    pub fn new() -> Self {
        Self {
            client_mode: None,
            headers: Vec::new(),
            submitted: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_client_mode(mut self, mode: u8) -> Self {
        self.client_mode = Some(mode);
        self
    }

    pub fn with_headers(mut self, headers: Vec<ExecutionHeader>) -> Self {
        self.headers = headers;
        self
    }

    pub fn submitted(&self) -> Arc<Mutex<Vec<Vec<ExecutionHeader>>>> {
        self.submitted.clone()
    }
}

#[async_trait]
impl AdminRequestHandlerTrait for MockAdminHandler {
    async fn get_client_mode(&self) -> RelayResult<u8> {
        self.client_mode
            .ok_or_else(|| RelayError::Rpc("no client mode scripted".to_string()))
    }

    async fn get_eth_headers(&self) -> RelayResult<Vec<ExecutionHeader>> {
        Ok(self.headers.clone())
    }

    async fn submit_eth_headers(&self, headers: Vec<ExecutionHeader>) -> RelayResult<()> {
        self.submitted.lock().unwrap().push(headers);
        Ok(())
    }

    async fn submit_light_client_update(&self) -> RelayResult<()> {
        Ok(())
    }
}
