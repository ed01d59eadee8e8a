// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Callback delivery to origin clients.
//!
//! Every queue result is announced back to the client that submitted the
//! work. Delivery is fire-and-forget from the queue's perspective: failures
//! are logged, and any retry policy belongs to the transport itself.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{EngineError, Result};

/// Capability to deliver a result payload to a client endpoint.
#[async_trait]
pub trait CallbackTransport: Send + Sync {
    /// POST `payload` to `endpoint` of the named client.
    async fn post(&self, client: &str, endpoint: &str, payload: &Value) -> Result<()>;
}

/// HTTP implementation of [`CallbackTransport`].
///
/// Clients are registered up front with a base URL; results are posted to
/// `{base}/{endpoint}` as JSON.
pub struct HttpCallbackTransport {
    clients: HashMap<String, String>,
    http: reqwest::Client,
}

impl HttpCallbackTransport {
    /// Create a transport with the given client base URLs.
    pub fn new(clients: HashMap<String, String>) -> Self {
        Self {
            clients,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl CallbackTransport for HttpCallbackTransport {
    async fn post(&self, client: &str, endpoint: &str, payload: &Value) -> Result<()> {
        let base = self
            .clients
            .get(client)
            .ok_or_else(|| EngineError::Transport(format!("unknown client '{}'", client)))?;

        let response = self
            .http
            .post(format!("{}/{}", base.trim_end_matches('/'), endpoint))
            .json(payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(EngineError::Transport(format!(
                "callback to '{}' returned {}",
                client,
                response.status()
            )));
        }

        Ok(())
    }
}
