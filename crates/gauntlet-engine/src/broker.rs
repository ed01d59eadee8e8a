// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Gamespace broker client.
//!
//! The VM broker provisions the virtual environment backing a problem.
//! [`GamespaceBroker`] is the capability the pipeline depends on;
//! [`HttpGamespaceBroker`] talks to a real broker over HTTP.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use gauntlet_model::WorkspaceSpec;

use crate::error::{EngineError, Result};

/// A workspace push, pairing the resolved spec with its isolation scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceDeployment {
    /// Resolved workspace spec, including templates and ISO reference.
    pub spec: WorkspaceSpec,
    /// Isolation scope the broker groups resources under.
    pub isolation_id: Option<String>,
}

/// One VM of a started gamespace, as reported by the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmConsole {
    /// Broker VM identity, used to build console links.
    pub id: String,
    /// VM display name, possibly carrying a `#tag` suffix.
    pub name: String,
}

/// Result of starting a workspace.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployedWorkspace {
    /// Deployed VMs.
    pub vms: Vec<VmConsole>,
    /// Broker-supplied markdown to append to the problem text.
    pub markdown: Option<String>,
}

/// Capability to start, stop, and customize gamespaces.
#[async_trait]
pub trait GamespaceBroker: Send + Sync {
    /// Start the workspace described by `deployment`.
    async fn start_workspace(&self, deployment: &WorkspaceDeployment) -> Result<DeployedWorkspace>;

    /// Stop a previously started workspace.
    async fn stop_workspace(&self, id: &str) -> Result<()>;

    /// Fetch template customization text for a workspace.
    async fn fetch_templates(&self, workspace_id: i64) -> Result<String>;
}

/// HTTP implementation of [`GamespaceBroker`].
pub struct HttpGamespaceBroker {
    base_url: String,
    api_key: Option<String>,
    http: reqwest::Client,
}

impl HttpGamespaceBroker {
    /// Create a client for the broker at `base_url`.
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key,
            http: reqwest::Client::new(),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .http
            .request(method, format!("{}/{}", self.base_url, path));
        if let Some(key) = &self.api_key {
            builder = builder.header("x-api-key", key);
        }
        builder
    }
}

#[async_trait]
impl GamespaceBroker for HttpGamespaceBroker {
    async fn start_workspace(&self, deployment: &WorkspaceDeployment) -> Result<DeployedWorkspace> {
        let response = self
            .request(reqwest::Method::POST, "gamespace")
            .json(deployment)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(EngineError::Transport(format!(
                "broker start returned {}",
                response.status()
            )));
        }

        Ok(response.json().await?)
    }

    async fn stop_workspace(&self, id: &str) -> Result<()> {
        let response = self
            .request(reqwest::Method::DELETE, &format!("gamespace/{}", id))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(EngineError::Transport(format!(
                "broker stop returned {}",
                response.status()
            )));
        }

        Ok(())
    }

    async fn fetch_templates(&self, workspace_id: i64) -> Result<String> {
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("workspace/{}/templates", workspace_id),
            )
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(EngineError::Transport(format!(
                "broker templates returned {}",
                response.status()
            )));
        }

        Ok(response.text().await?)
    }
}
