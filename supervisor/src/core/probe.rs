use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

use common::constants::API_KEY_HEADER;
use common::schemas::{HealthResponse, StatusResponse};
use common::trace_middleware::inject_trace_context_reqwest;

use crate::core::cluster::ClusterSpec;
use crate::core::node::{NodeEndpoint, NodeHealth, NodeState, NodeStatus, ResourceError};

/// A failed probe. The reconciler degrades the node instead of failing the tick.
#[derive(thiserror::Error, Debug)]
pub enum ProbeError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered {status}")]
    Status { url: String, status: StatusCode },
    #[error("undecodable response from {url}: {reason}")]
    Decode { url: String, reason: String },
}

#[derive(Clone, Debug)]
pub struct ProbeOptions {
    pub timeout: Duration,
    pub api_key: Option<String>,
}

impl ProbeOptions {
    pub fn for_cluster(spec: &ClusterSpec) -> Self {
        Self {
            timeout: spec.probe_timeout(),
            api_key: spec.admin_api_key.clone(),
        }
    }
}

#[async_trait]
pub trait NodeProber: Send + Sync {
    async fn health(
        &self,
        node: &NodeEndpoint,
        opts: &ProbeOptions,
    ) -> Result<NodeHealth, ProbeError>;

    async fn status(
        &self,
        node: &NodeEndpoint,
        opts: &ProbeOptions,
    ) -> Result<NodeStatus, ProbeError>;
}

/// Probes nodes over their HTTP API port.
pub struct HttpProber {
    http: Client,
}

impl HttpProber {
    pub fn new(http: Client) -> Self {
        Self { http }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: String,
        opts: &ProbeOptions,
        authenticated: bool,
    ) -> Result<T, ProbeError> {
        let mut req = self.http.get(&url).timeout(opts.timeout);
        if authenticated {
            if let Some(key) = &opts.api_key {
                req = req.header(API_KEY_HEADER, key);
            }
        }
        let req = inject_trace_context_reqwest(req);

        let resp = req.send().await.map_err(|source| ProbeError::Transport {
            url: url.clone(),
            source,
        })?;
        if !resp.status().is_success() {
            return Err(ProbeError::Status {
                url,
                status: resp.status(),
            });
        }

        let body = resp.bytes().await.map_err(|source| ProbeError::Transport {
            url: url.clone(),
            source,
        })?;
        serde_json::from_slice(&body).map_err(|e| ProbeError::Decode {
            url,
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl NodeProber for HttpProber {
    async fn health(
        &self,
        node: &NodeEndpoint,
        opts: &ProbeOptions,
    ) -> Result<NodeHealth, ProbeError> {
        let url = format!("{}/health", node.api_url());
        let body: HealthResponse = self.get_json(url, opts, false).await?;

        Ok(NodeHealth {
            ok: body.ok,
            resource_error: body
                .resource_error
                .as_deref()
                .and_then(ResourceError::from_wire),
        })
    }

    async fn status(
        &self,
        node: &NodeEndpoint,
        opts: &ProbeOptions,
    ) -> Result<NodeStatus, ProbeError> {
        let url = format!("{}/status", node.api_url());
        let body: StatusResponse = self.get_json(url, opts, true).await?;

        Ok(NodeStatus {
            state: NodeState::from_wire(&body.state),
            queued_writes: body.queued_writes,
            committed_index: body.committed_index,
        })
    }
}
