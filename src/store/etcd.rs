//! etcd v2 Store
//!
//! Maps the coordination operations onto the etcd v2 keys API:
//! in-order keys via `POST`, compare-and-swap via `prevIndex`, sorted
//! directory listing, and long-poll watches via `wait`/`waitIndex`.

use std::time::Duration;
use reqwest::StatusCode;
use serde::Deserialize;

use super::{CoordinationStore, KeyNode, WatchEvent};
use crate::config::EtcdConfig;
use crate::error::{Error, Result};

/// etcd error code: key not found
const ERROR_KEY_NOT_FOUND: u32 = 100;
/// etcd error code: compare failed
const ERROR_COMPARE_FAILED: u32 = 101;
/// etcd error code: watch index outside the retained history
const ERROR_EVENT_INDEX_CLEARED: u32 = 401;

/// Response envelope for successful requests
#[derive(Debug, Deserialize)]
struct EtcdResponse {
    action: String,
    node: Option<EtcdNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EtcdNode {
    key: Option<String>,
    value: Option<String>,
    #[serde(default)]
    dir: bool,
    #[serde(default)]
    nodes: Vec<EtcdNode>,
    #[serde(default)]
    modified_index: u64,
}

/// Error body returned with non-2xx responses
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EtcdError {
    error_code: u32,
    message: String,
    #[serde(default)]
    cause: Option<String>,
}

impl EtcdError {
    fn describe(&self) -> String {
        match &self.cause {
            Some(cause) => format!("etcd error {}: {} ({})", self.error_code, self.message, cause),
            None => format!("etcd error {}: {}", self.error_code, self.message),
        }
    }

    fn into_transport(self) -> Error {
        Error::Transport(self.describe())
    }
}

enum Reply {
    Ok(EtcdResponse),
    Failed(EtcdError),
}

fn decode(status: StatusCode, body: &str) -> Result<Reply> {
    if status.is_success() {
        return Ok(Reply::Ok(serde_json::from_str(body)?));
    }

    match serde_json::from_str::<EtcdError>(body) {
        Ok(error) => Ok(Reply::Failed(error)),
        Err(_) => Err(Error::Transport(format!("HTTP {}: {}", status, body.trim()))),
    }
}

fn into_key_node(node: EtcdNode) -> Result<KeyNode> {
    match (node.key, node.value) {
        (Some(key), Some(value)) => Ok(KeyNode { key, value, revision: node.modified_index }),
        (key, _) => Err(Error::Transport(format!(
            "etcd node {} has no value",
            key.unwrap_or_else(|| "<unnamed>".into())
        ))),
    }
}

fn expect_node(response: EtcdResponse) -> Result<EtcdNode> {
    response
        .node
        .ok_or_else(|| Error::Transport(format!("etcd '{}' response without node", response.action)))
}

fn into_watch_event(response: EtcdResponse) -> Result<WatchEvent> {
    let removed = matches!(
        response.action.as_str(),
        "delete" | "expire" | "compareAndDelete"
    );
    let node = expect_node(response)?;

    Ok(WatchEvent {
        key: node.key.unwrap_or_default(),
        value: if removed { None } else { node.value },
        revision: node.modified_index,
    })
}

fn into_children(response: EtcdResponse) -> Result<Vec<KeyNode>> {
    let dir = expect_node(response)?;
    let mut children = dir
        .nodes
        .into_iter()
        .filter(|node| !node.dir)
        .map(into_key_node)
        .collect::<Result<Vec<_>>>()?;

    // etcd sorts already; keep the order guarantee local
    children.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(children)
}

/// Coordination store backed by an etcd v2 cluster
pub struct EtcdStore {
    /// Client for bounded requests
    client: reqwest::Client,
    /// Client for long-poll watches (no request timeout)
    watch_client: reqwest::Client,
    /// Base URL, without trailing slash
    endpoint: String,
}

impl EtcdStore {
    /// Create a store for the configured endpoint
    pub fn new(config: &EtcdConfig) -> Result<Self> {
        if config.endpoint.is_empty() {
            return Err(Error::Config("etcd.endpoint cannot be empty".into()));
        }

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        let watch_client = reqwest::Client::builder().build()?;

        Ok(Self {
            client,
            watch_client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, key: &str) -> String {
        if key.starts_with('/') {
            format!("{}/v2/keys{}", self.endpoint, key)
        } else {
            format!("{}/v2/keys/{}", self.endpoint, key)
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Reply> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        decode(status, &body)
    }
}

fn ttl_param(ttl: Duration) -> String {
    ttl.as_secs().max(1).to_string()
}

#[async_trait::async_trait]
impl CoordinationStore for EtcdStore {
    async fn create(&self, path: &str, value: &str, ttl: Duration) -> Result<KeyNode> {
        let ttl = ttl_param(ttl);
        let request = self
            .client
            .post(self.url(path))
            .form(&[("value", value), ("ttl", ttl.as_str())]);

        match self.send(request).await? {
            Reply::Ok(response) => into_key_node(expect_node(response)?),
            Reply::Failed(error) => Err(error.into_transport()),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration, expected_revision: u64) -> Result<u64> {
        let ttl = ttl_param(ttl);
        let request = self
            .client
            .put(self.url(key))
            .query(&[("prevIndex", expected_revision)])
            .form(&[("value", value), ("ttl", ttl.as_str())]);

        match self.send(request).await? {
            Reply::Ok(response) => Ok(expect_node(response)?.modified_index),
            Reply::Failed(error)
                if matches!(error.error_code, ERROR_KEY_NOT_FOUND | ERROR_COMPARE_FAILED) =>
            {
                tracing::debug!("Conditional write on {} rejected: {}", key, error.describe());
                Err(Error::Conflict { key: key.to_string(), expected: expected_revision })
            }
            Reply::Failed(error) => Err(error.into_transport()),
        }
    }

    async fn list(&self, path: &str) -> Result<Vec<KeyNode>> {
        let request = self.client.get(self.url(path)).query(&[("sorted", "true")]);

        match self.send(request).await? {
            Reply::Ok(response) => into_children(response),
            Reply::Failed(error) if error.error_code == ERROR_KEY_NOT_FOUND => Ok(Vec::new()),
            Reply::Failed(error) => Err(error.into_transport()),
        }
    }

    async fn watch(&self, key: &str, from_revision: u64) -> Result<WatchEvent> {
        let wait_index = from_revision.to_string();
        let request = self
            .watch_client
            .get(self.url(key))
            .query(&[("wait", "true"), ("waitIndex", wait_index.as_str())]);

        match self.send(request).await? {
            Reply::Ok(response) => into_watch_event(response),
            Reply::Failed(error) => {
                if error.error_code == ERROR_EVENT_INDEX_CLEARED {
                    tracing::warn!("Watch on {} fell out of etcd history", key);
                }
                Err(error.into_transport())
            }
        }
    }

    async fn delete(&self, key: &str, expected_revision: u64) -> Result<()> {
        let request = self
            .client
            .delete(self.url(key))
            .query(&[("prevIndex", expected_revision)]);

        match self.send(request).await? {
            Reply::Ok(_) => Ok(()),
            Reply::Failed(error)
                if matches!(error.error_code, ERROR_KEY_NOT_FOUND | ERROR_COMPARE_FAILED) =>
            {
                Err(Error::Conflict { key: key.to_string(), expected: expected_revision })
            }
            Reply::Failed(error) => Err(error.into_transport()),
        }
    }
}
