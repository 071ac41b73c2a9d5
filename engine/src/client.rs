//! Authenticated HTTP access to the cluster
//!
//! [`ClusterClient`] is the only component that talks to the network. It
//! discovers the cluster's search nodes, opens a node's stats stream and
//! fetches server-side thresholds. The monitor and the pollers depend on the
//! [`NodeDiscovery`] and [`StatsSource`] traits so they can run against
//! scripted sources.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::ClusterConfig;
use crate::error::{ClusterError, ClusterResult, EngineError, Result, StreamError, StreamResult};
use crate::registry::{Threshold, MEMORY_QUOTA_STAT};
use crate::stream::RecordDecoder;

/// Byte stream of a node's stats endpoint
pub type ByteStream = Pin<Box<dyn Stream<Item = StreamResult<Bytes>> + Send>>;

/// Decoder over a node's open stats stream
pub type NodeStream = RecordDecoder<ByteStream>;

/// Source of the cluster's current search nodes
#[async_trait]
pub trait NodeDiscovery: Send + Sync {
    async fn search_nodes(&self) -> ClusterResult<Vec<String>>;
}

/// Source of per-node stats streams and server thresholds
#[async_trait]
pub trait StatsSource: Send + Sync {
    async fn open_stream(&self, node: &str) -> StreamResult<NodeStream>;

    /// Thresholds the cluster itself imposes, keyed by stat
    async fn server_thresholds(&self, node: &str) -> Result<Vec<(String, Threshold)>>;
}

#[derive(Debug, Deserialize)]
struct PoolsDefault {
    #[serde(default)]
    nodes: Vec<PoolNode>,
}

#[derive(Debug, Deserialize)]
struct PoolNode {
    hostname: String,
    #[serde(default)]
    services: Vec<String>,
    #[serde(default)]
    status: String,
}

/// HTTP client for the cluster entry point and its search nodes
#[derive(Clone)]
pub struct ClusterClient {
    client: Client,
    base_url: String,
    username: String,
    password: String,
    search_port: u16,
    timeout: Duration,
}

impl ClusterClient {
    pub fn new(config: &ClusterConfig) -> Result<Self> {
        // Streams stay open indefinitely, so one-shot requests get their
        // own deadline instead of a client-wide timeout
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.connection_string.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            search_port: config.search_port,
            timeout: Duration::from_secs(config.request_timeout_secs),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn get(&self, url: &str) -> RequestBuilder {
        self.client
            .get(url)
            .basic_auth(&self.username, Some(&self.password))
    }

    async fn request_with_timeout<T>(&self, future: impl Future<Output = Result<T>>) -> Result<T> {
        timeout(self.timeout, future)
            .await
            .map_err(|_| EngineError::Generic(format!("request timed out after {:?}", self.timeout)))?
    }

    /// Query the cluster manager for healthy nodes running the search service
    pub async fn fetch_search_nodes(&self) -> ClusterResult<Vec<String>> {
        let url = format!("{}/pools/default", self.base_url);
        let response = self
            .request_with_timeout(async { Ok::<_, EngineError>(self.get(&url).send().await?) })
            .await
            .map_err(|e| ClusterError::Query { reason: e.to_string() })?;

        if !response.status().is_success() {
            return Err(ClusterError::Status { status: response.status().as_u16() });
        }

        let pools: PoolsDefault = self
            .request_with_timeout(async { Ok::<_, EngineError>(response.json().await?) })
            .await
            .map_err(|e| ClusterError::Query { reason: e.to_string() })?;

        let nodes = search_node_urls(&pools.nodes, self.search_port);
        debug!(count = nodes.len(), "discovered search nodes");
        Ok(nodes)
    }

    /// Open `<node>/api/statsStream` and wrap it in a record decoder
    pub async fn stats_stream(&self, node: &str) -> StreamResult<NodeStream> {
        let url = format!("{node}/api/statsStream");
        let response = self
            .request_with_timeout(async { Ok::<_, EngineError>(self.get(&url).send().await?) })
            .await
            .map_err(|e| StreamError::Connect {
                node: node.to_string(),
                reason: e.to_string(),
            })?;

        check_stream_status(node, &response)?;

        let bytes: ByteStream = Box::pin(
            response
                .bytes_stream()
                .map(|chunk| chunk.map_err(|e| StreamError::Transport { reason: e.to_string() })),
        );
        Ok(RecordDecoder::new(bytes))
    }

    /// Read the search service's memory quota from `<node>/api/manager`
    pub async fn memory_quota(&self, node: &str) -> Result<Option<f64>> {
        let url = format!("{node}/api/manager");
        let body: Value = self
            .request_with_timeout(async {
                let response = self.get(&url).send().await?;
                if !response.status().is_success() {
                    return Err(EngineError::Generic(format!(
                        "manager endpoint returned {}",
                        response.status()
                    )));
                }
                Ok(response.json().await?)
            })
            .await?;
        Ok(memory_quota_from(&body))
    }
}

fn check_stream_status(node: &str, response: &Response) -> StreamResult<()> {
    if response.status() == StatusCode::OK {
        Ok(())
    } else {
        Err(StreamError::Status {
            node: node.to_string(),
            status: response.status().as_u16(),
        })
    }
}

/// Base URLs of the nodes running a healthy search service
fn search_node_urls(nodes: &[PoolNode], search_port: u16) -> Vec<String> {
    let mut urls: Vec<String> = nodes
        .iter()
        .filter(|node| node.services.iter().any(|service| service == "fts"))
        .filter(|node| node.status != "unhealthy")
        .map(|node| format!("http://{}:{}", host_of(&node.hostname), search_port))
        .collect();
    urls.sort();
    urls.dedup();
    urls
}

/// Strip the management port from a `host:port` pair, keeping IPv6 brackets
fn host_of(hostname: &str) -> &str {
    if hostname.starts_with('[') {
        return match hostname.find(']') {
            Some(end) => &hostname[..=end],
            None => hostname,
        };
    }
    match hostname.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => hostname,
    }
}

/// Extract `mgr.options.ftsMemoryQuota`, accepting numbers and numeric strings
fn memory_quota_from(body: &Value) -> Option<f64> {
    match body.pointer("/mgr/options/ftsMemoryQuota")? {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

#[async_trait]
impl NodeDiscovery for ClusterClient {
    async fn search_nodes(&self) -> ClusterResult<Vec<String>> {
        self.fetch_search_nodes().await
    }
}

#[async_trait]
impl StatsSource for ClusterClient {
    async fn open_stream(&self, node: &str) -> StreamResult<NodeStream> {
        self.stats_stream(node).await
    }

    async fn server_thresholds(&self, node: &str) -> Result<Vec<(String, Threshold)>> {
        match self.memory_quota(node).await {
            Ok(Some(quota)) => Ok(vec![(
                MEMORY_QUOTA_STAT.to_string(),
                Threshold { max: Some(quota), ..Threshold::default() },
            )]),
            Ok(None) => Ok(Vec::new()),
            Err(e) => {
                warn!(node, error = %e, "unable to read server thresholds");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pool_node(hostname: &str, services: &[&str], status: &str) -> PoolNode {
        PoolNode {
            hostname: hostname.to_string(),
            services: services.iter().map(|s| s.to_string()).collect(),
            status: status.to_string(),
        }
    }

    #[test]
    fn test_search_node_selection() {
        let nodes = vec![
            pool_node("10.0.0.2:8091", &["kv", "fts"], "healthy"),
            pool_node("10.0.0.1:8091", &["fts"], "warmup"),
            pool_node("10.0.0.3:8091", &["kv"], "healthy"),
            pool_node("10.0.0.4:8091", &["fts"], "unhealthy"),
            pool_node("[::1]:8091", &["fts"], "healthy"),
        ];
        assert_eq!(
            search_node_urls(&nodes, 8094),
            vec![
                "http://10.0.0.1:8094".to_string(),
                "http://10.0.0.2:8094".to_string(),
                "http://[::1]:8094".to_string(),
            ]
        );
    }

    #[test]
    fn test_host_of() {
        assert_eq!(host_of("node1.local:8091"), "node1.local");
        assert_eq!(host_of("node1.local"), "node1.local");
        assert_eq!(host_of("[fe80::1]:8091"), "[fe80::1]");
    }

    #[test]
    fn test_memory_quota_parsing() {
        let numeric = json!({"status": "ok", "mgr": {"options": {"ftsMemoryQuota": 536870912}}});
        assert_eq!(memory_quota_from(&numeric), Some(536870912.0));

        let text = json!({"mgr": {"options": {"ftsMemoryQuota": "1024"}}});
        assert_eq!(memory_quota_from(&text), Some(1024.0));

        assert_eq!(memory_quota_from(&json!({"mgr": {"options": {}}})), None);
        assert_eq!(memory_quota_from(&json!({"mgr": {"options": {"ftsMemoryQuota": "lots"}}})), None);
    }

    #[test]
    fn test_pools_response_decoding() {
        let body = r#"{"nodes": [{"hostname": "a:8091", "services": ["fts"], "status": "healthy", "extra": 1}]}"#;
        let pools: PoolsDefault = serde_json::from_str(body).unwrap();
        assert_eq!(search_node_urls(&pools.nodes, 9000), vec!["http://a:9000".to_string()]);
    }
}
