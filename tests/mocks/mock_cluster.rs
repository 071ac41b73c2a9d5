//! HTTP mock of a search cluster
//!
//! Every scripted node is served under `/nodes/<name>`: its stats stream
//! emits the scripted records one per interval and then closes, and its
//! manager endpoint reports the scripted memory quota. `/pools/default`
//! lists the scripted nodes the way the cluster manager does.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use futures::StreamExt;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// What one mock node serves
#[derive(Debug, Clone)]
pub struct NodeScript {
    pub records: Vec<String>,
    pub interval: Duration,
    pub memory_quota: Option<f64>,
}

impl NodeScript {
    pub fn new(records: Vec<String>) -> Self {
        Self {
            records,
            interval: Duration::from_secs(1),
            memory_quota: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_memory_quota(mut self, quota: f64) -> Self {
        self.memory_quota = Some(quota);
        self
    }
}

#[derive(Default)]
struct MockState {
    nodes: RwLock<HashMap<String, NodeScript>>,
    stream_requests: AtomicUsize,
    unauthorized: AtomicUsize,
}

impl MockState {
    fn script(&self, name: &str) -> Option<NodeScript> {
        self.nodes.read().ok()?.get(name).cloned()
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        let ok = headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("Basic "));
        if !ok {
            self.unauthorized.fetch_add(1, Ordering::SeqCst);
        }
        ok
    }
}

/// A running mock cluster bound to a local port
pub struct MockCluster {
    addr: SocketAddr,
    state: Arc<MockState>,
    handle: JoinHandle<()>,
}

impl MockCluster {
    pub async fn start() -> anyhow::Result<Self> {
        let state = Arc::new(MockState::default());
        let app = Router::new()
            .route("/pools/default", get(pools_default))
            .route("/nodes/:name/api/statsStream", get(stats_stream))
            .route("/nodes/:name/api/manager", get(manager))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::warn!(error = %e, "mock cluster stopped");
            }
        });

        Ok(Self { addr, state, handle })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Base URL pollers use for node `name`
    pub fn node_url(&self, name: &str) -> String {
        format!("{}/nodes/{}", self.base_url(), name)
    }

    pub fn set_node(&self, name: &str, script: NodeScript) {
        if let Ok(mut nodes) = self.state.nodes.write() {
            nodes.insert(name.to_string(), script);
        }
    }

    pub fn remove_node(&self, name: &str) {
        if let Ok(mut nodes) = self.state.nodes.write() {
            nodes.remove(name);
        }
    }

    /// Stats streams opened so far
    pub fn stream_requests(&self) -> usize {
        self.state.stream_requests.load(Ordering::SeqCst)
    }

    /// Requests rejected for missing credentials
    pub fn unauthorized_requests(&self) -> usize {
        self.state.unauthorized.load(Ordering::SeqCst)
    }
}

impl Drop for MockCluster {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn pools_default(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    if !state.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let mut nodes: Vec<_> = state
        .nodes
        .read()
        .map(|nodes| {
            nodes
                .keys()
                .map(|name| json!({ "hostname": format!("{name}:8091"), "services": ["fts", "kv"], "status": "healthy" }))
                .collect()
        })
        .unwrap_or_default();
    nodes.push(json!({ "hostname": "data-only:8091", "services": ["kv"], "status": "healthy" }));

    Json(json!({ "nodes": nodes })).into_response()
}

async fn stats_stream(
    State(state): State<Arc<MockState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !state.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let Some(script) = state.script(&name) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    state.stream_requests.fetch_add(1, Ordering::SeqCst);

    let interval = script.interval;
    let records = futures::stream::iter(script.records.into_iter().enumerate()).then(move |(i, record)| async move {
        if i > 0 {
            tokio::time::sleep(interval).await;
        }
        Ok::<_, Infallible>(Bytes::from(record))
    });
    Body::from_stream(records).into_response()
}

async fn manager(State(state): State<Arc<MockState>>, Path(name): Path<String>, headers: HeaderMap) -> Response {
    if !state.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match state.script(&name).and_then(|script| script.memory_quota) {
        Some(quota) => Json(json!({ "mgr": { "options": { "ftsMemoryQuota": quota } } })).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::record_json;
    use chronos_engine::client::{ClusterClient, NodeDiscovery};
    use chronos_engine::config::ClusterConfig;

    fn client_for(cluster: &MockCluster) -> ClusterClient {
        let config = ClusterConfig {
            connection_string: cluster.base_url(),
            username: "admin".to_string(),
            password: "secret".to_string(),
            ..ClusterConfig::default()
        };
        ClusterClient::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_discovery_through_pools() {
        let cluster = MockCluster::start().await.unwrap();
        cluster.set_node("n1", NodeScript::new(Vec::new()));
        cluster.set_node("n2", NodeScript::new(Vec::new()));

        let nodes = client_for(&cluster).search_nodes().await.unwrap();
        assert_eq!(nodes, vec!["http://n1:8094".to_string(), "http://n2:8094".to_string()]);
        assert_eq!(cluster.unauthorized_requests(), 0);
    }

    #[tokio::test]
    async fn test_stream_and_quota() {
        let cluster = MockCluster::start().await.unwrap();
        cluster.set_node(
            "n1",
            NodeScript::new(vec![record_json(&[("cpu", 1.0)], false), record_json(&[("cpu", 2.0)], true)])
                .with_interval(Duration::from_millis(10))
                .with_memory_quota(2048.0),
        );
        let client = client_for(&cluster);
        let node = cluster.node_url("n1");

        let mut stream = client.stats_stream(&node).await.unwrap();
        assert_eq!(stream.next_record().await.unwrap().stats["cpu"], 1.0);
        assert!(stream.next_record().await.unwrap().rebalance);
        assert!(stream.next_record().await.is_err());

        assert_eq!(client.memory_quota(&node).await.unwrap(), Some(2048.0));
        assert!(client.stats_stream(&cluster.node_url("missing")).await.is_err());
        assert_eq!(cluster.stream_requests(), 1);
    }
}
