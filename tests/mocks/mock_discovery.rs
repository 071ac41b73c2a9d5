//! Node discovery whose answer the test controls

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chronos_engine::client::NodeDiscovery;
use chronos_engine::error::{ClusterError, ClusterResult};

#[derive(Debug, Default)]
pub struct MockDiscovery {
    /// `None` makes every query fail
    nodes: Mutex<Option<Vec<String>>>,
    queries: AtomicUsize,
}

impl MockDiscovery {
    pub fn new<I, S>(nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let discovery = Self::default();
        discovery.set_nodes(nodes);
        discovery
    }

    pub fn set_nodes<I, S>(&self, nodes: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Ok(mut current) = self.nodes.lock() {
            *current = Some(nodes.into_iter().map(Into::into).collect());
        }
    }

    /// Make the cluster unreachable
    pub fn fail(&self) {
        if let Ok(mut current) = self.nodes.lock() {
            *current = None;
        }
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NodeDiscovery for MockDiscovery {
    async fn search_nodes(&self) -> ClusterResult<Vec<String>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let current = self.nodes.lock().ok().and_then(|nodes| nodes.clone());
        current.ok_or_else(|| ClusterError::Query { reason: "connection refused".to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_answers_follow_updates() {
        let discovery = MockDiscovery::new(["n1"]);
        assert_eq!(discovery.search_nodes().await.unwrap(), vec!["n1".to_string()]);

        discovery.set_nodes(["n1", "n2"]);
        assert_eq!(discovery.search_nodes().await.unwrap().len(), 2);

        discovery.fail();
        assert!(discovery.search_nodes().await.is_err());
        assert_eq!(discovery.queries(), 3);
    }
}
