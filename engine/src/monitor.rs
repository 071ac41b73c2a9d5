//! Cluster monitor
//!
//! Once per second the monitor asks the cluster for its live search nodes
//! and diffs the answer against the nodes being polled. New nodes get rings
//! and a supervised poller; departed nodes have their poller killed and their
//! rings dropped. The matching notice is published only after the engine
//! reflects the change.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::analyzer::EventSink;
use crate::client::{NodeDiscovery, StatsSource};
use crate::engine::Engine;
use crate::error::{ClusterError, Result};
use crate::event_bus::{BusHandle, Diagnostic, Notice};
use crate::metrics::EngineMetrics;
use crate::poller::Poller;
use crate::supervisor::supervise;

/// Difference between the polled node set and the live one
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl NodeDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Compute which nodes to start and stop polling; both lists are sorted
pub fn diff_nodes<'a, I>(polled: I, live: &[String]) -> NodeDiff
where
    I: IntoIterator<Item = &'a String>,
{
    let polled: HashSet<&String> = polled.into_iter().collect();
    let live_set: HashSet<&String> = live.iter().collect();

    let mut added: Vec<String> = live_set
        .iter()
        .filter(|node| !polled.contains(*node))
        .map(|node| node.to_string())
        .collect();
    let mut removed: Vec<String> = polled
        .iter()
        .filter(|node| !live_set.contains(*node))
        .map(|node| node.to_string())
        .collect();
    added.sort();
    removed.sort();
    NodeDiff { added, removed }
}

struct PollHandle {
    kill: CancellationToken,
    task: JoinHandle<usize>,
}

/// Keeps one supervised poller per live search node
pub struct ClusterMonitor {
    engine: Arc<Engine>,
    discovery: Arc<dyn NodeDiscovery>,
    source: Arc<dyn StatsSource>,
    sink: Arc<dyn EventSink>,
    bus: BusHandle,
    metrics: Arc<EngineMetrics>,
    polls: BTreeMap<String, PollHandle>,
    interval: Duration,
}

impl ClusterMonitor {
    pub fn new(
        engine: Arc<Engine>,
        discovery: Arc<dyn NodeDiscovery>,
        source: Arc<dyn StatsSource>,
        sink: Arc<dyn EventSink>,
        bus: BusHandle,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            engine,
            discovery,
            source,
            sink,
            bus,
            metrics,
            polls: BTreeMap::new(),
            interval: Duration::from_secs(1),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn polled_nodes(&self) -> Vec<String> {
        self.polls.keys().cloned().collect()
    }

    /// Run one discovery cycle.
    ///
    /// A failed query or an empty node list is a cluster-level error.
    pub async fn refresh(&mut self) -> Result<NodeDiff> {
        let live = self.discovery.search_nodes().await?;
        if live.is_empty() {
            return Err(ClusterError::NoSearchNodes.into());
        }

        let diff = diff_nodes(self.polls.keys(), &live);
        for node in &diff.added {
            self.start_poll(node).await;
        }
        for node in &diff.removed {
            self.stop_poll(node).await;
        }

        if !diff.is_empty() {
            info!(added = ?diff.added, removed = ?diff.removed, "search nodes changed");
        }
        self.metrics.nodes_polled.set(self.polls.len() as i64);
        Ok(diff)
    }

    async fn start_poll(&mut self, node: &str) {
        self.engine.add_node(node).await;

        let kill = CancellationToken::new();
        let poller = Poller::new(
            node,
            self.engine.clone(),
            self.source.clone(),
            self.sink.clone(),
            self.bus.clone(),
            self.metrics.clone(),
            kill.clone(),
        );
        let task = tokio::spawn(supervise(poller, kill.clone(), self.bus.clone(), self.metrics.clone()));
        self.polls.insert(node.to_string(), PollHandle { kill, task });

        self.bus.publish(Notice::NodeAdded(node.to_string()));
    }

    async fn stop_poll(&mut self, node: &str) {
        if let Some(handle) = self.polls.remove(node) {
            handle.kill.cancel();
        }
        self.engine.remove_node(node).await;

        self.bus.publish(Notice::NodeRemoved(node.to_string()));
    }

    /// Refresh once per interval until `shutdown` fires or the cluster fails.
    ///
    /// Cluster failures are reported as fatal diagnostics.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.refresh().await {
                error!(error = %e, "cluster monitor failed");
                self.bus.report(Diagnostic::from_error("monitor", None, &e));
                break;
            }
        }

        self.stop_all().await;
    }

    /// Kill every poller and wait for its supervisor to finish
    pub async fn stop_all(&mut self) {
        let polls = std::mem::take(&mut self.polls);
        for handle in polls.values() {
            handle.kill.cancel();
        }
        for (node, handle) in polls {
            let _ = handle.task.await;
            self.engine.remove_node(&node).await;
        }
        self.metrics.nodes_polled.set(0);
    }
}
