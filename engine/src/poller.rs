//! Per-node streaming poller
//!
//! A poller owns the right to write its node's rings. Each pass opens the
//! node's stats stream and ingests records until the stream fails, the node
//! is removed from the cluster or a fatal configuration error surfaces.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::analyzer::{analyze_stat, emit_candidates, EventSink};
use crate::client::StatsSource;
use crate::engine::Engine;
use crate::error::EngineError;
use crate::event_bus::{BusHandle, Notice};
use crate::metrics::EngineMetrics;
use crate::stream::StatsRecord;

/// How a poll pass ended
#[derive(Debug)]
pub enum PollExit {
    /// Transient failure; the supervisor backs off and polls again
    Retry(EngineError),
    /// The node left the cluster; never retried
    NodeGone,
    /// The process must terminate
    Fatal(EngineError),
}

/// One pass of polling a node, restartable by the supervisor
#[async_trait]
pub trait PollOnce: Send {
    fn node(&self) -> &str;

    async fn poll_once(&mut self) -> PollExit;
}

/// Streams one node's stats into the engine
pub struct Poller {
    node: String,
    engine: Arc<Engine>,
    source: Arc<dyn StatsSource>,
    sink: Arc<dyn EventSink>,
    bus: BusHandle,
    metrics: Arc<EngineMetrics>,
    kill: CancellationToken,
    /// Rounding remainder of the last gap computation, in seconds
    carry: f64,
}

impl Poller {
    pub fn new(
        node: impl Into<String>,
        engine: Arc<Engine>,
        source: Arc<dyn StatsSource>,
        sink: Arc<dyn EventSink>,
        bus: BusHandle,
        metrics: Arc<EngineMetrics>,
        kill: CancellationToken,
    ) -> Self {
        Self {
            node: node.into(),
            engine,
            source,
            sink,
            bus,
            metrics,
            kill,
            carry: 0.0,
        }
    }

    /// Apply one record: notices, registry upkeep, ring append and analysis
    pub async fn ingest(&mut self, record: StatsRecord) -> Result<(), PollExit> {
        self.metrics.records_ingested.inc();

        if record.rebalance {
            self.bus.publish(Notice::Rebalance);
        }

        self.update_registry(&record.stats).await?;

        let outcome = self
            .engine
            .append_record(&self.node, Utc::now(), &record.stats, &mut self.carry)
            .await
            .map_err(|e| match e {
                EngineError::NodeGone { .. } => PollExit::NodeGone,
                other => PollExit::Retry(other),
            })?;

        if outcome.missed > 0 {
            debug!(node = %self.node, missed = outcome.missed, "record arrived late");
            self.metrics.samples_missed.inc_by(outcome.missed as u64);
            self.bus.publish(Notice::Slow(self.node.clone()));
        }

        for stat in self.engine.known_stats().await {
            let candidates = analyze_stat(&self.engine, &self.node, &stat).await;
            if !candidates.is_empty() {
                emit_candidates(
                    &self.engine,
                    self.sink.as_ref(),
                    &self.node,
                    &stat,
                    candidates,
                    outcome.arrived_at,
                )
                .await;
            }
        }

        Ok(())
    }

    async fn update_registry(&self, stats: &BTreeMap<String, f64>) -> Result<(), PollExit> {
        let promoted = self
            .engine
            .promote_once(&self.node, stats)
            .await
            .map_err(|e| PollExit::Fatal(e.into()))?;

        match promoted {
            Some(registered) => {
                for stat in registered {
                    self.bus.publish(Notice::StatAdded(stat));
                }
                self.apply_server_thresholds().await;
            }
            None => {
                let changes = self.engine.reconcile(&self.node, stats).await;
                for stat in changes.added {
                    self.bus.publish(Notice::StatAdded(stat));
                }
                for stat in changes.removed {
                    self.bus.publish(Notice::StatRemoved(stat));
                }
            }
        }
        Ok(())
    }

    async fn apply_server_thresholds(&self) {
        let thresholds = match self.source.server_thresholds(&self.node).await {
            Ok(thresholds) => thresholds,
            Err(e) => {
                warn!(node = %self.node, error = %e, "server thresholds unavailable");
                return;
            }
        };
        for (stat, threshold) in thresholds {
            if self.engine.merge_server_threshold(&stat, &threshold).await {
                info!(node = %self.node, stat = %stat, "applied server threshold");
            }
        }
    }
}

#[async_trait]
impl PollOnce for Poller {
    fn node(&self) -> &str {
        &self.node
    }

    async fn poll_once(&mut self) -> PollExit {
        info!(node = %self.node, "opening stats stream");

        let mut stream = tokio::select! {
            biased;
            _ = self.kill.cancelled() => return PollExit::NodeGone,
            opened = self.source.open_stream(&self.node) => match opened {
                Ok(stream) => stream,
                Err(e) => return PollExit::Retry(e.into()),
            },
        };

        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.kill.cancelled() => return PollExit::NodeGone,
                _ = ticker.tick() => {}
            }

            let record = tokio::select! {
                biased;
                _ = self.kill.cancelled() => return PollExit::NodeGone,
                record = stream.next_record() => record,
            };

            match record {
                Ok(record) => {
                    if let Err(exit) = self.ingest(record).await {
                        if let PollExit::Fatal(e) = &exit {
                            warn!(node = %self.node, error = %e, "poller stopping on fatal error");
                        }
                        return exit;
                    }
                }
                Err(e) => return PollExit::Retry(e.into()),
            }
        }
    }
}
