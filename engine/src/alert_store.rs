//! Alert store
//!
//! Owns the list of active alerts behind one exclusive lock. Events from the
//! analyzer either re-trigger a live alert or create a new one back-filled
//! from the node's rings. A 1 Hz tick extends alerts with post-trigger data,
//! ages them out and hands retired alerts to the reporter.
//!
//! The alert lock comes last in the engine's lock order, so ring snapshots
//! are always taken with the alert list unlocked.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::alert::Alert;
use crate::analyzer::{AlertEvent, AlertKind};
use crate::config::AlertConfig;
use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::metrics::EngineMetrics;
use crate::report::ReportWriter;

/// Alerts taken out of the store and the reporter tasks writing them
#[derive(Debug, Default)]
pub struct Retired {
    pub alerts: Vec<Alert>,
    pub reports: Vec<JoinHandle<()>>,
}

impl Retired {
    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    /// Wait for every report task to finish
    pub async fn wait(self) -> Vec<Alert> {
        for report in self.reports {
            if let Err(e) = report.await {
                warn!(error = %e, "report task failed");
            }
        }
        self.alerts
    }
}

/// What the store did with an incoming event
#[derive(Debug)]
pub enum Ingest {
    /// Folded into a live alert
    Updated,
    /// A new alert was created; an expired alert for the same triple may
    /// have been retired to make room for it
    Created { retired: Retired },
    /// The node left the cluster before the alert could be back-filled
    Discarded,
}

struct Identity {
    node: String,
    stat: String,
    kind: AlertKind,
    first_triggered: DateTime<Utc>,
}

impl Identity {
    fn of(alert: &Alert) -> Self {
        Self {
            node: alert.node.clone(),
            stat: alert.stat.clone(),
            kind: alert.kind,
            first_triggered: alert.first_triggered,
        }
    }

    fn matches(&self, alert: &Alert) -> bool {
        alert.first_triggered == self.first_triggered
            && alert.kind == self.kind
            && alert.node == self.node
            && alert.stat == self.stat
    }
}

pub struct AlertStore {
    engine: Arc<Engine>,
    alerts: Mutex<Vec<Alert>>,
    ttl: Duration,
    padding: Duration,
    writer: Arc<dyn ReportWriter>,
    metrics: Arc<EngineMetrics>,
}

impl AlertStore {
    pub fn new(
        engine: Arc<Engine>,
        config: &AlertConfig,
        writer: Arc<dyn ReportWriter>,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self::with_windows(engine, config.ttl(), config.data_padding(), writer, metrics)
    }

    pub fn with_windows(
        engine: Arc<Engine>,
        ttl: Duration,
        padding: Duration,
        writer: Arc<dyn ReportWriter>,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            engine,
            alerts: Mutex::new(Vec::new()),
            ttl,
            padding,
            writer,
            metrics,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn padding(&self) -> Duration {
        self.padding
    }

    /// Apply one analyzer event
    pub async fn on_event(&self, event: AlertEvent) -> Ingest {
        let replaced = {
            let mut alerts = self.alerts.lock().await;
            if let Some(alert) = alerts.iter_mut().find(|a| a.absorbs(&event, self.ttl)) {
                alert.retrigger(event.triggered_at, self.padding);
                self.metrics.alerts_updated.inc();
                debug!(node = %event.node, stat = %event.stat, kind = %event.kind, times = alert.num_times, "alert re-triggered");
                return Ingest::Updated;
            }

            // A live alert for the triple that failed the test only on age or
            // size gives way to the new one
            let (replaced, kept): (Vec<Alert>, Vec<Alert>) = alerts
                .drain(..)
                .partition(|a| a.same_triple(&event) && !a.deprecated);
            *alerts = kept;
            replaced
        };
        let retired = self.retire(replaced);

        let mut alert = Alert::new(&event, self.padding);
        let Some((values, times)) = self.engine.snapshot_series(&event.node, &event.stat).await else {
            debug!(node = %event.node, stat = %event.stat, "node gone before alert creation, event dropped");
            return Ingest::Discarded;
        };
        alert.backfill(&values, &times);

        info!(node = %alert.node, stat = %alert.stat, kind = %alert.kind, observed = alert.observed, threshold = alert.threshold, "alert created");
        self.metrics.alerts_created.inc();

        let mut alerts = self.alerts.lock().await;
        alerts.push(alert);
        self.metrics.active_alerts.set(alerts.len() as i64);

        Ingest::Created { retired }
    }

    /// One pass of extension and ageing at `now`
    pub async fn tick(&self, now: DateTime<Utc>) -> Retired {
        let pending: Vec<Identity> = {
            let alerts = self.alerts.lock().await;
            alerts
                .iter()
                .filter(|a| !a.data_filled && !a.deprecated && !a.at_capacity())
                .map(Identity::of)
                .collect()
        };

        let mut snapshots = Vec::with_capacity(pending.len());
        for identity in pending {
            let series = self.engine.snapshot_series(&identity.node, &identity.stat).await;
            snapshots.push((identity, series));
        }

        let retiring = {
            let mut alerts = self.alerts.lock().await;
            for (identity, series) in &snapshots {
                let Some(alert) = alerts.iter_mut().find(|a| identity.matches(a)) else {
                    continue;
                };
                match series {
                    Some((values, times)) => {
                        alert.extend_from(values, times, self.padding);
                    }
                    None => {
                        if !alert.deprecated {
                            debug!(node = %alert.node, stat = %alert.stat, "node left during collection");
                        }
                        alert.deprecated = true;
                    }
                }
            }

            for alert in alerts.iter_mut() {
                if alert.at_capacity() || alert.is_expired(now, self.ttl) {
                    alert.stale = true;
                }
            }

            let (stale, live): (Vec<Alert>, Vec<Alert>) = alerts.drain(..).partition(|a| a.stale);
            *alerts = live;
            self.metrics.active_alerts.set(alerts.len() as i64);
            stale
        };

        self.retire(retiring)
    }

    fn retire(&self, alerts: Vec<Alert>) -> Retired {
        let mut reports = Vec::with_capacity(alerts.len());
        for alert in &alerts {
            info!(kind = %alert.kind, times = alert.num_times, "{}", alert.summary());
            self.metrics.alerts_retired.inc();
            reports.push(self.spawn_report(alert.clone()));
        }
        Retired { alerts, reports }
    }

    fn spawn_report(&self, alert: Alert) -> JoinHandle<()> {
        let writer = self.writer.clone();
        let metrics = self.metrics.clone();
        tokio::task::spawn_blocking(move || match writer.write(&alert) {
            Ok(path) => {
                metrics.reports_written.inc();
                debug!(path = %path.display(), "alert report written");
            }
            Err(e) => {
                metrics.report_failures.inc();
                warn!(node = %alert.node, stat = %alert.stat, error = %e, "failed to write alert report");
            }
        })
    }

    /// Deep copies of the active alerts, oldest first
    pub async fn snapshot(&self) -> Vec<Alert> {
        self.alerts.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.alerts.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.alerts.lock().await.is_empty()
    }

    /// Write a report for the active alert at `index` without retiring it
    pub async fn report_active(&self, index: usize) -> Result<PathBuf> {
        let alert = self
            .alerts
            .lock()
            .await
            .get(index)
            .cloned()
            .ok_or_else(|| EngineError::Generic(format!("no active alert at index {index}")))?;

        let writer = self.writer.clone();
        let written = tokio::task::spawn_blocking(move || writer.write(&alert))
            .await
            .map_err(|e| EngineError::Generic(e.to_string()))?;
        match written {
            Ok(path) => {
                self.metrics.reports_written.inc();
                Ok(path)
            }
            Err(e) => {
                self.metrics.report_failures.inc();
                Err(e.into())
            }
        }
    }

    /// Consume analyzer events until the channel closes or `shutdown` fires
    pub async fn run_ingest(self: Arc<Self>, mut events: UnboundedReceiver<AlertEvent>, shutdown: CancellationToken) {
        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            self.on_event(event).await;
        }
        debug!("alert ingest stopped");
    }

    /// Tick once per second until `shutdown` fires
    pub async fn run_extension(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(StdDuration::from_secs(1));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick(Utc::now()).await;
                }
            }
        }
        debug!("alert extension stopped");
    }
}
