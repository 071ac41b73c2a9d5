//! Engine service
//!
//! Wires the engine, cluster monitor, alert store and channels together and
//! owns the background tasks: the monitor loop (which in turn owns the
//! pollers), the alert ingest consumer and the 1 Hz alert extension tick.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::alert::Alert;
use crate::alert_store::AlertStore;
use crate::analyzer::AlertEvent;
use crate::client::{ClusterClient, NodeDiscovery, StatsSource};
use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::event_bus::{BusHandle, Diagnostic, EventBus, Notice};
use crate::metrics::{EngineMetrics, MetricsSnapshot};
use crate::monitor::ClusterMonitor;
use crate::registry::ThresholdFlags;
use crate::report::{FileReportWriter, ReportWriter};

/// Service status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ServiceStatus {
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// Service state
#[derive(Debug, Clone, Serialize)]
pub struct ServiceState {
    pub status: ServiceStatus,

    pub started_at: Option<DateTime<Utc>>,

    /// Error that ended the last start attempt
    pub last_error: Option<String>,

    /// Nodes with buffers in the engine
    pub nodes: usize,

    /// Stats in the registry
    pub stats: usize,

    pub active_alerts: usize,

    pub counters: MetricsSnapshot,
}

/// Receivers for the UI side: notices and diagnostics
#[derive(Debug)]
pub struct ServiceChannels {
    pub notices: UnboundedReceiver<Notice>,
    pub diagnostics: UnboundedReceiver<Diagnostic>,
}

pub struct EngineService {
    engine: Arc<Engine>,
    store: Arc<AlertStore>,
    discovery: Arc<dyn NodeDiscovery>,
    source: Arc<dyn StatsSource>,
    bus: BusHandle,
    events: Option<UnboundedReceiver<AlertEvent>>,
    metrics: Arc<EngineMetrics>,
    state: Arc<RwLock<ServiceState>>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl EngineService {
    /// Build a service over the given cluster seams
    pub fn new(
        config: &EngineConfig,
        flags: ThresholdFlags,
        discovery: Arc<dyn NodeDiscovery>,
        source: Arc<dyn StatsSource>,
        writer: Arc<dyn ReportWriter>,
    ) -> Result<(Self, ServiceChannels)> {
        let metrics = Arc::new(EngineMetrics::new()?);
        let engine = Arc::new(Engine::new(flags));
        let store = Arc::new(AlertStore::new(engine.clone(), &config.alerts, writer, metrics.clone()));
        let (bus, receivers) = EventBus::channel();

        let state = ServiceState {
            status: ServiceStatus::Starting,
            started_at: None,
            last_error: None,
            nodes: 0,
            stats: 0,
            active_alerts: 0,
            counters: MetricsSnapshot::default(),
        };

        let service = Self {
            engine,
            store,
            discovery,
            source,
            bus,
            events: Some(receivers.events),
            metrics,
            state: Arc::new(RwLock::new(state)),
            shutdown: CancellationToken::new(),
            tasks: Vec::new(),
        };
        let channels = ServiceChannels {
            notices: receivers.notices,
            diagnostics: receivers.diagnostics,
        };
        Ok((service, channels))
    }

    /// Build a service talking to the configured cluster and writing
    /// reports to the configured directory
    pub fn connect(config: &EngineConfig, flags: ThresholdFlags) -> Result<(Self, ServiceChannels)> {
        let client = Arc::new(ClusterClient::new(&config.cluster)?);
        let writer = Arc::new(FileReportWriter::new(&config.alerts.report_dir));
        Self::new(config, flags, client.clone(), client, writer)
    }

    /// Discover the cluster and start every background task.
    ///
    /// The first discovery runs inline so that an unreachable or empty
    /// cluster fails the start instead of surfacing later.
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting Chronos engine service");
        let Some(events) = self.events.take() else {
            return Err(EngineError::Generic("service already started".to_string()));
        };

        let mut monitor = ClusterMonitor::new(
            self.engine.clone(),
            self.discovery.clone(),
            self.source.clone(),
            Arc::new(self.bus.clone()),
            self.bus.clone(),
            self.metrics.clone(),
        );
        if let Err(e) = monitor.refresh().await {
            let mut state = self.state.write().await;
            state.status = ServiceStatus::Stopped;
            state.last_error = Some(e.to_string());
            return Err(e);
        }

        self.tasks.push(tokio::spawn(monitor.run(self.shutdown.clone())));
        self.tasks
            .push(tokio::spawn(self.store.clone().run_ingest(events, self.shutdown.clone())));
        self.tasks
            .push(tokio::spawn(self.store.clone().run_extension(self.shutdown.clone())));

        {
            let mut state = self.state.write().await;
            state.status = ServiceStatus::Running;
            state.started_at = Some(Utc::now());
            state.last_error = None;
        }

        info!("Chronos engine service started");
        Ok(())
    }

    /// Cancel every task and wait for them to finish
    pub async fn stop(&mut self) -> Result<()> {
        info!("Stopping Chronos engine service");
        {
            let mut state = self.state.write().await;
            state.status = ServiceStatus::Stopping;
        }

        self.shutdown.cancel();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!(error = %e, "service task ended abnormally");
            }
        }

        {
            let mut state = self.state.write().await;
            state.status = ServiceStatus::Stopped;
        }
        info!("Chronos engine service stopped");
        Ok(())
    }

    /// Current status with live counters
    pub async fn status(&self) -> ServiceState {
        let mut state = self.state.read().await.clone();
        state.nodes = self.engine.nodes().await.len();
        state.stats = self.engine.known_stats().await.len();
        state.active_alerts = self.store.len().await;
        state.counters = self.metrics.snapshot();
        state
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn store(&self) -> &Arc<AlertStore> {
        &self.store
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }

    /// Deep copies of the active alerts
    pub async fn alerts(&self) -> Vec<Alert> {
        self.store.snapshot().await
    }

    /// Sender feeding the alert store directly
    pub fn event_sender(&self) -> UnboundedSender<AlertEvent> {
        self.bus.event_sender()
    }
}
