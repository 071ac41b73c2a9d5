//! Metrics for the Chronos engine
//!
//! Counters and gauges are registered on a private prometheus [`Registry`]
//! so that several engines (and tests) can coexist in one process.

use prometheus::{Encoder, IntCounter, IntGauge, Opts, Registry, TextEncoder};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Engine counters and gauges
#[derive(Clone)]
pub struct EngineMetrics {
    /// Prometheus registry
    registry: Registry,

    // Ingest
    pub records_ingested: IntCounter,
    pub samples_missed: IntCounter,
    pub stream_errors: IntCounter,

    // Alerts
    pub alerts_created: IntCounter,
    pub alerts_updated: IntCounter,
    pub alerts_retired: IntCounter,

    // Reports
    pub reports_written: IntCounter,
    pub report_failures: IntCounter,

    // Gauges
    pub nodes_polled: IntGauge,
    pub active_alerts: IntGauge,
}

/// Point-in-time copy of the engine counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub records_ingested: u64,
    pub samples_missed: u64,
    pub stream_errors: u64,
    pub alerts_created: u64,
    pub alerts_updated: u64,
    pub alerts_retired: u64,
    pub reports_written: u64,
    pub report_failures: u64,
    pub nodes_polled: i64,
    pub active_alerts: i64,
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter> {
    let counter = IntCounter::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

fn gauge(registry: &Registry, name: &str, help: &str) -> Result<IntGauge> {
    let gauge = IntGauge::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

impl EngineMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        Ok(Self {
            records_ingested: counter(&registry, "chronos_records_ingested_total", "Stats records ingested from all nodes")?,
            samples_missed: counter(&registry, "chronos_samples_missed_total", "Ring slots filled with gap markers")?,
            stream_errors: counter(&registry, "chronos_stream_errors_total", "Stats stream failures that triggered a retry")?,
            alerts_created: counter(&registry, "chronos_alerts_created_total", "Alerts created")?,
            alerts_updated: counter(&registry, "chronos_alerts_updated_total", "Re-triggers folded into an existing alert")?,
            alerts_retired: counter(&registry, "chronos_alerts_retired_total", "Alerts retired and handed to the reporter")?,
            reports_written: counter(&registry, "chronos_reports_written_total", "Alert reports written")?,
            report_failures: counter(&registry, "chronos_report_failures_total", "Alert reports that failed to write")?,
            nodes_polled: gauge(&registry, "chronos_nodes_polled", "Nodes currently polled")?,
            active_alerts: gauge(&registry, "chronos_active_alerts", "Alerts currently active")?,
            registry,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            records_ingested: self.records_ingested.get(),
            samples_missed: self.samples_missed.get(),
            stream_errors: self.stream_errors.get(),
            alerts_created: self.alerts_created.get(),
            alerts_updated: self.alerts_updated.get(),
            alerts_retired: self.alerts_retired.get(),
            reports_written: self.reports_written.get(),
            report_failures: self.report_failures.get(),
            nodes_polled: self.nodes_polled.get(),
            active_alerts: self.active_alerts.get(),
        }
    }

    /// Render all metrics in the prometheus text exposition format
    pub fn export_text(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| crate::error::EngineError::Generic(e.to_string()))
    }
}
