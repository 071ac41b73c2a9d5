//! Chronos engine library
//!
//! This library provides the stat-ingestion, threshold-analysis and
//! alert-lifecycle engine behind the Chronos cluster dashboard. Pollers
//! stream stats from every search node into fixed-size rings, the analyzer
//! raises alert events against per-stat thresholds, and the alert store
//! keeps, extends and retires alerts with their surrounding data.

pub mod error;
pub mod utils;
pub mod ring;
pub mod registry;
pub mod engine;
pub mod analyzer;
pub mod stream;
pub mod client;
pub mod event_bus;
pub mod poller;
pub mod supervisor;
pub mod monitor;
pub mod alert;
pub mod alert_store;
pub mod report;
pub mod config;
pub mod metrics;
pub mod service;

// Re-export commonly used types
pub use alert::Alert;
pub use alert_store::{AlertStore, Ingest, Retired};
pub use analyzer::{evaluate, AlertEvent, AlertKind, Candidate, EventSink};
pub use client::{ClusterClient, NodeDiscovery, StatsSource};
pub use config::{CliArgs, EngineConfig};
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use event_bus::{BusHandle, BusReceivers, Diagnostic, EventBus, Notice};
pub use metrics::EngineMetrics;
pub use monitor::ClusterMonitor;
pub use poller::{PollExit, PollOnce, Poller};
pub use registry::{Threshold, ThresholdFlags};
pub use report::{render_report, FileReportWriter, ReportWriter};
pub use ring::{Ring, CAPACITY, CAPACITY_ALERT};
pub use service::{EngineService, ServiceChannels, ServiceState, ServiceStatus};
pub use supervisor::{supervise, Backoff};
