//! Threshold analysis of freshly arrived samples
//!
//! [`evaluate`] is a pure function over a copied stat buffer. The gap gate
//! for sudden changes needs the node's arrival times and is applied by
//! [`emit_candidates`] right before an event is handed to the sink.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::trace;

use crate::engine::Engine;
use crate::registry::Threshold;

/// The predicate an alert was raised by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertKind {
    BelowThreshold,
    AboveThreshold,
    SuddenChange,
}

impl AlertKind {
    pub fn label(&self) -> &'static str {
        match self {
            AlertKind::BelowThreshold => "Below Threshold",
            AlertKind::AboveThreshold => "Above Threshold",
            AlertKind::SuddenChange => "Sudden Change",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "Below Threshold" => Some(AlertKind::BelowThreshold),
            "Above Threshold" => Some(AlertKind::AboveThreshold),
            "Sudden Change" => Some(AlertKind::SuddenChange),
            _ => None,
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A predicate that fired on the tail of a buffer
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub kind: AlertKind,
    pub observed: f64,
    pub threshold: f64,
    /// Relative change, sudden changes only
    pub observed_change: Option<f64>,
    /// Window in samples, sudden changes only
    pub window: Option<usize>,
}

/// An alert candidate on its way to the alert store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub node: String,
    pub stat: String,
    pub kind: AlertKind,
    pub observed: f64,
    pub threshold: f64,
    pub observed_change: Option<f64>,
    pub window: Option<usize>,
    pub triggered_at: DateTime<Utc>,
}

impl AlertEvent {
    pub fn from_candidate(node: &str, stat: &str, candidate: Candidate, triggered_at: DateTime<Utc>) -> Self {
        Self {
            node: node.to_string(),
            stat: stat.to_string(),
            kind: candidate.kind,
            observed: candidate.observed,
            threshold: candidate.threshold,
            observed_change: candidate.observed_change,
            window: candidate.window,
            triggered_at,
        }
    }
}

/// Destination of alert events emitted by pollers
pub trait EventSink: Send + Sync {
    /// Deliver an event; returns false if the receiving side is gone
    fn emit(&self, event: AlertEvent) -> bool;
}

impl EventSink for mpsc::UnboundedSender<AlertEvent> {
    fn emit(&self, event: AlertEvent) -> bool {
        self.send(event).is_ok()
    }
}

/// Evaluate the tail of `values` against `threshold`.
///
/// Each predicate is independent. Equality never fires, undefined bounds
/// disable their predicate and a window of 0 disables sudden changes.
pub fn evaluate(values: &[f64], threshold: &Threshold) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    let Some(&current) = values.last() else {
        return candidates;
    };

    if let Some(min) = threshold.min {
        if current < min {
            candidates.push(Candidate {
                kind: AlertKind::BelowThreshold,
                observed: current,
                threshold: min,
                observed_change: None,
                window: None,
            });
        }
    }

    if let Some(max) = threshold.max {
        if current > max {
            candidates.push(Candidate {
                kind: AlertKind::AboveThreshold,
                observed: current,
                threshold: max,
                observed_change: None,
                window: None,
            });
        }
    }

    if let Some(max_change) = threshold.max_change {
        let window = threshold.max_change_window;
        if window > 0 && values.len() > window {
            let previous = values[values.len() - 1 - window];
            let change = (current - previous).abs() / previous;
            if change > max_change {
                candidates.push(Candidate {
                    kind: AlertKind::SuddenChange,
                    observed: current,
                    threshold: max_change,
                    observed_change: Some(change),
                    window: Some(window),
                });
            }
        }
    }

    candidates
}

/// Evaluate the latest sample of `(node, stat)` against its threshold
pub async fn analyze_stat(engine: &Engine, node: &str, stat: &str) -> Vec<Candidate> {
    let Some(threshold) = engine.threshold(stat).await else {
        return Vec::new();
    };
    let Some(values) = engine.snapshot_buffer(node, stat).await else {
        return Vec::new();
    };
    evaluate(&values, &threshold)
}

/// Hand candidates to the sink, dropping sudden changes whose window
/// reaches back into a gap. Returns the number of events delivered.
pub async fn emit_candidates(
    engine: &Engine,
    sink: &dyn EventSink,
    node: &str,
    stat: &str,
    candidates: Vec<Candidate>,
    triggered_at: DateTime<Utc>,
) -> usize {
    let mut delivered = 0;
    for candidate in candidates {
        if let (AlertKind::SuddenChange, Some(window)) = (candidate.kind, candidate.window) {
            let observed = matches!(engine.arrival_before_tail(node, window).await, Some(Some(_)));
            if !observed {
                trace!(node, stat, window, "sudden change spans a gap, suppressed");
                continue;
            }
        }
        if sink.emit(AlertEvent::from_candidate(node, stat, candidate, triggered_at)) {
            delivered += 1;
        }
    }
    delivered
}
