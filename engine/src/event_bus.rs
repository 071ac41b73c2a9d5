//! Channels connecting the engine's tasks to each other and to the UI
//!
//! Three unbounded channels leave the core: alert events for the alert store,
//! notices for the UI and diagnostics for the top-level loop. Senders are
//! bundled in a cloneable [`BusHandle`]; the matching receivers are handed out
//! once as [`BusReceivers`].

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::analyzer::{AlertEvent, EventSink};
use crate::error::EngineError;

/// A transient notice for the UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "name", rename_all = "snake_case")]
pub enum Notice {
    /// A node reported a rebalance in progress
    Rebalance,
    /// A node's record arrived after one or more missed slots
    Slow(String),
    NodeAdded(String),
    NodeRemoved(String),
    StatAdded(String),
    StatRemoved(String),
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::Rebalance => write!(f, "rebalance"),
            Notice::Slow(node) => write!(f, "slow:{node}"),
            Notice::NodeAdded(node) => write!(f, "add node {node}"),
            Notice::NodeRemoved(node) => write!(f, "remove node {node}"),
            Notice::StatAdded(stat) => write!(f, "add stat {stat}"),
            Notice::StatRemoved(stat) => write!(f, "remove stat {stat}"),
        }
    }
}

/// An error report from a poller or the cluster monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Component that raised it, e.g. `poller` or `monitor`
    pub source: String,
    /// Node the report concerns, if any
    pub node: Option<String>,
    pub message: String,
    /// Fatal diagnostics terminate the process
    pub fatal: bool,
    /// Process exit code for fatal diagnostics, 0 otherwise
    pub exit_code: i32,
}

impl Diagnostic {
    pub fn warning(source: &str, node: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            source: source.to_string(),
            node: node.map(str::to_string),
            message: message.into(),
            fatal: false,
            exit_code: 0,
        }
    }

    pub fn fatal(source: &str, node: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            source: source.to_string(),
            node: node.map(str::to_string),
            message: message.into(),
            fatal: true,
            exit_code: 1,
        }
    }

    /// Build a diagnostic whose severity follows the error's
    pub fn from_error(source: &str, node: Option<&str>, error: &EngineError) -> Self {
        if error.is_fatal() {
            Self {
                exit_code: error.exit_code(),
                ..Self::fatal(source, node, error.to_string())
            }
        } else {
            Self::warning(source, node, error.to_string())
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.node {
            Some(node) => write!(f, "{}: {} ({})", self.source, self.message, node),
            None => write!(f, "{}: {}", self.source, self.message),
        }
    }
}

/// Sending half of the engine's channels
#[derive(Debug, Clone)]
pub struct BusHandle {
    events: UnboundedSender<AlertEvent>,
    notices: UnboundedSender<Notice>,
    diagnostics: UnboundedSender<Diagnostic>,
}

/// Receiving half of the engine's channels
#[derive(Debug)]
pub struct BusReceivers {
    pub events: UnboundedReceiver<AlertEvent>,
    pub notices: UnboundedReceiver<Notice>,
    pub diagnostics: UnboundedReceiver<Diagnostic>,
}

/// Constructor for the channel bundle
pub struct EventBus;

impl EventBus {
    pub fn channel() -> (BusHandle, BusReceivers) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (notices_tx, notices_rx) = mpsc::unbounded_channel();
        let (diagnostics_tx, diagnostics_rx) = mpsc::unbounded_channel();

        let handle = BusHandle {
            events: events_tx,
            notices: notices_tx,
            diagnostics: diagnostics_tx,
        };
        let receivers = BusReceivers {
            events: events_rx,
            notices: notices_rx,
            diagnostics: diagnostics_rx,
        };
        (handle, receivers)
    }
}

impl BusHandle {
    /// Publish a notice; a closed UI side is not an error
    pub fn publish(&self, notice: Notice) {
        let _ = self.notices.send(notice);
    }

    pub fn report(&self, diagnostic: Diagnostic) {
        let _ = self.diagnostics.send(diagnostic);
    }

    pub fn event_sender(&self) -> UnboundedSender<AlertEvent> {
        self.events.clone()
    }
}

impl EventSink for BusHandle {
    fn emit(&self, event: AlertEvent) -> bool {
        self.events.send(event).is_ok()
    }
}
