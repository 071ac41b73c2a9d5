//! Exponential-backoff supervision of a poller
//!
//! The supervisor restarts a poller after every transient failure, sleeping
//! between attempts. The delay starts at 500 ms, grows by half on every
//! retry and settles at 5 s. A kill is honoured in every state.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::event_bus::{BusHandle, Diagnostic};
use crate::metrics::EngineMetrics;
use crate::poller::{PollExit, PollOnce};

const INITIAL_DELAY_MS: u64 = 500;
const MAX_DELAY_MS: u64 = 5_000;

/// Retry delay sequence: 500, 750, 1125, ... capped at 5000 ms
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    next_ms: u64,
    max_ms: u64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(INITIAL_DELAY_MS, MAX_DELAY_MS)
    }
}

impl Backoff {
    pub fn new(initial_ms: u64, max_ms: u64) -> Self {
        Self { next_ms: initial_ms.min(max_ms), max_ms }
    }

    /// Take the current delay and advance to the next one
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next_ms;
        self.next_ms = (self.next_ms + self.next_ms / 2).min(self.max_ms);
        Duration::from_millis(delay)
    }
}

/// Lifecycle of a supervised poller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Running,
    Sleeping(Duration),
    Stopped,
}

/// Run `poller` until its node is gone, a fatal error occurs or `kill` fires.
///
/// Every failure is reported on the bus's diagnostic channel. Returns the
/// number of poll passes made.
pub async fn supervise<P: PollOnce>(
    mut poller: P,
    kill: CancellationToken,
    bus: BusHandle,
    metrics: Arc<EngineMetrics>,
) -> usize {
    let node = poller.node().to_string();
    let mut backoff = Backoff::default();
    let mut state = SupervisorState::Running;
    let mut passes = 0;

    info!(node = %node, "poller started");
    loop {
        state = match state {
            SupervisorState::Running => {
                passes += 1;
                match poller.poll_once().await {
                    PollExit::Retry(error) => {
                        metrics.stream_errors.inc();
                        warn!(node = %node, error = %error, category = error.category(), "poll failed, retrying");
                        bus.report(Diagnostic::from_error("poller", Some(&node), &error));
                        SupervisorState::Sleeping(backoff.next_delay())
                    }
                    PollExit::NodeGone => {
                        report_gone(&bus, &node);
                        SupervisorState::Stopped
                    }
                    PollExit::Fatal(error) => {
                        let diagnostic = Diagnostic::from_error("poller", Some(&node), &error);
                        bus.report(Diagnostic { fatal: true, exit_code: diagnostic.exit_code.max(1), ..diagnostic });
                        SupervisorState::Stopped
                    }
                }
            }
            SupervisorState::Sleeping(delay) => {
                debug!(node = %node, delay_ms = delay.as_millis() as u64, "backing off");
                tokio::select! {
                    biased;
                    _ = kill.cancelled() => {
                        report_gone(&bus, &node);
                        SupervisorState::Stopped
                    }
                    _ = tokio::time::sleep(delay) => SupervisorState::Running,
                }
            }
            SupervisorState::Stopped => {
                info!(node = %node, passes, "poller stopped");
                return passes;
            }
        };
    }
}

fn report_gone(bus: &BusHandle, node: &str) {
    let gone = EngineError::NodeGone { node: node.to_string() };
    bus.report(Diagnostic::from_error("poller", Some(node), &gone));
}
