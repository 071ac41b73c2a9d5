//! Alert records
//!
//! An [`Alert`] is the durable form of one or more threshold crossings for a
//! `(node, stat, kind)` triple. It carries a copy of the samples around the
//! trigger, which the alert store extends until the post-trigger padding has
//! been captured. `Clone` is the deep copy handed to reporters and the UI.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::analyzer::{AlertEvent, AlertKind};
use crate::ring::{ArrivalTime, CAPACITY_ALERT};
use crate::utils::{format_timestamp, reached, times_match};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub node: String,
    pub stat: String,
    pub kind: AlertKind,

    /// Bound that was crossed (the relative change limit for sudden changes)
    pub threshold: f64,
    /// Sample value that crossed it
    pub observed: f64,
    pub observed_change: Option<f64>,
    pub window: Option<usize>,
    pub description: String,

    pub first_triggered: DateTime<Utc>,
    pub last_triggered: DateTime<Utc>,
    /// One entry per trigger, oldest first
    pub alert_times: Vec<DateTime<Utc>>,
    /// `first_triggered` minus the data padding
    pub data_start: DateTime<Utc>,

    pub data: Vec<f64>,
    pub data_times: Vec<ArrivalTime>,

    pub data_filled: bool,
    pub deprecated: bool,
    pub stale: bool,
    pub num_times: usize,
}

impl Alert {
    /// Build a fresh alert from `event` with an empty series
    pub fn new(event: &AlertEvent, padding: Duration) -> Self {
        let mut alert = Self {
            node: event.node.clone(),
            stat: event.stat.clone(),
            kind: event.kind,
            threshold: event.threshold,
            observed: event.observed,
            observed_change: event.observed_change,
            window: event.window,
            description: String::new(),
            first_triggered: event.triggered_at,
            last_triggered: event.triggered_at,
            alert_times: vec![event.triggered_at],
            data_start: event.triggered_at - padding,
            data: Vec::new(),
            data_times: Vec::new(),
            data_filled: false,
            deprecated: false,
            stale: false,
            num_times: 1,
        };
        alert.description = alert.describe();
        alert
    }

    pub fn same_triple(&self, event: &AlertEvent) -> bool {
        self.node == event.node && self.stat == event.stat && self.kind == event.kind
    }

    pub fn at_capacity(&self) -> bool {
        self.data.len() >= CAPACITY_ALERT
    }

    pub fn expires_at(&self, ttl: Duration) -> DateTime<Utc> {
        self.last_triggered + ttl
    }

    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now > self.expires_at(ttl)
    }

    /// Whether `event` is a re-trigger of this alert rather than a new one
    pub fn absorbs(&self, event: &AlertEvent, ttl: Duration) -> bool {
        self.same_triple(event)
            && !self.deprecated
            && !self.at_capacity()
            && event.triggered_at < self.expires_at(ttl)
    }

    /// Fold a re-trigger at `at` into this alert.
    ///
    /// The post-trigger window moves with the trigger, so collection resumes
    /// if the series no longer covers it.
    pub fn retrigger(&mut self, at: DateTime<Utc>, padding: Duration) {
        self.alert_times.push(at);
        self.last_triggered = at;
        self.num_times += 1;
        self.description = self.describe();

        let covered = self
            .last_data_time()
            .is_some_and(|last| reached(self.data_end(padding), last));
        if !covered {
            self.data_filled = false;
        }
    }

    /// End of the post-trigger window
    pub fn data_end(&self, padding: Duration) -> DateTime<Utc> {
        self.last_triggered + padding
    }

    /// Latest observed timestamp in the attached series
    pub fn last_data_time(&self) -> Option<DateTime<Utc>> {
        self.data_times.iter().rev().find_map(|t| *t)
    }

    /// Attach the tail of a ring snapshot, starting at [`backfill_start`].
    pub fn backfill(&mut self, values: &[f64], times: &[ArrivalTime]) {
        let start = backfill_start(times, self.data_start);
        let len = values.len().min(times.len());
        let start = start.min(len);
        let keep = (len - start).min(CAPACITY_ALERT);

        self.data = values[len - keep..len].to_vec();
        self.data_times = times[len - keep..len].to_vec();
    }

    /// Append samples that arrived after the series' last timestamp.
    ///
    /// Stops once the post-trigger window is covered (setting `data_filled`)
    /// or the series is full. Returns the number of samples appended.
    pub fn extend_from(&mut self, values: &[f64], times: &[ArrivalTime], padding: Duration) -> usize {
        if self.data_filled || self.at_capacity() {
            return 0;
        }
        let len = values.len().min(times.len());
        let end = self.data_end(padding);

        let start = match self.last_data_time() {
            Some(anchor) => times[..len]
                .iter()
                .rposition(|t| *t == Some(anchor))
                .map(|p| p + 1)
                .or_else(|| times[..len].iter().position(|t| t.is_some_and(|t| t > anchor)))
                .unwrap_or(len),
            None => 0,
        };

        let mut appended = 0;
        for i in start..len {
            if self.at_capacity() {
                break;
            }
            self.data.push(values[i]);
            self.data_times.push(times[i]);
            appended += 1;

            if times[i].is_some_and(|t| reached(end, t)) {
                self.data_filled = true;
                break;
            }
        }
        appended
    }

    /// One-line description shown in the alert list
    pub fn describe(&self) -> String {
        let mut text = format!(
            "{}:- {}:{} Event - {}, Value - {:.6}, Threshold Value - {:.6}",
            format_timestamp(&self.first_triggered),
            self.node,
            self.stat,
            self.kind,
            self.observed,
            self.threshold,
        );
        let change = self.observed_change.unwrap_or(0.0);
        let window = self.window.unwrap_or(0);

        match (self.num_times > 1, self.kind) {
            (false, AlertKind::SuddenChange) => {
                text.push_str(&format!(", Occured over {window} seconds with a change of {change:.6}"));
            }
            (false, _) => {}
            (true, AlertKind::SuddenChange) => {
                text.push_str(&format!(
                    ", Last occured at {} with a change of {change:.6} over {window} seconds, Occured {} times",
                    format_timestamp(&self.last_triggered),
                    self.num_times,
                ));
            }
            (true, _) => {
                text.push_str(&format!(
                    ", Last occured at {}, Occured {} times",
                    format_timestamp(&self.last_triggered),
                    self.num_times,
                ));
            }
        }
        text
    }

    /// Sentence logged when the alert is retired
    pub fn summary(&self) -> String {
        let first = format_timestamp(&self.first_triggered);
        let last = format_timestamp(&self.last_triggered);
        let head = format!("Node - {}, Stat - {}.", self.node, self.stat);

        match self.kind {
            AlertKind::SuddenChange => {
                let mut text = format!(
                    "{head} Stat changed by more than the threshold limit of {:.6}% at {first}. \
                     This change occured over {} second(s).",
                    self.threshold * 100.0,
                    self.window.unwrap_or(0),
                );
                if self.num_times > 1 {
                    text.push_str(&format!(
                        " Similar changes occured {} times with the last one occuring at {last}.",
                        self.num_times
                    ));
                }
                text
            }
            AlertKind::AboveThreshold => {
                let mut text = format!("{head} Stat exceeded threshold limit of {:.6} at {first}.", self.threshold);
                if self.num_times > 1 {
                    text.push_str(&format!(
                        " Similarly, the stat exceeded threshold limit {} times with the last one occuring at {last}.",
                        self.num_times
                    ));
                }
                text
            }
            AlertKind::BelowThreshold => {
                let mut text = format!("{head} Stat dropped below threshold limit of {:.6} at {first}.", self.threshold);
                if self.num_times > 1 {
                    text.push_str(&format!(
                        " Similarly, the stat was below the threshold limit {} times with the last one occuring at {last}.",
                        self.num_times
                    ));
                }
                text
            }
        }
    }
}

/// Index of the first ring slot to copy into a new alert.
///
/// Scanning back from the tail, the start is the first slot whose arrival
/// matches `data_start` (or precedes it), or whose predecessor is a gap.
/// Without either, the whole ring is taken.
pub fn backfill_start(times: &[ArrivalTime], data_start: DateTime<Utc>) -> usize {
    for i in (0..times.len()).rev() {
        if let Some(t) = times[i] {
            if t <= data_start || times_match(t, data_start) {
                return i;
            }
        }
        if i > 0 && times[i - 1].is_none() {
            return i;
        }
    }
    0
}
