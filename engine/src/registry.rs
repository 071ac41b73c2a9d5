//! Stat registry types
//!
//! The registry is the set of stats known to the engine together with the
//! thresholds each one is evaluated against. Thresholds supplied on the
//! command line or in the config file cannot be bound until the first stats
//! record names the stats, so they wait in [`ThresholdFlags`] until then.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Suffix of the flag carrying a stat's minimum value
pub const MIN_VAL_SUFFIX: &str = "_min_val";
/// Suffix of the flag carrying a stat's maximum value
pub const MAX_VAL_SUFFIX: &str = "_max_val";
/// Suffix of the flag carrying a stat's maximum relative change
pub const MAX_CHANGE_SUFFIX: &str = "_max_change";
/// Suffix of the flag carrying the window of the relative change
pub const MAX_CHANGE_TIME_SUFFIX: &str = "_max_change_time";

/// Stat whose maximum may be supplied by the cluster's memory quota
pub const MEMORY_QUOTA_STAT: &str = "num_bytes_used_ram";

/// Alert thresholds for one stat. `None` disables the matching predicate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub max_change: Option<f64>,
    /// Window of the relative change, in samples; `0` disables it
    pub max_change_window: usize,
}

impl Default for Threshold {
    fn default() -> Self {
        Self {
            min: None,
            max: None,
            max_change: None,
            max_change_window: 1,
        }
    }
}

impl Threshold {
    /// Build a threshold, treating NaN bounds as undefined
    pub fn new(min: f64, max: f64, max_change: f64, max_change_window: usize) -> Self {
        Self {
            min: defined(min),
            max: defined(max),
            max_change: defined(max_change),
            max_change_window,
        }
    }

    /// Merge values supplied by the cluster without overriding the user's
    pub fn merge_server(&mut self, server: &Threshold) {
        if self.min.is_none() {
            self.min = server.min;
        }
        if self.max.is_none() {
            self.max = server.max;
        }
        if self.max_change.is_none() {
            self.max_change = server.max_change;
        }
    }
}

fn defined(value: f64) -> Option<f64> {
    if value.is_nan() {
        None
    } else {
        Some(value)
    }
}

/// Threshold flags not yet bound to a stat, keyed `<stat><suffix>`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThresholdFlags {
    pending: BTreeMap<String, String>,
}

impl ThresholdFlags {
    pub fn new(pending: BTreeMap<String, String>) -> Self {
        Self { pending }
    }

    pub fn insert(&mut self, flag: impl Into<String>, value: impl Into<String>) {
        self.pending.insert(flag.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Bind and consume every flag belonging to `stat`
    pub fn take_for(&mut self, stat: &str) -> ConfigResult<Threshold> {
        let mut threshold = Threshold::default();

        if let Some(value) = self.take_float(stat, MIN_VAL_SUFFIX)? {
            threshold.min = defined(value);
        }
        if let Some(value) = self.take_float(stat, MAX_VAL_SUFFIX)? {
            threshold.max = defined(value);
        }
        if let Some(value) = self.take_float(stat, MAX_CHANGE_SUFFIX)? {
            threshold.max_change = defined(value);
        }

        let flag = format!("{stat}{MAX_CHANGE_TIME_SUFFIX}");
        if let Some(raw) = self.pending.remove(&flag) {
            threshold.max_change_window = raw
                .trim()
                .parse::<usize>()
                .map_err(|_| ConfigError::InvalidThreshold { flag, value: raw })?;
        }

        Ok(threshold)
    }

    fn take_float(&mut self, stat: &str, suffix: &str) -> ConfigResult<Option<f64>> {
        let flag = format!("{stat}{suffix}");
        match self.pending.remove(&flag) {
            Some(raw) => raw
                .trim()
                .parse::<f64>()
                .map(Some)
                .map_err(|_| ConfigError::InvalidThreshold { flag, value: raw }),
            None => Ok(None),
        }
    }

    /// Fail if any flag never bound to a stat
    pub fn ensure_consumed(&self) -> ConfigResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let flags = self
            .pending
            .iter()
            .map(|(flag, value)| format!("{flag}={value}"))
            .collect::<Vec<_>>()
            .join(", ");
        Err(ConfigError::UnknownFlags { flags })
    }
}

/// Ordered stat names plus the stats each node reported last
#[derive(Debug, Clone, Default)]
pub struct StatList {
    order: Vec<String>,
    reported_by: HashMap<String, HashSet<String>>,
}

impl StatList {
    pub fn contains(&self, stat: &str) -> bool {
        self.order.iter().any(|known| known == stat)
    }

    pub fn names(&self) -> &[String] {
        &self.order
    }

    /// Add a stat, returning false if it was already known
    pub fn add(&mut self, stat: &str) -> bool {
        if self.contains(stat) {
            return false;
        }
        self.order.push(stat.to_string());
        true
    }

    /// Record the stats present in `node`'s latest record
    pub fn record_report(&mut self, node: &str, stats: HashSet<String>) {
        self.reported_by.insert(node.to_string(), stats);
    }

    pub fn forget_node(&mut self, node: &str) {
        self.reported_by.remove(node);
    }

    /// Nodes whose latest record is on file
    pub fn reporting_nodes(&self) -> usize {
        self.reported_by.len()
    }

    /// Drop and return the stats that no node reported in its latest record
    pub fn prune_unreported(&mut self) -> Vec<String> {
        let reported_by = &self.reported_by;
        let mut removed = Vec::new();
        self.order.retain(|stat| {
            let still_reported = reported_by.values().any(|stats| stats.contains(stat));
            if !still_reported {
                removed.push(stat.clone());
            }
            still_reported
        });
        removed
    }
}
