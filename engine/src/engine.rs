//! Shared stat engine
//!
//! The engine owns every node's stat buffers and arrival times together with
//! the stat registry. Pollers are the only writers of their own node's rings;
//! the analyzer, the alert store and any UI read through snapshot methods that
//! copy what they need and release the guard before returning.
//!
//! Guards are always taken in the order thresholds, stat list, buffers,
//! arrival times. No method holds a guard across I/O or a channel send.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Mutex, OnceCell, RwLock};
use tracing::{debug, info};

use crate::error::{ConfigResult, EngineError, Result};
use crate::registry::{StatList, Threshold, ThresholdFlags};
use crate::ring::{ArrivalTime, Ring, CAPACITY};

type NodeBuffers = HashMap<String, Ring<f64>>;

/// Stats that entered or left the registry while reconciling a record
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatChanges {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl StatChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Result of appending one record to a node's rings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AppendOutcome {
    /// Slots consumed by this record, including the record itself
    pub slots: usize,
    /// Gap markers written before the record
    pub missed: usize,
    /// Arrival time actually stored for the record
    pub arrived_at: DateTime<Utc>,
}

/// Per-cluster stat state shared by pollers, analyzer and alert store
pub struct Engine {
    capacity: usize,
    thresholds: RwLock<HashMap<String, Threshold>>,
    stat_list: RwLock<StatList>,
    buffers: RwLock<HashMap<String, NodeBuffers>>,
    arrivals: RwLock<HashMap<String, Ring<ArrivalTime>>>,
    /// Set once the first record has populated the registry
    promoted: OnceCell<()>,
    pending_flags: Mutex<ThresholdFlags>,
}

impl Engine {
    pub fn new(pending_flags: ThresholdFlags) -> Self {
        Self::with_capacity(CAPACITY, pending_flags)
    }

    pub fn with_capacity(capacity: usize, pending_flags: ThresholdFlags) -> Self {
        Self {
            capacity,
            thresholds: RwLock::new(HashMap::new()),
            stat_list: RwLock::new(StatList::default()),
            buffers: RwLock::new(HashMap::new()),
            arrivals: RwLock::new(HashMap::new()),
            promoted: OnceCell::new(),
            pending_flags: Mutex::new(pending_flags),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Allocate zeroed rings for a node; returns false if it already exists
    pub async fn add_node(&self, node: &str) -> bool {
        let stat_list = self.stat_list.read().await;
        let mut buffers = self.buffers.write().await;
        let mut arrivals = self.arrivals.write().await;

        if arrivals.contains_key(node) {
            return false;
        }

        let rings = stat_list
            .names()
            .iter()
            .map(|stat| (stat.clone(), Ring::zeroed(self.capacity)))
            .collect();
        buffers.insert(node.to_string(), rings);
        arrivals.insert(node.to_string(), Ring::unobserved(self.capacity));
        debug!(node, "allocated node buffers");
        true
    }

    /// Drop a node's rings; returns false if it was unknown.
    ///
    /// Stats only the departed node was reporting leave the registry with it.
    /// When no reporting node remains the registry is kept as is, so the
    /// configured thresholds survive until the next node reports.
    pub async fn remove_node(&self, node: &str) -> bool {
        let mut thresholds = self.thresholds.write().await;
        let mut stat_list = self.stat_list.write().await;
        let mut buffers = self.buffers.write().await;
        let mut arrivals = self.arrivals.write().await;

        stat_list.forget_node(node);
        let had_buffers = buffers.remove(node).is_some();
        let had_times = arrivals.remove(node).is_some();

        if stat_list.reporting_nodes() > 0 {
            let pruned = stat_list.prune_unreported();
            for stat in &pruned {
                thresholds.remove(stat);
                for rings in buffers.values_mut() {
                    rings.remove(stat);
                }
            }
            if !pruned.is_empty() {
                debug!(node, removed = ?pruned, "stats left with their node");
            }
        }
        if had_times {
            debug!(node, "released node buffers");
        }
        had_buffers || had_times
    }

    pub async fn has_node(&self, node: &str) -> bool {
        self.arrivals.read().await.contains_key(node)
    }

    /// Nodes with live rings, sorted
    pub async fn nodes(&self) -> Vec<String> {
        let mut nodes: Vec<String> = self.arrivals.read().await.keys().cloned().collect();
        nodes.sort();
        nodes
    }

    /// Registered stat names in registration order
    pub async fn known_stats(&self) -> Vec<String> {
        self.stat_list.read().await.names().to_vec()
    }

    pub async fn threshold(&self, stat: &str) -> Option<Threshold> {
        self.thresholds.read().await.get(stat).copied()
    }

    pub async fn thresholds(&self) -> HashMap<String, Threshold> {
        self.thresholds.read().await.clone()
    }

    /// Replace a stat's threshold; unknown stats are ignored
    pub async fn set_threshold(&self, stat: &str, threshold: Threshold) -> bool {
        match self.thresholds.write().await.get_mut(stat) {
            Some(current) => {
                *current = threshold;
                true
            }
            None => false,
        }
    }

    /// Merge a threshold supplied by the cluster without overriding user values
    pub async fn merge_server_threshold(&self, stat: &str, server: &Threshold) -> bool {
        match self.thresholds.write().await.get_mut(stat) {
            Some(current) => {
                current.merge_server(server);
                true
            }
            None => false,
        }
    }

    pub fn is_promoted(&self) -> bool {
        self.promoted.initialized()
    }

    /// Populate the registry from the first record seen in the process.
    ///
    /// Exactly one caller performs the promotion and receives the stats it
    /// registered; every other caller gets `None`. Deferred threshold flags
    /// are bound here, and any flag left over is an error.
    pub async fn promote_once(
        &self,
        node: &str,
        stats: &BTreeMap<String, f64>,
    ) -> ConfigResult<Option<Vec<String>>> {
        let mut registered = None;
        let slot = &mut registered;
        self.promoted
            .get_or_try_init(move || async move {
                *slot = Some(self.promote(node, stats).await?);
                Ok::<(), crate::error::ConfigError>(())
            })
            .await?;
        Ok(registered)
    }

    async fn promote(&self, node: &str, stats: &BTreeMap<String, f64>) -> ConfigResult<Vec<String>> {
        let mut pending = self.pending_flags.lock().await;
        let mut thresholds = self.thresholds.write().await;
        let mut stat_list = self.stat_list.write().await;
        let mut buffers = self.buffers.write().await;

        let mut registered = Vec::with_capacity(stats.len());
        for stat in stats.keys() {
            let threshold = pending.take_for(stat)?;
            thresholds.insert(stat.clone(), threshold);
            if stat_list.add(stat) {
                for rings in buffers.values_mut() {
                    rings.insert(stat.clone(), Ring::zeroed(self.capacity));
                }
                registered.push(stat.clone());
            }
        }
        stat_list.record_report(node, stats.keys().cloned().collect());

        pending.ensure_consumed()?;
        info!(node, stats = registered.len(), "stat registry populated");
        Ok(registered)
    }

    /// Bring the registry in line with `node`'s latest record.
    ///
    /// New names are registered with default thresholds across every node.
    /// A stat leaves the registry only when no node's latest record has it.
    pub async fn reconcile(&self, node: &str, stats: &BTreeMap<String, f64>) -> StatChanges {
        let mut thresholds = self.thresholds.write().await;
        let mut stat_list = self.stat_list.write().await;
        let mut buffers = self.buffers.write().await;

        let mut changes = StatChanges::default();
        for stat in stats.keys() {
            if stat_list.add(stat) {
                thresholds.entry(stat.clone()).or_default();
                for rings in buffers.values_mut() {
                    rings.insert(stat.clone(), Ring::zeroed(self.capacity));
                }
                changes.added.push(stat.clone());
            }
        }

        let reported: HashSet<String> = stats.keys().cloned().collect();
        stat_list.record_report(node, reported);

        for stat in stat_list.prune_unreported() {
            thresholds.remove(&stat);
            for rings in buffers.values_mut() {
                rings.remove(&stat);
            }
            changes.removed.push(stat);
        }

        if !changes.is_empty() {
            debug!(node, added = ?changes.added, removed = ?changes.removed, "stat list changed");
        }
        changes
    }

    /// Append a record to `node`'s rings in one critical section.
    ///
    /// Missed slots since the previous arrival become gap markers and the
    /// previous values are carried forward over them. Stats absent from the
    /// record receive 0.
    pub async fn append_record(
        &self,
        node: &str,
        now: DateTime<Utc>,
        stats: &BTreeMap<String, f64>,
        carry: &mut f64,
    ) -> Result<AppendOutcome> {
        let stat_list = self.stat_list.read().await;
        let mut buffers = self.buffers.write().await;
        let mut arrivals = self.arrivals.write().await;

        let gone = || EngineError::NodeGone { node: node.to_string() };
        let times = arrivals.get_mut(node).ok_or_else(gone)?;
        let rings = buffers.get_mut(node).ok_or_else(gone)?;

        let previous = times.last().copied().flatten();
        let slots = elapsed_slots(previous, now, carry);
        let missed = slots - 1;

        // Arrivals stay strictly increasing even if the wall clock steps back
        let arrived_at = match times.last_observed() {
            Some(last) if now <= last => last + Duration::milliseconds(1),
            _ => now,
        };

        times.push_gaps(missed);
        times.push(Some(arrived_at));

        for stat in stat_list.names() {
            let ring = rings
                .entry(stat.clone())
                .or_insert_with(|| Ring::zeroed(self.capacity));
            ring.carry_forward(missed);
            ring.push(stats.get(stat).copied().unwrap_or(0.0));
        }

        Ok(AppendOutcome { slots, missed, arrived_at })
    }

    /// Append one sample to a stat ring
    pub async fn write_sample(&self, node: &str, stat: &str, value: f64) -> bool {
        let mut buffers = self.buffers.write().await;
        match buffers.get_mut(node).and_then(|rings| rings.get_mut(stat)) {
            Some(ring) => {
                ring.push(value);
                true
            }
            None => false,
        }
    }

    /// Append an arrival time to a node
    pub async fn mark_arrival(&self, node: &str, at: DateTime<Utc>) -> bool {
        let mut arrivals = self.arrivals.write().await;
        match arrivals.get_mut(node) {
            Some(times) => {
                times.push(Some(at));
                true
            }
            None => false,
        }
    }

    /// Record that `seconds` elapsed since the last sample: `seconds - 1`
    /// gap markers are appended and every stat carries its last value over
    /// them.
    pub async fn fill_gap(&self, node: &str, seconds: usize) -> bool {
        let missed = seconds.saturating_sub(1);
        let mut buffers = self.buffers.write().await;
        let mut arrivals = self.arrivals.write().await;

        let (Some(rings), Some(times)) = (buffers.get_mut(node), arrivals.get_mut(node)) else {
            return false;
        };
        times.push_gaps(missed);
        for ring in rings.values_mut() {
            ring.carry_forward(missed);
        }
        true
    }

    pub async fn snapshot_buffer(&self, node: &str, stat: &str) -> Option<Vec<f64>> {
        let buffers = self.buffers.read().await;
        buffers.get(node)?.get(stat).map(Ring::to_vec)
    }

    pub async fn snapshot_arrival_times(&self, node: &str) -> Option<Vec<ArrivalTime>> {
        self.arrivals.read().await.get(node).map(Ring::to_vec)
    }

    /// Copy a stat ring and its node's arrival times under one view
    pub async fn snapshot_series(&self, node: &str, stat: &str) -> Option<(Vec<f64>, Vec<ArrivalTime>)> {
        let buffers = self.buffers.read().await;
        let arrivals = self.arrivals.read().await;
        let values = buffers.get(node)?.get(stat)?.to_vec();
        let times = arrivals.get(node)?.to_vec();
        Some((values, times))
    }

    /// Arrival time `offset` positions before the tail of `node`'s ring
    pub async fn arrival_before_tail(&self, node: &str, offset: usize) -> Option<ArrivalTime> {
        self.arrivals.read().await.get(node)?.back_offset(offset).copied()
    }
}

/// Number of ring slots a record arriving at `now` occupies.
///
/// The elapsed seconds since `last` are rounded, and the rounding remainder
/// is carried into the next call so that drift does not accumulate. The
/// first record of a node always takes exactly one slot.
pub fn elapsed_slots(last: Option<DateTime<Utc>>, now: DateTime<Utc>, carry: &mut f64) -> usize {
    let Some(last) = last else {
        return 1;
    };
    let elapsed = (now - last).num_milliseconds() as f64 / 1000.0;
    let total = elapsed + *carry;
    let rounded = total.round();
    *carry = total - rounded;
    if rounded < 1.0 {
        1
    } else {
        rounded as usize
    }
}
