//! Fixed-length time series rings
//!
//! Every `(node, stat)` pair owns a `Ring<f64>` and every node owns a
//! `Ring<Option<DateTime<Utc>>>` of arrival times. A ring never changes
//! length: appending drops the head.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

/// Number of samples kept per stat and per node (one per second)
pub const CAPACITY: usize = 300;

/// Upper bound on the samples attached to a single alert
pub const CAPACITY_ALERT: usize = 300;

/// Arrival time of a sample; `None` marks a gap that was never observed
pub type ArrivalTime = Option<DateTime<Utc>>;

/// A fixed-length sequence with head-drop append
#[derive(Debug, Clone, PartialEq)]
pub struct Ring<T> {
    slots: VecDeque<T>,
}

impl<T: Clone> Ring<T> {
    /// Create a ring of `capacity` copies of `fill`
    pub fn filled(capacity: usize, fill: T) -> Self {
        let mut slots = VecDeque::with_capacity(capacity);
        slots.resize(capacity, fill);
        Self { slots }
    }

    /// Build a ring from existing samples, keeping their length
    pub fn from_vec(samples: Vec<T>) -> Self {
        Self { slots: VecDeque::from(samples) }
    }

    /// Append at the tail and drop the head
    pub fn push(&mut self, value: T) {
        if self.slots.is_empty() {
            return;
        }
        self.slots.pop_front();
        self.slots.push_back(value);
    }

    /// Append the current tail value again `times` times
    pub fn carry_forward(&mut self, times: usize) {
        let Some(last) = self.slots.back().cloned() else {
            return;
        };
        for _ in 0..times.min(self.slots.len()) {
            self.push(last.clone());
        }
    }

    /// The most recent sample
    pub fn last(&self) -> Option<&T> {
        self.slots.back()
    }

    /// The sample `offset` positions before the tail (`0` is the tail)
    pub fn back_offset(&self, offset: usize) -> Option<&T> {
        let len = self.slots.len();
        if offset >= len {
            return None;
        }
        self.slots.get(len - 1 - offset)
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.slots.get(index)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Copy the ring out, oldest first
    pub fn to_vec(&self) -> Vec<T> {
        self.slots.iter().cloned().collect()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        self.slots.iter()
    }
}

impl Ring<f64> {
    /// A zeroed stat buffer
    pub fn zeroed(capacity: usize) -> Self {
        Self::filled(capacity, 0.0)
    }
}

impl Ring<ArrivalTime> {
    /// An arrival-time ring where every slot is a gap
    pub fn unobserved(capacity: usize) -> Self {
        Self::filled(capacity, None)
    }

    /// Append `count` gap markers
    pub fn push_gaps(&mut self, count: usize) {
        for _ in 0..count.min(self.len()) {
            self.push(None);
        }
    }

    /// The most recent observed arrival, ignoring trailing gaps
    pub fn last_observed(&self) -> Option<DateTime<Utc>> {
        self.iter().rev().flatten().next().copied()
    }
}
