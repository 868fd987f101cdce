//! Vector clocks for causal tracking between replicas.
//!
//! Every operation returns a new clock and leaves its inputs untouched, so a
//! caller can keep an earlier snapshot around and compare against it later.

use std::collections::BTreeMap;
use std::fmt;

/// Causal relationship of one clock to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockOrdering {
    /// Every coordinate `<=` the other's, at least one strictly less.
    Before,
    /// Every coordinate `>=` the other's, at least one strictly greater.
    After,
    Concurrent,
    Equal,
}

/// Map from replica to the number of writes accepted there.
///
/// An absent replica counts as 0, so `{a: 0}` and `{}` are equal.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct VectorClock {
    counters: BTreeMap<String, u64>,
}

impl VectorClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, replica: &str) -> u64 {
        self.counters.get(replica).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.counters.values().all(|&c| c == 0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.counters.iter().map(|(k, &v)| (k.as_str(), v))
    }

    /// Coordinate-wise comparison over the union of replicas in both clocks.
    pub fn compare(&self, other: &VectorClock) -> ClockOrdering {
        let mut less = false;
        let mut greater = false;
        for replica in self.counters.keys().chain(other.counters.keys()) {
            let (a, b) = (self.get(replica), other.get(replica));
            if a < b {
                less = true;
            } else if a > b {
                greater = true;
            }
            if less && greater {
                return ClockOrdering::Concurrent;
            }
        }
        match (less, greater) {
            (false, false) => ClockOrdering::Equal,
            (true, false) => ClockOrdering::Before,
            (false, true) => ClockOrdering::After,
            (true, true) => ClockOrdering::Concurrent,
        }
    }

    /// True when this clock has seen everything `other` has.
    pub fn dominates(&self, other: &VectorClock) -> bool {
        matches!(self.compare(other), ClockOrdering::After | ClockOrdering::Equal)
    }

    /// Coordinate-wise maximum.
    pub fn merge(&self, other: &VectorClock) -> VectorClock {
        let mut counters = self.counters.clone();
        for (replica, &count) in &other.counters {
            let slot = counters.entry(replica.clone()).or_insert(0);
            *slot = (*slot).max(count);
        }
        VectorClock { counters }
    }

    /// Bump `replica`'s own coordinate by one. `None` if it is already at
    /// `u64::MAX`.
    pub fn increment(&self, replica: &str) -> Option<VectorClock> {
        let mut counters = self.counters.clone();
        let slot = counters.entry(replica.to_string()).or_insert(0);
        *slot = slot.checked_add(1)?;
        Some(VectorClock { counters })
    }
}

impl PartialEq for VectorClock {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == ClockOrdering::Equal
    }
}

impl Eq for VectorClock {}

impl<K: Into<String>> FromIterator<(K, u64)> for VectorClock {
    fn from_iter<I: IntoIterator<Item = (K, u64)>>(iter: I) -> Self {
        VectorClock { counters: iter.into_iter().map(|(k, v)| (k.into(), v)).collect() }
    }
}

impl fmt::Display for VectorClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (replica, count)) in self.counters.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{replica}:{count}")?;
        }
        f.write_str("}")
    }
}
