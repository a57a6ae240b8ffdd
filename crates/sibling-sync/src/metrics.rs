//! Where the local performance numbers come from.
//!
//! The agent's request layer owns the real counters; the engine only needs
//! a snapshot each cycle. [`StaticMetrics`] reports a fixed snapshot and is
//! what the daemon uses until a live source is wired in.

use std::sync::RwLock;

use sibling_core::MetricsSnapshot;

/// Produces the current local metrics.
pub trait MetricsSource: Send + Sync {
    fn snapshot(&self) -> MetricsSnapshot;
}

/// A settable snapshot, initialised to the baseline values.
#[derive(Debug)]
pub struct StaticMetrics {
    current: RwLock<MetricsSnapshot>,
}

impl StaticMetrics {
    pub fn new(snapshot: MetricsSnapshot) -> Self {
        StaticMetrics {
            current: RwLock::new(snapshot),
        }
    }

    /// Replaces the reported snapshot.
    pub fn set(&self, snapshot: MetricsSnapshot) {
        match self.current.write() {
            Ok(mut current) => *current = snapshot,
            Err(poisoned) => *poisoned.into_inner() = snapshot,
        }
    }
}

impl Default for StaticMetrics {
    fn default() -> Self {
        Self::new(MetricsSnapshot::baseline())
    }
}

impl MetricsSource for StaticMetrics {
    fn snapshot(&self) -> MetricsSnapshot {
        match self.current.read() {
            Ok(current) => current.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}
