//! Atomic gauges for bridge bookkeeping

use crate::StatsSnapshot;
use std::sync::atomic::{AtomicI64, Ordering};

/// A signed counter that can be bumped from any thread.
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicI64,
}

impl Gauge {
    pub fn new() -> Self {
        Self {
            value: AtomicI64::new(0),
        }
    }

    pub fn add(&self, delta: i64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.value.store(0, Ordering::Relaxed);
    }
}

/// Gauges maintained by the value bridge.
#[derive(Debug, Default)]
pub struct BridgeStats {
    values_alive: Gauge,
    engines_alive: Gauge,
    calls_marshalled: Gauge,
}

impl BridgeStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track fold creation (+1) and destruction (-1).
    pub fn values_alive(&self, delta: i64) {
        self.values_alive.add(delta);
    }

    pub fn engines_alive(&self, delta: i64) {
        self.engines_alive.add(delta);
    }

    pub fn call_marshalled(&self) {
        self.calls_marshalled.add(1);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            values_alive: self.values_alive.get(),
            engines_alive: self.engines_alive.get(),
            calls_marshalled: self.calls_marshalled.get(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gauges_track_deltas() {
        let stats = BridgeStats::new();
        stats.values_alive(1);
        stats.values_alive(1);
        stats.values_alive(-1);
        stats.engines_alive(1);
        stats.call_marshalled();

        let snap = stats.snapshot();
        assert_eq!(snap.values_alive, 1);
        assert_eq!(snap.engines_alive, 1);
        assert_eq!(snap.calls_marshalled, 1);
    }

    #[test]
    fn gauge_reset() {
        let gauge = Gauge::new();
        gauge.add(5);
        gauge.reset();
        assert_eq!(gauge.get(), 0);
    }
}
