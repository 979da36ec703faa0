//! Tether Metrics - bridge bookkeeping statistics
//!
//! Provides zero-cost gauges for tracking how many cross-runtime values and
//! engines are alive, and how many calls were marshalled onto the event-loop
//! thread. Everything vanishes in production builds via feature flags.
//!
//! # Feature Flags
//!
//! - `metrics` - Enable statistics collection (default: disabled)
//!
//! # Usage
//!
//! ```ignore
//! use tether_metrics::BridgeStats;
//!
//! let stats = BridgeStats::new();
//! stats.values_alive(1);
//! println!("alive: {}", stats.snapshot().values_alive);
//! ```

#[cfg(feature = "metrics")]
mod gauge;

#[cfg(feature = "metrics")]
pub use gauge::{BridgeStats, Gauge};

/// Point-in-time copy of every bridge gauge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub values_alive: i64,
    pub engines_alive: i64,
    pub calls_marshalled: i64,
}

// ============================================================================
// No-op stubs when metrics disabled
// ============================================================================

#[cfg(not(feature = "metrics"))]
#[derive(Debug, Default)]
pub struct BridgeStats;

#[cfg(not(feature = "metrics"))]
impl BridgeStats {
    pub fn new() -> Self { Self }
    pub fn values_alive(&self, _delta: i64) {}
    pub fn engines_alive(&self, _delta: i64) {}
    pub fn call_marshalled(&self) {}
    pub fn snapshot(&self) -> StatsSnapshot { StatsSnapshot::default() }
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_compiles_without_metrics() {
        // Ensure stubs compile when metrics feature is disabled
        let stats = super::BridgeStats::new();
        stats.values_alive(1);
        stats.engines_alive(1);
        stats.call_marshalled();
        let _ = stats.snapshot();
    }
}
