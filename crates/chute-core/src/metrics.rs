//! Rolling metrics windows.
//!
//! Both sides of the relay keep an in-memory window of named counters that
//! is flushed as one structured log line when the reporting interval has
//! elapsed (or when a flush is forced at shutdown or over the control
//! channel), then reset.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::info;

use crate::constants::METRICS_INTERVAL;

/// A rolling window of saturating counters.
#[derive(Debug)]
pub struct MetricsWindow {
    component: &'static str,
    interval: Duration,
    start: Instant,
    counters: BTreeMap<&'static str, u64>,
}

/// Point-in-time view of a window, served on the telemetry port.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub component: String,
    pub window_secs: f64,
    pub counters: BTreeMap<String, u64>,
}

impl MetricsWindow {
    /// Create a window for a component with the default interval.
    pub fn new(component: &'static str) -> Self {
        Self::with_interval(component, METRICS_INTERVAL)
    }

    /// Create a window with a custom reporting interval.
    pub fn with_interval(component: &'static str, interval: Duration) -> Self {
        Self {
            component,
            interval,
            start: Instant::now(),
            counters: BTreeMap::new(),
        }
    }

    /// Add to a named counter.
    pub fn add(&mut self, counter: &'static str, n: u64) {
        let entry = self.counters.entry(counter).or_insert(0);
        *entry = entry.saturating_add(n);
    }

    /// Read a counter (zero if never touched this window).
    pub fn get(&self, counter: &str) -> u64 {
        self.counters.get(counter).copied().unwrap_or(0)
    }

    /// Flush and reset if the interval has elapsed.
    ///
    /// `gauges` are instantaneous values (queue depth, listener count)
    /// reported alongside the window counters without being reset.
    /// Returns true if a report was emitted.
    pub fn maybe_report(&mut self, gauges: &[(&'static str, u64)]) -> bool {
        if self.start.elapsed() < self.interval {
            return false;
        }
        self.report(gauges);
        true
    }

    /// Flush and reset unconditionally.
    pub fn force_report(&mut self, gauges: &[(&'static str, u64)]) {
        self.report(gauges);
    }

    /// Current snapshot without resetting the window.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            component: self.component.to_string(),
            window_secs: self.start.elapsed().as_secs_f64(),
            counters: self
                .counters
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
        }
    }

    fn report(&mut self, gauges: &[(&'static str, u64)]) {
        let mut fields: Vec<String> = self
            .counters
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        for (k, v) in gauges {
            fields.push(format!("{}={}", k, v));
        }
        info!(
            component = self.component,
            window_ms = self.start.elapsed().as_millis() as u64,
            "metrics: {}",
            fields.join(" ")
        );
        self.counters.clear();
        self.start = Instant::now();
    }
}
