//! Answer round-trip histogram using HdrHistogram
//!
//! Each worker slot records, for every accepted answer, the time between
//! dispatching the query and accepting the answer. The range covers 1µs to
//! 1 hour with 3 significant digits, which is plenty for anything from an
//! in-process thread hop to a slow remote worker step.
//!
//! # Example
//!
//! ```
//! use asyncalgo::stats::histogram::LatencyHistogram;
//! use std::time::Duration;
//!
//! let mut hist = LatencyHistogram::new();
//! hist.record(Duration::from_millis(3));
//! hist.record(Duration::from_millis(5));
//!
//! let summary = hist.summary().unwrap();
//! assert!(summary.max >= summary.min);
//! ```

use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const MIN_MICROS: u64 = 1;
const MAX_MICROS: u64 = 3_600_000_000;

/// Round-trip latency histogram (microsecond resolution)
#[derive(Debug, Clone)]
pub struct LatencyHistogram {
    histogram: Histogram<u64>,
}

/// Percentile digest of a [`LatencyHistogram`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub min: Duration,
    pub mean: Duration,
    pub p50: Duration,
    pub p99: Duration,
    pub max: Duration,
}

impl LatencyHistogram {
    pub fn new() -> Self {
        // Bounds are constants within HdrHistogram's valid range.
        let histogram = Histogram::new_with_bounds(MIN_MICROS, MAX_MICROS, 3)
            .expect("constant histogram bounds are valid");

        Self { histogram }
    }

    /// Record one sample, clamped into the histogram's range
    #[inline]
    pub fn record(&mut self, latency: Duration) {
        let micros = (latency.as_micros() as u64).clamp(MIN_MICROS, MAX_MICROS);
        let _ = self.histogram.record(micros);
    }

    pub fn len(&self) -> u64 {
        self.histogram.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histogram.len() == 0
    }

    /// Digest for reports, or None if nothing was recorded
    pub fn summary(&self) -> Option<LatencySummary> {
        if self.is_empty() {
            return None;
        }
        let h = &self.histogram;
        Some(LatencySummary {
            min: Duration::from_micros(h.min()),
            mean: Duration::from_micros(h.mean().round() as u64),
            p50: Duration::from_micros(h.value_at_quantile(0.5)),
            p99: Duration::from_micros(h.value_at_quantile(0.99)),
            max: Duration::from_micros(h.max()),
        })
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_has_no_summary() {
        let hist = LatencyHistogram::default();
        assert!(hist.is_empty());
        assert!(hist.summary().is_none());
    }

    #[test]
    fn test_quantiles_of_uniform_samples() {
        let mut hist = LatencyHistogram::new();
        for step in 1..=100 {
            hist.record(Duration::from_micros(step * 10));
        }

        let summary = hist.summary().unwrap();
        assert_eq!(hist.len(), 100);
        assert!((450..=550).contains(&summary.p50.as_micros()));
        assert!((940..=1040).contains(&summary.p99.as_micros()));
        assert!((495..=515).contains(&summary.mean.as_micros()));
    }

    #[test]
    fn test_tiny_and_huge_samples_are_clamped() {
        let mut hist = LatencyHistogram::new();
        hist.record(Duration::from_nanos(10));
        hist.record(Duration::from_secs(7200));

        let summary = hist.summary().unwrap();
        assert_eq!(summary.min, Duration::from_micros(1));
        assert!(summary.max <= Duration::from_secs(3601));
        assert!(summary.max >= Duration::from_secs(3599));
    }

    #[test]
    fn test_summary_is_ordered() {
        let mut hist = LatencyHistogram::new();
        for ms in [1, 10, 100] {
            hist.record(Duration::from_millis(ms));
        }

        let summary = hist.summary().unwrap();
        assert!(summary.min <= summary.p50);
        assert!(summary.p50 <= summary.p99);
        assert!(summary.p99 <= summary.max);
        assert!((99..=101).contains(&summary.max.as_millis()));
    }
}
