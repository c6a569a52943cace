//! Latency recording for the decision path and front-tier waits.
//!
//! HDR histogram behind a mutex; values in nanoseconds.

use hdrhistogram::Histogram;
use parking_lot::Mutex;
use std::sync::OnceLock;
use std::time::Instant;

/// Monotonic nanoseconds since first call.
#[inline]
pub fn now_nanos() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START.get_or_init(Instant::now).elapsed().as_nanos() as u64
}

#[derive(Debug)]
pub struct LatencyHistogram {
    hist: Mutex<Option<Histogram<u64>>>,
}

impl LatencyHistogram {
    pub fn new() -> Self {
        // 1ns .. 60s, 有効桁 3
        let hist = Histogram::new_with_bounds(1, 60_000_000_000, 3)
            .or_else(|_| Histogram::new(3))
            .ok();
        Self {
            hist: Mutex::new(hist),
        }
    }

    #[inline]
    pub fn record(&self, nanos: u64) {
        if let Some(hist) = self.hist.lock().as_mut() {
            hist.saturating_record(nanos.max(1));
        }
    }

    pub fn snapshot(&self) -> LatencyStats {
        let guard = self.hist.lock();
        match guard.as_ref() {
            Some(hist) if !hist.is_empty() => LatencyStats {
                count: hist.len(),
                max_nanos: hist.max(),
                p50_nanos: hist.value_at_quantile(0.50),
                p99_nanos: hist.value_at_quantile(0.99),
            },
            _ => LatencyStats::default(),
        }
    }

    pub fn reset(&self) {
        if let Some(hist) = self.hist.lock().as_mut() {
            hist.reset();
        }
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatencyStats {
    pub count: u64,
    pub max_nanos: u64,
    pub p50_nanos: u64,
    pub p99_nanos: u64,
}

/// Records the elapsed time on drop.
pub struct LatencyGuard<'a> {
    start: u64,
    histogram: &'a LatencyHistogram,
}

impl<'a> LatencyGuard<'a> {
    pub fn new(histogram: &'a LatencyHistogram) -> Self {
        Self {
            start: now_nanos(),
            histogram,
        }
    }
}

impl Drop for LatencyGuard<'_> {
    fn drop(&mut self) {
        self.histogram
            .record(now_nanos().saturating_sub(self.start));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_records_once() {
        let hist = LatencyHistogram::new();
        {
            let _g = LatencyGuard::new(&hist);
        }
        hist.record(500);
        let stats = hist.snapshot();
        assert_eq!(stats.count, 2);
        assert!(stats.max_nanos >= 500);

        hist.reset();
        assert_eq!(hist.snapshot(), LatencyStats::default());
    }
}
