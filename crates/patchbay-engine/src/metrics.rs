use core::sync::atomic::{AtomicU64, Ordering};

/// Running per-block counters maintained by the audio thread.
///
/// Plain cumulative atomics rather than a sample log: `Engine::run` adds
/// its block's numbers with relaxed stores, and diagnostics read a
/// consistent-enough snapshot whenever they like without ever contending
/// with the audio thread.
pub struct Metrics {
    blocks: AtomicU64,
    frames: AtomicU64,
    /// Events executed at block starts.
    events: AtomicU64,
    /// Wall time spent inside `Engine::run`, summed.
    busy_ns: AtomicU64,
    max_block_ns: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            blocks: AtomicU64::new(0),
            frames: AtomicU64::new(0),
            events: AtomicU64::new(0),
            busy_ns: AtomicU64::new(0),
            max_block_ns: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn record(&self, ns: u64, frames: u32, events: u32) {
        self.blocks.fetch_add(1, Ordering::Relaxed);
        self.frames.fetch_add(u64::from(frames), Ordering::Relaxed);
        self.events.fetch_add(u64::from(events), Ordering::Relaxed);
        self.busy_ns.fetch_add(ns, Ordering::Relaxed);
        self.max_block_ns.fetch_max(ns, Ordering::Relaxed);
    }

    /// Point-in-time view of the counters.
    pub fn summary(&self) -> MetricsSummary {
        let blocks = self.blocks.load(Ordering::Relaxed);
        let busy_ns = self.busy_ns.load(Ordering::Relaxed);
        MetricsSummary {
            blocks,
            frames: self.frames.load(Ordering::Relaxed),
            events: self.events.load(Ordering::Relaxed),
            mean_block_ns: if blocks > 0 { busy_ns / blocks } else { 0 },
            max_block_ns: self.max_block_ns.load(Ordering::Relaxed),
        }
    }

    /// Zeroes every counter; used when the engine is reconfigured.
    pub fn reset(&self) {
        self.blocks.store(0, Ordering::Relaxed);
        self.frames.store(0, Ordering::Relaxed);
        self.events.store(0, Ordering::Relaxed);
        self.busy_ns.store(0, Ordering::Relaxed);
        self.max_block_ns.store(0, Ordering::Relaxed);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSummary {
    pub blocks: u64,
    pub frames: u64,
    pub events: u64,
    pub mean_block_ns: u64,
    pub max_block_ns: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_and_summarises() {
        let metrics = Metrics::new();
        for i in 0..4u64 {
            metrics.record(100 * (i + 1), 64, i as u32);
        }
        let summary = metrics.summary();
        assert_eq!(summary.blocks, 4);
        assert_eq!(summary.frames, 256);
        assert_eq!(summary.events, 6);
        assert_eq!(summary.mean_block_ns, 250);
        assert_eq!(summary.max_block_ns, 400);

        // Summaries do not consume the counters.
        assert_eq!(metrics.summary(), summary);
    }

    #[test]
    fn reset_zeroes_everything() {
        let metrics = Metrics::new();
        metrics.record(500, 128, 3);
        metrics.reset();
        assert_eq!(metrics.summary(), MetricsSummary::default());
    }
}
