//! Memory-paced batch sizing for the import loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Runs shorter than this are processed as a single batch
pub const SEQUENTIAL_THRESHOLD: usize = 5;

/// Below this share of the memory target the run stops taking new batches
pub const CRITICAL_HEADROOM: f64 = 0.10;

/// Reports how much memory the process can still use
pub trait MemoryProbe: Send + Sync {
    fn available_bytes(&self) -> u64;
}

/// Reads available system memory through `sysinfo`
#[derive(Debug, Default)]
pub struct SystemMemoryProbe;

impl MemoryProbe for SystemMemoryProbe {
    fn available_bytes(&self) -> u64 {
        use sysinfo::System;

        let mut sys = System::new();
        sys.refresh_memory();
        let available = sys.available_memory();
        if available == 0 {
            // Some containers report nothing; treat that as unconstrained
            warn!("could not detect available memory, assuming no pressure");
            return u64::MAX;
        }
        available
    }
}

/// Fixed reading, adjustable between batches
#[derive(Debug, Default)]
pub struct FixedMemoryProbe(AtomicU64);

impl FixedMemoryProbe {
    pub fn new(bytes: u64) -> Self {
        Self(AtomicU64::new(bytes))
    }

    pub fn set(&self, bytes: u64) {
        self.0.store(bytes, Ordering::SeqCst);
    }
}

impl MemoryProbe for FixedMemoryProbe {
    fn available_bytes(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
pub struct BatchPlanner {
    base_batch_size: usize,
    target_bytes: u64,
    probe: Arc<dyn MemoryProbe>,
}

impl BatchPlanner {
    pub fn new(base_batch_size: usize, target_bytes: u64, probe: Arc<dyn MemoryProbe>) -> Self {
        Self {
            base_batch_size: base_batch_size.max(1),
            target_bytes: target_bytes.max(1),
            probe,
        }
    }

    /// Available memory as a share of the target, capped at 1.0
    pub fn headroom_fraction(&self) -> f64 {
        let available = self.probe.available_bytes() as f64;
        (available / self.target_bytes as f64).min(1.0)
    }

    pub fn is_exhausted(&self) -> bool {
        self.headroom_fraction() < CRITICAL_HEADROOM
    }

    /// Records to take in the next batch out of `remaining`, where `total` is
    /// the size of the whole page. Only a small page goes in one batch; the
    /// tail of a large page is still paced by headroom.
    pub fn batch_size(&self, total: usize, remaining: usize) -> usize {
        if total < SEQUENTIAL_THRESHOLD {
            return remaining;
        }
        let headroom = self.headroom_fraction();
        let scaled = (self.base_batch_size as f64 * headroom).floor() as usize;
        let size = scaled.max(1).min(remaining);
        debug!(
            "batch size {} (base {}, headroom {:.2}, {} of {} remaining)",
            size, self.base_batch_size, headroom, remaining, total
        );
        size
    }
}

impl std::fmt::Debug for BatchPlanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchPlanner")
            .field("base_batch_size", &self.base_batch_size)
            .field("target_bytes", &self.target_bytes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: u64 = 1024 * 1024;

    fn planner(available: u64) -> BatchPlanner {
        BatchPlanner::new(25, 100 * MB, Arc::new(FixedMemoryProbe::new(available)))
    }

    #[test]
    fn test_small_runs_are_one_batch() {
        assert_eq!(planner(0).batch_size(4, 4), 4);
        assert_eq!(planner(100 * MB).batch_size(0, 0), 0);
    }

    #[test]
    fn test_batch_scales_with_headroom() {
        assert_eq!(planner(25 * MB).batch_size(100, 100), 6);
        assert_eq!(planner(500 * MB).batch_size(100, 100), 25);
        assert_eq!(planner(100 * MB).batch_size(12, 12), 12);
    }

    #[test]
    fn test_tail_of_large_page_is_still_paced() {
        // 12.5% headroom of base 25 gives batches of 3
        let planner = planner(25 * MB / 2);
        assert_eq!(planner.batch_size(20, 4), 3);
        assert_eq!(planner.batch_size(20, 2), 2);
        assert_eq!(planner.batch_size(4, 4), 4);
    }

    #[test]
    fn test_batch_never_below_one() {
        assert_eq!(planner(MB).batch_size(50, 50), 1);
    }

    #[test]
    fn test_exhaustion_below_critical_floor() {
        let probe = Arc::new(FixedMemoryProbe::new(50 * MB));
        let planner = BatchPlanner::new(25, 100 * MB, probe.clone());
        assert!(!planner.is_exhausted());

        probe.set(9 * MB);
        assert!(planner.is_exhausted());
    }
}
