//! Clock - Timing Regions and Event Counters
//!
//! Thread-safe accounting of where the middle-end spends time (fusion, task
//! construction, kernels) and how many jobs were computed or skipped. Regions
//! time through the RAII [`TimedRegion`] guard.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// A timed phase of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    /// Graph fusion.
    Fusion,
    /// Task construction.
    Tasker,
    /// Kernel execution.
    Kernel,
}

/// A counted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Counter {
    /// A job dispatched a kernel.
    Computed,
    /// A job skipped its kernel because every output was fixed or forwarded.
    NotComputed,
}

#[derive(Debug, Default)]
struct ClockState {
    regions: [Duration; 3],
    counters: [u64; 2],
}

/// Shared timing and counting state.
#[derive(Debug, Default)]
pub struct Clock {
    state: Mutex<ClockState>,
}

impl Clock {
    /// An empty clock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `elapsed` to a region.
    pub fn add(&self, region: Region, elapsed: Duration) {
        self.state.lock().regions[region as usize] += elapsed;
    }

    /// Increments a counter by one.
    pub fn incr(&self, counter: Counter) {
        self.state.lock().counters[counter as usize] += 1;
    }

    /// Accumulated time of a region.
    pub fn elapsed(&self, region: Region) -> Duration {
        self.state.lock().regions[region as usize]
    }

    /// Current value of a counter.
    pub fn count(&self, counter: Counter) -> u64 {
        self.state.lock().counters[counter as usize]
    }
}

/// Guard adding the time between construction and drop to a region.
pub struct TimedRegion<'c> {
    clock: &'c Clock,
    region: Region,
    start: Instant,
}

impl<'c> TimedRegion<'c> {
    /// Starts timing `region`.
    pub fn new(clock: &'c Clock, region: Region) -> Self {
        Self {
            clock,
            region,
            start: Instant::now(),
        }
    }
}

impl Drop for TimedRegion<'_> {
    fn drop(&mut self) {
        self.clock.add(self.region, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let clock = Clock::new();
        clock.incr(Counter::Computed);
        clock.incr(Counter::Computed);
        clock.incr(Counter::NotComputed);
        assert_eq!(clock.count(Counter::Computed), 2);
        assert_eq!(clock.count(Counter::NotComputed), 1);
    }

    #[test]
    fn test_timed_region_accumulates() {
        let clock = Clock::new();
        {
            let _region = TimedRegion::new(&clock, Region::Fusion);
        }
        {
            let _region = TimedRegion::new(&clock, Region::Fusion);
        }
        assert!(clock.elapsed(Region::Fusion) > Duration::ZERO);
        assert_eq!(clock.elapsed(Region::Kernel), Duration::ZERO);
    }
}
