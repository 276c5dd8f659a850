//! Build context: per-stage timing for generator runs
//!
//! Diagnostics (warnings, per-stage statistics) go through the `log`
//! facade; the context only accumulates wall-clock timings so callers can
//! profile repeated builds.

use std::time::Duration;
use web_time::Instant;

/// Pipeline stages tracked by the build context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerCategory {
    /// Whole pipeline run
    Total,
    /// Region builder
    Regions,
    /// Contour builder
    Contours,
    /// Polygon mesh builder
    PolyMesh,
}

const TIMER_COUNT: usize = 4;

/// Accumulated timings for one generator instance
#[derive(Debug, Default)]
pub struct BuildContext {
    active: [Option<Instant>; TIMER_COUNT],
    accumulated: [Duration; TIMER_COUNT],
    counts: [usize; TIMER_COUNT],
}

impl BuildContext {
    /// Creates a context with all timers zeroed
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts the timer for a stage
    pub fn start_timer(&mut self, category: TimerCategory) {
        self.active[category as usize] = Some(Instant::now());
    }

    /// Stops the timer for a stage and accumulates the elapsed time
    pub fn stop_timer(&mut self, category: TimerCategory) {
        if let Some(start) = self.active[category as usize].take() {
            self.accumulated[category as usize] += start.elapsed();
            self.counts[category as usize] += 1;
        }
    }

    /// Total accumulated duration for a stage
    pub fn timer_duration(&self, category: TimerCategory) -> Duration {
        self.accumulated[category as usize]
    }

    /// Number of completed start/stop cycles for a stage
    pub fn timer_count(&self, category: TimerCategory) -> usize {
        self.counts[category as usize]
    }

    /// Resets all timers
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_accumulation() {
        let mut ctx = BuildContext::new();
        for _ in 0..3 {
            ctx.start_timer(TimerCategory::Regions);
            ctx.stop_timer(TimerCategory::Regions);
        }
        assert_eq!(ctx.timer_count(TimerCategory::Regions), 3);
        assert_eq!(ctx.timer_count(TimerCategory::Contours), 0);
    }

    #[test]
    fn test_stop_without_start_is_ignored() {
        let mut ctx = BuildContext::new();
        ctx.stop_timer(TimerCategory::Total);
        assert_eq!(ctx.timer_count(TimerCategory::Total), 0);
        assert_eq!(ctx.timer_duration(TimerCategory::Total), Duration::ZERO);
    }

    #[test]
    fn test_reset() {
        let mut ctx = BuildContext::new();
        ctx.start_timer(TimerCategory::Total);
        ctx.stop_timer(TimerCategory::Total);
        ctx.reset();
        assert_eq!(ctx.timer_count(TimerCategory::Total), 0);
    }
}
