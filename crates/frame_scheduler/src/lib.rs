use std::fmt;

use atlas::{AtlasAllocator, BlitExecutor, FrameClock, ImageProvider};
use log::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameSchedulerConfig {
    /// Budget handed to each allocator's `advance`.
    pub per_allocator_budget_ms: f64,
    /// No further allocator is started once a tick has run this long.
    pub frame_ceiling_ms: f64,
}

impl Default for FrameSchedulerConfig {
    fn default() -> Self {
        Self {
            per_allocator_budget_ms: 30.0,
            frame_ceiling_ms: 100.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameTickReport {
    pub frame_sequence_id: u64,
    pub allocators_advanced: u32,
    pub allocators_skipped: u32,
    pub blits_applied: u32,
    pub ops_dropped: u32,
    pub elapsed_ms: f64,
    pub ceiling_hit: bool,
}

/// Drives atlas allocators once per frame under a global time ceiling.
///
/// The host owns the allocators and lends them for each tick.
#[derive(Debug, Clone)]
pub struct FrameScheduler {
    config: FrameSchedulerConfig,
    frame_sequence_id: u64,
}

impl FrameScheduler {
    pub fn new(config: FrameSchedulerConfig) -> Self {
        let valid = |value: f64| value.is_finite() && value >= 0.0;
        if !valid(config.per_allocator_budget_ms) || !valid(config.frame_ceiling_ms) {
            panic!(
                "invalid frame scheduler config: budgets must be finite and non-negative ({config:?})"
            );
        }
        Self {
            config,
            frame_sequence_id: 0,
        }
    }

    pub fn config(&self) -> FrameSchedulerConfig {
        self.config
    }

    /// Sequence id the next tick will report.
    pub fn next_frame_sequence_id(&self) -> u64 {
        self.frame_sequence_id
    }

    pub fn tick<H, S, P, X>(
        &mut self,
        allocators: &mut [&mut AtlasAllocator<H, S>],
        provider: &mut P,
        executor: &mut X,
        clock: &dyn FrameClock,
    ) -> FrameTickReport
    where
        H: Clone + fmt::Debug,
        P: ImageProvider<Handle = H>,
        X: BlitExecutor<P::GpuSource, Surface = S>,
    {
        let mut report = FrameTickReport {
            frame_sequence_id: self.frame_sequence_id,
            ..FrameTickReport::default()
        };
        self.frame_sequence_id += 1;

        let total = allocators.len();
        let tick_start = clock.elapsed_ms();
        for (index, allocator) in allocators.iter_mut().enumerate() {
            if clock.elapsed_ms() - tick_start > self.config.frame_ceiling_ms {
                report.ceiling_hit = true;
                report.allocators_skipped = (total - index) as u32;
                break;
            }
            let stats = allocator.advance(
                provider,
                executor,
                clock,
                self.config.per_allocator_budget_ms,
                false,
            );
            trace!(
                "frame {} allocator {index} applied={} dropped={} exhausted={}",
                report.frame_sequence_id,
                stats.blits_applied,
                stats.ops_dropped,
                stats.budget_exhausted
            );
            report.allocators_advanced += 1;
            report.blits_applied += stats.blits_applied;
            report.ops_dropped += stats.ops_dropped;
        }
        report.elapsed_ms = clock.elapsed_ms() - tick_start;

        if report.ceiling_hit {
            debug!(
                "frame {} hit the {}ms ceiling; skipped {} allocators",
                report.frame_sequence_id, self.config.frame_ceiling_ms, report.allocators_skipped
            );
        }
        report
    }

    /// Applies every ready op of every allocator regardless of time.
    pub fn flush<H, S, P, X>(
        &mut self,
        allocators: &mut [&mut AtlasAllocator<H, S>],
        provider: &mut P,
        executor: &mut X,
        clock: &dyn FrameClock,
    ) -> FrameTickReport
    where
        H: Clone + fmt::Debug,
        P: ImageProvider<Handle = H>,
        X: BlitExecutor<P::GpuSource, Surface = S>,
    {
        let mut report = FrameTickReport {
            frame_sequence_id: self.frame_sequence_id,
            ..FrameTickReport::default()
        };
        self.frame_sequence_id += 1;
        let tick_start = clock.elapsed_ms();
        for allocator in allocators.iter_mut() {
            let stats = allocator.advance(provider, executor, clock, 0.0, true);
            report.allocators_advanced += 1;
            report.blits_applied += stats.blits_applied;
            report.ops_dropped += stats.ops_dropped;
        }
        report.elapsed_ms = clock.elapsed_ms() - tick_start;
        report
    }
}

impl Default for FrameScheduler {
    fn default() -> Self {
        Self::new(FrameSchedulerConfig::default())
    }
}
