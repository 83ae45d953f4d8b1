use std::time::Instant;

/// Milliseconds elapsed since the current frame started.
pub trait FrameClock {
    fn elapsed_ms(&self) -> f64;
}

#[derive(Debug, Clone, Copy)]
pub struct InstantClock {
    frame_start: Instant,
}

impl InstantClock {
    pub fn new() -> Self {
        Self {
            frame_start: Instant::now(),
        }
    }

    pub fn restart(&mut self) {
        self.frame_start = Instant::now();
    }
}

impl Default for InstantClock {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameClock for InstantClock {
    fn elapsed_ms(&self) -> f64 {
        self.frame_start.elapsed().as_secs_f64() * 1000.0
    }
}

/// Time allowance for one `advance` call, shared by every page it visits.
pub struct Budget<'a> {
    limit: Option<BudgetLimit<'a>>,
}

struct BudgetLimit<'a> {
    clock: &'a dyn FrameClock,
    start_ms: f64,
    budget_ms: f64,
}

impl<'a> Budget<'a> {
    /// Starts measuring now.
    pub fn start(clock: &'a dyn FrameClock, budget_ms: f64) -> Self {
        Self {
            limit: Some(BudgetLimit {
                clock,
                start_ms: clock.elapsed_ms(),
                budget_ms,
            }),
        }
    }

    /// Never exhausted and never reads a clock.
    pub const fn unbounded() -> Self {
        Self { limit: None }
    }

    pub const fn is_unbounded(&self) -> bool {
        self.limit.is_none()
    }

    pub fn exhausted(&self) -> bool {
        match &self.limit {
            Some(limit) => limit.clock.elapsed_ms() - limit.start_ms > limit.budget_ms,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct FixedClock(Cell<f64>);

    impl FrameClock for FixedClock {
        fn elapsed_ms(&self) -> f64 {
            self.0.get()
        }
    }

    #[test]
    fn budget_measures_from_start() {
        let clock = FixedClock(Cell::new(40.0));
        let budget = Budget::start(&clock, 10.0);
        clock.0.set(50.0);
        assert!(!budget.exhausted());
        clock.0.set(50.5);
        assert!(budget.exhausted());
    }

    #[test]
    fn unbounded_budget_never_exhausts() {
        let budget = Budget::unbounded();
        assert!(budget.is_unbounded());
        assert!(!budget.exhausted());
    }

    #[test]
    fn instant_clock_is_monotonic() {
        let clock = InstantClock::new();
        let first = clock.elapsed_ms();
        assert!(clock.elapsed_ms() >= first);
    }
}
