use crate::config::SchedulerConfig;
use crate::error::{Result, SchedulerError};
use crate::host::InputKind;

/// Highest frame rate `force_frame_rate` accepts.
pub const MAX_FRAME_RATE: u32 = 125;

/// Answers "should the work loop give control back to the host now?".
///
/// Pure bookkeeping over timestamps handed in by the caller; it never reads a
/// clock itself.
#[derive(Debug, Clone)]
pub struct Deadline {
    default_budget_ms: f64,
    frame_budget_ms: f64,
    max_continuous_ms: f64,
    yield_only_for_input: bool,
    slice_start: f64,
    needs_paint: bool,
}

impl Deadline {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            default_budget_ms: config.frame_budget_ms,
            frame_budget_ms: config.frame_budget_ms,
            max_continuous_ms: config.max_continuous_ms,
            yield_only_for_input: config.yield_only_for_input,
            slice_start: 0.0,
            needs_paint: false,
        }
    }

    pub fn begin_slice(&mut self, now: f64) {
        self.slice_start = now;
        self.needs_paint = false;
    }

    pub fn frame_budget_ms(&self) -> f64 {
        self.frame_budget_ms
    }

    /// Time spent in the current slice. Never negative, even if the host
    /// clock jumped backwards.
    pub fn elapsed(&self, now: f64) -> f64 {
        (now - self.slice_start).max(0.0)
    }

    pub fn request_paint(&mut self) {
        self.needs_paint = true;
    }

    pub fn should_yield(&self, now: f64, input: Option<InputKind>) -> bool {
        if self.needs_paint || input == Some(InputKind::Discrete) {
            return true;
        }
        let elapsed = self.elapsed(now);
        if elapsed >= self.max_continuous_ms {
            return true;
        }
        if elapsed < self.frame_budget_ms {
            return false;
        }
        if self.yield_only_for_input {
            return input.is_some();
        }
        true
    }

    /// `0` restores the configured budget.
    pub fn force_frame_rate(&mut self, fps: u32) -> Result<()> {
        match fps {
            0 => self.frame_budget_ms = self.default_budget_ms,
            1..=MAX_FRAME_RATE => self.frame_budget_ms = (1000 / fps) as f64,
            _ => return Err(SchedulerError::InvalidFrameRate(fps)),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deadline() -> Deadline {
        Deadline::new(&SchedulerConfig::default())
    }

    #[test]
    fn yields_once_budget_is_spent() {
        let mut d = deadline();
        d.begin_slice(100.0);
        assert!(!d.should_yield(104.9, None));
        assert!(d.should_yield(105.0, None));
    }

    #[test]
    fn backwards_clock_does_not_yield() {
        let mut d = deadline();
        d.begin_slice(100.0);
        assert_eq!(d.elapsed(40.0), 0.0);
        assert!(!d.should_yield(40.0, None));
    }

    #[test]
    fn discrete_input_interrupts_inside_budget() {
        let mut d = deadline();
        d.begin_slice(0.0);
        assert!(d.should_yield(1.0, Some(InputKind::Discrete)));
        assert!(!d.should_yield(1.0, Some(InputKind::Continuous)));
    }

    #[test]
    fn input_gated_mode_runs_until_cap() {
        let config = SchedulerConfig {
            yield_only_for_input: true,
            ..SchedulerConfig::default()
        };
        let mut d = Deadline::new(&config);
        d.begin_slice(0.0);
        assert!(!d.should_yield(50.0, None));
        assert!(d.should_yield(50.0, Some(InputKind::Continuous)));
        assert!(d.should_yield(300.0, None));
    }

    #[test]
    fn paint_request_forces_yield_until_next_slice() {
        let mut d = deadline();
        d.begin_slice(0.0);
        d.request_paint();
        assert!(d.should_yield(0.0, None));
        d.begin_slice(1.0);
        assert!(!d.should_yield(1.0, None));
    }

    #[test]
    fn frame_rate_bounds() {
        let mut d = deadline();
        d.force_frame_rate(60).unwrap();
        assert_eq!(d.frame_budget_ms(), 16.0);
        d.force_frame_rate(0).unwrap();
        assert_eq!(d.frame_budget_ms(), 5.0);
        assert!(matches!(
            d.force_frame_rate(240),
            Err(SchedulerError::InvalidFrameRate(240))
        ));
        assert_eq!(d.frame_budget_ms(), 5.0);
    }
}
