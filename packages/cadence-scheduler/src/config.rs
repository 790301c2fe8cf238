use crate::error::{Result, SchedulerError};
use crate::priority::PriorityTimeouts;
use serde::{Deserialize, Serialize};

/// Tunables for one scheduler instance. Missing JSON fields take their
/// defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Length of one time slice before the loop starts yielding.
    pub frame_budget_ms: f64,
    /// Hard cap on a single slice, regardless of input state.
    pub max_continuous_ms: f64,
    /// Past the frame budget, keep running until the host reports pending
    /// input. Only useful for hosts that implement `Host::pending_input`.
    pub yield_only_for_input: bool,
    pub timeouts: PriorityTimeouts,
    pub profiling: bool,
    /// Max number of buffered profile events before the oldest are dropped.
    pub profiling_buffer: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            frame_budget_ms: 5.0,
            max_continuous_ms: 300.0,
            yield_only_for_input: false,
            timeouts: PriorityTimeouts::default(),
            profiling: false,
            profiling_buffer: 1024,
        }
    }
}

impl SchedulerConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.frame_budget_ms.is_nan() || self.frame_budget_ms <= 0.0 {
            return Err(SchedulerError::InvalidConfig(format!(
                "frame_budget_ms must be positive, got {}",
                self.frame_budget_ms
            )));
        }
        if self.max_continuous_ms < self.frame_budget_ms {
            return Err(SchedulerError::InvalidConfig(format!(
                "max_continuous_ms ({}) is shorter than frame_budget_ms ({})",
                self.max_continuous_ms, self.frame_budget_ms
            )));
        }
        if !self.timeouts.is_monotonic() {
            return Err(SchedulerError::InvalidConfig(
                "priority timeouts must not decrease with priority".into(),
            ));
        }
        Ok(())
    }

    pub fn with_frame_budget(mut self, ms: f64) -> Self {
        self.frame_budget_ms = ms;
        self
    }

    pub fn with_profiling(mut self, enabled: bool) -> Self {
        self.profiling = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config =
            SchedulerConfig::from_json_str(r#"{"frame_budget_ms": 8, "timeouts": {"low": 20000}}"#)
                .unwrap();
        assert_eq!(config.frame_budget_ms, 8.0);
        assert_eq!(config.max_continuous_ms, 300.0);
        assert_eq!(config.timeouts.low, 20000.0);
        assert_eq!(config.timeouts.normal, 5000.0);
    }

    #[test]
    fn rejects_zero_budget() {
        let err = SchedulerConfig::from_json_str(r#"{"frame_budget_ms": 0}"#).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidConfig(_)));
    }

    #[test]
    fn rejects_malformed_json() {
        let err = SchedulerConfig::from_json_str("{frame_budget_ms").unwrap_err();
        assert!(matches!(err, SchedulerError::Config(_)));
    }
}
