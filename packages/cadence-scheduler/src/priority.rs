use serde::{Deserialize, Serialize};
use std::fmt;

/// Max signed 31-bit integer. Large enough to never expire in practice while
/// keeping expiration arithmetic finite.
pub const MAX_TIMEOUT_MS: f64 = 1_073_741_823.0;

/// Semantic priority of a unit of work. Declared from most to least urgent, so
/// `Immediate < Idle` under `Ord`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Immediate,
    UserBlocking,
    #[default]
    Normal,
    Low,
    Idle,
}

impl Priority {
    pub const ALL: [Priority; 5] = [
        Priority::Immediate,
        Priority::UserBlocking,
        Priority::Normal,
        Priority::Low,
        Priority::Idle,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Immediate => "immediate",
            Priority::UserBlocking => "user-blocking",
            Priority::Normal => "normal",
            Priority::Low => "low",
            Priority::Idle => "idle",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timeout table used to turn a priority into an expiration time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityTimeouts {
    pub immediate: f64,
    pub user_blocking: f64,
    pub normal: f64,
    pub low: f64,
    pub idle: f64,
}

impl Default for PriorityTimeouts {
    fn default() -> Self {
        Self {
            // Already expired on arrival.
            immediate: -1.0,
            user_blocking: 250.0,
            normal: 5000.0,
            low: 10000.0,
            idle: MAX_TIMEOUT_MS,
        }
    }
}

impl PriorityTimeouts {
    pub fn timeout_for(&self, priority: Priority) -> f64 {
        match priority {
            Priority::Immediate => self.immediate,
            Priority::UserBlocking => self.user_blocking,
            Priority::Normal => self.normal,
            Priority::Low => self.low,
            Priority::Idle => self.idle,
        }
    }

    /// Computed once at submission. Continuations keep the value.
    pub fn expiration_for(&self, priority: Priority, start_time: f64) -> f64 {
        start_time + self.timeout_for(priority)
    }

    /// Each level's timeout is no shorter than the level above it.
    pub(crate) fn is_monotonic(&self) -> bool {
        Priority::ALL
            .windows(2)
            .all(|pair| self.timeout_for(pair[0]) <= self.timeout_for(pair[1]))
    }
}
