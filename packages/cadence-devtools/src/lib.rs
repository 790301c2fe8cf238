//! Inspection surface for a running scheduler.
//!
//! The host drains `Scheduler::take_profile` and `Scheduler::metrics` now and
//! then and hands them to [`DevToolsContext::record_profile`]. The context keeps
//! the latest snapshot and forwards it to an attached bridge. Release builds
//! compile down to no-ops.

pub use cadence_scheduler::{ProfileEvent, SchedulerMetrics};

/// Events kept in a snapshot; older ones are dropped first.
pub const RECENT_EVENT_LIMIT: usize = 256;

#[cfg(debug_assertions)]
mod internal {
    use super::RECENT_EVENT_LIMIT;
    use cadence_scheduler::{ProfileEvent, SchedulerMetrics};
    use serde::{Deserialize, Serialize};
    use std::collections::VecDeque;
    use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};
    use std::time::{SystemTime, UNIX_EPOCH};

    #[derive(Debug, Clone, Serialize, Deserialize, Default)]
    pub struct DevToolsSnapshot {
        pub metrics: SchedulerMetrics,
        pub recent_events: VecDeque<ProfileEvent>,
        /// Events seen in total, including ones no longer in `recent_events`.
        pub events_recorded: u64,
        pub profiles_recorded: u64,
        pub tasks_in_flight: usize,
        /// Wall clock of the last update, ms since the Unix epoch.
        pub timestamp: u64,
    }

    pub trait DevBridge: Send + Sync {
        fn send_snapshot(&self, snapshot: &DevToolsSnapshot);
        fn on_command(&self, cmd: String);
    }

    pub struct DevToolsContext {
        snapshot: Mutex<DevToolsSnapshot>,
        bridge: Mutex<Option<Box<dyn DevBridge>>>,
    }

    // A panicking bridge must not take inspection down with it.
    fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn timestamp() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default()
    }

    impl Default for DevToolsContext {
        fn default() -> Self {
            Self::new()
        }
    }

    impl DevToolsContext {
        pub fn new() -> Self {
            Self {
                snapshot: Mutex::new(DevToolsSnapshot::default()),
                bridge: Mutex::new(None),
            }
        }

        pub fn set_bridge(&self, bridge: Box<dyn DevBridge>) {
            *lock(&self.bridge) = Some(bridge);
        }

        pub fn clear_bridge(&self) {
            lock(&self.bridge).take();
        }

        /// Fold a batch of drained events and the current metrics into the
        /// snapshot, then push it to the bridge.
        pub fn record_profile(&self, events: Vec<ProfileEvent>, metrics: SchedulerMetrics) {
            let mut snapshot = lock(&self.snapshot);
            snapshot.events_recorded += events.len() as u64;
            for event in events {
                if snapshot.recent_events.len() == RECENT_EVENT_LIMIT {
                    snapshot.recent_events.pop_front();
                }
                snapshot.recent_events.push_back(event);
            }
            snapshot.tasks_in_flight = metrics.pending_tasks;
            snapshot.metrics = metrics;
            snapshot.profiles_recorded += 1;
            snapshot.timestamp = timestamp();

            if let Some(bridge) = lock(&self.bridge).as_ref() {
                bridge.send_snapshot(&snapshot);
            }
        }

        /// Route a command from the bridge. `reset` clears the snapshot,
        /// anything else is forwarded back untouched.
        pub fn handle_command(&self, cmd: &str) {
            match cmd {
                "reset" => *lock(&self.snapshot) = DevToolsSnapshot::default(),
                other => {
                    if let Some(bridge) = lock(&self.bridge).as_ref() {
                        bridge.on_command(other.to_string());
                    }
                }
            }
        }

        pub fn snapshot(&self) -> DevToolsSnapshot {
            lock(&self.snapshot).clone()
        }

        pub fn export_state(&self) -> String {
            let snapshot = lock(&self.snapshot);
            serde_json::to_string(&*snapshot).unwrap_or_default()
        }
    }

    pub static DEVTOOLS: OnceLock<DevToolsContext> = OnceLock::new();
}

#[cfg(debug_assertions)]
pub use internal::*;

// Production no-op implementation
#[cfg(not(debug_assertions))]
pub mod production {
    use cadence_scheduler::{ProfileEvent, SchedulerMetrics};

    pub struct DevToolsContext;
    impl DevToolsContext {
        pub fn record_profile(&self, _: Vec<ProfileEvent>, _: SchedulerMetrics) {}
        pub fn handle_command(&self, _: &str) {}
        pub fn export_state(&self) -> String {
            String::new()
        }
    }
    pub static DEVTOOLS: DevToolsContext = DevToolsContext;
}

#[cfg(not(debug_assertions))]
pub use production::*;

pub fn devtools() -> &'static DevToolsContext {
    #[cfg(debug_assertions)]
    {
        DEVTOOLS.get_or_init(DevToolsContext::new)
    }
    #[cfg(not(debug_assertions))]
    {
        &DEVTOOLS
    }
}
