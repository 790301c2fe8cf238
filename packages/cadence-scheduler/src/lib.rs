//! Cooperative, priority-based work scheduling for single-threaded hosts.
//!
//! Work is submitted as [`Callback`]s tagged with a [`Priority`]. Each task gets
//! an expiration time at submission and the queue runs the earliest expiration
//! first. The work loop runs inside one host callback at a time and hands
//! control back once the frame budget is spent, except for overdue tasks,
//! which always run.

pub mod config;
pub mod deadline;
pub mod error;
pub mod host;
pub mod mock;
pub mod priority;
pub mod profiling;
pub mod queue;
pub mod scheduler;
pub mod task;

pub use config::SchedulerConfig;
pub use error::{Result, SchedulerError, TaskError, task_error};
pub use host::{Host, HostCallback, InputKind, LoopHost};
pub use mock::{MockClock, MockHost};
pub use priority::{Priority, PriorityTimeouts};
pub use profiling::{ProfileEvent, SchedulerMetrics};
pub use scheduler::{LoopState, ScheduleOptions, Scheduler};
pub use task::{Callback, TaskHandle, TaskId, TaskResult, continue_with};
