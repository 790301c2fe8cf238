use crate::error::TaskError;
use crate::priority::Priority;
use slotmap::new_key_type;
use std::fmt;

new_key_type! {
    /// Stable handle to a queued task. Outlives the task itself: looking up a
    /// finished task simply misses.
    pub struct TaskId;
}

/// What a callback hands back: `Ok(Some(next))` when it has more work to do,
/// `Ok(None)` when it is finished.
pub type TaskResult = Result<Option<Callback>, TaskError>;

/// One unit of work. Receives `did_timeout`, true when the task was already
/// past its expiration time when this call started.
pub struct Callback(Box<dyn FnOnce(bool) -> TaskResult>);

impl Callback {
    pub fn new(f: impl FnOnce(bool) -> TaskResult + 'static) -> Self {
        Self(Box::new(f))
    }

    /// Wrap a closure that always finishes in a single call.
    pub fn once(f: impl FnOnce(bool) + 'static) -> Self {
        Self::new(move |did_timeout| {
            f(did_timeout);
            Ok(None)
        })
    }

    pub(crate) fn call(self, did_timeout: bool) -> TaskResult {
        (self.0)(did_timeout)
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Callback(..)")
    }
}

/// Convenience for callbacks returning a continuation.
pub fn continue_with(f: impl FnOnce(bool) -> TaskResult + 'static) -> TaskResult {
    Ok(Some(Callback::new(f)))
}

#[derive(Debug)]
pub struct Task {
    /// Insertion order. Breaks ties between equal sort keys.
    pub seq: u64,
    pub priority: Priority,
    pub start_time: f64,
    pub expiration_time: f64,
    /// `start_time` while delayed, `expiration_time` once ready.
    pub sort_index: f64,
    pub cancelled: bool,
    /// Set once the first slice of the task has started.
    pub started: bool,
    pub(crate) callback: Option<Callback>,
}

impl Task {
    pub fn new(
        seq: u64,
        priority: Priority,
        start_time: f64,
        expiration_time: f64,
        callback: Callback,
    ) -> Self {
        Self {
            seq,
            priority,
            start_time,
            expiration_time,
            sort_index: expiration_time,
            cancelled: false,
            started: false,
            callback: Some(callback),
        }
    }

    pub fn is_overdue(&self, now: f64) -> bool {
        self.expiration_time <= now
    }
}

/// Returned by `Scheduler::schedule`; pass it back to cancel the task.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaskHandle {
    pub id: TaskId,
    pub seq: u64,
    pub priority: Priority,
    pub start_time: f64,
    pub expiration_time: f64,
}
