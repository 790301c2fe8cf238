use crate::config::SchedulerConfig;
use crate::deadline::Deadline;
use crate::error::{Result, SchedulerError};
use crate::host::{Host, HostCallback};
use crate::priority::{MAX_TIMEOUT_MS, Priority, PriorityTimeouts};
use crate::profiling::{ProfileEvent, Profiler, SchedulerMetrics};
use crate::queue::TaskQueue;
use crate::task::{Callback, Task, TaskHandle, TaskId, TaskResult};
use std::cell::RefCell;
use std::rc::{Rc, Weak};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScheduleOptions {
    /// Hold the task back for this long before it becomes eligible. Capped at
    /// [`MAX_TIMEOUT_MS`].
    pub delay_ms: Option<f64>,
}

impl ScheduleOptions {
    pub fn delayed(delay_ms: f64) -> Self {
        Self {
            delay_ms: Some(delay_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Nothing outstanding with the host.
    Idle,
    /// A host callback is pending.
    Scheduled,
    /// The work loop is on the stack.
    Running,
    /// The loop gave control back with work left over.
    Yielded,
}

struct State {
    queue: TaskQueue,
    deadline: Deadline,
    timeouts: PriorityTimeouts,
    profiler: Profiler,
    next_seq: u64,
    last_now: f64,
    current_priority: Priority,
    current_task: Option<TaskId>,
    host_callback_scheduled: bool,
    /// Priority the outstanding host callback was requested with.
    callback_priority: Option<Priority>,
    callback_generation: u64,
    host_timeout_scheduled: bool,
    timeout_generation: u64,
    performing_work: bool,
    paused: bool,
    loop_state: LoopState,
}

struct Inner<H> {
    host: H,
    state: RefCell<State>,
}

/// Cooperative scheduler bound to one host.
///
/// Cloning yields another handle to the same instance, which is how task
/// callbacks schedule follow-up work or poll [`Scheduler::should_yield`].
pub struct Scheduler<H: Host> {
    inner: Rc<Inner<H>>,
}

impl<H: Host> Clone for Scheduler<H> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

enum Step {
    Run {
        id: TaskId,
        seq: u64,
        priority: Priority,
        callback: Callback,
        did_timeout: bool,
    },
    Yield(f64),
    Paused,
    Drained(f64),
}

/// Restores slice bookkeeping when the work loop exits, including by panic.
struct SliceGuard<'a, H: Host + 'static> {
    scheduler: &'a Scheduler<H>,
    previous_priority: Priority,
    finished: bool,
}

impl<H: Host + 'static> Drop for SliceGuard<'_, H> {
    fn drop(&mut self) {
        let Ok(mut state) = self.scheduler.inner.state.try_borrow_mut() else {
            return;
        };
        let state = &mut *state;
        state.performing_work = false;
        state.current_priority = self.previous_priority;
        if let Some(id) = state.current_task.take() {
            // A callback unwound. Its record has no callback left to run.
            state.queue.complete(id);
        }
        if !self.finished {
            state.loop_state = LoopState::Idle;
            self.scheduler.rearm(state);
        }
    }
}

/// Host clocks may step backwards; the scheduler never does.
fn observe<H: Host>(host: &H, state: &mut State) -> f64 {
    let now = host.now();
    if now < state.last_now {
        tracing::warn!(
            now,
            last = state.last_now,
            "host clock moved backwards, clamping"
        );
    } else {
        state.last_now = now;
    }
    state.last_now
}

fn handle_of(id: TaskId, task: &Task) -> TaskHandle {
    TaskHandle {
        id,
        seq: task.seq,
        priority: task.priority,
        start_time: task.start_time,
        expiration_time: task.expiration_time,
    }
}

impl<H: Host + 'static> Scheduler<H> {
    pub fn new(host: H) -> Self {
        Self::build(host, SchedulerConfig::default())
    }

    pub fn with_config(host: H, config: SchedulerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(host, config))
    }

    fn build(host: H, config: SchedulerConfig) -> Self {
        let last_now = host.now();
        let state = State {
            queue: TaskQueue::new(),
            deadline: Deadline::new(&config),
            timeouts: config.timeouts.clone(),
            profiler: Profiler::new(config.profiling, config.profiling_buffer),
            next_seq: 0,
            last_now,
            current_priority: Priority::Normal,
            current_task: None,
            host_callback_scheduled: false,
            callback_priority: None,
            callback_generation: 0,
            host_timeout_scheduled: false,
            timeout_generation: 0,
            performing_work: false,
            paused: false,
            loop_state: LoopState::Idle,
        };
        Self {
            inner: Rc::new(Inner {
                host,
                state: RefCell::new(state),
            }),
        }
    }

    pub fn host(&self) -> &H {
        &self.inner.host
    }

    /// Submit a unit of work. Its expiration time is fixed here and never
    /// changes, continuations included.
    pub fn schedule(
        &self,
        priority: Priority,
        callback: Callback,
        options: ScheduleOptions,
    ) -> TaskHandle {
        let mut guard = self.inner.state.borrow_mut();
        let state = &mut *guard;
        let now = observe(&self.inner.host, state);

        // NaN and non-positive delays mean "now". Huge ones are capped.
        let start_time = match options.delay_ms {
            Some(delay) if delay > 0.0 => now + delay.min(MAX_TIMEOUT_MS),
            _ => now,
        };
        let expiration_time = state.timeouts.expiration_for(priority, start_time);
        let seq = state.next_seq;
        state.next_seq += 1;

        let task = Task::new(seq, priority, start_time, expiration_time, callback);
        let handle = TaskHandle {
            id: state.queue.insert(task, now),
            seq,
            priority,
            start_time,
            expiration_time,
        };
        state.profiler.task_scheduled(seq, priority, now, start_time);
        tracing::trace!(seq, %priority, start_time, expiration_time, "task scheduled");

        if start_time > now {
            // Only the earliest timer needs a host timeout, and only while
            // nothing is ready to run.
            if state.queue.peek(now).is_none() && state.queue.next_timer() == Some(start_time) {
                self.request_host_timeout(state, start_time - now);
            }
        } else if !state.performing_work {
            self.retag_host_callback(state, now);
            self.ensure_host_callback_scheduled(state);
        }
        handle
    }

    pub fn schedule_fn(&self, priority: Priority, f: impl FnOnce() + 'static) -> TaskHandle {
        self.schedule(priority, Callback::once(move |_| f()), ScheduleOptions::default())
    }

    /// Mark a task cancelled. A queued task will never run; a task whose
    /// callback is already executing finishes that call, but any continuation
    /// it returns is dropped. Returns false for unknown or finished tasks.
    pub fn cancel(&self, handle: &TaskHandle) -> bool {
        let mut guard = self.inner.state.borrow_mut();
        let state = &mut *guard;
        let now = observe(&self.inner.host, state);
        if !state.queue.cancel(handle.id) {
            return false;
        }
        state.profiler.task_cancelled(handle.seq, now);
        tracing::debug!(seq = handle.seq, "task cancelled");
        if state.queue.is_empty() && !state.performing_work {
            self.cancel_host_callback(state);
            self.cancel_host_timeout(state);
            state.loop_state = LoopState::Idle;
        }
        true
    }

    /// Priority of the task currently running, `Normal` outside of tasks.
    pub fn current_priority(&self) -> Priority {
        self.inner.state.borrow().current_priority
    }

    pub fn run_with_priority<R>(&self, priority: Priority, f: impl FnOnce() -> R) -> R {
        let previous = self.swap_priority(priority);
        let _restore = PriorityRestore {
            scheduler: self,
            previous,
        };
        f()
    }

    /// Run `f` no higher than `Normal`, for work spawned by urgent work that
    /// itself need not be urgent.
    pub fn next<R>(&self, f: impl FnOnce() -> R) -> R {
        let priority = match self.current_priority() {
            Priority::Immediate | Priority::UserBlocking | Priority::Normal => Priority::Normal,
            lower => lower,
        };
        self.run_with_priority(priority, f)
    }

    /// Capture the current priority so `f` runs with it later, wherever it is
    /// called from.
    pub fn wrap_callback<R: 'static>(
        &self,
        f: impl FnOnce() -> R + 'static,
    ) -> impl FnOnce() -> R + 'static {
        let scheduler = self.clone();
        let priority = self.current_priority();
        move || scheduler.run_with_priority(priority, f)
    }

    fn swap_priority(&self, priority: Priority) -> Priority {
        std::mem::replace(&mut self.inner.state.borrow_mut().current_priority, priority)
    }

    pub fn current_time(&self) -> f64 {
        let mut state = self.inner.state.borrow_mut();
        observe(&self.inner.host, &mut state)
    }

    /// For long-running callbacks: true once they should return a
    /// continuation and let the host breathe.
    pub fn should_yield(&self) -> bool {
        let mut guard = self.inner.state.borrow_mut();
        let state = &mut *guard;
        let now = observe(&self.inner.host, state);
        state
            .deadline
            .should_yield(now, self.inner.host.pending_input())
    }

    /// Ask the loop to yield at the next check so the host can paint.
    pub fn request_paint(&self) {
        self.inner.state.borrow_mut().deadline.request_paint();
    }

    pub fn force_frame_rate(&self, fps: u32) -> Result<()> {
        let result = self.inner.state.borrow_mut().deadline.force_frame_rate(fps);
        if let Err(err) = &result {
            tracing::error!(%err, "rejected frame rate");
        }
        result
    }

    /// Stop running tasks at the next yield point until
    /// [`Scheduler::continue_execution`] is called.
    pub fn pause_execution(&self) {
        self.inner.state.borrow_mut().paused = true;
    }

    pub fn continue_execution(&self) {
        let mut guard = self.inner.state.borrow_mut();
        let state = &mut *guard;
        state.paused = false;
        if !state.host_callback_scheduled && !state.performing_work {
            self.rearm(state);
        }
    }

    /// The task that would run next.
    pub fn first_task(&self) -> Option<TaskHandle> {
        let mut guard = self.inner.state.borrow_mut();
        let state = &mut *guard;
        let now = observe(&self.inner.host, state);
        let id = state.queue.peek(now)?;
        state.queue.get(id).map(|task| handle_of(id, task))
    }

    pub fn state(&self) -> LoopState {
        self.inner.state.borrow().loop_state
    }

    pub fn pending_tasks(&self) -> usize {
        self.inner.state.borrow().queue.len()
    }

    pub fn frame_budget_ms(&self) -> f64 {
        self.inner.state.borrow().deadline.frame_budget_ms()
    }

    pub fn metrics(&self) -> SchedulerMetrics {
        let state = self.inner.state.borrow();
        state.profiler.metrics(state.queue.len())
    }

    /// Drain buffered profile events. Empty unless profiling is enabled.
    pub fn take_profile(&self) -> Vec<ProfileEvent> {
        self.inner.state.borrow_mut().profiler.take_events()
    }

    fn head_priority(state: &mut State, now: f64) -> Option<Priority> {
        let id = state.queue.peek(now)?;
        state.queue.get(id).map(|task| task.priority)
    }

    /// Request one host callback unless one is already outstanding. The
    /// request carries the priority of the queue head.
    fn ensure_host_callback_scheduled(&self, state: &mut State) {
        if state.host_callback_scheduled || state.paused {
            return;
        }
        let now = observe(&self.inner.host, state);
        let priority = Self::head_priority(state, now).unwrap_or_default();
        state.host_callback_scheduled = true;
        state.callback_priority = Some(priority);
        state.callback_generation += 1;
        if state.loop_state == LoopState::Idle {
            state.loop_state = LoopState::Scheduled;
        }

        let generation = state.callback_generation;
        let weak = Rc::downgrade(&self.inner);
        tracing::trace!(generation, %priority, "requesting host callback");
        self.inner.host.request_callback(
            priority,
            HostCallback::new(move || match upgrade(&weak) {
                Some(scheduler) => scheduler.perform_work(generation),
                None => Ok(false),
            }),
        );
    }

    /// Drop an outstanding, not yet started callback whose tag is less urgent
    /// than the current queue head, so it can be requested again.
    fn retag_host_callback(&self, state: &mut State, now: f64) {
        if !state.host_callback_scheduled || state.paused {
            return;
        }
        let Some(head) = Self::head_priority(state, now) else {
            return;
        };
        if state.callback_priority.is_some_and(|tagged| head < tagged) {
            tracing::trace!(%head, "re-tagging host callback");
            self.cancel_host_callback(state);
        }
    }

    fn cancel_host_callback(&self, state: &mut State) {
        if state.host_callback_scheduled && !state.performing_work {
            state.host_callback_scheduled = false;
            state.callback_priority = None;
            state.callback_generation += 1;
            self.inner.host.cancel_callback();
        }
    }

    fn request_host_timeout(&self, state: &mut State, delay_ms: f64) {
        if state.host_timeout_scheduled {
            self.inner.host.cancel_timeout();
        }
        state.host_timeout_scheduled = true;
        state.timeout_generation += 1;

        let generation = state.timeout_generation;
        let weak = Rc::downgrade(&self.inner);
        tracing::trace!(delay_ms, "requesting host timeout");
        self.inner.host.request_timeout(
            HostCallback::new(move || match upgrade(&weak) {
                Some(scheduler) => scheduler.handle_timeout(generation),
                None => Ok(false),
            }),
            delay_ms,
        );
    }

    fn cancel_host_timeout(&self, state: &mut State) {
        if state.host_timeout_scheduled {
            state.host_timeout_scheduled = false;
            state.timeout_generation += 1;
            self.inner.host.cancel_timeout();
        }
    }

    /// Make sure whatever is queued will eventually run: a callback for ready
    /// work, otherwise a timeout for the earliest delayed task.
    fn rearm(&self, state: &mut State) {
        let now = observe(&self.inner.host, state);
        if state.queue.peek(now).is_some() {
            self.ensure_host_callback_scheduled(state);
        } else if let Some(start_time) = state.queue.next_timer() {
            self.request_host_timeout(state, start_time - now);
        }
    }

    fn handle_timeout(&self, generation: u64) -> Result<bool> {
        let mut guard = self.inner.state.borrow_mut();
        let state = &mut *guard;
        if generation != state.timeout_generation {
            return Ok(false);
        }
        state.host_timeout_scheduled = false;
        let now = observe(&self.inner.host, state);
        let promoted = state.queue.advance_timers(now);
        tracing::trace!(promoted, "host timeout fired");
        if !state.performing_work {
            self.retag_host_callback(state, now);
            if !state.host_callback_scheduled {
                self.rearm(state);
            }
        }
        Ok(false)
    }

    /// Host callback entry point: one time slice.
    fn perform_work(&self, generation: u64) -> Result<bool> {
        let previous_priority = {
            let mut guard = self.inner.state.borrow_mut();
            let state = &mut *guard;
            if state.performing_work {
                tracing::error!("work loop re-entered");
                return Err(SchedulerError::Reentrant);
            }
            if !state.host_callback_scheduled || generation != state.callback_generation {
                tracing::error!(
                    generation,
                    current = state.callback_generation,
                    "host ran a callback that was cancelled or superseded"
                );
                return Err(SchedulerError::DoubleScheduledCallback);
            }
            state.host_callback_scheduled = false;
            state.callback_priority = None;
            // The loop promotes timers itself from here on.
            self.cancel_host_timeout(state);
            state.performing_work = true;
            state.loop_state = LoopState::Running;

            let now = observe(&self.inner.host, state);
            state.deadline.begin_slice(now);
            state.profiler.slice_started(now);
            tracing::trace!(now, "slice started");
            state.current_priority
        };

        let mut guard = SliceGuard {
            scheduler: self,
            previous_priority,
            finished: false,
        };
        let result = self.work_loop();
        guard.finished = result.is_ok();
        drop(guard);
        result
    }

    fn work_loop(&self) -> Result<bool> {
        loop {
            match self.next_step() {
                Step::Run {
                    id,
                    seq,
                    priority,
                    callback,
                    did_timeout,
                } => {
                    tracing::trace!(seq, %priority, did_timeout, "running task");
                    let result = callback.call(did_timeout);
                    self.finish_task(id, seq, priority, result)?;
                }
                Step::Yield(now) => {
                    let mut guard = self.inner.state.borrow_mut();
                    let state = &mut *guard;
                    state.profiler.slice_yielded(now);
                    state.loop_state = LoopState::Yielded;
                    tracing::debug!(
                        elapsed = state.deadline.elapsed(now),
                        pending = state.queue.ready_len(),
                        "yielding to host"
                    );
                    self.ensure_host_callback_scheduled(state);
                    return Ok(true);
                }
                Step::Paused => {
                    self.inner.state.borrow_mut().loop_state = LoopState::Yielded;
                    tracing::debug!("execution paused");
                    return Ok(true);
                }
                Step::Drained(now) => {
                    let mut guard = self.inner.state.borrow_mut();
                    let state = &mut *guard;
                    state.loop_state = LoopState::Idle;
                    tracing::trace!(delayed = state.queue.delayed_len(), "queue drained");
                    if let Some(start_time) = state.queue.next_timer() {
                        self.request_host_timeout(state, start_time - now);
                    }
                    return Ok(false);
                }
            }
        }
    }

    fn next_step(&self) -> Step {
        let mut guard = self.inner.state.borrow_mut();
        let state = &mut *guard;
        let now = observe(&self.inner.host, state);
        if state.paused {
            return Step::Paused;
        }

        loop {
            let Some(id) = state.queue.peek(now) else {
                return Step::Drained(now);
            };
            let Some(task) = state.queue.get_mut(id) else {
                return Step::Drained(now);
            };

            // Overdue work bypasses time slicing.
            let overdue = task.is_overdue(now);
            if !overdue
                && state
                    .deadline
                    .should_yield(now, self.inner.host.pending_input())
            {
                return Step::Yield(now);
            }

            let Some(callback) = task.callback.take() else {
                // Left behind by a callback that unwound mid-run.
                state.queue.complete(id);
                continue;
            };
            let first_run = !task.started;
            task.started = true;
            let (seq, priority, start_time) = (task.seq, task.priority, task.start_time);

            state.current_task = Some(id);
            state.current_priority = priority;
            if first_run {
                state.profiler.task_started(seq, priority, now, start_time);
            }
            return Step::Run {
                id,
                seq,
                priority,
                callback,
                did_timeout: overdue,
            };
        }
    }

    fn finish_task(&self, id: TaskId, seq: u64, priority: Priority, result: TaskResult) -> Result<()> {
        let mut guard = self.inner.state.borrow_mut();
        let state = &mut *guard;
        let now = observe(&self.inner.host, state);
        state.current_task = None;

        match result {
            Ok(Some(continuation)) => match state.queue.get_mut(id) {
                Some(task) if !task.cancelled => {
                    // Same heap entry, same expiration.
                    task.callback = Some(continuation);
                    state.profiler.task_yielded(seq, now);
                }
                _ => {
                    tracing::debug!(seq, "dropping continuation of cancelled task");
                    state.queue.complete(id);
                }
            },
            Ok(None) => {
                state.queue.complete(id);
                state.profiler.task_completed(seq, priority, now);
            }
            Err(source) => {
                state.queue.complete(id);
                state.profiler.task_errored(seq, now);
                tracing::error!(seq, %priority, error = %source, "task failed");
                return Err(SchedulerError::TaskFailed {
                    seq,
                    priority,
                    source,
                });
            }
        }
        state.queue.advance_timers(now);
        Ok(())
    }
}

fn upgrade<H: Host>(weak: &Weak<Inner<H>>) -> Option<Scheduler<H>> {
    weak.upgrade().map(|inner| Scheduler { inner })
}

struct PriorityRestore<'a, H: Host> {
    scheduler: &'a Scheduler<H>,
    previous: Priority,
}

impl<H: Host> Drop for PriorityRestore<'_, H> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.scheduler.inner.state.try_borrow_mut() {
            state.current_priority = self.previous;
        }
    }
}
