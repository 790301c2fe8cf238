//! Virtual-time host for deterministic tests.
//!
//! Nothing runs until the test says so: `flush_one` runs one host callback,
//! `flush_all` keeps going until the scheduler stops asking, and
//! `advance_time` moves the clock and fires a due timer.

use crate::error::Result;
use crate::host::{Host, HostCallback, InputKind};
use crate::priority::Priority;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Shared virtual clock. Clones observe the same time, so task callbacks can
/// hold one and simulate doing expensive work.
#[derive(Debug, Clone, Default)]
pub struct MockClock(Rc<Cell<f64>>);

impl MockClock {
    pub fn new(start: f64) -> Self {
        Self(Rc::new(Cell::new(start)))
    }

    pub fn now(&self) -> f64 {
        self.0.get()
    }

    pub fn advance(&self, ms: f64) {
        self.0.set(self.0.get() + ms);
    }

    /// Jump to an absolute time. Going backwards is allowed, to simulate host
    /// clock adjustments.
    pub fn set(&self, t: f64) {
        self.0.set(t);
    }
}

#[derive(Default)]
pub struct MockHost {
    clock: MockClock,
    callback: RefCell<Option<HostCallback>>,
    timer: RefCell<Option<(f64, HostCallback)>>,
    input: Cell<Option<InputKind>>,
    registrations: Cell<usize>,
    max_outstanding: Cell<usize>,
    requested_priority: Cell<Option<Priority>>,
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clock(clock: MockClock) -> Self {
        Self {
            clock,
            ..Self::default()
        }
    }

    pub fn clock(&self) -> MockClock {
        self.clock.clone()
    }

    pub fn set_pending_input(&self, input: Option<InputKind>) {
        self.input.set(input);
    }

    pub fn has_pending_callback(&self) -> bool {
        self.callback.borrow().is_some()
    }

    pub fn timer_due(&self) -> Option<f64> {
        self.timer.borrow().as_ref().map(|(due, _)| *due)
    }

    /// Total callback requests seen.
    pub fn registrations(&self) -> usize {
        self.registrations.get()
    }

    /// Priority tag of the most recent callback request.
    pub fn requested_priority(&self) -> Option<Priority> {
        self.requested_priority.get()
    }

    /// Largest number of callbacks that were pending at the same time. Anything
    /// above one means the scheduler double-booked the host.
    pub fn max_outstanding_callbacks(&self) -> usize {
        self.max_outstanding.get()
    }

    /// Run the pending host callback, if any. Returns whether one ran.
    pub fn flush_one(&self) -> Result<bool> {
        let callback = self.callback.borrow_mut().take();
        match callback {
            Some(callback) => {
                callback.invoke()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Run host callbacks until none is pending. Timers are not fired. Returns
    /// the number of callbacks run.
    pub fn flush_all(&self) -> Result<usize> {
        let mut ran = 0;
        while self.flush_one()? {
            ran += 1;
        }
        Ok(ran)
    }

    pub fn advance_time(&self, ms: f64) -> Result<()> {
        self.clock.advance(ms);
        self.flush_expired_timers().map(|_| ())
    }

    /// Jump the clock to `t` and fire the timer if it became due.
    pub fn set_time(&self, t: f64) -> Result<()> {
        self.clock.set(t);
        self.flush_expired_timers().map(|_| ())
    }

    /// Fire the pending timer if its due time has been reached. Returns whether
    /// it fired.
    pub fn flush_expired_timers(&self) -> Result<bool> {
        let due = {
            let timer = self.timer.borrow();
            matches!(&*timer, Some((due, _)) if *due <= self.clock.now())
        };
        if !due {
            return Ok(false);
        }
        let timer = self.timer.borrow_mut().take();
        match timer {
            Some((_, callback)) => {
                callback.invoke()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl Host for MockHost {
    fn now(&self) -> f64 {
        self.clock.now()
    }

    fn request_callback(&self, priority: Priority, callback: HostCallback) {
        self.registrations.set(self.registrations.get() + 1);
        self.requested_priority.set(Some(priority));
        let mut slot = self.callback.borrow_mut();
        let outstanding = if slot.is_some() { 2 } else { 1 };
        if outstanding > 1 {
            tracing::error!("MockHost: callback requested while one is outstanding");
        }
        self.max_outstanding
            .set(self.max_outstanding.get().max(outstanding));
        *slot = Some(callback);
    }

    fn cancel_callback(&self) {
        self.callback.borrow_mut().take();
    }

    fn request_timeout(&self, callback: HostCallback, delay_ms: f64) {
        let due = self.clock.now() + delay_ms.max(0.0);
        *self.timer.borrow_mut() = Some((due, callback));
    }

    fn cancel_timeout(&self) {
        self.timer.borrow_mut().take();
    }

    fn pending_input(&self) -> Option<InputKind> {
        self.input.get()
    }
}
