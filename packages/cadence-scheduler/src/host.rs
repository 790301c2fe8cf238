use crate::error::Result;
use crate::priority::{MAX_TIMEOUT_MS, Priority};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Entry point handed to the host. The returned flag reports whether work is
/// left over; the scheduler re-arms itself, so hosts may ignore it.
pub struct HostCallback(Box<dyn FnOnce() -> Result<bool>>);

impl HostCallback {
    pub fn new(f: impl FnOnce() -> Result<bool> + 'static) -> Self {
        Self(Box::new(f))
    }

    pub fn invoke(self) -> Result<bool> {
        (self.0)()
    }
}

impl fmt::Debug for HostCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HostCallback(..)")
    }
}

/// Pending input reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    /// Clicks, key presses. Always interrupts the current slice.
    Discrete,
    /// Pointer moves, scrolling.
    Continuous,
}

/// The environment the scheduler runs inside: a clock plus a way to be called
/// back once the host is idle. Single-threaded; implementors use interior
/// mutability.
pub trait Host {
    /// Monotonic time in milliseconds.
    fn now(&self) -> f64;

    /// Invoke `callback` as soon as the host is idle. At most one is
    /// outstanding at a time. `priority` is that of the queue head when the
    /// request was made, for hosts with prioritized task sources.
    fn request_callback(&self, priority: Priority, callback: HostCallback);

    fn cancel_callback(&self);

    /// Invoke `callback` once `delay_ms` have elapsed.
    fn request_timeout(&self, callback: HostCallback, delay_ms: f64);

    fn cancel_timeout(&self);

    fn pending_input(&self) -> Option<InputKind> {
        None
    }
}

impl<H: Host + ?Sized> Host for Rc<H> {
    fn now(&self) -> f64 {
        (**self).now()
    }

    fn request_callback(&self, priority: Priority, callback: HostCallback) {
        (**self).request_callback(priority, callback)
    }

    fn cancel_callback(&self) {
        (**self).cancel_callback()
    }

    fn request_timeout(&self, callback: HostCallback, delay_ms: f64) {
        (**self).request_timeout(callback, delay_ms)
    }

    fn cancel_timeout(&self) {
        (**self).cancel_timeout()
    }

    fn pending_input(&self) -> Option<InputKind> {
        (**self).pending_input()
    }
}

/// A minimal blocking event loop on the real clock: one callback slot and one
/// timer slot, drained by [`LoopHost::run_until_idle`].
pub struct LoopHost {
    origin: Instant,
    callback: RefCell<Option<HostCallback>>,
    timer: RefCell<Option<(f64, HostCallback)>>,
}

impl Default for LoopHost {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopHost {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            callback: RefCell::new(None),
            timer: RefCell::new(None),
        }
    }

    /// Run callbacks and timers until neither is pending, sleeping while only
    /// a timer is left. The first error stops the loop.
    pub fn run_until_idle(&self) -> Result<()> {
        loop {
            let callback = self.callback.borrow_mut().take();
            if let Some(callback) = callback {
                callback.invoke()?;
                continue;
            }

            let timer = self.timer.borrow_mut().take();
            let Some((due, callback)) = timer else {
                return Ok(());
            };
            let wait = due - self.now();
            if wait > 0.0 {
                match Duration::try_from_secs_f64(wait / 1000.0) {
                    Ok(wait) => std::thread::sleep(wait),
                    Err(err) => tracing::warn!(wait, %err, "LoopHost: unsleepable timer, firing now"),
                }
            }
            callback.invoke()?;
        }
    }

    pub fn is_idle(&self) -> bool {
        self.callback.borrow().is_none() && self.timer.borrow().is_none()
    }

    /// When the pending timer is due, on this host's clock.
    pub fn timer_due(&self) -> Option<f64> {
        self.timer.borrow().as_ref().map(|(due, _)| *due)
    }
}

impl Host for LoopHost {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }

    fn request_callback(&self, priority: Priority, callback: HostCallback) {
        tracing::trace!(%priority, "LoopHost: callback requested");
        if self.callback.borrow_mut().replace(callback).is_some() {
            tracing::warn!("LoopHost: replaced an outstanding callback");
        }
    }

    fn cancel_callback(&self) {
        self.callback.borrow_mut().take();
    }

    fn request_timeout(&self, callback: HostCallback, delay_ms: f64) {
        let due = self.now() + delay_ms.max(0.0).min(MAX_TIMEOUT_MS);
        *self.timer.borrow_mut() = Some((due, callback));
    }

    fn cancel_timeout(&self) {
        self.timer.borrow_mut().take();
    }
}
