use cadence_scheduler::priority::MAX_TIMEOUT_MS;
use cadence_scheduler::{Callback, MockHost, Priority, ScheduleOptions, Scheduler};
use std::cell::RefCell;
use std::rc::Rc;

fn setup() -> (Rc<MockHost>, Scheduler<Rc<MockHost>>) {
    let host = Rc::new(MockHost::new());
    let scheduler = Scheduler::new(host.clone());
    (host, scheduler)
}

fn logged(log: &Rc<RefCell<Vec<&'static str>>>, name: &'static str) -> Callback {
    let log = log.clone();
    Callback::once(move |_| log.borrow_mut().push(name))
}

#[test]
fn test_delayed_task_waits_for_start_time() {
    let (host, scheduler) = setup();
    let log = Rc::new(RefCell::new(Vec::new()));

    let handle = scheduler.schedule(
        Priority::Normal,
        logged(&log, "delayed"),
        ScheduleOptions::delayed(100.0),
    );
    assert_eq!(handle.start_time, 100.0);
    assert_eq!(handle.expiration_time, 5100.0);

    // No host callback yet, only a timer
    assert!(!host.has_pending_callback());
    assert_eq!(host.timer_due(), Some(100.0));

    host.advance_time(50.0).unwrap();
    assert!(!host.has_pending_callback());
    host.flush_all().unwrap();
    assert!(log.borrow().is_empty());

    host.advance_time(50.0).unwrap();
    assert!(host.has_pending_callback());
    host.flush_all().unwrap();
    assert_eq!(*log.borrow(), vec!["delayed"]);
}

#[test]
fn test_zero_delay_is_immediate() {
    let (host, scheduler) = setup();
    let log = Rc::new(RefCell::new(Vec::new()));

    scheduler.schedule(Priority::Normal, logged(&log, "now"), ScheduleOptions::delayed(0.0));
    assert!(host.has_pending_callback());
    assert_eq!(host.timer_due(), None);

    host.flush_all().unwrap();
    assert_eq!(*log.borrow(), vec!["now"]);
}

#[test]
fn test_earlier_timer_replaces_host_timeout() {
    let (host, scheduler) = setup();
    let log = Rc::new(RefCell::new(Vec::new()));

    scheduler.schedule(Priority::Normal, logged(&log, "late"), ScheduleOptions::delayed(100.0));
    scheduler.schedule(Priority::Normal, logged(&log, "early"), ScheduleOptions::delayed(50.0));
    assert_eq!(host.timer_due(), Some(50.0));

    host.advance_time(50.0).unwrap();
    host.flush_all().unwrap();
    assert_eq!(*log.borrow(), vec!["early"]);

    // The drained loop armed a timer for the remaining task
    assert_eq!(host.timer_due(), Some(100.0));
    host.advance_time(50.0).unwrap();
    host.flush_all().unwrap();
    assert_eq!(*log.borrow(), vec!["early", "late"]);
}

#[test]
fn test_timer_promoted_while_loop_runs() {
    let (host, scheduler) = setup();
    let clock = host.clock();
    let log = Rc::new(RefCell::new(Vec::new()));

    {
        let log = log.clone();
        scheduler.schedule_fn(Priority::Normal, move || {
            clock.advance(20.0);
            log.borrow_mut().push("ready");
        });
    }
    scheduler.schedule(
        Priority::UserBlocking,
        logged(&log, "timer"),
        ScheduleOptions::delayed(10.0),
    );
    // Ready work pending, so no host timeout is needed
    assert_eq!(host.timer_due(), None);

    host.flush_one().unwrap();
    assert_eq!(*log.borrow(), vec!["ready"]);
    // Promoted at t=20 but the slice was already spent
    assert!(host.has_pending_callback());

    host.flush_all().unwrap();
    assert_eq!(*log.borrow(), vec!["ready", "timer"]);
    assert_eq!(host.timer_due(), None);
}

#[test]
fn test_delayed_expiration_counts_from_start_time() {
    let (host, scheduler) = setup();
    let log = Rc::new(RefCell::new(Vec::new()));

    // Delayed user-blocking work expires at 1000 + 250, ahead of a normal
    // task submitted at the same moment (1000 + 5000).
    scheduler.schedule(
        Priority::UserBlocking,
        logged(&log, "delayed"),
        ScheduleOptions::delayed(1000.0),
    );
    host.advance_time(1000.0).unwrap();
    scheduler.schedule(Priority::Normal, logged(&log, "normal"), Default::default());

    host.flush_all().unwrap();
    assert_eq!(*log.borrow(), vec!["delayed", "normal"]);
}

#[test]
fn test_timer_fires_only_once_due() {
    let (host, scheduler) = setup();
    let log = Rc::new(RefCell::new(Vec::new()));

    scheduler.schedule(Priority::Low, logged(&log, "timer"), ScheduleOptions::delayed(40.0));
    assert!(!host.flush_expired_timers().unwrap());

    host.clock().set(40.0);
    assert!(host.flush_expired_timers().unwrap());
    assert!(!host.flush_expired_timers().unwrap());
    host.flush_all().unwrap();
    assert_eq!(*log.borrow(), vec!["timer"]);

    // Jumping straight past the due time works the same way
    scheduler.schedule(Priority::Low, logged(&log, "jump"), ScheduleOptions::delayed(10.0));
    host.set_time(100.0).unwrap();
    assert!(host.has_pending_callback());
    host.flush_all().unwrap();
    assert_eq!(*log.borrow(), vec!["timer", "jump"]);
}

#[test]
fn test_unbounded_delays_are_capped() {
    let (host, scheduler) = setup();

    let forever = scheduler.schedule(
        Priority::Normal,
        Callback::once(|_| {}),
        ScheduleOptions::delayed(f64::INFINITY),
    );
    assert_eq!(forever.start_time, MAX_TIMEOUT_MS);
    assert!(forever.expiration_time.is_finite());
    assert_eq!(host.timer_due(), Some(MAX_TIMEOUT_MS));

    let huge = scheduler.schedule(
        Priority::Normal,
        Callback::once(|_| {}),
        ScheduleOptions::delayed(f64::MAX),
    );
    assert_eq!(huge.start_time, MAX_TIMEOUT_MS);

    // NaN is no delay at all
    let nan = scheduler.schedule(
        Priority::Normal,
        Callback::once(|_| {}),
        ScheduleOptions::delayed(f64::NAN),
    );
    assert_eq!(nan.start_time, 0.0);
    host.flush_all().unwrap();
    assert_eq!(scheduler.pending_tasks(), 2);

    host.set_time(MAX_TIMEOUT_MS).unwrap();
    host.flush_all().unwrap();
    assert_eq!(scheduler.pending_tasks(), 0);
}
