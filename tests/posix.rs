//! Real timers and real signals. Tests share the process signal range, so
//! they run one at a time.
#![cfg(target_os = "linux")]

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use sigtimer::{PosixBackend, TimerBackend, TimerError, TimerRegistry, CAPACITY, SIGNAL_OFFSET};

static SIGNALS: Mutex<()> = Mutex::new(());

fn exclusive() -> MutexGuard<'static, ()> {
    SIGNALS.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn ready() -> TimerRegistry<PosixBackend> {
    let mut registry = TimerRegistry::new(PosixBackend::new().expect("claim signal range"));
    registry.init().expect("init");
    registry
}

/// Dispatches until `done` holds or `limit` runs out.
fn pump(registry: &mut TimerRegistry<PosixBackend>, limit: Duration, done: impl Fn() -> bool) {
    let deadline = Instant::now() + limit;
    while !done() && Instant::now() < deadline {
        registry.dispatch().expect("dispatch");
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn test_single_backend_per_process() {
    let _guard = exclusive();
    let first = PosixBackend::new().expect("first backend");
    assert!(matches!(PosixBackend::new(), Err(TimerError::BackendInUse)));
    drop(first);
    assert!(PosixBackend::new().is_ok());
}

#[test]
fn test_slots_start_at_sigrtmin() {
    let _guard = exclusive();
    let registry = ready();
    let base = libc::SIGRTMIN() + SIGNAL_OFFSET;
    assert_eq!(registry.backend().base_signal().raw(), base);
    let last = registry.slots().last().map(|slot| slot.signal.raw());
    assert_eq!(last, Some(base + CAPACITY as i32 - 1));
}

#[test]
fn test_zero_second_timer_delivers_context() {
    let _guard = exclusive();
    let mut registry = ready();
    let seen = Rc::new(RefCell::new(None));
    let sink = Rc::clone(&seen);
    let handle = registry
        .create(0, 42, move |expiry| {
            *sink.borrow_mut() = Some((expiry.signal(), expiry.context()));
        })
        .expect("create");
    let signal = registry.signal_of(handle).unwrap();

    pump(&mut registry, Duration::from_secs(2), || seen.borrow().is_some());
    assert_eq!(*seen.borrow(), Some((signal, 42)));
}

#[test]
fn test_one_second_timer_fires_once() {
    let _guard = exclusive();
    let mut registry = ready();
    let count = Rc::new(Cell::new(0));
    let seen = Rc::clone(&count);
    let started = Instant::now();
    registry
        .create(1, 0, move |_| seen.set(seen.get() + 1))
        .expect("create");

    pump(&mut registry, Duration::from_secs(3), || count.get() > 0);
    assert_eq!(count.get(), 1);
    assert!(started.elapsed() >= Duration::from_millis(900));

    pump(&mut registry, Duration::from_millis(1500), || false);
    assert_eq!(count.get(), 1);
}

#[test]
fn test_self_rearming_timer() {
    let _guard = exclusive();
    let mut registry = ready();
    let count = Rc::new(Cell::new(0));
    let seen = Rc::clone(&count);
    let handle = registry
        .create(0, 0, move |expiry| {
            seen.set(seen.get() + 1);
            if seen.get() < 3 {
                expiry.set_time(0).expect("re-arm");
            } else {
                expiry.dispose().expect("dispose");
            }
        })
        .expect("create");

    pump(&mut registry, Duration::from_secs(2), || count.get() >= 3);
    assert_eq!(count.get(), 3);
    assert!(!registry.contains(handle));
}

#[test]
fn test_disposed_timer_never_fires() {
    let _guard = exclusive();
    let mut registry = ready();
    let count = Rc::new(Cell::new(0));
    let seen = Rc::clone(&count);
    let handle = registry
        .create(1, 0, move |_| seen.set(seen.get() + 1))
        .expect("create");
    registry.dispose(handle).expect("dispose");

    pump(&mut registry, Duration::from_millis(1500), || false);
    assert_eq!(count.get(), 0);
}

#[test]
fn test_breakdown_with_full_pool() {
    let _guard = exclusive();
    let mut registry = ready();
    for _ in 0..CAPACITY {
        registry.create(60, 0, |_| {}).expect("create");
    }
    assert!(matches!(
        registry.create(60, 0, |_| {}),
        Err(TimerError::CapacityExceeded { .. })
    ));

    registry.breakdown().expect("breakdown");
    assert_eq!(registry.live(), 0);
    assert!(registry.slots().all(|slot| slot.handle.is_none()));
}

#[test]
fn test_dropping_registry_releases_signal_range() {
    let _guard = exclusive();
    {
        let mut registry = ready();
        registry.create(60, 0, |_| {}).expect("create");
    }
    assert!(PosixBackend::new().is_ok());
}
