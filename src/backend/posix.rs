//! Linux backend: POSIX per-process timers raising real-time signals.
//!
//! The installed handler runs in signal context, so it only touches the
//! lock-free tables below. Everything else happens on the registry owner's
//! flow of control.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicUsize, Ordering};

use log::debug;

use super::{Fired, Signal, TimerBackend};
use crate::errors::TimerError;
use crate::registry::CAPACITY;

/// Distance of the first pool signal above `SIGRTMIN`.
pub const SIGNAL_OFFSET: i32 = 0;

/// The clock every timer counts down on.
const TIMER_CLOCK: libc::clockid_t = libc::CLOCK_MONOTONIC;

static CLAIMED: AtomicBool = AtomicBool::new(false);
static BASE: AtomicI32 = AtomicI32::new(0);

#[allow(clippy::declare_interior_mutable_const)]
const NOT_FIRED: AtomicU32 = AtomicU32::new(0);
#[allow(clippy::declare_interior_mutable_const)]
const NO_PAYLOAD: AtomicUsize = AtomicUsize::new(0);

static FIRED: [AtomicU32; CAPACITY] = [NOT_FIRED; CAPACITY];
static PAYLOAD: [AtomicUsize; CAPACITY] = [NO_PAYLOAD; CAPACITY];

extern "C" fn on_timer_signal(
    signo: libc::c_int,
    info: *mut libc::siginfo_t,
    _ucontext: *mut libc::c_void,
) {
    let index = signo - BASE.load(Ordering::Relaxed);
    if info.is_null() || index < 0 || index as usize >= CAPACITY {
        return;
    }
    // SAFETY: the kernel hands SA_SIGINFO handlers a valid siginfo_t, and
    // timer signals carry the sigval given to timer_create.
    let payload = unsafe { (*info).si_value().sival_ptr } as usize;
    PAYLOAD[index as usize].store(payload, Ordering::Relaxed);
    FIRED[index as usize].fetch_add(1, Ordering::Release);
}

/// A `timer_t` issued by `timer_create`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PosixTimer(libc::timer_t);

/// Backend over `timer_create`/`sigaction` on `SIGRTMIN + SIGNAL_OFFSET`
/// and the following `CAPACITY - 1` signals.
///
/// Signal dispositions are process-wide, so only one instance may exist at
/// a time.
pub struct PosixBackend {
    base: Signal,
    previous: HashMap<i32, libc::sigaction>,
}

impl PosixBackend {
    /// Claims the process signal range.
    pub fn new() -> Result<Self, TimerError> {
        if CLAIMED.swap(true, Ordering::AcqRel) {
            return Err(TimerError::BackendInUse);
        }

        let first = libc::SIGRTMIN() + SIGNAL_OFFSET;
        let last = first + CAPACITY as i32 - 1;
        if SIGNAL_OFFSET < 0 || last > libc::SIGRTMAX() {
            CLAIMED.store(false, Ordering::Release);
            return Err(TimerError::SignalRangeUnavailable { first, last });
        }

        BASE.store(first, Ordering::Relaxed);
        for fired in &FIRED {
            fired.store(0, Ordering::Relaxed);
        }
        debug!("Claimed signals {}..={} for timers", first, last);

        Ok(PosixBackend {
            base: Signal::new(first),
            previous: HashMap::new(),
        })
    }

    fn index(&self, signal: Signal) -> Option<usize> {
        let index = usize::try_from(signal.raw() - self.base.raw()).ok()?;
        (index < CAPACITY).then_some(index)
    }

    fn set_mask(how: libc::c_int, signal: Signal) -> io::Result<()> {
        // SAFETY: the set is initialised by sigemptyset before use.
        let rc = unsafe {
            let mut set: libc::sigset_t = mem::zeroed();
            libc::sigemptyset(&mut set);
            libc::sigaddset(&mut set, signal.raw());
            libc::pthread_sigmask(how, &set, ptr::null_mut())
        };
        match rc {
            0 => Ok(()),
            errno => Err(io::Error::from_raw_os_error(errno)),
        }
    }
}

impl fmt::Debug for PosixBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PosixBackend")
            .field("base", &self.base)
            .field("installed", &self.previous.len())
            .finish()
    }
}

impl Drop for PosixBackend {
    fn drop(&mut self) {
        for (&signo, previous) in &self.previous {
            // SAFETY: restoring a disposition previously returned by sigaction.
            unsafe {
                libc::sigaction(signo, previous, ptr::null_mut());
            }
        }
        CLAIMED.store(false, Ordering::Release);
    }
}

impl TimerBackend for PosixBackend {
    type Timer = PosixTimer;

    fn base_signal(&self) -> Signal {
        self.base
    }

    fn install_handler(&mut self, signal: Signal) -> io::Result<()> {
        // SAFETY: both structs are plain C data, zeroed then filled in; the
        // handler only performs async-signal-safe atomic stores.
        let (rc, previous) = unsafe {
            let mut action: libc::sigaction = mem::zeroed();
            action.sa_sigaction = on_timer_signal as usize;
            action.sa_flags = libc::SA_SIGINFO | libc::SA_RESTART;
            libc::sigemptyset(&mut action.sa_mask);
            let mut previous: libc::sigaction = mem::zeroed();
            let rc = libc::sigaction(signal.raw(), &action, &mut previous);
            (rc, previous)
        };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        self.previous.entry(signal.raw()).or_insert(previous);
        Ok(())
    }

    fn release_handler(&mut self, signal: Signal) -> io::Result<()> {
        let Some(previous) = self.previous.remove(&signal.raw()) else {
            return Ok(());
        };
        // SAFETY: restoring a disposition previously returned by sigaction.
        let rc = unsafe { libc::sigaction(signal.raw(), &previous, ptr::null_mut()) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn block(&mut self, signal: Signal) -> io::Result<()> {
        Self::set_mask(libc::SIG_BLOCK, signal)
    }

    fn unblock(&mut self, signal: Signal) -> io::Result<()> {
        Self::set_mask(libc::SIG_UNBLOCK, signal)
    }

    fn create(&mut self, signal: Signal, payload: usize) -> io::Result<PosixTimer> {
        let mut timer: libc::timer_t = ptr::null_mut();
        // SAFETY: sigevent is zeroed and the fields SIGEV_SIGNAL reads are set.
        let rc = unsafe {
            let mut event: libc::sigevent = mem::zeroed();
            event.sigev_notify = libc::SIGEV_SIGNAL;
            event.sigev_signo = signal.raw();
            event.sigev_value = libc::sigval {
                sival_ptr: payload as *mut libc::c_void,
            };
            libc::timer_create(TIMER_CLOCK, &mut event, &mut timer)
        };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(PosixTimer(timer))
    }

    fn arm(&mut self, timer: PosixTimer, seconds: u32) -> io::Result<()> {
        // SAFETY: itimerspec is plain C data.
        let mut expiry: libc::itimerspec = unsafe { mem::zeroed() };
        expiry.it_value.tv_sec = seconds as libc::time_t;
        // a zero it_value would disarm the timer instead of firing it
        expiry.it_value.tv_nsec = if seconds == 0 { 1 } else { 0 };

        // SAFETY: timer was issued by timer_create and not yet deleted.
        let rc = unsafe { libc::timer_settime(timer.0, 0, &expiry, ptr::null_mut()) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn delete(&mut self, timer: PosixTimer) -> io::Result<()> {
        // SAFETY: timer was issued by timer_create.
        let rc = unsafe { libc::timer_delete(timer.0) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn take_fired(&mut self, signal: Signal) -> Option<Fired> {
        let index = self.index(signal)?;
        let count = FIRED[index].swap(0, Ordering::Acquire);
        if count == 0 {
            return None;
        }
        Some(Fired {
            payload: PAYLOAD[index].load(Ordering::Relaxed),
            count,
        })
    }

    fn discard(&mut self, signal: Signal) {
        if let Some(index) = self.index(signal) {
            FIRED[index].store(0, Ordering::Release);
        }
    }
}
