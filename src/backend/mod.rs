//! The operating-system seam of the timer registry.
//!
//! A backend owns everything the registry needs from the OS: signal
//! dispositions, the per-thread signal mask, and the timers themselves.
//! Expirations are not delivered as calls into the registry; the backend
//! records them and hands them out through [`TimerBackend::take_fired`] when
//! the registry owner dispatches.

use std::fmt;
use std::io;

pub mod manual;
#[cfg(target_os = "linux")]
pub mod posix;

pub use manual::ManualBackend;
#[cfg(target_os = "linux")]
pub use posix::PosixBackend;

/// A notification signal number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Signal(i32);

impl Signal {
    /// Wraps an OS signal number.
    pub const fn new(raw: i32) -> Self {
        Signal(raw)
    }

    /// The OS signal number.
    pub const fn raw(self) -> i32 {
        self.0
    }

    /// The signal `index` positions above this one.
    pub const fn offset(self, index: usize) -> Self {
        Signal(self.0 + index as i32)
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "signal {}", self.0)
    }
}

/// Expirations collected for one signal since the last dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fired {
    /// Payload the OS delivered with the most recent notification.
    pub payload: usize,
    /// Number of notifications coalesced into this one.
    pub count: u32,
}

/// Operations the registry performs against the OS timer facility.
///
/// Every fallible call reports the underlying OS error unchanged; the
/// registry decides what kind of failure it is.
pub trait TimerBackend {
    /// Raw OS timer identifier. The OS may reuse values after deletion.
    type Timer: Copy + Eq + fmt::Debug;

    /// First signal of the contiguous range the pool is built on.
    fn base_signal(&self) -> Signal;

    /// Routes `signal` to this backend's expiration recorder.
    fn install_handler(&mut self, signal: Signal) -> io::Result<()>;

    /// Restores the disposition `signal` had before the first install.
    fn release_handler(&mut self, signal: Signal) -> io::Result<()>;

    /// Blocks `signal` for the calling thread.
    fn block(&mut self, signal: Signal) -> io::Result<()>;

    /// Unblocks `signal` for the calling thread.
    fn unblock(&mut self, signal: Signal) -> io::Result<()>;

    /// Creates a disarmed timer that raises `signal` carrying `payload`.
    fn create(&mut self, signal: Signal, payload: usize) -> io::Result<Self::Timer>;

    /// Arms `timer` to expire once after `seconds`, replacing any countdown.
    /// Zero means as soon as possible.
    fn arm(&mut self, timer: Self::Timer, seconds: u32) -> io::Result<()>;

    /// Deletes `timer`.
    fn delete(&mut self, timer: Self::Timer) -> io::Result<()>;

    /// Takes the expirations recorded on `signal`, if any.
    fn take_fired(&mut self, signal: Signal) -> Option<Fired>;

    /// Drops expirations recorded on `signal` without reporting them.
    fn discard(&mut self, signal: Signal);
}
