use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::backend::{Signal, TimerBackend};
use crate::errors::TimerError;
use crate::registry::TimerRegistry;

static NEXT_SERIAL: AtomicU64 = AtomicU64::new(0);

/// Opaque identifier of a live timer.
///
/// Handles are never reused within a process, even when the OS recycles
/// the underlying timer id, so a disposed handle can't alias a newer timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(NonZeroU64);

impl TimerHandle {
    pub(crate) fn next() -> Self {
        let serial = NEXT_SERIAL.fetch_add(1, Ordering::Relaxed);
        TimerHandle(NonZeroU64::MIN.saturating_add(serial))
    }

    /// The process-wide serial number of this handle.
    pub fn serial(&self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// Counters kept by a registry over its whole lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStatistics {
    /// Timers successfully created.
    pub created: u64,
    /// Timers released, by dispose, failed re-arm or breakdown.
    pub disposed: u64,
    /// Callback invocations.
    pub expirations: u64,
}

/// The function run when a timer expires.
pub type TimerCallback<B> = Box<dyn FnMut(&mut Expiry<'_, B>)>;

/// What a callback receives when its timer expires.
///
/// Besides the notification data it lends the registry back to the
/// callback, so the timer can re-arm or dispose itself, or manage others.
pub struct Expiry<'a, B: TimerBackend> {
    pub(crate) registry: &'a mut TimerRegistry<B>,
    pub(crate) handle: TimerHandle,
    pub(crate) signal: Signal,
    pub(crate) context: usize,
    pub(crate) count: u32,
}

impl<'a, B: TimerBackend> Expiry<'a, B> {
    /// Handle of the expired timer.
    pub fn handle(&self) -> TimerHandle {
        self.handle
    }

    /// Signal the expiration was delivered on.
    pub fn signal(&self) -> Signal {
        self.signal
    }

    /// Context value given at creation, as delivered by the OS.
    pub fn context(&self) -> usize {
        self.context
    }

    /// Notifications coalesced into this invocation, normally 1.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Re-arms this timer to fire once more after `seconds`.
    pub fn set_time(&mut self, seconds: u32) -> Result<(), TimerError> {
        self.registry.set_time(self.handle, seconds)
    }

    /// Disposes this timer. The callback is dropped once it returns.
    pub fn dispose(&mut self) -> Result<(), TimerError> {
        self.registry.dispose(self.handle)
    }

    /// The registry, to create or dispose other timers.
    pub fn registry(&mut self) -> &mut TimerRegistry<B> {
        &mut *self.registry
    }
}

impl<B: TimerBackend> fmt::Debug for Expiry<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Expiry")
            .field("handle", &self.handle)
            .field("signal", &self.signal)
            .field("context", &self.context)
            .field("count", &self.count)
            .finish()
    }
}
