//! The timer registry: a fixed pool of slots, each bound for life to one
//! notification signal, holding at most one live OS timer.

use std::io;
use std::panic::{self, AssertUnwindSafe};

use log::{debug, error, info, warn};

use crate::backend::{Signal, TimerBackend};
use crate::errors::TimerError;
use crate::timer::{Expiry, RegistryStatistics, TimerCallback, TimerHandle};

/// Number of slots, and so of signals, in a registry.
pub const CAPACITY: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RegistryState {
    Uninitialized,
    Ready,
}

struct LiveTimer<B: TimerBackend> {
    handle: TimerHandle,
    raw: B::Timer,
    // None while the callback runs
    callback: Option<TimerCallback<B>>,
}

struct TimerSlot<B: TimerBackend> {
    signal: Signal,
    handler_installed: bool,
    timer: Option<LiveTimer<B>>,
}

/// A snapshot of one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotInfo {
    pub index: usize,
    pub signal: Signal,
    pub handle: Option<TimerHandle>,
}

/// Owns the slot pool and the backend the timers live on.
///
/// Expirations recorded by the backend are turned into callback calls by
/// [`TimerRegistry::dispatch`], on the owner's flow of control.
pub struct TimerRegistry<B: TimerBackend> {
    backend: B,
    slots: Vec<TimerSlot<B>>,
    live: usize,
    state: RegistryState,
    statistics: RegistryStatistics,
}

impl<B: TimerBackend> TimerRegistry<B> {
    /// Creates an uninitialized registry on top of `backend`.
    pub fn new(backend: B) -> Self {
        TimerRegistry {
            backend,
            slots: Vec::with_capacity(CAPACITY),
            live: 0,
            state: RegistryState::Uninitialized,
            statistics: RegistryStatistics::default(),
        }
    }

    /// Clears every slot and binds slot `i` to `base + i`.
    pub fn init(&mut self) -> Result<(), TimerError> {
        if self.state == RegistryState::Ready {
            error!("Timer registry already initialized");
            return Err(TimerError::AlreadyInitialized);
        }

        let base = self.backend.base_signal();
        self.slots = (0..CAPACITY)
            .map(|index| TimerSlot {
                signal: base.offset(index),
                handler_installed: false,
                timer: None,
            })
            .collect();
        self.live = 0;
        self.state = RegistryState::Ready;

        info!(
            "Timer registry initialized with {} slots on signals {}..={}",
            CAPACITY,
            base.raw(),
            base.offset(CAPACITY - 1).raw()
        );
        Ok(())
    }

    /// Disposes every live timer, releases every handler and returns the
    /// registry to the uninitialized state.
    ///
    /// OS failures on the way are logged and skipped; once started,
    /// breakdown always completes.
    pub fn breakdown(&mut self) -> Result<(), TimerError> {
        self.ensure_ready()?;

        for index in 0..self.slots.len() {
            let signal = self.slots[index].signal;
            if let Some(timer) = self.slots[index].timer.take() {
                self.live -= 1;
                self.statistics.disposed += 1;
                if let Err(e) = self.backend.delete(timer.raw) {
                    warn!("Couldn't delete {} on {}: {}", timer.handle, signal, e);
                }
                self.backend.discard(signal);
                debug!("Timer {} force-disposed", timer.handle);
            }
            if self.slots[index].handler_installed {
                self.slots[index].handler_installed = false;
                if let Err(e) = self.backend.release_handler(signal) {
                    warn!("Couldn't release handler of {}: {}", signal, e);
                }
            }
        }

        debug_assert_eq!(self.live, 0);
        self.live = 0;
        self.state = RegistryState::Uninitialized;
        info!("Timer registry broken down");
        Ok(())
    }

    /// Creates a timer that expires once after `seconds` and runs `callback`.
    ///
    /// `context` travels with the OS notification and comes back through
    /// [`Expiry::context`]. A zero duration fires as soon as possible.
    pub fn create<F>(
        &mut self,
        seconds: u32,
        context: usize,
        callback: F,
    ) -> Result<TimerHandle, TimerError>
    where
        F: FnMut(&mut Expiry<'_, B>) + 'static,
    {
        self.ensure_ready()?;

        if self.live >= CAPACITY {
            warn!("Couldn't create timer: all {} slots in use", CAPACITY);
            return Err(TimerError::CapacityExceeded { capacity: CAPACITY });
        }
        let Some(index) = self.slots.iter().position(|slot| slot.timer.is_none()) else {
            error!(
                "Couldn't create timer: no free slot although {} of {} are live",
                self.live, CAPACITY
            );
            return Err(TimerError::NoFreeSlot);
        };
        let signal = self.slots[index].signal;

        // The steps below must stay in this order: the signal is routed and
        // blocked before the timer exists, and unblocked only once armed.
        if let Err(e) = self.backend.install_handler(signal) {
            error!("Couldn't install handler for {}: {}", signal, e);
            return Err(TimerError::HandlerInstallFailed(e));
        }
        self.slots[index].handler_installed = true;

        if let Err(e) = self.backend.block(signal) {
            error!("Couldn't block {}: {}", signal, e);
            return Err(TimerError::MaskFailed(e));
        }
        // whatever was raised on this signal so far belongs to no timer
        self.backend.discard(signal);

        let raw = match self.backend.create(signal, context) {
            Ok(raw) => raw,
            Err(e) => {
                error!("Couldn't create timer on {}: {}", signal, e);
                self.unblock_after_failure(signal);
                return Err(TimerError::TimerCreateFailed(e));
            }
        };

        if self.live_timers().any(|timer| timer.raw == raw) {
            error!("OS timer {:?} is already bound to another slot", raw);
            self.unblock_after_failure(signal);
            return Err(TimerError::AlreadyInUse);
        }

        if let Err(e) = self.backend.arm(raw, seconds) {
            error!("Couldn't set time on {}: {}", signal, e);
            if let Err(e) = self.backend.delete(raw) {
                warn!("Couldn't delete unarmed timer on {}: {}", signal, e);
            }
            self.unblock_after_failure(signal);
            return Err(TimerError::ArmFailed(e));
        }

        let unblocked = self.backend.unblock(signal);

        let handle = TimerHandle::next();
        self.slots[index].timer = Some(LiveTimer {
            handle,
            raw,
            callback: Some(Box::new(callback)),
        });
        self.live += 1;
        self.statistics.created += 1;
        self.check_invariants();

        match unblocked {
            Ok(()) => {
                info!(
                    "Timer {} successfully created on {}, expires in {}s",
                    handle, signal, seconds
                );
                Ok(handle)
            }
            Err(source) => {
                error!(
                    "CRITICAL: couldn't unblock {} after arming {}: {}",
                    signal, handle, source
                );
                Err(TimerError::UnmaskFailed { handle, source })
            }
        }
    }

    /// Arms `handle` to expire once after `seconds`, replacing any countdown
    /// in progress.
    ///
    /// If the OS refuses, the timer is disposed rather than left half
    /// configured, and `ArmFailed` is returned.
    pub fn set_time(&mut self, handle: TimerHandle, seconds: u32) -> Result<(), TimerError> {
        self.ensure_ready()?;
        let index = self.find(handle).ok_or_else(|| {
            warn!("Couldn't set time: unknown timer {}", handle);
            TimerError::NotFound(handle)
        })?;

        let Some(raw) = self.slots[index].timer.as_ref().map(|timer| timer.raw) else {
            return Err(TimerError::NotFound(handle));
        };
        if let Err(e) = self.backend.arm(raw, seconds) {
            error!("Couldn't set timer interval of {}: {}", handle, e);
            if let Err(e) = self.release_slot(index) {
                warn!("Couldn't delete {} after failed arm: {}", handle, e);
            }
            return Err(TimerError::ArmFailed(e));
        }

        debug!("Timer {} armed for {}s", handle, seconds);
        Ok(())
    }

    /// Deletes the OS timer behind `handle` and frees its slot.
    ///
    /// The slot's signal handler stays installed for the next timer. When
    /// the OS delete fails the slot is freed anyway and `DeleteFailed` is
    /// returned.
    pub fn dispose(&mut self, handle: TimerHandle) -> Result<(), TimerError> {
        self.ensure_ready()?;
        let Some(index) = self.find(handle) else {
            warn!("Couldn't dispose {}: unknown timer", handle);
            return Err(TimerError::NotFound(handle));
        };

        match self.release_slot(index) {
            Ok(()) => {
                info!("Timer {} disposed", handle);
                Ok(())
            }
            Err(e) => {
                warn!("Couldn't delete timer {}: {}", handle, e);
                Err(TimerError::DeleteFailed(e))
            }
        }
    }

    /// Runs the callback of every timer whose expiration the backend has
    /// recorded, in slot order. Returns the number of callbacks run.
    ///
    /// A panicking callback stays attached to its timer; the panic is
    /// resumed once the registry is consistent again.
    pub fn dispatch(&mut self) -> Result<usize, TimerError> {
        self.ensure_ready()?;

        let mut invoked = 0;
        for index in 0..self.slots.len() {
            let signal = self.slots[index].signal;
            // dispatch re-entered from this timer's own callback: leave its
            // notification pending for the next round
            if self.slots[index]
                .timer
                .as_ref()
                .is_some_and(|timer| timer.callback.is_none())
            {
                continue;
            }
            let Some(fired) = self.backend.take_fired(signal) else {
                continue;
            };
            let Some(timer) = self.slots[index].timer.as_mut() else {
                debug!("Discarding stale notification on {}", signal);
                continue;
            };
            let handle = timer.handle;
            let Some(mut callback) = timer.callback.take() else {
                continue;
            };

            let mut expiry = Expiry {
                registry: &mut *self,
                handle,
                signal,
                context: fired.payload,
                count: fired.count,
            };
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback(&mut expiry)));
            invoked += 1;
            self.statistics.expirations += 1;
            self.restore_callback(index, handle, callback);

            if let Err(payload) = outcome {
                error!("Callback of {} panicked", handle);
                panic::resume_unwind(payload);
            }
        }
        Ok(invoked)
    }

    /// Whether `init` has run and `breakdown` hasn't since.
    pub fn is_initialized(&self) -> bool {
        self.state == RegistryState::Ready
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        CAPACITY
    }

    /// The live-timer counter.
    pub fn live(&self) -> usize {
        self.live
    }

    /// Number of occupied slots, counted by scanning the pool.
    pub fn in_use(&self) -> usize {
        self.slots.iter().filter(|slot| slot.timer.is_some()).count()
    }

    /// Whether `handle` names a live timer.
    pub fn contains(&self, handle: TimerHandle) -> bool {
        self.find(handle).is_some()
    }

    /// Signal the timer behind `handle` is delivered on.
    pub fn signal_of(&self, handle: TimerHandle) -> Option<Signal> {
        self.find(handle).map(|index| self.slots[index].signal)
    }

    /// Snapshots of every slot, in index order.
    pub fn slots(&self) -> impl Iterator<Item = SlotInfo> + '_ {
        self.slots.iter().enumerate().map(|(index, slot)| SlotInfo {
            index,
            signal: slot.signal,
            handle: slot.timer.as_ref().map(|timer| timer.handle),
        })
    }

    /// Gets the registry's statistics.
    pub fn statistics(&self) -> RegistryStatistics {
        self.statistics.clone()
    }

    /// The backend the timers live on.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Mutable access to the backend.
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    fn ensure_ready(&self) -> Result<(), TimerError> {
        if self.state != RegistryState::Ready {
            error!("Timer registry not initialized");
            return Err(TimerError::NotInitialized);
        }
        Ok(())
    }

    fn find(&self, handle: TimerHandle) -> Option<usize> {
        self.slots.iter().position(|slot| {
            slot.timer
                .as_ref()
                .is_some_and(|timer| timer.handle == handle)
        })
    }

    fn live_timers(&self) -> impl Iterator<Item = &LiveTimer<B>> + '_ {
        self.slots.iter().filter_map(|slot| slot.timer.as_ref())
    }

    /// Frees slot `index`; the bookkeeping is cleared even if the OS delete
    /// fails.
    fn release_slot(&mut self, index: usize) -> io::Result<()> {
        let Some(timer) = self.slots[index].timer.take() else {
            return Ok(());
        };
        self.live -= 1;
        self.statistics.disposed += 1;

        let deleted = self.backend.delete(timer.raw);
        self.backend.discard(self.slots[index].signal);
        self.check_invariants();
        deleted
    }

    /// Puts `callback` back unless its timer was disposed or replaced
    /// while it ran.
    fn restore_callback(&mut self, index: usize, handle: TimerHandle, callback: TimerCallback<B>) {
        if let Some(timer) = self.slots[index]
            .timer
            .as_mut()
            .filter(|timer| timer.handle == handle)
        {
            timer.callback = Some(callback);
        }
    }

    fn unblock_after_failure(&mut self, signal: Signal) {
        if let Err(e) = self.backend.unblock(signal) {
            error!("Couldn't unblock {} after failed create: {}", signal, e);
        }
    }

    fn check_invariants(&self) {
        debug_assert_eq!(
            self.live,
            self.in_use(),
            "live counter diverged from the slot scan"
        );
    }
}

impl<B: TimerBackend> Drop for TimerRegistry<B> {
    fn drop(&mut self) {
        if self.state == RegistryState::Ready {
            let _ = self.breakdown();
        }
    }
}
