//! A deterministic backend driven by a virtual clock.
//!
//! Time only moves when [`ManualBackend::advance`] is called. Every backend
//! call is journaled and any operation can be made to fail once, which makes
//! the registry's create/arm/dispose protocol observable in tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;

use super::{Fired, Signal, TimerBackend};

/// Signal number the manual pool starts at, matching Linux's `SIGRTMIN`.
pub const DEFAULT_BASE_SIGNAL: Signal = Signal::new(34);

/// Backend operations, for journaling and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    InstallHandler,
    ReleaseHandler,
    Block,
    Unblock,
    Create,
    Arm,
    Delete,
}

/// One journaled backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Call {
    pub op: Op,
    pub signal: Signal,
}

/// Timer id issued by [`ManualBackend`]. Ids are reused after deletion, the
/// way kernel timer ids are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ManualTimer(u32);

#[derive(Debug)]
struct Countdown {
    signal: Signal,
    payload: usize,
    deadline: Option<u64>,
}

#[derive(Debug)]
pub struct ManualBackend {
    base: Signal,
    now: u64,
    timers: BTreeMap<ManualTimer, Countdown>,
    handlers: HashSet<Signal>,
    blocked: HashSet<Signal>,
    deferred: HashMap<Signal, Fired>,
    pending: HashMap<Signal, Fired>,
    faults: HashSet<Op>,
    journal: Vec<Call>,
}

impl Default for ManualBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualBackend {
    /// Creates a backend whose slots start at [`DEFAULT_BASE_SIGNAL`].
    pub fn new() -> Self {
        Self::with_base(DEFAULT_BASE_SIGNAL)
    }

    /// Creates a backend whose slots start at `base`.
    pub fn with_base(base: Signal) -> Self {
        ManualBackend {
            base,
            now: 0,
            timers: BTreeMap::new(),
            handlers: HashSet::new(),
            blocked: HashSet::new(),
            deferred: HashMap::new(),
            pending: HashMap::new(),
            faults: HashSet::new(),
            journal: Vec::new(),
        }
    }

    /// Seconds elapsed on the virtual clock.
    pub fn now(&self) -> u64 {
        self.now
    }

    /// Moves the clock forward and delivers every countdown that ran out.
    /// Returns the number of timers that expired.
    pub fn advance(&mut self, seconds: u64) -> usize {
        self.now += seconds;
        let now = self.now;

        let mut due: Vec<(u64, ManualTimer)> = self
            .timers
            .iter()
            .filter_map(|(&id, countdown)| match countdown.deadline {
                Some(deadline) if deadline <= now => Some((deadline, id)),
                _ => None,
            })
            .collect();
        due.sort();

        for &(_, id) in &due {
            if let Some(countdown) = self.timers.get_mut(&id) {
                countdown.deadline = None;
                let (signal, payload) = (countdown.signal, countdown.payload);
                self.deliver(signal, payload);
            }
        }
        due.len()
    }

    /// Raises `signal` as if some timer had expired on it.
    pub fn raise(&mut self, signal: Signal, payload: usize) {
        self.deliver(signal, payload);
    }

    /// Makes the next call of `op` fail.
    pub fn fail_next(&mut self, op: Op) {
        self.faults.insert(op);
    }

    /// Every backend call so far, oldest first.
    pub fn journal(&self) -> &[Call] {
        &self.journal
    }

    /// Forgets the recorded calls.
    pub fn clear_journal(&mut self) {
        self.journal.clear();
    }

    /// Number of timers that exist on the backend side.
    pub fn timer_count(&self) -> usize {
        self.timers.len()
    }

    /// Absolute expiry time of the timer bound to `signal`, if armed.
    pub fn deadline(&self, signal: Signal) -> Option<u64> {
        self.timers
            .values()
            .find(|countdown| countdown.signal == signal)
            .and_then(|countdown| countdown.deadline)
    }

    /// Whether a handler is installed for `signal`.
    pub fn is_installed(&self, signal: Signal) -> bool {
        self.handlers.contains(&signal)
    }

    /// Whether `signal` is currently blocked.
    pub fn is_blocked(&self, signal: Signal) -> bool {
        self.blocked.contains(&signal)
    }

    fn deliver(&mut self, signal: Signal, payload: usize) {
        if !self.handlers.contains(&signal) {
            return;
        }
        let queue = if self.blocked.contains(&signal) {
            &mut self.deferred
        } else {
            &mut self.pending
        };
        let fired = queue.entry(signal).or_insert(Fired { payload, count: 0 });
        fired.payload = payload;
        fired.count += 1;
    }

    fn record(&mut self, op: Op, signal: Signal) -> io::Result<()> {
        self.journal.push(Call { op, signal });
        if self.faults.remove(&op) {
            return Err(io::Error::other(format!("injected {op:?} failure")));
        }
        Ok(())
    }

    fn signal_of(&self, timer: ManualTimer) -> io::Result<Signal> {
        self.timers
            .get(&timer)
            .map(|countdown| countdown.signal)
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EINVAL))
    }

    fn free_id(&self) -> ManualTimer {
        let mut id = 0;
        while self.timers.contains_key(&ManualTimer(id)) {
            id += 1;
        }
        ManualTimer(id)
    }
}

impl TimerBackend for ManualBackend {
    type Timer = ManualTimer;

    fn base_signal(&self) -> Signal {
        self.base
    }

    fn install_handler(&mut self, signal: Signal) -> io::Result<()> {
        self.record(Op::InstallHandler, signal)?;
        self.handlers.insert(signal);
        Ok(())
    }

    fn release_handler(&mut self, signal: Signal) -> io::Result<()> {
        self.record(Op::ReleaseHandler, signal)?;
        self.handlers.remove(&signal);
        Ok(())
    }

    fn block(&mut self, signal: Signal) -> io::Result<()> {
        self.record(Op::Block, signal)?;
        self.blocked.insert(signal);
        Ok(())
    }

    fn unblock(&mut self, signal: Signal) -> io::Result<()> {
        self.record(Op::Unblock, signal)?;
        self.blocked.remove(&signal);
        if let Some(fired) = self.deferred.remove(&signal) {
            let merged = self.pending.entry(signal).or_insert(Fired {
                payload: fired.payload,
                count: 0,
            });
            merged.payload = fired.payload;
            merged.count += fired.count;
        }
        Ok(())
    }

    fn create(&mut self, signal: Signal, payload: usize) -> io::Result<ManualTimer> {
        self.record(Op::Create, signal)?;
        let id = self.free_id();
        self.timers.insert(
            id,
            Countdown {
                signal,
                payload,
                deadline: None,
            },
        );
        Ok(id)
    }

    fn arm(&mut self, timer: ManualTimer, seconds: u32) -> io::Result<()> {
        let signal = self.signal_of(timer)?;
        self.record(Op::Arm, signal)?;
        let deadline = self.now + u64::from(seconds);
        if let Some(countdown) = self.timers.get_mut(&timer) {
            countdown.deadline = Some(deadline);
        }
        Ok(())
    }

    fn delete(&mut self, timer: ManualTimer) -> io::Result<()> {
        let signal = self.signal_of(timer)?;
        self.record(Op::Delete, signal)?;
        self.timers.remove(&timer);
        Ok(())
    }

    fn take_fired(&mut self, signal: Signal) -> Option<Fired> {
        self.pending.remove(&signal)
    }

    fn discard(&mut self, signal: Signal) {
        self.pending.remove(&signal);
        self.deferred.remove(&signal);
    }
}
