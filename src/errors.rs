//! Error handling module for sigtimer.

use std::io;

use thiserror::Error;

use crate::timer::TimerHandle;

/// Custom error type for timer registry operations.
#[derive(Error, Debug)]
pub enum TimerError {
    /// Operation attempted before `init` or after `breakdown`.
    #[error("Timer registry is not initialized.")]
    NotInitialized,

    /// `init` called twice without an intervening `breakdown`.
    #[error("Timer registry is already initialized.")]
    AlreadyInitialized,

    /// Every slot of the pool holds a live timer.
    #[error("Timer pool exhausted: all {capacity} slots are in use.")]
    CapacityExceeded { capacity: usize },

    /// The live counter admitted a timer but the slot scan found no free slot.
    #[error("No free timer slot although the live counter allows one.")]
    NoFreeSlot,

    /// The OS returned a timer id that is already bound to another slot.
    #[error("OS timer id is already bound to another slot.")]
    AlreadyInUse,

    /// The signal handler could not be installed.
    #[error("Couldn't install signal handler: {0}")]
    HandlerInstallFailed(#[source] io::Error),

    /// The timer signal could not be blocked for the calling thread.
    #[error("Couldn't block timer signal: {0}")]
    MaskFailed(#[source] io::Error),

    /// The OS refused to create the timer.
    #[error("Couldn't create timer: {0}")]
    TimerCreateFailed(#[source] io::Error),

    /// The OS refused to arm the timer. The timer has been disposed.
    #[error("Couldn't set timer interval: {0}")]
    ArmFailed(#[source] io::Error),

    /// The timer signal could not be unblocked after creation.
    ///
    /// The timer is armed and recorded under `handle`, but its signal may
    /// stay blocked for the creating thread.
    #[error("Couldn't unblock timer signal for {handle}: {source}")]
    UnmaskFailed {
        handle: TimerHandle,
        #[source]
        source: io::Error,
    },

    /// The handle does not name a live timer of this registry.
    #[error("Unknown timer handle {0}.")]
    NotFound(TimerHandle),

    /// The OS timer could not be deleted. The slot has been released anyway.
    #[error("Couldn't delete timer: {0}")]
    DeleteFailed(#[source] io::Error),

    /// Another backend instance already owns the process signal range.
    #[error("Timer signal range is already owned by another backend.")]
    BackendInUse,

    /// The configured signal range does not fit into SIGRTMIN..=SIGRTMAX.
    #[error("Signal range {first}..={last} exceeds the real-time signal range.")]
    SignalRangeUnavailable { first: i32, last: i32 },
}

impl TimerError {
    /// Whether the error leaves OS state the caller must escalate.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TimerError::UnmaskFailed { .. })
    }
}

/// Errors raised while reading a `key=value` configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("Failed opening {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    /// The key is not present in the file.
    #[error("{0} parameter not found in config file")]
    MissingKey(String),

    /// The value is present but could not be converted.
    #[error("Invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}
