//! # sigtimer
//! One-shot timers backed by POSIX timers, delivered over a fixed pool of
//! real-time signals that the registry hands out and takes back.

pub mod backend;
pub mod config;
pub mod driver;
pub mod errors;
pub mod logger;
pub mod registry;
pub mod timer;
pub mod version;

pub use backend::{Fired, ManualBackend, Signal, TimerBackend};
#[cfg(target_os = "linux")]
pub use backend::posix::{PosixBackend, SIGNAL_OFFSET};
pub use config::Config;
pub use errors::{ConfigError, TimerError};
pub use registry::{SlotInfo, TimerRegistry, CAPACITY};
pub use timer::{Expiry, RegistryStatistics, TimerCallback, TimerHandle};
