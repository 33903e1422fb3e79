//! Process driver: settings, the heartbeat timer and the dispatch loop the
//! `sigtimer` binary runs until it is told to stop.

use std::future::Future;
use std::time::Duration;

use log::{error, info, LevelFilter};
use tokio::time::{self, MissedTickBehavior};

use crate::backend::TimerBackend;
use crate::config::Config;
use crate::errors::{ConfigError, TimerError};
use crate::logger::LoggerConfig;
use crate::registry::TimerRegistry;
use crate::timer::TimerHandle;

/// Runtime settings, read from the config file and overridden from the
/// command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub log_level: LevelFilter,
    pub debug_targets: Vec<String>,
    /// Heartbeat period; 0 disables the heartbeat.
    pub heartbeat_seconds: u32,
    /// How often recorded expirations are dispatched.
    pub dispatch_period: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            log_level: LevelFilter::Info,
            debug_targets: Vec::new(),
            heartbeat_seconds: 5,
            dispatch_period: Duration::from_millis(100),
        }
    }
}

impl Settings {
    /// Reads `log_level`, `debug_targets` (comma separated),
    /// `heartbeat_seconds` and `dispatch_period_ms`; missing keys keep their
    /// defaults.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let defaults = Settings::default();

        let debug_targets = match config.get_list("debug_targets") {
            Ok(targets) => targets,
            Err(ConfigError::MissingKey(_)) => defaults.debug_targets,
            Err(e) => return Err(e),
        };

        let period_ms: u64 = config.get_or("dispatch_period_ms", 100)?;
        if period_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "dispatch_period_ms".into(),
                value: "0".into(),
                reason: "period must be greater than zero".into(),
            });
        }

        Ok(Settings {
            log_level: config.get_or("log_level", defaults.log_level)?,
            debug_targets,
            heartbeat_seconds: config.get_or("heartbeat_seconds", defaults.heartbeat_seconds)?,
            dispatch_period: Duration::from_millis(period_ms),
        })
    }

    /// Applies `count` verbosity steps: one enables debug, two or more
    /// trace. Without explicit debug targets every target is opened, since
    /// debug records are otherwise filtered out.
    pub fn raise_verbosity(&mut self, count: u8) {
        let level = match count {
            0 => return,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };
        self.log_level = self.log_level.max(level);
        if self.debug_targets.is_empty() {
            self.debug_targets.push("*".to_owned());
        }
    }

    /// Logger configuration for these settings.
    pub fn logger_config(&self) -> LoggerConfig {
        LoggerConfig {
            level: self.log_level,
            debug_targets: self.debug_targets.clone(),
            color: true,
        }
    }
}

/// Starts a timer that logs a heartbeat every `seconds` by re-arming
/// itself from its own callback.
pub fn start_heartbeat<B: TimerBackend>(
    registry: &mut TimerRegistry<B>,
    seconds: u32,
) -> Result<TimerHandle, TimerError> {
    let mut beats: u64 = 0;
    registry.create(seconds, 0, move |expiry| {
        beats += 1;
        info!("Heartbeat #{} on {}", beats, expiry.signal());
        if let Err(e) = expiry.set_time(seconds) {
            error!("Couldn't re-arm heartbeat: {}", e);
        }
    })
}

/// Dispatches `registry` every `period` until `shutdown` completes.
/// Returns the number of callbacks run.
pub async fn run<B, S>(
    registry: &mut TimerRegistry<B>,
    period: Duration,
    shutdown: S,
) -> Result<u64, TimerError>
where
    B: TimerBackend,
    S: Future<Output = ()>,
{
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    let mut invoked = 0u64;
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                invoked += registry.dispatch()? as u64;
            }
        }
    }
    Ok(invoked)
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::backend::ManualBackend;

    fn ready() -> TimerRegistry<ManualBackend> {
        let mut registry = TimerRegistry::new(ManualBackend::new());
        registry.init().unwrap();
        registry
    }

    #[test]
    fn test_settings_from_config() {
        let config = Config::parse(
            "log_level=debug\ndebug_targets=sigtimer::registry, sigtimer::backend\nheartbeat_seconds=2\n",
        );
        let settings = Settings::from_config(&config).unwrap();
        assert_eq!(settings.log_level, LevelFilter::Debug);
        assert_eq!(
            settings.debug_targets,
            vec!["sigtimer::registry", "sigtimer::backend"]
        );
        assert_eq!(settings.heartbeat_seconds, 2);
        assert_eq!(settings.dispatch_period, Duration::from_millis(100));
    }

    #[test]
    fn test_debug_targets_packed_or_spaced() {
        for line in [
            "debug_targets=sigtimer::registry,sigtimer::backend\n",
            "debug_targets = sigtimer::registry,  sigtimer::backend  # io\n",
        ] {
            let settings = Settings::from_config(&Config::parse(line)).unwrap();
            assert_eq!(
                settings.debug_targets,
                vec!["sigtimer::registry", "sigtimer::backend"],
                "{line}"
            );
        }
    }

    #[test]
    fn test_verbosity_opens_all_targets_when_none_given() {
        let mut settings = Settings::default();
        settings.raise_verbosity(1);
        assert_eq!(settings.log_level, LevelFilter::Debug);
        assert_eq!(settings.debug_targets, vec!["*"]);

        let logger = crate::logger::ConsoleLogger::new(settings.logger_config());
        let metadata = log::Metadata::builder()
            .level(log::Level::Debug)
            .target("sigtimer::registry")
            .build();
        assert!(log::Log::enabled(&logger, &metadata));
    }

    #[test]
    fn test_verbosity_keeps_explicit_targets() {
        let mut settings = Settings {
            debug_targets: vec!["sigtimer::backend".into()],
            ..Settings::default()
        };
        settings.raise_verbosity(2);
        assert_eq!(settings.log_level, LevelFilter::Trace);
        assert_eq!(settings.debug_targets, vec!["sigtimer::backend"]);

        let mut quiet = Settings::default();
        quiet.raise_verbosity(0);
        assert_eq!(quiet, Settings::default());
    }

    #[test]
    fn test_zero_dispatch_period_rejected() {
        let config = Config::parse("dispatch_period_ms=0\n");
        assert!(Settings::from_config(&config).is_err());
    }

    #[test]
    fn test_heartbeat_rearms_itself() {
        let mut registry = ready();
        let handle = start_heartbeat(&mut registry, 5).unwrap();
        let signal = registry.signal_of(handle).unwrap();

        for beat in 1..=3u64 {
            registry.backend_mut().advance(5);
            assert_eq!(registry.dispatch().unwrap(), 1);
            assert_eq!(registry.backend().deadline(signal), Some(5 * (beat + 1)));
        }
        assert!(registry.contains(handle));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_dispatches_until_shutdown() {
        let mut registry = ready();
        let fired = Rc::new(Cell::new(0));
        let seen = Rc::clone(&fired);
        registry
            .create(0, 0, move |_| seen.set(seen.get() + 1))
            .unwrap();
        registry.backend_mut().advance(0);

        let invoked = run(
            &mut registry,
            Duration::from_millis(100),
            time::sleep(Duration::from_secs(1)),
        )
        .await
        .unwrap();

        assert_eq!(invoked, 1);
        assert_eq!(fired.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_uninitialized_registry() {
        let mut registry = TimerRegistry::new(ManualBackend::new());
        let result = run(
            &mut registry,
            Duration::from_millis(100),
            time::sleep(Duration::from_secs(1)),
        )
        .await;
        assert!(matches!(result, Err(TimerError::NotInitialized)));
    }
}
