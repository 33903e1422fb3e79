//! Leveled console logger behind the `log` facade.
//!
//! Lines look like `2024-05-01 12:00:00.042) [INFO] sigtimer::registry: ...`.
//! Debug and trace records are printed only for targets switched on in
//! [`LoggerConfig::debug_targets`], so noisy subsystems stay quiet unless
//! asked for.

use std::fmt;
use std::io::{self, Write};

use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::OffsetDateTime;

const TIMESTAMP: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]");

const RESET: &str = "\x1b[0m";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggerConfig {
    pub level: LevelFilter,
    /// Target prefixes whose debug/trace records are printed; `*` for all.
    pub debug_targets: Vec<String>,
    pub color: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        LoggerConfig {
            level: LevelFilter::Info,
            debug_targets: Vec::new(),
            color: true,
        }
    }
}

#[derive(Debug)]
pub struct ConsoleLogger {
    config: LoggerConfig,
}

impl ConsoleLogger {
    /// Creates a logger; [`init`] installs it.
    pub fn new(config: LoggerConfig) -> Self {
        ConsoleLogger { config }
    }

    fn debug_enabled(&self, target: &str) -> bool {
        self.config
            .debug_targets
            .iter()
            .any(|enabled| enabled == "*" || target.starts_with(enabled.as_str()))
    }

    fn render(
        &self,
        timestamp: &str,
        level: Level,
        target: &str,
        args: &fmt::Arguments<'_>,
    ) -> String {
        let (label, color) = match level {
            Level::Error => ("ERROR", "\x1b[91m"),
            Level::Warn => ("WARNING", "\x1b[93m"),
            Level::Info => ("INFO", "\x1b[92m"),
            Level::Debug => ("DEBUG", "\x1b[94m"),
            Level::Trace => ("TRACE", "\x1b[95m"),
        };
        if self.config.color {
            format!("{timestamp}) [{color}{label}{RESET}] {target}: {args}")
        } else {
            format!("{timestamp}) [{label}] {target}: {args}")
        }
    }
}

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        if metadata.level() > self.config.level {
            return false;
        }
        match metadata.level() {
            Level::Debug | Level::Trace => self.debug_enabled(metadata.target()),
            _ => true,
        }
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = self.render(&timestamp(), record.level(), record.target(), record.args());
        // one locked write per line keeps concurrent records from interleaving
        let mut out = io::stdout().lock();
        let _ = writeln!(out, "{line}");
    }

    fn flush(&self) {
        let _ = io::stdout().flush();
    }
}

fn timestamp() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    now.format(TIMESTAMP).unwrap_or_default()
}

/// Installs a [`ConsoleLogger`] as the process logger. Fails if a logger
/// is already installed.
pub fn init(config: LoggerConfig) -> Result<(), SetLoggerError> {
    let level = config.level;
    log::set_boxed_logger(Box::new(ConsoleLogger::new(config)))?;
    log::set_max_level(level);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(level: LevelFilter, debug_targets: &[&str]) -> ConsoleLogger {
        ConsoleLogger::new(LoggerConfig {
            level,
            debug_targets: debug_targets.iter().map(|t| t.to_string()).collect(),
            color: false,
        })
    }

    fn metadata(level: Level, target: &str) -> Metadata<'_> {
        Metadata::builder().level(level).target(target).build()
    }

    #[test]
    fn test_render_plain_line() {
        let logger = plain(LevelFilter::Info, &[]);
        let line = logger.render(
            "2024-05-01 12:00:00.042",
            Level::Warn,
            "sigtimer::registry",
            &format_args!("Couldn't dispose {}", "timer#3"),
        );
        assert_eq!(
            line,
            "2024-05-01 12:00:00.042) [WARNING] sigtimer::registry: Couldn't dispose timer#3"
        );
    }

    #[test]
    fn test_render_colored_level() {
        let logger = ConsoleLogger::new(LoggerConfig::default());
        let line = logger.render("t", Level::Error, "app", &format_args!("boom"));
        assert_eq!(line, "t) [\x1b[91mERROR\x1b[0m] app: boom");
    }

    #[test]
    fn test_level_filter_applies() {
        let logger = plain(LevelFilter::Warn, &["*"]);
        assert!(logger.enabled(&metadata(Level::Error, "app")));
        assert!(!logger.enabled(&metadata(Level::Info, "app")));
        assert!(!logger.enabled(&metadata(Level::Debug, "app")));
    }

    #[test]
    fn test_debug_needs_enabled_target() {
        let logger = plain(LevelFilter::Trace, &["sigtimer::backend"]);
        assert!(logger.enabled(&metadata(Level::Debug, "sigtimer::backend::posix")));
        assert!(!logger.enabled(&metadata(Level::Debug, "sigtimer::registry")));
        assert!(logger.enabled(&metadata(Level::Info, "sigtimer::registry")));
    }

    #[test]
    fn test_timestamp_shape() {
        let stamp = timestamp();
        assert_eq!(stamp.len(), "2024-05-01 12:00:00.042".len());
        assert_eq!(&stamp[10..11], " ");
    }
}
