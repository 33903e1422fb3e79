use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser};
use log::{error, info};

use sigtimer::driver::{self, Settings};
use sigtimer::version::{self, VersionInfo};
use sigtimer::{logger, Config};
#[cfg(target_os = "linux")]
use sigtimer::{PosixBackend, TimerRegistry};

#[derive(Parser, Debug)]
#[command(version, about = "Runs a signal-timer registry until interrupted")]
struct Cli {
    /// key=value configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Heartbeat period in seconds, 0 to disable
    #[arg(long)]
    heartbeat: Option<u32>,

    /// Raise the log level (-v debug, -vv trace); without --debug this
    /// opens every target
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Print debug records for this target prefix (repeatable, `*` for all)
    #[arg(long = "debug", value_name = "TARGET")]
    debug_targets: Vec<String>,

    /// Print version and build information, then exit
    #[arg(long)]
    build_info: bool,
}

impl Cli {
    fn apply(&self, settings: &mut Settings) {
        if let Some(seconds) = self.heartbeat {
            settings.heartbeat_seconds = seconds;
        }
        settings.debug_targets.extend(self.debug_targets.iter().cloned());
        settings.raise_verbosity(self.verbose);
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if cli.build_info {
        println!("{}", VersionInfo::current().long());
        return ExitCode::SUCCESS;
    }

    let settings = match cli.config.as_ref().map(Config::from_file).transpose() {
        Ok(Some(config)) => Settings::from_config(&config),
        Ok(None) => Ok(Settings::default()),
        Err(e) => Err(e),
    };
    let mut settings = match settings {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("main: Couldn't read configuration => Quit. {e}");
            return ExitCode::from(2);
        }
    };
    cli.apply(&mut settings);

    if let Err(e) = logger::init(settings.logger_config()) {
        eprintln!("main: Couldn't initialize log component => Quit. {e}");
        return ExitCode::from(2);
    }
    info!("Start APP with pid {}", std::process::id());
    version::log_version();

    match serve(&settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(target_os = "linux")]
async fn serve(settings: &Settings) -> Result<(), Box<dyn Error>> {
    let mut registry = TimerRegistry::new(PosixBackend::new()?);
    registry.init()?;
    if settings.heartbeat_seconds > 0 {
        driver::start_heartbeat(&mut registry, settings.heartbeat_seconds)?;
    }

    info!("The program has started. Use CTRL-C for stopping.");
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Couldn't listen for CTRL-C: {e}");
        }
    };
    let dispatched = driver::run(&mut registry, settings.dispatch_period, shutdown).await;
    info!("Interruption signal received. Stop APP.");

    registry.breakdown()?;
    let dispatched = dispatched?;
    info!("{dispatched} timer expirations dispatched");
    Ok(())
}

#[cfg(not(target_os = "linux"))]
async fn serve(_settings: &Settings) -> Result<(), Box<dyn Error>> {
    Err("POSIX real-time signal timers need Linux".into())
}
