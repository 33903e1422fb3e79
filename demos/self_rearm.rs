//! A one-shot timer, a self re-arming countdown and a timer that disposes
//! itself, all on real signals. Stops after ten seconds or on CTRL-C.

#[cfg(target_os = "linux")]
use std::time::Duration;

#[cfg(target_os = "linux")]
use log::{info, LevelFilter};
#[cfg(target_os = "linux")]
use sigtimer::logger::{self, LoggerConfig};
#[cfg(target_os = "linux")]
use sigtimer::{driver, PosixBackend, TimerRegistry};

#[cfg(not(target_os = "linux"))]
fn main() {
    eprintln!("self_rearm needs POSIX real-time signal timers (Linux)");
}

#[cfg(target_os = "linux")]
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logger::init(LoggerConfig {
        level: LevelFilter::Debug,
        debug_targets: vec!["sigtimer".into()],
        color: true,
    })?;

    let mut registry = TimerRegistry::new(PosixBackend::new()?);
    registry.init()?;

    // 1. One-shot timer
    registry.create(2, 0, |expiry| {
        info!("One-shot timer {} expired", expiry.handle());
    })?;

    // 2. Countdown that re-arms itself every second
    let mut remaining = 5;
    registry.create(1, 0, move |expiry| {
        remaining -= 1;
        info!("Countdown: {remaining}");
        if remaining > 0 {
            let _ = expiry.set_time(1);
        } else {
            let _ = expiry.dispose();
        }
    })?;

    // 3. Context travels with the signal
    registry.create(3, 0xC0FFEE, |expiry| {
        info!("Context {:#x} on {}", expiry.context(), expiry.signal());
        let _ = expiry.dispose();
    })?;

    let shutdown = async {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(10)) => {}
            _ = tokio::signal::ctrl_c() => {}
        }
    };
    let dispatched = driver::run(&mut registry, Duration::from_millis(50), shutdown).await?;
    info!("{dispatched} expirations, statistics {:?}", registry.statistics());

    registry.breakdown()?;
    Ok(())
}
