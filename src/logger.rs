//! Logging setup, matching the teacher's `log4rs`-based rolling-file recipe.
//!
//! The orchestrator owns process-wide logging configuration in general; this
//! module gives it one call, [`init_for_snapshot_root`], that wires up a
//! rolling app log plus the dedicated `core::transfer` target used for
//! per-chunk trace logging, so transfer tracing can be toggled independently
//! of the root level.

use std::path::Path;

use log::LevelFilter;
use log4rs::append::rolling_file::RollingFileAppender;
use log4rs::append::rolling_file::policy::compound::CompoundPolicy;
use log4rs::append::rolling_file::policy::compound::roll::fixed_window::FixedWindowRoller;
use log4rs::append::rolling_file::policy::compound::trigger::size::SizeTrigger;
use log4rs::config::{Appender, Config, Logger, Root};
use log4rs::encode::pattern::PatternEncoder;

const ENCODER_PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S%.3f)} [{l}] {t} - {m}{n}";
const ROLL_SIZE_BYTES: u64 = 10 * 1024 * 1024;
const ROLL_KEEP: u32 = 7;
/// Logger target dedicated to per-chunk transmission tracing.
pub const TRANSFER_TARGET: &str = "core::transfer";

/// Initializes logging rooted at `{root}/_logs/`: a rolling `core.log` at
/// `level`, plus a `core::transfer` logger routed to its own rolling
/// `transfer.log` at `TRACE` so chunk-level tracing can stay on even when
/// the root level is `info`.
///
/// # Errors
/// Returns an error if the log directory cannot be created or the rolling
/// appenders cannot be built.
pub fn init_for_snapshot_root(
    root: &Path,
    level: LevelFilter,
) -> Result<(), Box<dyn std::error::Error>> {
    let log_dir = root.join("_logs");
    std::fs::create_dir_all(&log_dir)?;

    let app_appender = rolling_appender(&log_dir, "core")?;
    let transfer_appender = rolling_appender(&log_dir, "transfer")?;

    let config = Config::builder()
        .appender(Appender::builder().build("app", Box::new(app_appender)))
        .appender(Appender::builder().build("transfer", Box::new(transfer_appender)))
        .logger(
            Logger::builder()
                .appender("transfer")
                .additive(false)
                .build(TRANSFER_TARGET, LevelFilter::Trace),
        )
        .build(Root::builder().appender("app").build(level))?;
    log4rs::init_config(config)?;
    Ok(())
}

fn rolling_appender(
    log_dir: &Path,
    stem: &str,
) -> Result<RollingFileAppender, Box<dyn std::error::Error>> {
    let pattern = format!("{}", log_dir.join(format!("{stem}.{{}}.log")).display());
    let roller = FixedWindowRoller::builder().build(&pattern, ROLL_KEEP)?;
    let policy = CompoundPolicy::new(Box::new(SizeTrigger::new(ROLL_SIZE_BYTES)), Box::new(roller));
    let appender = RollingFileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(ENCODER_PATTERN)))
        .build(log_dir.join(format!("{stem}.log")), Box::new(policy))?;
    Ok(appender)
}

/// Reads `SNAPSHOT_CORE_LOG_DIR` / `SNAPSHOT_CORE_LOG_LEVEL` from the
/// environment and initializes logging if `SNAPSHOT_CORE_LOG_DIR` is set.
/// Intended for test harnesses and small example binaries; a real
/// orchestrator calls [`init_for_snapshot_root`] directly with its own root.
pub fn configure_from_env() {
    let Ok(dir) = std::env::var("SNAPSHOT_CORE_LOG_DIR") else { return };
    let level = std::env::var("SNAPSHOT_CORE_LOG_LEVEL")
        .ok()
        .and_then(|s| s.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Info);
    let _ = init_for_snapshot_root(Path::new(&dir), level);
}
