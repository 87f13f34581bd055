// ABOUTME: Shared logging setup for tether binaries
// ABOUTME: Stderr, file and crate-focused tracing subscribers with RUST_LOG overrides

use std::path::PathBuf;

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// RUST_LOG filter with `default` as the floor. With `focus`, that crate
/// logs at `default` and everything else at WARN.
pub fn filter(default: Level, focus: Option<&str>) -> EnvFilter {
    let base = EnvFilter::from_default_env();
    match focus {
        None => base.add_directive(default.into()),
        Some(crate_name) => {
            let directive = format!("{crate_name}={}", default.as_str().to_lowercase());
            base.add_directive(Level::WARN.into())
                .add_directive(directive.parse().unwrap_or_else(|_| default.into()))
        }
    }
}

/// Map `-v` counts onto a level: none is INFO, one DEBUG, more TRACE.
pub fn level_for_verbosity(verbose: u8) -> Level {
    match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Standard logging to stderr at INFO, RUST_LOG override.
pub fn init() {
    init_with_level(Level::INFO);
}

/// Logging to stderr with an explicit floor.
pub fn init_with_level(level: Level) {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter(level, None))
        .try_init();
}

/// Crate-filtered logging to stderr: INFO for `crate_name`, WARN elsewhere.
/// Used by embedders that only want registry events.
pub fn init_for(crate_name: &str) {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter(Level::INFO, Some(crate_name)))
        .try_init();
}

/// Directory holding `app_name`'s log file (~/.config/tether/{app_name}).
pub fn log_dir(app_name: &str) -> Option<PathBuf> {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(dirs::config_dir)?;
    Some(base.join("tether").join(app_name))
}

/// File-based logging at WARN, RUST_LOG override.
/// If setup fails, prints a warning to stderr and continues without logging.
pub fn init_file(app_name: &str) {
    if let Err(e) = init_file_inner(app_name) {
        eprintln!("Warning: failed to set up file logging: {e}");
    }
}

fn init_file_inner(app_name: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let log_dir = log_dir(app_name).ok_or("could not determine config directory")?;
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join(format!("{app_name}.log")))?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(filter(Level::WARN, None))
        .with_ansi(false)
        .try_init()?;

    Ok(())
}
