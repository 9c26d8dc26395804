//! Structured logging setup.
//!
//! Everything in the crate logs through `tracing`. The binary installs a
//! subscriber writing to `~/.tasklane/tasklane.log`:
//! - ERROR/WARN: failed reclaims, persistence write failures
//! - INFO: claims, completions, failures, applied resolutions
//! - DEBUG: rejected operations, sweep and analysis details
//!
//! Debug mode can be enabled with `--debug` flag or `TASKLANE_DEBUG=1` env var.
//! `RUST_LOG` takes precedence over both when set.

use std::fs::File;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::Result;

/// Environment variable that switches on debug logging.
pub const DEBUG_ENV: &str = "TASKLANE_DEBUG";

/// Whether debug logging was requested by flag or environment.
pub fn debug_requested(flag: bool) -> bool {
    flag || std::env::var(DEBUG_ENV)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Default filter directive for the requested mode.
pub fn default_directive(debug: bool) -> &'static str {
    if debug {
        "tasklane=debug"
    } else {
        "tasklane=info"
    }
}

fn build_filter(debug: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(debug)))
}

/// Install the global subscriber, truncating the log file on startup.
pub fn init(debug: bool) -> Result<()> {
    init_at(&Config::log_path()?, debug)
}

/// [`init`] against an explicit log file.
pub fn init_at(path: &Path, debug: bool) -> Result<()> {
    let debug_mode = debug_requested(debug);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(build_filter(debug_mode))
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .try_init();

    tracing::info!(path = %path.display(), debug = debug_mode, "logging initialized");
    Ok(())
}
