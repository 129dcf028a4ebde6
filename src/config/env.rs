//! Environment variable processing for runtime configuration overrides.
//!
//! Env var prefix: `NUTTX_CRATE_BENCH_`
//!
//! - `NUTTX_CRATE_BENCH_BOOT_TIMEOUT`: boot banner timeout (seconds)
//! - `NUTTX_CRATE_BENCH_PROMPT_TIMEOUT`: first prompt timeout (seconds)
//! - `NUTTX_CRATE_BENCH_ECHO_TIMEOUT`: command echo timeout (seconds)
//! - `NUTTX_CRATE_BENCH_STOP_GRACE`: emulator quit grace period (seconds)
//! - `NUTTX_CRATE_BENCH_SAMPLE_MEMORY`: sample free memory (1/true/yes)
//! - `NUTTX_CRATE_BENCH_NUTTX_PATH`: NuttX source tree
//! - `NUTTX_CRATE_BENCH_BUILD_DIR`: CMake build directory
//! - `NUTTX_CRATE_BENCH_VERBOSE`: enable verbose output (1/true/yes)

use super::Config;
use std::path::PathBuf;
use std::time::Duration;

const PREFIX: &str = "NUTTX_CRATE_BENCH_";

const KEYS: [&str; 8] = [
    "BOOT_TIMEOUT",
    "PROMPT_TIMEOUT",
    "ECHO_TIMEOUT",
    "STOP_GRACE",
    "SAMPLE_MEMORY",
    "NUTTX_PATH",
    "BUILD_DIR",
    "VERBOSE",
];

/// Apply individual env var overrides to a config.
///
/// Each override is applied only if the env var is set and parses correctly.
/// Invalid values are silently ignored.
pub fn apply_env_overrides(config: &mut Config) {
    if let Some(val) = env_duration("BOOT_TIMEOUT") {
        config.session.boot_timeout = val;
    }

    if let Some(val) = env_duration("PROMPT_TIMEOUT") {
        config.session.prompt_timeout = val;
    }

    if let Some(val) = env_duration("ECHO_TIMEOUT") {
        config.session.echo_timeout = val;
    }

    if let Some(val) = env_duration("STOP_GRACE") {
        config.session.stop_grace = val;
    }

    if let Some(val) = env_bool("SAMPLE_MEMORY") {
        config.session.sample_memory = val;
    }

    if let Some(val) = env_str("NUTTX_PATH") {
        config.build.nuttx_path = PathBuf::from(val);
    }

    if let Some(val) = env_str("BUILD_DIR") {
        config.build.build_dir = PathBuf::from(val);
    }

    if let Some(val) = env_bool("VERBOSE") {
        config.verbose = val;
    }
}

/// Summarize which env var overrides are currently active.
pub fn detect_active_overrides() -> Vec<(String, String)> {
    let mut active = Vec::new();
    for key in KEYS {
        let full = format!("{PREFIX}{key}");
        if let Ok(val) = std::env::var(&full) {
            if !val.is_empty() {
                active.push((full, val));
            }
        }
    }
    active
}

// --- helpers ---

fn env_str(suffix: &str) -> Option<String> {
    std::env::var(format!("{PREFIX}{suffix}"))
        .ok()
        .filter(|s| !s.is_empty())
}

fn env_duration(suffix: &str) -> Option<Duration> {
    env_str(suffix)
        .and_then(|s| s.parse::<f64>().ok())
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
}

fn env_bool(suffix: &str) -> Option<bool> {
    env_str(suffix).map(|s| matches!(s.to_lowercase().as_str(), "1" | "true" | "yes"))
}
