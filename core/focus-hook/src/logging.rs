//! File logging for the hook.
//!
//! The hook runs inside the agent's hook pipeline, where stdout/stderr are
//! either parsed or shown to the user, so everything goes to a daily-rotated
//! file instead: `<stateDir>/logs/hook.log.<date>`.

use std::env;

use focus_core::StorageConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const LOG_FILE_PREFIX: &str = "hook.log";

/// Installs the global subscriber. The returned guard flushes buffered lines
/// on drop and must live until the process exits. `None` when the log
/// directory cannot be created; the hook then runs silently.
pub fn init(storage: &StorageConfig) -> Option<WorkerGuard> {
    let dir = storage.logs_dir();
    if fs_err::create_dir_all(&dir).is_err() {
        return None;
    }

    let debug_enabled = env::var("AGENT_FOCUS_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let appender = tracing_appender::rolling::daily(&dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .ok()?;
    Some(guard)
}
