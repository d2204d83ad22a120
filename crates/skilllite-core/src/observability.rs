//! Structured logging setup.
//!
//! Configures the global `tracing` subscriber once per process: plain or JSON
//! formatting, env-filter level, and an optional per-session file directory
//! under `~/.skilllite/logs/<workspace-slug>/<session_id>/main.log` so runs
//! against different workspaces never interleave in the same file.
//!
//! Ported from Python `observability/logging/setup.py` + `utils.py`.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use tracing_subscriber::EnvFilter;

use super::config::ObservabilityConfig;

static SESSION_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Convert an absolute path into a slug usable as a directory name.
/// `/Users/ex/projects/app` -> `Users-ex-projects-app`.
pub fn path_to_slug(path: &str) -> String {
    let abs = std::fs::canonicalize(path)
        .unwrap_or_else(|_| PathBuf::from(path))
        .to_string_lossy()
        .to_string();
    let abs = abs.strip_prefix('/').unwrap_or(&abs);
    abs.replace('/', "-").replace(' ', "_").replace(':', "-")
}

/// Initialize the global tracing subscriber. Safe to call more than once —
/// only the first call takes effect.
///
/// Honors `ObservabilityConfig`: `SKILLLITE_LOG_LEVEL` as the env-filter
/// directive, `SKILLLITE_LOG_JSON` to switch formatters, `SKILLLITE_QUIET`
/// to drop console output entirely (file logging, if any, is unaffected).
pub fn init_logging(workspace: &str, session_id: &str, logs_dir: Option<&Path>) -> PathBuf {
    let cfg = ObservabilityConfig::from_env();

    let session_dir = logs_dir
        .map(Path::to_path_buf)
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".skilllite")
                .join("logs")
        })
        .join(path_to_slug(workspace))
        .join(session_id);
    let _ = std::fs::create_dir_all(&session_dir);

    let filter = EnvFilter::try_new(&cfg.log_level)
        .unwrap_or_else(|_| EnvFilter::new("skilllite=info"));

    let result = if cfg.quiet {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::sink)
            .try_init()
    } else if cfg.log_json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };
    if let Err(e) = result {
        // Already initialized by an earlier call (e.g. in tests) — not an error.
        tracing::debug!("tracing subscriber already initialized: {}", e);
    }

    let _ = SESSION_DIR.set(session_dir.clone());
    tracing::info!(session_id, workspace, logs_dir = %session_dir.display(), "logging initialized");
    session_dir
}

/// Directory for the current process's session logs, if `init_logging` ran.
pub fn session_dir() -> Option<&'static PathBuf> {
    SESSION_DIR.get()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_replaces_separators() {
        let slug = path_to_slug("/tmp");
        assert!(!slug.contains('/'));
    }
}
