//! Environment Probe: a point-in-time snapshot of OS, cwd, and VCS state
//! folded into the system prompt so the model knows what it's operating on.

use serde::Serialize;
use std::path::Path;
use std::process::Command;

#[derive(Debug, Clone, Serialize)]
pub struct EnvironmentSnapshot {
    pub os_type: String,
    pub os_version: String,
    pub runtime_version: String,
    pub cwd: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_status: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiffInfo {
    pub stats: String,
    pub files: Vec<String>,
    pub unified_diff: String,
}

fn run_git(cwd: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).current_dir(cwd).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

pub fn snapshot(workspace_path: &str) -> EnvironmentSnapshot {
    let cwd_path = Path::new(workspace_path);
    EnvironmentSnapshot {
        os_type: std::env::consts::OS.to_string(),
        os_version: os_version(),
        runtime_version: rustc_version(),
        cwd: workspace_path.to_string(),
        git_branch: run_git(cwd_path, &["rev-parse", "--abbrev-ref", "HEAD"]),
        git_status: run_git(cwd_path, &["status", "--short"]),
    }
}

fn rustc_version() -> String {
    Command::new("rustc")
        .arg("--version")
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn os_version() -> String {
    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/etc/os-release")
            .ok()
            .and_then(|s| {
                s.lines()
                    .find(|l| l.starts_with("PRETTY_NAME="))
                    .map(|l| l.trim_start_matches("PRETTY_NAME=").trim_matches('"').to_string())
            })
            .unwrap_or_else(|| "linux".to_string())
    }
    #[cfg(not(target_os = "linux"))]
    {
        std::env::consts::OS.to_string()
    }
}

/// Collected on demand at session end, not as part of the per-turn snapshot.
pub fn diff_info(workspace_path: &str) -> Option<DiffInfo> {
    let cwd_path = Path::new(workspace_path);
    let stats = run_git(cwd_path, &["diff", "--stat"])?;
    let files = run_git(cwd_path, &["diff", "--name-only"])
        .map(|s| s.lines().map(str::to_string).collect())
        .unwrap_or_default();
    let unified_diff = run_git(cwd_path, &["diff"]).unwrap_or_default();
    Some(DiffInfo {
        stats,
        files,
        unified_diff,
    })
}

/// Render the snapshot as the human-readable section the context engine
/// appends to the system prompt.
pub fn render(snapshot: &EnvironmentSnapshot) -> String {
    let mut lines = vec![
        format!("OS: {} ({})", snapshot.os_type, snapshot.os_version),
        format!("Runtime: {}", snapshot.runtime_version),
        format!("Working directory: {}", snapshot.cwd),
    ];
    if let Some(branch) = &snapshot.git_branch {
        lines.push(format!("Git branch: {}", branch));
    }
    if let Some(status) = &snapshot.git_status {
        lines.push(format!("Git status:\n{}", status));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_cwd() {
        let snap = EnvironmentSnapshot {
            os_type: "linux".into(),
            os_version: "test".into(),
            runtime_version: "1.0".into(),
            cwd: "/tmp/ws".into(),
            git_branch: Some("main".into()),
            git_status: None,
        };
        let rendered = render(&snap);
        assert!(rendered.contains("/tmp/ws"));
        assert!(rendered.contains("main"));
    }
}
