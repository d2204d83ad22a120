//! `bash`: one long-lived shell process per session, bound to the
//! workspace root. A dedicated reader thread pumps merged stdout/stderr
//! into a queue; the foreground execute() call drains it until the
//! end-marker appears or the timeout elapses. State (env vars, cwd, shell
//! functions, venv activations) persists across calls because it's the
//! same shell process.
//!
//! The timeout does NOT kill the underlying command (§9 design note): if a
//! command runs long, a subsequent command's output may interleave with
//! the stale command's output. This is an accepted upstream caveat, not a
//! bug we're asked to fix.

use regex::Regex;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum BashError {
    #[error("failed to spawn shell: {0}")]
    Spawn(String),
    #[error("shell stdin closed")]
    StdinClosed,
}

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub output: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

pub struct PersistentShell {
    child: Mutex<Child>,
    stdin_writer: Mutex<std::process::ChildStdin>,
    output_rx: Mutex<Receiver<String>>,
    end_marker_prefix: String,
}

impl PersistentShell {
    /// Launch a POSIX shell with no init files, override the prompt to a
    /// unique marker, disable history, and drain the initial banner output.
    pub fn spawn(workspace_root: &std::path::Path) -> Result<Arc<Self>, BashError> {
        let session_tag = Uuid::new_v4().simple().to_string();
        let mut child = Command::new("sh")
            .arg("--noprofile")
            .arg("--norc")
            .current_dir(workspace_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env("HISTFILE", "/dev/null")
            .env("PS1", format!("SKILLBOX_PROMPT_{session_tag}> "))
            .spawn()
            .map_err(|e| BashError::Spawn(e.to_string()))?;

        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");
        let stdin = child.stdin.take().expect("piped stdin");

        let (tx, rx) = mpsc::channel::<String>();

        let tx_out = tx.clone();
        std::thread::spawn(move || {
            let reader = BufReader::new(stdout);
            for line in reader.lines().map_while(Result::ok) {
                if tx_out.send(line).is_err() {
                    break;
                }
            }
        });
        std::thread::spawn(move || {
            let reader = BufReader::new(stderr);
            for line in reader.lines().map_while(Result::ok) {
                if tx.send(line).is_err() {
                    break;
                }
            }
        });

        let shell = Arc::new(Self {
            child: Mutex::new(child),
            stdin_writer: Mutex::new(stdin),
            output_rx: Mutex::new(rx),
            end_marker_prefix: format!("__SKILLBOX_END_{session_tag}__"),
        });

        // Drain whatever banner output the shell prints on startup.
        shell.drain_until_settled(Duration::from_millis(200));
        Ok(shell)
    }

    fn drain_until_settled(&self, quiet_for: Duration) {
        let rx = self.output_rx.lock().unwrap();
        loop {
            match rx.recv_timeout(quiet_for) {
                Ok(_) => continue,
                Err(_) => break,
            }
        }
    }

    /// Execute one command. Appends an exit-code and end-marker echo so the
    /// reader can detect completion, then drains output lines until the
    /// marker appears or `timeout` elapses.
    pub fn execute(&self, command: &str, timeout: Duration) -> Result<CommandResult, BashError> {
        let marker = format!("{}{}", self.end_marker_prefix, Uuid::new_v4().simple());
        let wrapped = format!("{command}\necho \"EXIT_CODE=$?\"\necho \"{marker}\"\n");

        {
            let mut stdin = self.stdin_writer.lock().unwrap();
            stdin
                .write_all(wrapped.as_bytes())
                .map_err(|_| BashError::StdinClosed)?;
            stdin.flush().map_err(|_| BashError::StdinClosed)?;
        }

        let exit_re = Regex::new(r"^EXIT_CODE=(-?\d+)$").unwrap();
        let mut lines = Vec::new();
        let mut exit_code = None;
        let deadline = Instant::now() + timeout;

        let rx = self.output_rx.lock().unwrap();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(CommandResult {
                    output: lines.join("\n"),
                    exit_code: None,
                    timed_out: true,
                });
            }
            match rx.recv_timeout(remaining) {
                Ok(line) if line == marker => break,
                Ok(line) => {
                    if let Some(caps) = exit_re.captures(&line) {
                        exit_code = caps.get(1).and_then(|m| m.as_str().parse().ok());
                    } else {
                        lines.push(line);
                    }
                }
                Err(_) => {
                    return Ok(CommandResult {
                        output: lines.join("\n"),
                        exit_code: None,
                        timed_out: true,
                    });
                }
            }
        }

        Ok(CommandResult {
            output: lines.join("\n"),
            exit_code,
            timed_out: false,
        })
    }

    /// SIGTERM the shell, wait with a small grace period, SIGKILL on
    /// timeout.
    pub fn shutdown(&self) {
        let mut child = self.child.lock().unwrap();
        #[cfg(unix)]
        {
            let _ = unsafe { libc_kill(child.id() as i32, 15 /* SIGTERM */) };
        }
        let deadline = Instant::now() + Duration::from_millis(500);
        loop {
            match child.try_wait() {
                Ok(Some(_)) => return,
                Ok(None) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(20));
                }
                _ => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return;
                }
            }
        }
    }
}

#[cfg(unix)]
unsafe fn libc_kill(pid: i32, sig: i32) -> i32 {
    extern "C" {
        fn kill(pid: i32, sig: i32) -> i32;
    }
    kill(pid, sig)
}

/// Command-policy filter (§4.4). Disallow-patterns are checked first;
/// allow-patterns auto-approve; neither matching falls through to normal
/// confirmation.
pub struct CommandPolicy {
    pub disallow: Vec<Regex>,
    pub allow: Vec<Regex>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    Disallowed,
    AutoApproved,
    NeedsConfirmation,
}

impl CommandPolicy {
    pub fn evaluate(&self, command: &str) -> PolicyDecision {
        if self.disallow.iter().any(|re| re.is_match(command)) {
            return PolicyDecision::Disallowed;
        }
        if self.allow.iter().any(|re| re.is_match(command)) {
            return PolicyDecision::AutoApproved;
        }
        PolicyDecision::NeedsConfirmation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_disallow_wins_over_allow() {
        let policy = CommandPolicy {
            disallow: vec![Regex::new(r"^rm\b").unwrap()],
            allow: vec![Regex::new(r"^rm\b").unwrap()],
        };
        assert_eq!(policy.evaluate("rm -rf /"), PolicyDecision::Disallowed);
    }

    #[test]
    fn policy_allow_auto_approves() {
        let policy = CommandPolicy {
            disallow: vec![],
            allow: vec![Regex::new(r"^ls\b").unwrap()],
        };
        assert_eq!(policy.evaluate("ls -la"), PolicyDecision::AutoApproved);
    }

    #[test]
    fn policy_defaults_to_confirmation() {
        let policy = CommandPolicy {
            disallow: vec![],
            allow: vec![],
        };
        assert_eq!(policy.evaluate("anything"), PolicyDecision::NeedsConfirmation);
    }

    #[test]
    #[cfg_attr(not(unix), ignore)]
    fn persists_env_vars_across_calls() {
        let dir = tempfile::tempdir().unwrap();
        let shell = PersistentShell::spawn(dir.path()).unwrap();
        let r1 = shell.execute("export FOO=bar", Duration::from_secs(5)).unwrap();
        assert_eq!(r1.exit_code, Some(0));
        let r2 = shell.execute("echo $FOO", Duration::from_secs(5)).unwrap();
        assert!(r2.output.contains("bar"));
        assert_eq!(r2.exit_code, Some(0));
        shell.shutdown();
    }
}
