//! Session identity and the per-session state the agent loop and context
//! engine share: prompt/iteration counters, the message ledger, and the set
//! of tool names available this session.

use crate::message::Message;
use chrono::Utc;
use uuid::Uuid;

/// `session_<YYYYMMDD_HHMMSS>_<8-hex>`
pub fn generate_session_id() -> String {
    let ts = Utc::now().format("%Y%m%d_%H%M%S");
    let suffix = Uuid::new_v4().simple().to_string();
    format!("session_{}_{}", ts, &suffix[..8])
}

/// `prompt_<N:03d>`
pub fn format_prompt_id(n: u32) -> String {
    format!("prompt_{:03}", n)
}

#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    pub workspace_path: String,
    pub created_at: chrono::DateTime<Utc>,
    pub prompt_counter: u32,
    pub current_prompt_id: String,
    pub current_iteration: u32,
    pub messages: Vec<Message>,
    pub system_prompt: String,
    pub available_tool_names: Vec<String>,
    pub conversation_history_resumed: bool,
}

impl Session {
    pub fn new(workspace_path: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            session_id: generate_session_id(),
            workspace_path: workspace_path.into(),
            created_at: Utc::now(),
            prompt_counter: 0,
            current_prompt_id: format_prompt_id(0),
            current_iteration: 0,
            messages: Vec::new(),
            system_prompt: system_prompt.into(),
            available_tool_names: Vec::new(),
            conversation_history_resumed: false,
        }
    }

    /// Advance to a new user turn: bump the prompt counter, reset the
    /// iteration counter (§3 invariant: "iteration resets to 0 at each new
    /// user message").
    pub fn begin_prompt(&mut self) -> String {
        self.prompt_counter += 1;
        self.current_prompt_id = format_prompt_id(self.prompt_counter);
        self.current_iteration = 0;
        self.current_prompt_id.clone()
    }

    pub fn next_iteration(&mut self) -> u32 {
        self.current_iteration += 1;
        self.current_iteration
    }
}

/// Slugify an absolute workspace path for use as a session-log directory
/// component: leading separator stripped, path separators become `-`,
/// spaces become `_`, and (on Windows) a drive-letter `:` becomes `-`.
pub fn workspace_slug(workspace_path: &str) -> String {
    let trimmed = workspace_path.trim_start_matches(['/', '\\']);
    trimmed
        .chars()
        .map(|c| match c {
            '/' | '\\' => '-',
            ' ' => '_',
            ':' => '-',
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_has_expected_shape() {
        let id = generate_session_id();
        assert!(id.starts_with("session_"));
        let rest = id.strip_prefix("session_").unwrap();
        let parts: Vec<&str> = rest.rsplitn(2, '_').collect();
        assert_eq!(parts[0].len(), 8);
    }

    #[test]
    fn prompt_id_is_zero_padded() {
        assert_eq!(format_prompt_id(1), "prompt_001");
        assert_eq!(format_prompt_id(42), "prompt_042");
    }

    #[test]
    fn begin_prompt_resets_iteration() {
        let mut s = Session::new("/tmp/ws", "sys");
        s.next_iteration();
        s.next_iteration();
        assert_eq!(s.current_iteration, 2);
        let pid = s.begin_prompt();
        assert_eq!(pid, "prompt_001");
        assert_eq!(s.current_iteration, 0);
    }

    #[test]
    fn slug_replaces_separators() {
        assert_eq!(workspace_slug("/home/me/my project"), "home-me-my_project");
    }
}
