//! Local executor surface: chat session persistence (sessions, transcripts,
//! per-agent memory index) plus the stdio JSON-RPC handlers in [`rpc`].
//!
//! Thin re-export over the extracted `skilllite-executor` crate so callers
//! inside this binary can keep writing `crate::executor::...` while the
//! storage logic itself lives in the shared crate.

pub mod memory;
pub mod rpc;
pub mod transcript;

pub use skilllite_executor::session;
pub use skilllite_executor::{chat_root, workspace_root};
