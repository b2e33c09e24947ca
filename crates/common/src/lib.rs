//! Shared types for the cortex coordination core.
//!
//! This crate holds the pieces both the memory and coordinator crates
//! reference without circular dependencies: the error taxonomy, progress
//! events, and the agent boundary.

pub mod agent;
pub mod error;
pub mod event;

pub use agent::{AgentContext, AgentResult, AnalysisAgent, Finding};
pub use error::{CortexError, Result};
pub use event::{ProgressEvent, ProgressEventType};

/// Current Unix time in milliseconds.
pub fn now_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Generate a fresh id with the given prefix.
pub fn new_id(prefix: &str) -> String {
    format!("{}_{}", prefix, uuid::Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_id_unique() {
        assert_ne!(new_id("rec"), new_id("rec"));
    }

    #[test]
    fn test_new_id_prefixed() {
        assert!(new_id("session").starts_with("session_"));
    }
}
