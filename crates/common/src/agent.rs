//! The boundary between the coordination core and the analysis layer.
//!
//! The core never constructs analysis context content and never calls an
//! LLM directly. It passes whatever context it is given to an
//! [`AnalysisAgent`] and records the result. What the agent does inside
//! `run` (prompts, heuristics, tooling) is out of scope here.

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Opaque analysis input passed through to agents.
///
/// `content` doubles as the retrieval query input for memory lookups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentContext {
    /// Source context under analysis (code excerpt, diff, description)
    pub content: String,

    /// Project the context belongs to
    pub project: String,

    /// Detected language, if known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    /// Domain label (e.g. "backend", "infra")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    /// Measured complexity of the context, if available
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complexity: Option<f64>,

    /// Extra metadata the caller wants forwarded untouched
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
}

impl AgentContext {
    pub fn new(project: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            project: project.into(),
            language: None,
            domain: None,
            complexity: None,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_complexity(mut self, complexity: f64) -> Self {
        self.complexity = Some(complexity);
        self
    }
}

/// A single observation an agent reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    /// Short human-readable summary
    pub summary: String,

    /// Pattern category the finding belongs to (e.g. "security",
    /// "complexity")
    pub pattern_type: String,

    /// Full serialized payload
    pub detail: String,
}

impl Finding {
    pub fn new(
        pattern_type: impl Into<String>,
        summary: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            summary: summary.into(),
            pattern_type: pattern_type.into(),
            detail: detail.into(),
        }
    }
}

/// Result of one agent's run within a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    /// Agent that produced the result
    pub agent_id: String,

    /// Findings to record and write back to memory
    pub findings: Vec<Finding>,

    /// The agent's own confidence estimate for this run
    pub confidence: f64,

    /// Completion timestamp (Unix millis)
    pub completed_at: u64,
}

impl AgentResult {
    pub fn new(agent_id: impl Into<String>, findings: Vec<Finding>, confidence: f64) -> Self {
        Self {
            agent_id: agent_id.into(),
            findings,
            confidence: confidence.clamp(0.0, 1.0),
            completed_at: crate::now_millis(),
        }
    }
}

/// The `run_agent` interface the core consumes.
///
/// Implementations live in the analysis layer and may take arbitrarily
/// long; the core never blocks on agent-internal work while holding
/// anything other than the agent's own resource lock.
#[async_trait]
pub trait AnalysisAgent: Send + Sync {
    /// Unique agent identifier, stable across a session.
    fn id(&self) -> &str;

    /// Run the analysis for a session and return the result.
    async fn run(&self, session_id: &str, context: &AgentContext) -> Result<AgentResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_builder() {
        let ctx = AgentContext::new("proj", "fn main() {}")
            .with_language("rust")
            .with_domain("backend")
            .with_complexity(3.5);

        assert_eq!(ctx.project, "proj");
        assert_eq!(ctx.language.as_deref(), Some("rust"));
        assert_eq!(ctx.domain.as_deref(), Some("backend"));
        assert_eq!(ctx.complexity, Some(3.5));
    }

    #[test]
    fn test_result_confidence_clamped() {
        let result = AgentResult::new("a1", vec![], 1.7);
        assert_eq!(result.confidence, 1.0);

        let result = AgentResult::new("a1", vec![], -0.2);
        assert_eq!(result.confidence, 0.0);
    }
}
