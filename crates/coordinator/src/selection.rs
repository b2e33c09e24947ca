//! Agent selection strategies.
//!
//! The session coordinator is agnostic to how agents are picked for a
//! context: both implementations sit behind [`SelectionStrategy`] and
//! are interchangeable via configuration.

use cortex_common::AgentContext;
use tracing::debug;

/// Decides which of the available agents should run for a context.
pub trait SelectionStrategy: Send + Sync {
    /// Returns agent ids in execution order. Every returned id must be
    /// present in `available`; an empty result means "run all".
    fn select(&self, context: &AgentContext, available: &[String]) -> Vec<String>;
}

/// One keyword-to-agent routing rule.
#[derive(Debug, Clone)]
pub struct SelectionRule {
    pub keyword: String,
    pub agent_id: String,
}

impl SelectionRule {
    pub fn new(keyword: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            agent_id: agent_id.into(),
        }
    }
}

/// Keyword-based selection: an agent is picked when any of its rule
/// keywords appears in the context content.
pub struct RuleBasedSelection {
    rules: Vec<SelectionRule>,
}

impl RuleBasedSelection {
    pub fn new(rules: Vec<SelectionRule>) -> Self {
        Self { rules }
    }

    /// Routing rules for the stock analysis agents.
    pub fn default_rules() -> Vec<SelectionRule> {
        [
            ("unsafe", "security"),
            ("password", "security"),
            ("credential", "security"),
            ("injection", "security"),
            ("auth", "security"),
            ("nested", "complexity"),
            ("loop", "complexity"),
            ("cyclomatic", "complexity"),
            ("branch", "complexity"),
            ("interface", "design"),
            ("coupling", "design"),
            ("trait", "design"),
            ("dependency", "design"),
        ]
        .into_iter()
        .map(|(keyword, agent)| SelectionRule::new(keyword, agent))
        .collect()
    }
}

impl Default for RuleBasedSelection {
    fn default() -> Self {
        Self::new(Self::default_rules())
    }
}

impl SelectionStrategy for RuleBasedSelection {
    fn select(&self, context: &AgentContext, available: &[String]) -> Vec<String> {
        let content = context.content.to_lowercase();

        let mut selected: Vec<String> = Vec::new();
        for rule in &self.rules {
            if content.contains(&rule.keyword)
                && available.iter().any(|a| a == &rule.agent_id)
                && !selected.contains(&rule.agent_id)
            {
                selected.push(rule.agent_id.clone());
            }
        }

        // No rule matched: run everything rather than nothing.
        if selected.is_empty() {
            selected = available.to_vec();
        }

        debug!(selected = ?selected, "Rule-based agent selection");
        selected
    }
}

/// Planner-delegated selection: an externally supplied planner (for
/// example an LLM-backed one) proposes the agent set; the strategy only
/// sanitizes its output against the available agents.
pub struct PlannerSelection {
    planner: Box<dyn Fn(&AgentContext, &[String]) -> Vec<String> + Send + Sync>,
}

impl PlannerSelection {
    pub fn new(
        planner: impl Fn(&AgentContext, &[String]) -> Vec<String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            planner: Box::new(planner),
        }
    }
}

impl SelectionStrategy for PlannerSelection {
    fn select(&self, context: &AgentContext, available: &[String]) -> Vec<String> {
        let proposed = (self.planner)(context, available);

        let mut selected = Vec::new();
        for agent_id in proposed {
            if available.contains(&agent_id) && !selected.contains(&agent_id) {
                selected.push(agent_id);
            }
        }

        if selected.is_empty() {
            selected = available.to_vec();
        }

        debug!(selected = ?selected, "Planner-based agent selection");
        selected
    }
}
