//! Session lifecycle: state machine, coordination API, and the
//! execution driver.
//!
//! All session mutation goes through [`SessionCoordinator`]; nothing
//! else touches session state. Transitions are committed under the
//! session's own lock and the matching progress event is published
//! before that lock is dropped, so events for a session always arrive
//! in commit order.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use cortex_common::{
    new_id, now_millis, AgentContext, AgentResult, AnalysisAgent, CortexError, ProgressEvent,
    Result,
};
use cortex_memory::{MemoryRecord, MemoryStore, Observation, PartitionManager};

use crate::broadcast::{Broadcaster, ChannelBroadcaster, ReplayBroadcaster, Subscription};
use crate::config::{BroadcasterKind, CoordinatorConfig, ExecutionMode, SelectionKind};
use crate::lock::{lock_key, LockManager};
use crate::selection::{RuleBasedSelection, SelectionStrategy};

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Initializing,
    Planning,
    Executing,
    Validating,
    Learning,
    Completed,
    Failed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Initializing => "initializing",
            SessionState::Planning => "planning",
            SessionState::Executing => "executing",
            SessionState::Validating => "validating",
            SessionState::Learning => "learning",
            SessionState::Completed => "completed",
            SessionState::Failed => "failed",
        }
    }

    /// Whether `self -> to` is a legal edge of the state machine.
    ///
    /// `Failed -> Planning` is legal here; the single-retry budget is
    /// enforced by the coordinator, not the table.
    pub fn can_transition(self, to: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, to),
            (Initializing, Planning)
                | (Planning, Executing)
                | (Executing, Validating)
                | (Validating, Learning)
                | (Learning, Completed)
                | (Initializing, Failed)
                | (Planning, Failed)
                | (Executing, Failed)
                | (Validating, Failed)
                | (Learning, Failed)
                | (Failed, Planning)
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One committed transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: SessionState,
    pub to: SessionState,
    pub at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// One end-to-end coordinated analysis run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,

    pub state: SessionState,

    /// Analysis input, passed through to agents and used for memory
    /// write-back
    pub context: AgentContext,

    /// Agent ids expected to report
    pub participants: BTreeSet<String>,

    /// Agent ids that have reported
    pub completed: BTreeSet<String>,

    /// Committed execution plan, in order
    pub plan: Vec<String>,

    pub started_at: u64,

    /// Set when the session reaches a terminal state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<u64>,

    /// Every committed transition, in order
    pub history: Vec<TransitionRecord>,

    /// Last error or warning recorded on the session
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// True when validation started on a timeout rather than full
    /// participant reporting
    pub partial_completion: bool,

    /// Whether the single automatic failure retry has been spent
    pub retry_used: bool,

    /// Results recorded so far
    pub results: Vec<AgentResult>,
}

impl Session {
    fn new(session_id: String, context: AgentContext, participants: Vec<String>) -> Self {
        Self {
            session_id,
            state: SessionState::Initializing,
            context,
            participants: participants.into_iter().collect(),
            completed: BTreeSet::new(),
            plan: Vec::new(),
            started_at: now_millis(),
            finished_at: None,
            history: Vec::new(),
            last_error: None,
            partial_completion: false,
            retry_used: false,
            results: Vec::new(),
        }
    }

    /// When the session last entered `Executing`, if it has.
    fn executing_since(&self) -> Option<u64> {
        self.history
            .iter()
            .rev()
            .find(|t| t.to == SessionState::Executing)
            .map(|t| t.at)
    }
}

/// Owns all sessions and the coordination primitives around them.
pub struct SessionCoordinator {
    config: CoordinatorConfig,
    sessions: DashMap<String, Arc<Mutex<Session>>>,
    locks: LockManager,
    broadcaster: Arc<dyn Broadcaster>,
    selection: Box<dyn SelectionStrategy>,
    partitions: PartitionManager,
    store: Arc<MemoryStore>,
}

impl SessionCoordinator {
    pub fn new(config: CoordinatorConfig, store: Arc<MemoryStore>) -> Result<Self> {
        config.validate()?;

        info!(
            execution_mode = ?config.execution_mode,
            broadcaster = ?config.broadcaster,
            lock_ttl_ms = config.lock_ttl_ms,
            "Initializing session coordinator"
        );

        let broadcaster: Arc<dyn Broadcaster> = match config.broadcaster {
            BroadcasterKind::Channel => Arc::new(ChannelBroadcaster::new()),
            BroadcasterKind::Replay => Arc::new(ReplayBroadcaster::new(config.replay_buffer)),
        };

        let selection: Box<dyn SelectionStrategy> = match config.selection {
            SelectionKind::Rules => Box::new(RuleBasedSelection::default()),
            SelectionKind::Planner => {
                // A planner needs a callback; install one via
                // `with_selection`. Until then route by rules.
                warn!("Planner selection configured without a planner, using rules");
                Box::new(RuleBasedSelection::default())
            }
        };

        let partitions = PartitionManager::new(config.memory.partition.clone());

        Ok(Self {
            config,
            sessions: DashMap::new(),
            locks: LockManager::new(),
            broadcaster,
            selection,
            partitions,
            store,
        })
    }

    /// Swap in a selection strategy (e.g. a planner-backed one).
    pub fn with_selection(mut self, selection: Box<dyn SelectionStrategy>) -> Self {
        self.selection = selection;
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    /// Open a progress stream for a session.
    pub fn subscribe(&self, session_id: &str) -> Subscription {
        self.broadcaster.subscribe(session_id)
    }

    /// Create a session and record its context. The session leaves
    /// `Initializing` for `Planning` as soon as participants are known,
    /// which is immediately.
    pub fn create_session(
        &self,
        context: AgentContext,
        participants: Vec<String>,
    ) -> Result<String> {
        if participants.is_empty() {
            return Err(CortexError::Session(
                "a session needs at least one participant".into(),
            ));
        }

        let session_id = new_id("session");
        let mut session = Session::new(session_id.clone(), context, participants);
        self.apply_transition(
            &mut session,
            SessionState::Planning,
            Some("participants recorded".into()),
        )?;

        info!(
            session_id = %session_id,
            participants = session.participants.len(),
            "Created session"
        );

        self.sessions
            .insert(session_id.clone(), Arc::new(Mutex::new(session)));
        Ok(session_id)
    }

    /// Commit the execution plan and start executing.
    pub fn commit_plan(&self, session_id: &str, plan: &[String]) -> Result<()> {
        self.with_session(session_id, |session| {
            self.apply_transition(
                session,
                SessionState::Executing,
                Some(format!("plan committed: {} agents", plan.len())),
            )?;
            // Only after the transition is accepted; a rejected commit
            // must not overwrite an already-committed plan.
            session.plan = plan.to_vec();
            Ok(())
        })
    }

    /// Record one agent's result.
    ///
    /// When the last expected participant reports, the session moves to
    /// `Validating` in the same critical section.
    pub fn record_result(&self, session_id: &str, result: AgentResult) -> Result<()> {
        self.with_session(session_id, |session| {
            if session.state != SessionState::Executing {
                return Err(CortexError::Session(format!(
                    "cannot record a result while session '{}' is {}",
                    session_id, session.state
                )));
            }

            session.completed.insert(result.agent_id.clone());
            for finding in &result.findings {
                self.broadcaster.publish(&ProgressEvent::finding_recorded(
                    session_id,
                    result.agent_id.clone(),
                    finding.summary.clone(),
                ));
            }
            debug!(
                session_id,
                agent_id = %result.agent_id,
                findings = result.findings.len(),
                "Recorded agent result"
            );
            session.results.push(result);

            if session.completed.is_superset(&session.participants) {
                self.apply_transition(
                    session,
                    SessionState::Validating,
                    Some("all participants reported".into()),
                )?;
            }
            Ok(())
        })
    }

    /// Force `Executing -> Validating` with whatever has been reported.
    /// Partial completion is a warning on the session, not a failure.
    pub fn force_validation(&self, session_id: &str, reason: &str) -> Result<()> {
        self.with_session(session_id, |session| {
            self.apply_transition(
                session,
                SessionState::Validating,
                Some(format!("partial: {}", reason)),
            )?;
            // Flag only committed partial validations; a rejected call
            // must leave the session unmarked.
            session.partial_completion = true;
            session.last_error = Some(format!("partial completion: {}", reason));
            warn!(session_id, reason, "Forcing validation with partial results");
            Ok(())
        })
    }

    /// Force validation on every session that has been executing longer
    /// than the configured session timeout. Returns the forced ids.
    pub fn check_timeouts(&self) -> Vec<String> {
        let now = now_millis();
        let overdue: Vec<String> = self
            .sessions
            .iter()
            .filter_map(|entry| {
                let session = entry.value().lock();
                let since = session.executing_since()?;
                (session.state == SessionState::Executing
                    && now.saturating_sub(since) > self.config.session_timeout_ms)
                    .then(|| session.session_id.clone())
            })
            .collect();

        let mut forced = Vec::new();
        for session_id in overdue {
            if self.force_validation(&session_id, "session timeout").is_ok() {
                forced.push(session_id);
            }
        }
        forced
    }

    /// Pass validation. Quality control is a pass-through unless a
    /// checker is wired in upstream.
    pub fn complete_validation(&self, session_id: &str) -> Result<()> {
        self.with_session(session_id, |session| {
            self.apply_transition(
                session,
                SessionState::Learning,
                Some("validation passed".into()),
            )
        })
    }

    /// Write recorded findings back to memory and complete the session.
    pub async fn finish_learning(&self, session_id: &str) -> Result<()> {
        let (context, results) = self.with_session(session_id, |session| {
            if session.state != SessionState::Learning {
                return Err(CortexError::Session(format!(
                    "cannot finish learning while session '{}' is {}",
                    session_id, session.state
                )));
            }
            Ok((session.context.clone(), session.results.clone()))
        })?;

        let mut written = 0usize;
        for result in &results {
            for finding in &result.findings {
                let key = self.partitions.compute_key(&Observation {
                    project: &context.project,
                    language: context.language.as_deref(),
                    pattern_type: &finding.pattern_type,
                    agent_id: &result.agent_id,
                    domain: context.domain.as_deref(),
                    timestamp: now_millis(),
                    complexity: context.complexity,
                });
                let record =
                    MemoryRecord::new(format!("{}\n{}", finding.summary, finding.detail), key)
                        .with_confidence(result.confidence);
                self.store.put(record)?;
                written += 1;
            }
        }

        if let Some(path) = &self.config.memory.snapshot_path {
            self.store.save_to(path).await?;
        }

        info!(session_id, written, "Memory write-back finished");

        self.with_session(session_id, |session| {
            self.apply_transition(
                session,
                SessionState::Completed,
                Some(format!("{} records written back", written)),
            )
        })
    }

    /// Fail the session. The first unrecoverable failure rolls the
    /// session back to `Planning` for one automatic retry; the second
    /// is terminal.
    pub fn fail(&self, session_id: &str, reason: impl Into<String>) -> Result<SessionState> {
        let reason = reason.into();
        self.with_session(session_id, |session| {
            if matches!(
                session.state,
                SessionState::Completed | SessionState::Failed
            ) {
                return Err(CortexError::Session(format!(
                    "session '{}' is already terminal ({})",
                    session_id, session.state
                )));
            }

            error!(session_id, reason = %reason, "Session failure");
            session.last_error = Some(reason.clone());
            self.apply_transition(session, SessionState::Failed, Some(reason.clone()))?;
            self.broadcaster
                .publish(&ProgressEvent::error(session_id, None, reason.clone()));

            if session.retry_used {
                session.finished_at = Some(now_millis());
            } else {
                session.retry_used = true;
                session.completed.clear();
                session.results.clear();
                session.partial_completion = false;
                self.apply_transition(
                    session,
                    SessionState::Planning,
                    Some("automatic retry".into()),
                )?;
            }
            Ok(session.state)
        })
    }

    /// Snapshot of a session's current state.
    pub fn session(&self, session_id: &str) -> Option<Session> {
        self.sessions
            .get(session_id)
            .map(|entry| entry.value().lock().clone())
    }

    /// Evict terminal sessions past the retention window. Returns how
    /// many were removed.
    pub fn evict_finished(&self) -> usize {
        let now = now_millis();
        let retention = self.config.session_retention_ms;

        let evictable: Vec<String> = self
            .sessions
            .iter()
            .filter_map(|entry| {
                let session = entry.value().lock();
                session
                    .finished_at
                    .filter(|finished| now.saturating_sub(*finished) > retention)
                    .map(|_| session.session_id.clone())
            })
            .collect();

        for session_id in &evictable {
            self.sessions.remove(session_id);
            self.broadcaster.drop_session(session_id);
            debug!(session_id, "Evicted finished session");
        }
        evictable.len()
    }

    /// Drive a session end to end: select agents, commit the plan, run
    /// the agents under the configured locking granularity, then
    /// validate, learn, and complete.
    ///
    /// An agent failure spends the session's single automatic retry;
    /// a second failure surfaces as the terminal error.
    pub async fn execute_plan(
        &self,
        session_id: &str,
        agents: &[Arc<dyn AnalysisAgent>],
    ) -> Result<()> {
        let context = self.with_session(session_id, |session| Ok(session.context.clone()))?;
        let available: Vec<String> = agents.iter().map(|a| a.id().to_string()).collect();
        let plan = self.selection.select(&context, &available);

        for _attempt in 0..=1 {
            self.commit_plan(session_id, &plan)?;
            match self.run_agents(session_id, &context, agents, &plan).await {
                Ok(()) => break,
                Err(e) => {
                    let state = self.fail(session_id, e.to_string())?;
                    if state == SessionState::Failed {
                        return Err(e);
                    }
                    // Back in Planning with the retry spent; loop once
                    // more.
                }
            }
        }

        let still_executing =
            self.with_session(session_id, |s| Ok(s.state == SessionState::Executing))?;
        if still_executing {
            self.force_validation(session_id, "plan finished without all participants")?;
        }

        self.complete_validation(session_id)?;
        self.finish_learning(session_id).await
    }

    async fn run_agents(
        &self,
        session_id: &str,
        context: &AgentContext,
        agents: &[Arc<dyn AnalysisAgent>],
        plan: &[String],
    ) -> Result<()> {
        let ttl = Duration::from_millis(self.config.lock_ttl_ms);

        match self.config.execution_mode {
            ExecutionMode::Sequential => {
                // One agent at a time, all under the whole-session key.
                let resource = lock_key(session_id, None);
                for agent_id in plan {
                    let agent = find_agent(agents, agent_id)?;
                    self.run_one(session_id, context, agent, &resource, ttl)
                        .await?;
                }
                Ok(())
            }
            ExecutionMode::Parallel => {
                let runs = plan.iter().map(|agent_id| {
                    let resource = lock_key(session_id, Some(agent_id));
                    async move {
                        let agent = find_agent(agents, agent_id)?;
                        self.run_one(session_id, context, agent, &resource, ttl)
                            .await
                    }
                });

                let outcomes = futures::future::join_all(runs).await;
                outcomes.into_iter().collect::<Result<Vec<()>>>()?;
                Ok(())
            }
        }
    }

    /// Run one agent under its lock and record the result.
    ///
    /// A release that fails means the TTL lapsed mid-run; the result is
    /// treated as invalid and discarded rather than recorded.
    async fn run_one(
        &self,
        session_id: &str,
        context: &AgentContext,
        agent: &Arc<dyn AnalysisAgent>,
        resource: &str,
        ttl: Duration,
    ) -> Result<()> {
        let holder = agent.id().to_string();

        if !self.locks.acquire(resource, &holder, ttl) {
            return Err(CortexError::LockTimeout {
                resource: resource.to_string(),
                holder,
            });
        }

        let outcome = agent.run(session_id, context).await;
        let released = self.locks.release(resource, &holder);

        let result = outcome?;
        if !released {
            return Err(CortexError::LockTimeout {
                resource: resource.to_string(),
                holder,
            });
        }
        self.record_result(session_id, result)
    }

    fn with_session<T>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut Session) -> Result<T>,
    ) -> Result<T> {
        let slot = self
            .sessions
            .get(session_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CortexError::Session(format!("unknown session '{}'", session_id)))?;
        let mut session = slot.lock();
        f(&mut session)
    }

    /// Commit a transition and publish its event before the session
    /// lock is dropped, preserving per-session event order.
    fn apply_transition(
        &self,
        session: &mut Session,
        to: SessionState,
        note: Option<String>,
    ) -> Result<()> {
        let from = session.state;
        if !from.can_transition(to) {
            return Err(CortexError::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        session.history.push(TransitionRecord {
            from,
            to,
            at: now_millis(),
            note,
        });
        session.state = to;
        if to == SessionState::Completed {
            session.finished_at = Some(now_millis());
        }

        debug!(
            session_id = %session.session_id,
            from = %from,
            to = %to,
            "Session transition committed"
        );
        self.broadcaster.publish(&ProgressEvent::state_change(
            session.session_id.clone(),
            from.as_str(),
            to.as_str(),
        ));
        Ok(())
    }
}

fn find_agent<'a>(
    agents: &'a [Arc<dyn AnalysisAgent>],
    agent_id: &str,
) -> Result<&'a Arc<dyn AnalysisAgent>> {
    agents
        .iter()
        .find(|a| a.id() == agent_id)
        .ok_or_else(|| CortexError::Agent(format!("no agent registered for id '{}'", agent_id)))
}
