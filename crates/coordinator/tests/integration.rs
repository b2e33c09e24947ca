//! End-to-end coordination tests: full session lifecycles over real
//! agents, locks, broadcast, and memory write-back.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use cortex_common::{
    AgentContext, AgentResult, AnalysisAgent, CortexError, Finding, ProgressEventType, Result,
};
use cortex_coordinator::{
    lock_key, BroadcasterKind, CoordinatorConfig, ExecutionMode, SessionCoordinator, SessionState,
};
use cortex_memory::{MemoryConfig, MemoryStore, PartitionKey};

struct StubAgent {
    id: String,
}

#[async_trait]
impl AnalysisAgent for StubAgent {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, _session_id: &str, _context: &AgentContext) -> Result<AgentResult> {
        Ok(AgentResult::new(
            &self.id,
            vec![Finding::new(
                &self.id,
                format!("{} finding", self.id),
                "detail",
            )],
            0.8,
        ))
    }
}

/// Fails its first run, succeeds afterwards.
struct FlakyAgent {
    id: String,
    attempts: AtomicUsize,
}

#[async_trait]
impl AnalysisAgent for FlakyAgent {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, _session_id: &str, _context: &AgentContext) -> Result<AgentResult> {
        if self.attempts.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(CortexError::Agent("transient failure".into()));
        }
        Ok(AgentResult::new(
            &self.id,
            vec![Finding::new(&self.id, "recovered finding", "detail")],
            0.6,
        ))
    }
}

fn stub_agents(ids: &[&str]) -> Vec<Arc<dyn AnalysisAgent>> {
    ids.iter()
        .map(|id| Arc::new(StubAgent { id: id.to_string() }) as Arc<dyn AnalysisAgent>)
        .collect()
}

fn coordinator(config: CoordinatorConfig) -> SessionCoordinator {
    let store = Arc::new(MemoryStore::new(MemoryConfig::default()));
    SessionCoordinator::new(config, store).unwrap()
}

fn context() -> AgentContext {
    // Content matches no routing rule, so selection runs every agent.
    AgentContext::new("proj", "nothing remarkable here")
        .with_language("rust")
        .with_domain("backend")
        .with_complexity(7.0)
}

fn assert_no_skipped_states(coordinator: &SessionCoordinator, session_id: &str) {
    let session = coordinator.session(session_id).unwrap();
    for pair in session.history.windows(2) {
        assert_eq!(
            pair[1].from, pair[0].to,
            "transition history must be gapless"
        );
    }
}

#[tokio::test]
async fn test_sequential_lifecycle_reaches_completed() {
    let coordinator = coordinator(CoordinatorConfig::default());
    let participants = vec!["security".into(), "complexity".into(), "design".into()];
    let session_id = coordinator
        .create_session(context(), participants)
        .unwrap();

    coordinator
        .execute_plan(
            &session_id,
            &stub_agents(&["security", "complexity", "design"]),
        )
        .await
        .unwrap();

    let session = coordinator.session(&session_id).unwrap();
    assert_eq!(session.state, SessionState::Completed);
    assert!(session.finished_at.is_some());
    assert!(!session.partial_completion);
    assert_eq!(session.completed.len(), 3);
    assert_no_skipped_states(&coordinator, &session_id);

    // One memory record per finding, one finding per agent.
    assert_eq!(coordinator.store().count(), 3);
}

#[tokio::test]
async fn test_parallel_lifecycle_reaches_completed() {
    let config = CoordinatorConfig {
        execution_mode: ExecutionMode::Parallel,
        ..Default::default()
    };
    let coordinator = coordinator(config);
    let participants = vec!["security".into(), "complexity".into(), "design".into()];
    let session_id = coordinator
        .create_session(context(), participants)
        .unwrap();

    coordinator
        .execute_plan(
            &session_id,
            &stub_agents(&["security", "complexity", "design"]),
        )
        .await
        .unwrap();

    let session = coordinator.session(&session_id).unwrap();
    assert_eq!(session.state, SessionState::Completed);
    assert_eq!(session.results.len(), 3);
    assert_no_skipped_states(&coordinator, &session_id);
    assert_eq!(coordinator.store().count(), 3);
}

#[tokio::test]
async fn test_events_arrive_in_commit_order() {
    let config = CoordinatorConfig {
        broadcaster: BroadcasterKind::Replay,
        ..Default::default()
    };
    let coordinator = coordinator(config);
    let session_id = coordinator
        .create_session(context(), vec!["security".into()])
        .unwrap();

    let mut subscription = coordinator.subscribe(&session_id);
    coordinator
        .execute_plan(&session_id, &stub_agents(&["security"]))
        .await
        .unwrap();

    let mut states = Vec::new();
    while let Some(event) = subscription.try_recv() {
        if event.event_type == ProgressEventType::StateChange {
            states.push(event.payload["to"].as_str().unwrap().to_string());
        }
    }
    assert_eq!(
        states,
        ["planning", "executing", "validating", "learning", "completed"]
    );
}

#[tokio::test]
async fn test_last_report_triggers_validating() {
    let coordinator = coordinator(CoordinatorConfig::default());
    let session_id = coordinator
        .create_session(context(), vec!["a1".into(), "a2".into()])
        .unwrap();
    coordinator
        .commit_plan(&session_id, &["a1".to_string(), "a2".to_string()])
        .unwrap();

    coordinator
        .record_result(&session_id, AgentResult::new("a1", vec![], 0.9))
        .unwrap();
    assert_eq!(
        coordinator.session(&session_id).unwrap().state,
        SessionState::Executing
    );

    coordinator
        .record_result(&session_id, AgentResult::new("a2", vec![], 0.9))
        .unwrap();
    assert_eq!(
        coordinator.session(&session_id).unwrap().state,
        SessionState::Validating
    );

    // Reporting after the executing phase is rejected.
    assert!(coordinator
        .record_result(&session_id, AgentResult::new("a1", vec![], 0.9))
        .is_err());
}

#[tokio::test]
async fn test_skipping_states_is_an_invalid_transition() {
    let coordinator = coordinator(CoordinatorConfig::default());
    let session_id = coordinator
        .create_session(context(), vec!["a1".into()])
        .unwrap();

    // Planning -> Learning skips two states.
    let err = coordinator.complete_validation(&session_id).unwrap_err();
    assert!(matches!(err, CortexError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_rejected_force_validation_leaves_session_unmarked() {
    let coordinator = coordinator(CoordinatorConfig::default());
    let session_id = coordinator
        .create_session(context(), vec!["a1".into()])
        .unwrap();

    // Session is still Planning; forcing validation must fail without
    // side effects.
    let err = coordinator
        .force_validation(&session_id, "too early")
        .unwrap_err();
    assert!(matches!(err, CortexError::InvalidTransition { .. }));

    let session = coordinator.session(&session_id).unwrap();
    assert_eq!(session.state, SessionState::Planning);
    assert!(!session.partial_completion);
    assert!(session.last_error.is_none());
}

#[tokio::test]
async fn test_rejected_commit_keeps_committed_plan() {
    let coordinator = coordinator(CoordinatorConfig::default());
    let session_id = coordinator
        .create_session(context(), vec!["a1".into()])
        .unwrap();
    coordinator
        .commit_plan(&session_id, &["a1".to_string()])
        .unwrap();

    // Already Executing; a second commit is rejected and must not
    // touch the committed plan.
    let err = coordinator
        .commit_plan(&session_id, &["bogus".to_string()])
        .unwrap_err();
    assert!(matches!(err, CortexError::InvalidTransition { .. }));
    assert_eq!(
        coordinator.session(&session_id).unwrap().plan,
        vec!["a1".to_string()]
    );
}

#[tokio::test]
async fn test_timeout_forces_partial_validation() {
    let config = CoordinatorConfig {
        session_timeout_ms: 10,
        ..Default::default()
    };
    let coordinator = coordinator(config);
    let session_id = coordinator
        .create_session(context(), vec!["a1".into(), "a2".into(), "a3".into()])
        .unwrap();
    coordinator
        .commit_plan(
            &session_id,
            &["a1".to_string(), "a2".into(), "a3".into()],
        )
        .unwrap();

    coordinator
        .record_result(&session_id, AgentResult::new("a1", vec![], 0.9))
        .unwrap();
    coordinator
        .record_result(&session_id, AgentResult::new("a2", vec![], 0.9))
        .unwrap();

    tokio::time::sleep(Duration::from_millis(30)).await;
    let forced = coordinator.check_timeouts();
    assert_eq!(forced, vec![session_id.clone()]);

    let session = coordinator.session(&session_id).unwrap();
    assert_eq!(session.state, SessionState::Validating);
    assert!(session.partial_completion);
    assert!(session.last_error.as_deref().unwrap().contains("partial"));
    let completed: Vec<&str> = session.completed.iter().map(String::as_str).collect();
    assert_eq!(completed, ["a1", "a2"]);
}

#[tokio::test]
async fn test_failure_retries_once_then_is_terminal() {
    let coordinator = coordinator(CoordinatorConfig::default());
    let session_id = coordinator
        .create_session(context(), vec!["a1".into()])
        .unwrap();
    coordinator
        .commit_plan(&session_id, &["a1".to_string()])
        .unwrap();
    coordinator
        .record_result(&session_id, AgentResult::new("a1", vec![], 0.9))
        .unwrap();

    // First failure rolls back to Planning and clears progress.
    let state = coordinator.fail(&session_id, "agent crashed").unwrap();
    assert_eq!(state, SessionState::Planning);
    let session = coordinator.session(&session_id).unwrap();
    assert!(session.retry_used);
    assert!(session.completed.is_empty());
    assert!(session.results.is_empty());
    assert!(session.finished_at.is_none());

    // Second failure is terminal.
    coordinator
        .commit_plan(&session_id, &["a1".to_string()])
        .unwrap();
    let state = coordinator.fail(&session_id, "agent crashed again").unwrap();
    assert_eq!(state, SessionState::Failed);
    let session = coordinator.session(&session_id).unwrap();
    assert!(session.finished_at.is_some());

    // Terminal sessions reject further failure.
    assert!(coordinator.fail(&session_id, "again").is_err());
    assert_no_skipped_states(&coordinator, &session_id);
}

#[tokio::test]
async fn test_execute_plan_recovers_from_one_agent_failure() {
    let coordinator = coordinator(CoordinatorConfig::default());
    let session_id = coordinator
        .create_session(
            AgentContext::new("proj", "possible sql injection").with_complexity(3.0),
            vec!["security".into()],
        )
        .unwrap();

    let flaky: Vec<Arc<dyn AnalysisAgent>> = vec![Arc::new(FlakyAgent {
        id: "security".into(),
        attempts: AtomicUsize::new(0),
    })];
    coordinator.execute_plan(&session_id, &flaky).await.unwrap();

    let session = coordinator.session(&session_id).unwrap();
    assert_eq!(session.state, SessionState::Completed);
    assert!(session.retry_used);
    assert!(session
        .history
        .iter()
        .any(|t| t.to == SessionState::Failed));
    assert_no_skipped_states(&coordinator, &session_id);
}

#[tokio::test]
async fn test_held_session_lock_blocks_execution() {
    let coordinator = coordinator(CoordinatorConfig::default());
    let session_id = coordinator
        .create_session(context(), vec!["security".into()])
        .unwrap();

    // An outside holder owns the whole-session lock for longer than
    // both execution attempts.
    assert!(coordinator.locks().acquire(
        &lock_key(&session_id, None),
        "outsider",
        Duration::from_secs(60),
    ));

    let err = coordinator
        .execute_plan(&session_id, &stub_agents(&["security"]))
        .await
        .unwrap_err();
    assert!(matches!(err, CortexError::LockTimeout { .. }));
    assert_eq!(
        coordinator.session(&session_id).unwrap().state,
        SessionState::Failed
    );
}

#[tokio::test]
async fn test_finished_sessions_evicted_after_retention() {
    let config = CoordinatorConfig {
        session_retention_ms: 10,
        ..Default::default()
    };
    let coordinator = coordinator(config);
    let session_id = coordinator
        .create_session(context(), vec!["security".into()])
        .unwrap();
    coordinator
        .execute_plan(&session_id, &stub_agents(&["security"]))
        .await
        .unwrap();

    // Still within retention right after completion.
    assert_eq!(coordinator.evict_finished(), 0);

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(coordinator.evict_finished(), 1);
    assert!(coordinator.session(&session_id).is_none());
}

#[tokio::test]
async fn test_learning_persists_memory_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("memory.json");

    let mut config = CoordinatorConfig::default();
    config.memory.snapshot_path = Some(path.clone());
    let coordinator = coordinator(config);

    let session_id = coordinator
        .create_session(context(), vec!["security".into()])
        .unwrap();
    coordinator
        .execute_plan(&session_id, &stub_agents(&["security"]))
        .await
        .unwrap();

    assert!(path.exists());
    let restored = MemoryStore::load_from(MemoryConfig::default(), &path)
        .await
        .unwrap();
    assert_eq!(restored.count(), 1);
}

#[tokio::test]
async fn test_write_back_lands_in_queryable_partition() {
    let coordinator = coordinator(CoordinatorConfig::default());
    let session_id = coordinator
        .create_session(context(), vec!["security".into()])
        .unwrap();
    coordinator
        .execute_plan(&session_id, &stub_agents(&["security"]))
        .await
        .unwrap();

    let filter = PartitionKey::any()
        .with_project("proj")
        .with_pattern_type("security")
        .with_agent_id("security");
    let records = coordinator
        .store()
        .query_by_partition(&filter, None, Default::default());

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].confidence, 0.8);
    assert!(records[0].content.contains("security finding"));
}
