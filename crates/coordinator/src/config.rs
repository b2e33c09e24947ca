//! Coordinator configuration.
//!
//! Loaded once at startup from TOML, validated, then treated as
//! immutable for the lifetime of the process.

use serde::{Deserialize, Serialize};

use cortex_common::{CortexError, Result};
use cortex_memory::MemoryConfig;

/// How agents run within a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// One agent at a time, each holding the whole-session lock.
    #[default]
    Sequential,
    /// All selected agents concurrently, each under its own
    /// per-agent sub-resource lock.
    Parallel,
}

/// Which broadcaster implementation to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BroadcasterKind {
    /// Pure fan-out, no history.
    #[default]
    Channel,
    /// Fan-out plus a short replay buffer for late subscribers.
    Replay,
}

/// Which selection strategy to install by default.
///
/// A planner-backed strategy needs a planner callback and is installed
/// programmatically; the config value only picks the default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionKind {
    #[default]
    Rules,
    Planner,
}

/// Main coordinator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Lock TTL granted on acquire and renew (millis)
    #[serde(default = "default_lock_ttl_ms")]
    pub lock_ttl_ms: u64,

    /// Executing-phase ceiling before the session is forced into
    /// validation with partial results (millis)
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,

    /// How long finished sessions stay queryable before eviction
    /// (millis)
    #[serde(default = "default_session_retention_ms")]
    pub session_retention_ms: u64,

    #[serde(default)]
    pub execution_mode: ExecutionMode,

    #[serde(default)]
    pub broadcaster: BroadcasterKind,

    /// Replay buffer length for the replay broadcaster
    #[serde(default = "default_replay_buffer")]
    pub replay_buffer: usize,

    #[serde(default)]
    pub selection: SelectionKind,

    /// Memory subsystem configuration
    #[serde(default)]
    pub memory: MemoryConfig,
}

fn default_lock_ttl_ms() -> u64 {
    5_000
}

fn default_session_timeout_ms() -> u64 {
    60_000
}

fn default_session_retention_ms() -> u64 {
    300_000
}

fn default_replay_buffer() -> usize {
    64
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            lock_ttl_ms: default_lock_ttl_ms(),
            session_timeout_ms: default_session_timeout_ms(),
            session_retention_ms: default_session_retention_ms(),
            execution_mode: ExecutionMode::default(),
            broadcaster: BroadcasterKind::default(),
            replay_buffer: default_replay_buffer(),
            selection: SelectionKind::default(),
            memory: MemoryConfig::default(),
        }
    }
}

impl CoordinatorConfig {
    /// Load configuration from a TOML file. Validation happens here,
    /// not lazily on first use.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would misbehave at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.lock_ttl_ms == 0 {
            return Err(CortexError::Config("lock_ttl_ms must be non-zero".into()));
        }
        if self.session_timeout_ms == 0 {
            return Err(CortexError::Config(
                "session_timeout_ms must be non-zero".into(),
            ));
        }
        if self.broadcaster == BroadcasterKind::Replay && self.replay_buffer == 0 {
            return Err(CortexError::Config(
                "replay_buffer must be non-zero for the replay broadcaster".into(),
            ));
        }
        self.memory
            .partition
            .validate()
            .map_err(CortexError::Config)?;
        self.memory.scorer.validate().map_err(CortexError::Config)?;
        Ok(())
    }
}
