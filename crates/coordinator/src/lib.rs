//! Session coordination for multi-agent code analysis.
//!
//! Drives analysis sessions through a fixed lifecycle
//! (`Initializing -> Planning -> Executing -> Validating -> Learning ->
//! Completed`), keeps concurrent agents from clobbering shared session
//! state with TTL'd locks, streams progress to observers, and writes
//! validated findings back into [`cortex_memory`].
//!
//! [`SessionCoordinator`] is the single entry point; everything else in
//! this crate serves it.

pub mod broadcast;
pub mod config;
pub mod lock;
pub mod selection;
pub mod session;

pub use broadcast::{Broadcaster, ChannelBroadcaster, ReplayBroadcaster, Subscription};
pub use config::{BroadcasterKind, CoordinatorConfig, ExecutionMode, SelectionKind};
pub use lock::{lock_key, LockManager};
pub use selection::{PlannerSelection, RuleBasedSelection, SelectionRule, SelectionStrategy};
pub use session::{Session, SessionCoordinator, SessionState, TransitionRecord};
