//! Lifecycle states and the readiness handle.
//!
//! States are broadcast over a `tokio::sync::watch` channel, which doubles as
//! the single readiness handle: the async accessor awaits a terminal state
//! and the blocking accessor is a wrapper over the same future, so both
//! observe the same success or failure.

use std::fmt;

/// Where an instance is in its life.
///
/// `Created → Extracting → Starting → AwaitingHealth → (InstallingPlugin)* →
/// Ready`, with `Failed` reachable from any non-terminal state and `Disposed`
/// reachable from any state. `Ready` and `Disposed` are terminal; a `Failed`
/// instance keeps reporting the same failure to every readiness query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Extracting,
    Starting,
    AwaitingHealth,
    InstallingPlugin { name: String },
    Ready,
    Failed { reason: String },
    Disposed,
}

impl LifecycleState {
    /// True once a readiness query can settle.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            LifecycleState::Ready | LifecycleState::Failed { .. } | LifecycleState::Disposed
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Created => write!(f, "created"),
            LifecycleState::Extracting => write!(f, "extracting"),
            LifecycleState::Starting => write!(f, "starting"),
            LifecycleState::AwaitingHealth => write!(f, "awaiting-health"),
            LifecycleState::InstallingPlugin { name } => write!(f, "installing-plugin({name})"),
            LifecycleState::Ready => write!(f, "ready"),
            LifecycleState::Failed { reason } => write!(f, "failed: {reason}"),
            LifecycleState::Disposed => write!(f, "disposed"),
        }
    }
}
