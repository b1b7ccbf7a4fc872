//! Guarded lifecycle states for sandboxes and containers.
//!
//! ```text
//!                 ┌──────────┐
//!                 │ Creating │
//!                 └────┬─────┘
//!                      ▼
//!   ┌───────┐     ┌─────────┐  ◄──────────  ┌─────────┐
//!   │ Ready │ ──► │ Stopped │               │ Running │ ◄──┐
//!   └───┬───┘     └─────────┘  ──────────►  └────┬────┘    │
//!       │              ▲                         │         │
//!       └──────────────┼─────► Running           ▼         │
//!                      │                    ┌────────┐     │
//!                      └─────────────────── │ Paused │ ────┘
//!                                           └────────┘
//!   Down ──► { Ready, Running, Stopped, Creating }   (recovery only)
//! ```
//!
//! A transition names the state the caller believes is current. If that
//! belief is stale, or the edge is not in the graph, nothing changes.

use crate::error::{Error, Result};
use crate::host::PedestalKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a sandbox or container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Creating,
    Ready,
    Running,
    Paused,
    Stopped,
    /// Lost track of the workload; only recovery edges leave this state.
    Down,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Creating => write!(f, "creating"),
            Self::Ready => write!(f, "ready"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Stopped => write!(f, "stopped"),
            Self::Down => write!(f, "down"),
        }
    }
}

impl LifecycleState {
    /// Returns true if `next` is a listed successor of `self`.
    #[must_use]
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Creating, Stopped)
                | (Ready, Running | Stopped)
                | (Running, Paused | Stopped)
                | (Paused, Running | Stopped)
                | (Stopped, Running)
                | (Down, Ready | Running | Stopped | Creating)
        )
    }

    /// Down is never a valid current state.
    #[must_use]
    pub fn valid(self) -> bool {
        self != Self::Down
    }

    /// Moves `self` from `old` to `new`.
    pub fn transition(&mut self, old: LifecycleState, new: LifecycleState) -> Result<()> {
        if *self != old {
            return Err(Error::InvalidState {
                kind: "workload",
                state: self.to_string(),
                expected: old.to_string(),
            });
        }
        if !self.can_transition_to(new) {
            return Err(Error::InvalidTransition {
                from: self.to_string(),
                to: new.to_string(),
            });
        }
        *self = new;
        Ok(())
    }
}

/// State of a sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxState {
    pub state: LifecycleState,
    pub pedestal: PedestalKind,
    /// Bumped on every successful transition.
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl SandboxState {
    #[must_use]
    pub fn new(pedestal: PedestalKind) -> Self {
        Self {
            state: LifecycleState::Creating,
            pedestal,
            version: 0,
            updated_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn valid(&self) -> bool {
        self.state.valid()
    }

    /// Guarded transition. A sandbox that is down must go through
    /// [`Self::recover`].
    pub fn transition(&mut self, old: LifecycleState, new: LifecycleState) -> Result<()> {
        if !self.valid() {
            return Err(Error::InvalidState {
                kind: "sandbox",
                state: self.state.to_string(),
                expected: old.to_string(),
            });
        }
        self.apply(old, new)
    }

    /// Leaves the down state.
    pub fn recover(&mut self, new: LifecycleState) -> Result<()> {
        self.apply(LifecycleState::Down, new)
    }

    /// Marks the sandbox as lost.
    pub fn mark_down(&mut self) {
        self.state = LifecycleState::Down;
        self.touch();
    }

    fn apply(&mut self, old: LifecycleState, new: LifecycleState) -> Result<()> {
        self.state.transition(old, new).map_err(|e| relabel(e, "sandbox"))?;
        self.touch();
        Ok(())
    }

    fn touch(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }
}

/// State of one container inside a sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerState {
    pub id: String,
    pub state: LifecycleState,
    pub created_at: DateTime<Utc>,
}

impl ContainerState {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: LifecycleState::Creating,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn valid(&self) -> bool {
        self.state.valid()
    }

    pub fn transition(&mut self, old: LifecycleState, new: LifecycleState) -> Result<()> {
        self.state.transition(old, new).map_err(|e| relabel(e, "container"))
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state == LifecycleState::Running
    }
}

fn relabel(err: Error, kind: &'static str) -> Error {
    match err {
        Error::InvalidState {
            state, expected, ..
        } => Error::InvalidState {
            kind,
            state,
            expected,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use LifecycleState::*;

    const ALL: [LifecycleState; 6] = [Creating, Ready, Running, Paused, Stopped, Down];

    #[test]
    fn test_pause_round_trip() {
        let mut state = Running;
        state.transition(Running, Paused).unwrap();
        state.transition(Paused, Running).unwrap();
        assert_eq!(state, Running);
    }

    #[test]
    fn test_rejects_unlisted_edges() {
        let mut state = Stopped;
        let err = state.transition(Stopped, Paused).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        assert_eq!(state, Stopped, "failed transition must not mutate");
        assert!(Running.transition(Running, Running).is_err());
    }

    #[test]
    fn test_stale_precondition() {
        let mut state = Ready;
        let err = state.transition(Running, Stopped).unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
        assert_eq!(state, Ready);
    }

    #[test]
    fn test_down_successors() {
        let reachable: Vec<_> = ALL.iter().filter(|s| Down.can_transition_to(**s)).collect();
        assert_eq!(reachable, vec![&Creating, &Ready, &Running, &Stopped]);
        assert!(!Down.valid());
        assert!(ALL.iter().filter(|s| **s != Down).all(|s| s.valid()));
    }

    #[test]
    fn test_sandbox_down_requires_recover() {
        let mut sandbox = SandboxState::new(PedestalKind::Xen);
        sandbox.transition(Creating, Stopped).unwrap();
        assert_eq!(sandbox.version, 1);
        sandbox.mark_down();
        assert!(sandbox.transition(Down, Running).is_err());
        sandbox.recover(Running).unwrap();
        assert_eq!(sandbox.state, Running);
        assert!(sandbox.recover(Ready).is_err());
    }

    #[test]
    fn test_container_state() {
        let mut c = ContainerState::new("zephyr");
        c.transition(Creating, Stopped).unwrap();
        c.transition(Stopped, Running).unwrap();
        assert!(c.is_running());
        let err = c.transition(Paused, Running).unwrap_err();
        assert!(err.to_string().contains("container"), "should name the container");
    }

    #[test]
    fn test_serde_lowercase() {
        assert_eq!(serde_json::to_string(&Paused).unwrap(), "\"paused\"");
    }
}
