//! Per-run state machine.
//!
//! A run moves `Unstarted -> Assembling -> Staged -> Running ->
//! Terminated`, or from any working state straight to `Failed`. No
//! transition is retried.

use std::fmt;

use burrow_common::types::ContainerId;

/// Pipeline stage a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunStage {
    /// Fetching and extracting layers.
    Assembling,
    /// Copying the executable into the root.
    Staging,
    /// Entering namespaces, changing root, and exec.
    Launching,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Assembling => write!(f, "assembling"),
            Self::Staging => write!(f, "staging"),
            Self::Launching => write!(f, "launching"),
        }
    }
}

/// Lifecycle state of a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    /// Nothing has happened yet.
    Unstarted,
    /// Layers are being fetched and extracted.
    Assembling,
    /// The root is assembled and the executable staged.
    Staged,
    /// The command is running inside its namespaces.
    Running,
    /// The command exited with this code.
    Terminated(i32),
    /// The run stopped at this stage.
    Failed(RunStage),
}

impl RunState {
    /// Returns whether no further transition is possible.
    #[must_use]
    pub const fn is_final(self) -> bool {
        matches!(self, Self::Terminated(_) | Self::Failed(_))
    }

    const fn accepts(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Unstarted, Self::Assembling)
                | (Self::Assembling, Self::Staged)
                | (Self::Staged, Self::Running)
                | (Self::Running, Self::Terminated(_))
                | (Self::Assembling | Self::Staged | Self::Running, Self::Failed(_))
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unstarted => write!(f, "unstarted"),
            Self::Assembling => write!(f, "assembling"),
            Self::Staged => write!(f, "staged"),
            Self::Running => write!(f, "running"),
            Self::Terminated(code) => write!(f, "terminated({code})"),
            Self::Failed(stage) => write!(f, "failed({stage})"),
        }
    }
}

/// Records and logs the transitions of one run.
#[derive(Debug)]
pub struct RunTracker {
    id: ContainerId,
    history: Vec<RunState>,
}

impl RunTracker {
    /// Starts tracking a run in the `Unstarted` state.
    #[must_use]
    pub fn new(id: ContainerId) -> Self {
        Self {
            id,
            history: vec![RunState::Unstarted],
        }
    }

    /// Returns the current state.
    #[must_use]
    pub fn current(&self) -> RunState {
        self.history.last().copied().unwrap_or(RunState::Unstarted)
    }

    /// Returns every state visited, oldest first.
    #[must_use]
    pub fn history(&self) -> &[RunState] {
        &self.history
    }

    /// Moves to `next`.
    ///
    /// Illegal transitions are logged and ignored.
    pub fn advance(&mut self, next: RunState) {
        let current = self.current();
        if !current.accepts(next) {
            tracing::warn!(id = %self.id, from = %current, to = %next, "ignoring illegal run transition");
            return;
        }
        tracing::info!(id = %self.id, from = %current, to = %next, "run state changed");
        self.history.push(next);
    }
}
