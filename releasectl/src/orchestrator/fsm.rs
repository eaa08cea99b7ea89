//! Finite state machine for the setup flow
//!
//! Phases run strictly in order with no back-edges. Any phase may fail, which
//! is terminal.

use serde::{Deserialize, Serialize};

/// Setup phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupState {
    /// Nothing has run yet
    Pending,
    FetchExisting,
    DeterminePruneSet,
    Prune,
    RefetchExisting,
    ComputeMetrics,
    BuildArtifacts,
    CreateRelease,
    ReportResult,
    Succeeded,
    Failed,
}

impl SetupState {
    /// The phase following this one on success
    fn next(self) -> Option<SetupState> {
        use SetupState::*;
        match self {
            Pending => Some(FetchExisting),
            FetchExisting => Some(DeterminePruneSet),
            DeterminePruneSet => Some(Prune),
            Prune => Some(RefetchExisting),
            RefetchExisting => Some(ComputeMetrics),
            ComputeMetrics => Some(BuildArtifacts),
            BuildArtifacts => Some(CreateRelease),
            CreateRelease => Some(ReportResult),
            ReportResult => Some(Succeeded),
            Succeeded | Failed => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SetupState::Succeeded | SetupState::Failed)
    }
}

/// Setup event
#[derive(Debug, Clone)]
pub enum SetupEvent {
    /// The current phase finished
    Advance,

    /// The current phase failed
    Fail(String),
}

/// Setup FSM
#[derive(Debug, Clone)]
pub struct SetupFsm {
    state: SetupState,
    error: Option<String>,
    failed_in: Option<SetupState>,
}

impl SetupFsm {
    pub fn new() -> Self {
        Self {
            state: SetupState::Pending,
            error: None,
            failed_in: None,
        }
    }

    pub fn state(&self) -> SetupState {
        self.state
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Phase that was running when the flow failed
    pub fn failed_in(&self) -> Option<SetupState> {
        self.failed_in
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: SetupEvent) -> Result<SetupState, String> {
        let new_state = match (self.state, &event) {
            (state, SetupEvent::Advance) => state
                .next()
                .ok_or_else(|| format!("Invalid transition: {:?} -> {:?}", state, event))?,
            (state, SetupEvent::Fail(err)) if !state.is_terminal() => {
                self.error = Some(err.clone());
                self.failed_in = Some(state);
                SetupState::Failed
            }
            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        self.state = new_state;
        Ok(new_state)
    }
}

impl Default for SetupFsm {
    fn default() -> Self {
        Self::new()
    }
}
