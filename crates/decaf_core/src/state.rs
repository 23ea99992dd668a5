//! Stage and job lifecycle state.
//!
//! Stage states: ENQUEUED → RUNNING → {SUCCEEDED | FAILED | CANCELLED},
//! with ENQUEUED → CANCELLED for stages that never started.

use serde::{Deserialize, Serialize};

use crate::{StageDescriptor, StageKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageState {
    Enqueued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl StageState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StageState::Succeeded | StageState::Failed | StageState::Cancelled
        )
    }

    /// Transitions only move forward; no state is ever revisited.
    pub fn can_transition_to(self, target: StageState) -> bool {
        matches!(
            (self, target),
            (StageState::Enqueued, StageState::Running)
                | (StageState::Enqueued, StageState::Cancelled)
                | (StageState::Running, StageState::Succeeded)
                | (StageState::Running, StageState::Failed)
                | (StageState::Running, StageState::Cancelled)
        )
    }
}

/// Terminal outcome of a whole job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Succeeded,
    Failed,
    Cancelled,
}

/// Aggregate view over a chain's stage states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainStatus {
    Waiting,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl ChainStatus {
    /// Cancellation wins over failure, failure over success; an all-enqueued chain is waiting.
    pub fn reconcile(states: &[StageState]) -> Self {
        if states.contains(&StageState::Cancelled) {
            ChainStatus::Cancelled
        } else if states.contains(&StageState::Failed) {
            ChainStatus::Failed
        } else if !states.is_empty() && states.iter().all(|s| *s == StageState::Succeeded) {
            ChainStatus::Succeeded
        } else if states.iter().all(|s| *s == StageState::Enqueued) {
            ChainStatus::Waiting
        } else {
            ChainStatus::Running
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StageSlot {
    pub(crate) descriptor: StageDescriptor,
    pub(crate) state: StageState,
}

/// Lifecycle of a single job, driven by [`crate::update`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobState {
    target_key: String,
    pub(crate) stages: Vec<StageSlot>,
    pub(crate) started: bool,
    pub(crate) cancel_requested: bool,
    pub(crate) ran_out_of_memory: bool,
    pub(crate) outcome: Option<Outcome>,
    pub(crate) failure: Option<String>,
}

impl JobState {
    pub fn new(target_key: impl Into<String>, chain: &[StageDescriptor]) -> Self {
        Self {
            target_key: target_key.into(),
            stages: chain
                .iter()
                .map(|descriptor| StageSlot {
                    descriptor: *descriptor,
                    state: StageState::Enqueued,
                })
                .collect(),
            started: false,
            cancel_requested: false,
            ran_out_of_memory: false,
            outcome: None,
            failure: None,
        }
    }

    pub fn target_key(&self) -> &str {
        &self.target_key
    }

    pub fn stage_states(&self) -> Vec<StageState> {
        self.stages.iter().map(|slot| slot.state).collect()
    }

    pub fn stage_state(&self, kind: StageKind) -> Option<StageState> {
        self.stages
            .iter()
            .find(|slot| slot.descriptor.kind == kind)
            .map(|slot| slot.state)
    }

    pub fn status(&self) -> ChainStatus {
        ChainStatus::reconcile(&self.stage_states())
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.outcome
    }

    pub fn ran_out_of_memory(&self) -> bool {
        self.ran_out_of_memory
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested
    }

    pub(crate) fn running_ordinal(&self) -> Option<usize> {
        self.stages
            .iter()
            .find(|slot| slot.state == StageState::Running)
            .map(|slot| slot.descriptor.ordinal)
    }

    /// Moves a stage forward. Returns false when the transition is not allowed.
    pub(crate) fn transition(&mut self, ordinal: usize, target: StageState) -> bool {
        match self.stages.get_mut(ordinal) {
            Some(slot) if slot.state.can_transition_to(target) => {
                slot.state = target;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ChainStatus, StageState};

    #[test]
    fn terminal_states_never_transition() {
        for terminal in [StageState::Succeeded, StageState::Failed, StageState::Cancelled] {
            for target in [
                StageState::Enqueued,
                StageState::Running,
                StageState::Succeeded,
                StageState::Failed,
                StageState::Cancelled,
            ] {
                assert!(!terminal.can_transition_to(target));
            }
        }
    }

    #[test]
    fn running_cannot_go_back_to_enqueued() {
        assert!(!StageState::Running.can_transition_to(StageState::Enqueued));
        assert!(!StageState::Enqueued.can_transition_to(StageState::Succeeded));
    }

    #[test]
    fn reconcile_precedence() {
        use StageState::*;
        assert_eq!(ChainStatus::reconcile(&[Enqueued, Enqueued]), ChainStatus::Waiting);
        assert_eq!(ChainStatus::reconcile(&[Succeeded, Running]), ChainStatus::Running);
        assert_eq!(ChainStatus::reconcile(&[Succeeded, Enqueued]), ChainStatus::Running);
        assert_eq!(ChainStatus::reconcile(&[Succeeded, Succeeded]), ChainStatus::Succeeded);
        assert_eq!(ChainStatus::reconcile(&[Succeeded, Failed, Enqueued]), ChainStatus::Failed);
        assert_eq!(ChainStatus::reconcile(&[Failed, Cancelled]), ChainStatus::Cancelled);
    }
}
