use crate::{Outcome, StageDescriptor, StageState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// A stage moved to a new state; persist and publish it.
    StageChanged {
        stage: StageDescriptor,
        state: StageState,
    },
    /// Run the given stage. Emitted only once its predecessor succeeded.
    StartStage(StageDescriptor),
    /// The job is over. Emitted exactly once.
    Finish {
        outcome: Outcome,
        ran_out_of_memory: bool,
        message: Option<String>,
    },
}
