use crate::{Effect, JobState, Msg, Outcome, StageResult, StageState};

/// Pure update function: applies a message to a job and returns any effects.
pub fn update(mut state: JobState, msg: Msg) -> (JobState, Vec<Effect>) {
    if state.outcome.is_some() {
        // Terminal jobs ignore everything, including repeated cancellation.
        return (state, Vec::new());
    }

    let effects = match msg {
        Msg::Start => {
            if state.started {
                return (state, Vec::new());
            }
            state.started = true;
            if state.cancel_requested {
                finish(&mut state, Outcome::Cancelled)
            } else if state.stages.is_empty() {
                finish(&mut state, Outcome::Succeeded)
            } else {
                start_stage(&mut state, 0)
            }
        }
        Msg::CancelRequested => {
            state.cancel_requested = true;
            if state.started {
                // The running stage observes the request at its next chunk boundary
                // and reports back through `StageFinished`.
                Vec::new()
            } else {
                finish(&mut state, Outcome::Cancelled)
            }
        }
        Msg::StageFinished { ordinal, result } => {
            if state.running_ordinal() != Some(ordinal) {
                return (state, Vec::new());
            }
            apply_stage_result(&mut state, ordinal, result)
        }
    };

    (state, effects)
}

fn apply_stage_result(state: &mut JobState, ordinal: usize, result: StageResult) -> Vec<Effect> {
    let target = match &result {
        StageResult::Succeeded => StageState::Succeeded,
        StageResult::Failed { .. } => StageState::Failed,
        StageResult::Cancelled => StageState::Cancelled,
    };
    if !state.transition(ordinal, target) {
        return Vec::new();
    }
    let mut effects = vec![Effect::StageChanged {
        stage: state.stages[ordinal].descriptor,
        state: target,
    }];

    if state.cancel_requested {
        effects.extend(finish(state, Outcome::Cancelled));
        return effects;
    }

    match result {
        StageResult::Succeeded => {
            let next = ordinal + 1;
            if next < state.stages.len() {
                effects.extend(start_stage(state, next));
            } else {
                effects.extend(finish(state, Outcome::Succeeded));
            }
        }
        StageResult::Failed {
            ran_out_of_memory,
            message,
        } => {
            state.ran_out_of_memory = ran_out_of_memory;
            state.failure = Some(message);
            effects.extend(finish(state, Outcome::Failed));
        }
        StageResult::Cancelled => {
            effects.extend(finish(state, Outcome::Cancelled));
        }
    }
    effects
}

fn start_stage(state: &mut JobState, ordinal: usize) -> Vec<Effect> {
    if !state.transition(ordinal, StageState::Running) {
        return Vec::new();
    }
    let stage = state.stages[ordinal].descriptor;
    vec![
        Effect::StageChanged {
            stage,
            state: StageState::Running,
        },
        Effect::StartStage(stage),
    ]
}

fn finish(state: &mut JobState, outcome: Outcome) -> Vec<Effect> {
    let mut effects = Vec::new();
    if outcome == Outcome::Cancelled {
        for ordinal in 0..state.stages.len() {
            if state.transition(ordinal, StageState::Cancelled) {
                effects.push(Effect::StageChanged {
                    stage: state.stages[ordinal].descriptor,
                    state: StageState::Cancelled,
                });
            }
        }
    }
    state.outcome = Some(outcome);
    if outcome != Outcome::Failed {
        state.ran_out_of_memory = false;
    }
    effects.push(Effect::Finish {
        outcome,
        ran_out_of_memory: state.ran_out_of_memory,
        message: state.failure.clone().filter(|_| outcome == Outcome::Failed),
    });
    effects
}
