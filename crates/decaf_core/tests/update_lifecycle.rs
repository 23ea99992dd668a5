use std::sync::Once;

use decaf_core::{
    update, BackendId, ChainStatus, Effect, JobState, Msg, Outcome, StageDescriptor, StageKind,
    StageResult, StageState,
};
use pretty_assertions::assert_eq;

fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(decaf_logging::initialize_for_tests);
}

fn split_chain() -> Vec<StageDescriptor> {
    decaf_core::build_chain(BackendId::Cfr, &|_: BackendId| true).unwrap()
}

fn started(chain: &[StageDescriptor]) -> (JobState, Vec<Effect>) {
    update(JobState::new("com.example.app", chain), Msg::Start)
}

fn finish_stage(state: JobState, ordinal: usize, result: StageResult) -> (JobState, Vec<Effect>) {
    update(state, Msg::StageFinished { ordinal, result })
}

fn started_stages(effects: &[Effect]) -> Vec<usize> {
    effects
        .iter()
        .filter_map(|effect| match effect {
            Effect::StartStage(stage) => Some(stage.ordinal),
            _ => None,
        })
        .collect()
}

#[test]
fn start_runs_only_the_first_stage() {
    init_logging();
    let chain = split_chain();
    let (state, effects) = started(&chain);

    assert_eq!(
        effects,
        vec![
            Effect::StageChanged {
                stage: chain[0],
                state: StageState::Running
            },
            Effect::StartStage(chain[0]),
        ]
    );
    assert_eq!(state.status(), ChainStatus::Running);

    let (_state, effects) = update(state, Msg::Start);
    assert!(effects.is_empty());
}

#[test]
fn stages_run_in_order_until_success() {
    init_logging();
    let chain = split_chain();
    let (mut state, _) = started(&chain);
    let mut order = vec![0];

    for ordinal in 0..chain.len() {
        let (next, effects) = finish_stage(state, ordinal, StageResult::Succeeded);
        order.extend(started_stages(&effects));
        state = next;
    }

    assert_eq!(order, vec![0, 1, 2, 3]);
    assert_eq!(state.outcome(), Some(Outcome::Succeeded));
    assert_eq!(state.status(), ChainStatus::Succeeded);
}

#[test]
fn failure_halts_the_chain() {
    init_logging();
    let chain = split_chain();
    let (state, _) = started(&chain);
    let (state, _) = finish_stage(state, 0, StageResult::Succeeded);
    let (state, _) = finish_stage(state, 1, StageResult::Succeeded);
    let (state, effects) = finish_stage(
        state,
        2,
        StageResult::Failed {
            ran_out_of_memory: false,
            message: "cfr exited with status 1".to_string(),
        },
    );

    assert!(started_stages(&effects).is_empty());
    assert_eq!(
        effects.last(),
        Some(&Effect::Finish {
            outcome: Outcome::Failed,
            ran_out_of_memory: false,
            message: Some("cfr exited with status 1".to_string()),
        })
    );
    assert_eq!(state.stage_state(StageKind::Resources), Some(StageState::Enqueued));
    assert_eq!(state.status(), ChainStatus::Failed);
}

#[test]
fn out_of_memory_is_flagged_on_failure() {
    init_logging();
    let chain = split_chain();
    let (state, _) = started(&chain);
    let (state, effects) = finish_stage(
        state,
        0,
        StageResult::Failed {
            ran_out_of_memory: true,
            message: "memory threshold exceeded".to_string(),
        },
    );
    assert!(state.ran_out_of_memory());
    assert!(matches!(
        effects.last(),
        Some(Effect::Finish {
            outcome: Outcome::Failed,
            ran_out_of_memory: true,
            ..
        })
    ));
}

#[test]
fn results_for_stages_that_are_not_running_are_ignored() {
    init_logging();
    let chain = split_chain();
    let (state, _) = started(&chain);

    let (state, effects) = finish_stage(state, 2, StageResult::Succeeded);
    assert!(effects.is_empty());
    assert_eq!(state.stage_state(StageKind::Convert), Some(StageState::Enqueued));

    let (state, _) = finish_stage(state, 0, StageResult::Succeeded);
    let (_state, effects) = finish_stage(state, 0, StageResult::Succeeded);
    assert!(effects.is_empty());
}

#[test]
fn cancel_before_start_cancels_every_stage() {
    init_logging();
    let chain = split_chain();
    let (state, effects) = update(JobState::new("k", &chain), Msg::CancelRequested);

    assert_eq!(state.outcome(), Some(Outcome::Cancelled));
    assert!(state
        .stage_states()
        .iter()
        .all(|s| *s == StageState::Cancelled));
    assert_eq!(
        effects.last(),
        Some(&Effect::Finish {
            outcome: Outcome::Cancelled,
            ran_out_of_memory: false,
            message: None,
        })
    );

    let (_state, effects) = update(state, Msg::Start);
    assert!(effects.is_empty());
}

#[test]
fn cancel_wins_over_a_stage_that_finishes_afterwards() {
    init_logging();
    let chain = split_chain();
    let (state, _) = started(&chain);
    let (state, effects) = update(state, Msg::CancelRequested);
    assert!(effects.is_empty());

    let (state, effects) = finish_stage(state, 0, StageResult::Succeeded);
    assert!(started_stages(&effects).is_empty());
    assert_eq!(state.outcome(), Some(Outcome::Cancelled));
    assert_eq!(state.stage_state(StageKind::Unpack), Some(StageState::Succeeded));
    assert_eq!(
        state.stage_state(StageKind::IntermediateConvert),
        Some(StageState::Cancelled)
    );

    let (state, _) = started(&chain);
    let (state, _) = update(state, Msg::CancelRequested);
    let (state, _) = finish_stage(
        state,
        0,
        StageResult::Failed {
            ran_out_of_memory: true,
            message: "boom".to_string(),
        },
    );
    assert_eq!(state.outcome(), Some(Outcome::Cancelled));
    assert!(!state.ran_out_of_memory());
}

#[test]
fn cancel_after_terminal_is_a_no_op() {
    init_logging();
    let chain = split_chain();
    let (mut state, _) = started(&chain);
    for ordinal in 0..chain.len() {
        state = finish_stage(state, ordinal, StageResult::Succeeded).0;
    }
    let (state, effects) = update(state, Msg::CancelRequested);
    assert!(effects.is_empty());
    assert_eq!(state.outcome(), Some(Outcome::Succeeded));
    assert!(!state.is_cancel_requested());
}

#[test]
fn finish_is_emitted_once() {
    init_logging();
    let chain = split_chain();
    let (mut state, mut all_effects) = started(&chain);
    for ordinal in 0..chain.len() {
        let (next, effects) = finish_stage(state, ordinal, StageResult::Succeeded);
        all_effects.extend(effects);
        state = next;
    }
    let (_state, effects) = update(state, Msg::CancelRequested);
    all_effects.extend(effects);

    let finishes = all_effects
        .iter()
        .filter(|effect| matches!(effect, Effect::Finish { .. }))
        .count();
    assert_eq!(finishes, 1);
}
