#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Msg {
    /// Worker picked the job up; the first stage may start.
    Start,
    /// The running stage reached a terminal result.
    StageFinished { ordinal: usize, result: StageResult },
    /// A listener asked for the job to stop.
    CancelRequested,
}

/// What a stage reports back when it stops running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageResult {
    Succeeded,
    Failed {
        ran_out_of_memory: bool,
        message: String,
    },
    Cancelled,
}
