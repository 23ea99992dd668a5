//! Decaf core: pure job model, chain planning and lifecycle state machine.
mod backend;
mod chain;
mod effect;
mod error;
mod job;
mod memory;
mod msg;
mod normalize;
mod state;
mod update;

pub use backend::{BackendAvailability, BackendId};
pub use chain::{build_chain, StageDescriptor, StageKind};
pub use effect::Effect;
pub use error::ConfigurationError;
pub use job::{InputType, Job, JobSubmission};
pub use memory::{percent_used, MemoryBand, MemoryWatch, WatchVerdict, DEFAULT_OOM_SAMPLES};
pub use msg::{Msg, StageResult};
pub use normalize::normalize_line;
pub use state::{ChainStatus, JobState, Outcome, StageState};
pub use update::update;
