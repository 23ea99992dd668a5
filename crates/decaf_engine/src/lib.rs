//! Decaf engine: stage execution, backends, persistence and the job runner.
mod archive;
mod backend;
mod bus;
mod config;
mod executor;
mod memory;
mod persist;
mod record;
mod runner;
mod source_info;
mod stage;
mod target_key;
mod types;

pub use backend::{BackendAdapter, BackendBinary, BackendCatalog, ToolInvocation};
pub use bus::{BusSink, StatusBus};
pub use config::{EngineConfig, DEFAULT_LIBRARY_PREFIXES};
pub use executor::{BackendExecutor, LineSink, ProcessExecutor};
pub use memory::{MemoryMonitor, MemoryProbe, SysinfoProbe};
pub use persist::{
    ensure_output_dir, AtomicFileWriter, PersistError, SourceLayout, COMPLETE_MARKER,
    STARTED_MARKER,
};
pub use record::{pending_records, JobRecord, StageRecord, RECORD_FILENAME};
pub use runner::{EngineHandle, SubmitError};
pub use source_info::{load_history, SourceInfo};
pub use target_key::archive_target_key;
pub use types::{
    BusMessage, EventKind, MemorySample, ProgressEvent, ProgressSink, StageError, StatusEvent,
    TerminalResult,
};
