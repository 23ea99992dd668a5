use crate::BackendId;

/// Rejections raised before any stage of a job runs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("unknown decompiler backend '{0}'")]
    UnknownBackend(String),
    #[error("decompiler backend '{0}' is not available on this runtime")]
    BackendUnavailable(BackendId),
    #[error("target key '{0}' is not usable as a directory name")]
    InvalidTargetKey(String),
    #[error("input file path is empty")]
    MissingInput,
    #[error("max attempts must be at least 1")]
    ZeroAttempts,
    #[error("chunk size must be at least 1")]
    ZeroChunkSize,
    #[error("memory threshold {0} is outside 0..=100")]
    ThresholdOutOfRange(u8),
}
