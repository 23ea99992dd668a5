use std::fmt;
use std::io;

use chrono::{DateTime, Utc};
use decaf_core::{Outcome, StageKind, StageState};
use serde::Serialize;

use crate::PersistError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Status,
    Memory,
    Error,
}

/// One progress notification produced while a stage runs.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub title: Option<String>,
    pub message: Option<String>,
    pub secondary_message: Option<String>,
    pub kind: EventKind,
    pub percent: Option<f64>,
}

impl ProgressEvent {
    pub fn status(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            message: Some(message.into()),
            secondary_message: None,
            kind: EventKind::Status,
            percent: None,
        }
    }

    pub fn memory(sample: &MemorySample) -> Self {
        Self {
            title: None,
            message: Some(format!("{:.2}", sample.percent_used)),
            secondary_message: None,
            kind: EventKind::Memory,
            percent: Some(sample.percent_used),
        }
    }

    pub fn error(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            message: Some(message.into()),
            secondary_message: None,
            kind: EventKind::Error,
            percent: None,
        }
    }

    pub fn with_secondary(mut self, secondary: impl Into<String>) -> Self {
        self.secondary_message = Some(secondary.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemorySample {
    pub timestamp: DateTime<Utc>,
    pub percent_used: f64,
}

/// Progress event as published on the status bus.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub target_key: String,
    pub kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<f64>,
}

impl StatusEvent {
    pub fn from_progress(target_key: &str, event: ProgressEvent) -> Self {
        Self {
            target_key: target_key.to_string(),
            kind: event.kind,
            title: event.title,
            message: event.message,
            secondary_message: event.secondary_message,
            percent: event.percent,
        }
    }
}

/// Final result of a job, published once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalResult {
    pub target_key: String,
    pub outcome: Outcome,
    pub ran_out_of_memory: bool,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl TerminalResult {
    /// Text to show the user, if any. Cancellation is silent.
    pub fn user_message(&self) -> Option<String> {
        match self.outcome {
            Outcome::Succeeded | Outcome::Cancelled => None,
            Outcome::Failed if self.ran_out_of_memory => Some(format!(
                "Ran out of memory while decompiling {}. Reduce the chunk size and try again.",
                self.label
            )),
            Outcome::Failed => Some(format!("Could not decompile {}.", self.label)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BusMessage {
    Status(StatusEvent),
    #[serde(rename_all = "camelCase")]
    StageChanged {
        target_key: String,
        ordinal: usize,
        stage: StageKind,
        state: StageState,
    },
    Terminal(TerminalResult),
}

pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Failure taxonomy for a single stage.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StageError {
    /// Worth retrying with the same chunk.
    #[error("{0}")]
    Transient(String),
    /// Retrying cannot help: missing or corrupt input, missing tool.
    #[error("{0}")]
    Fatal(String),
    /// Never retried automatically; resubmit with a smaller chunk size.
    #[error("{0}")]
    OutOfMemory(String),
    #[error("cancelled")]
    Cancelled,
}

impl StageError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StageError::Transient(_))
    }
}

impl From<io::Error> for StageError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
                StageError::Fatal(err.to_string())
            }
            io::ErrorKind::OutOfMemory => StageError::OutOfMemory(err.to_string()),
            _ => StageError::Transient(err.to_string()),
        }
    }
}

impl From<PersistError> for StageError {
    fn from(err: PersistError) -> Self {
        match err {
            PersistError::Io(io) => io.into(),
            other => StageError::Fatal(other.to_string()),
        }
    }
}

impl From<zip::result::ZipError> for StageError {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(io) => io.into(),
            other => StageError::Fatal(format!("corrupted archive: {other}")),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Status => write!(f, "status"),
            EventKind::Memory => write!(f, "memory"),
            EventKind::Error => write!(f, "error"),
        }
    }
}
