use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{BackendAvailability, BackendId, ConfigurationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageKind {
    Unpack,
    IntermediateConvert,
    Convert,
    Resources,
}

impl StageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StageKind::Unpack => "unpack",
            StageKind::IntermediateConvert => "intermediate-convert",
            StageKind::Convert => "convert",
            StageKind::Resources => "resources",
        }
    }

    /// Human readable title used for status events.
    pub fn title(self) -> &'static str {
        match self {
            StageKind::Unpack => "Unpacking archive",
            StageKind::IntermediateConvert => "Converting bytecode containers",
            StageKind::Convert => "Decompiling to java",
            StageKind::Resources => "Extracting resources",
        }
    }

    /// Stages whose output tree carries start/completion markers.
    pub fn writes_markers(self) -> bool {
        matches!(self, StageKind::Convert | StageKind::Resources)
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDescriptor {
    pub ordinal: usize,
    pub kind: StageKind,
}

/// Orders the stages for `backend`, refusing backends the host cannot run.
pub fn build_chain(
    backend: BackendId,
    availability: &dyn BackendAvailability,
) -> Result<Vec<StageDescriptor>, ConfigurationError> {
    if !availability.is_available(backend) {
        return Err(ConfigurationError::BackendUnavailable(backend));
    }

    let kinds: &[StageKind] = if backend.direct_to_source() {
        &[StageKind::Unpack, StageKind::Convert, StageKind::Resources]
    } else {
        &[
            StageKind::Unpack,
            StageKind::IntermediateConvert,
            StageKind::Convert,
            StageKind::Resources,
        ]
    };

    Ok(kinds
        .iter()
        .enumerate()
        .map(|(ordinal, &kind)| StageDescriptor { ordinal, kind })
        .collect())
}
