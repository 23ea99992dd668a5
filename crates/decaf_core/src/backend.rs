use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ConfigurationError;

/// Decompiler backends a job can be submitted against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendId {
    Jadx,
    Cfr,
    Fernflower,
}

impl BackendId {
    pub const ALL: [BackendId; 3] = [BackendId::Jadx, BackendId::Cfr, BackendId::Fernflower];

    pub fn as_str(self) -> &'static str {
        match self {
            BackendId::Jadx => "jadx",
            BackendId::Cfr => "cfr",
            BackendId::Fernflower => "fernflower",
        }
    }

    /// Combined backends read bytecode containers and write java source in one step.
    /// Split backends need an intermediate jar produced by a prior stage.
    pub fn direct_to_source(self) -> bool {
        matches!(self, BackendId::Jadx)
    }

    /// Minimum java runtime major version the backend runs on.
    pub fn min_runtime_version(self) -> u32 {
        match self {
            BackendId::Jadx => 11,
            BackendId::Cfr | BackendId::Fernflower => 8,
        }
    }

    /// Fernflower writes its sources packed into a jar that must be expanded afterwards.
    pub fn emits_source_archive(self) -> bool {
        matches!(self, BackendId::Fernflower)
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendId {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        BackendId::ALL
            .into_iter()
            .find(|id| id.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| ConfigurationError::UnknownBackend(s.to_string()))
    }
}

/// Answers whether a backend can run on the current host.
pub trait BackendAvailability {
    fn is_available(&self, backend: BackendId) -> bool;
}

impl<F> BackendAvailability for F
where
    F: Fn(BackendId) -> bool,
{
    fn is_available(&self, backend: BackendId) -> bool {
        self(backend)
    }
}
