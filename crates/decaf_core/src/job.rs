use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{build_chain, BackendAvailability, BackendId, ConfigurationError, StageDescriptor};

/// Kind of file handed to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    Apk,
    Jar,
    Dex,
}

impl InputType {
    /// Zip-based inputs are expanded entry by entry; a bare dex file is copied.
    pub fn is_archive(self) -> bool {
        matches!(self, InputType::Apk | InputType::Jar)
    }
}

/// Submission record as produced by the UI layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSubmission {
    pub decompiler_backend: String,
    pub ignore_libraries: bool,
    pub max_attempts: u32,
    pub chunk_size: usize,
    pub memory_threshold: u8,
    pub keep_intermediate_files: bool,
    pub target_key: String,
    pub label: String,
    pub input_file_path: PathBuf,
    pub input_type: InputType,
}

impl JobSubmission {
    /// Checks the numeric bounds and identifiers that do not depend on the host.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !is_valid_target_key(&self.target_key) {
            return Err(ConfigurationError::InvalidTargetKey(self.target_key.clone()));
        }
        if self.input_file_path.as_os_str().is_empty() {
            return Err(ConfigurationError::MissingInput);
        }
        if self.max_attempts == 0 {
            return Err(ConfigurationError::ZeroAttempts);
        }
        if self.chunk_size == 0 {
            return Err(ConfigurationError::ZeroChunkSize);
        }
        if self.memory_threshold > 100 {
            return Err(ConfigurationError::ThresholdOutOfRange(self.memory_threshold));
        }
        Ok(())
    }
}

/// A validated submission together with its resolved backend and stage chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub submission: JobSubmission,
    pub backend: BackendId,
    pub chain: Vec<StageDescriptor>,
}

impl Job {
    /// Validates the submission and builds its chain. Fails before anything runs.
    pub fn plan(
        submission: JobSubmission,
        availability: &dyn BackendAvailability,
    ) -> Result<Self, ConfigurationError> {
        submission.validate()?;
        let backend: BackendId = submission.decompiler_backend.parse()?;
        let chain = build_chain(backend, availability)?;
        Ok(Self {
            submission,
            backend,
            chain,
        })
    }

    pub fn target_key(&self) -> &str {
        &self.submission.target_key
    }
}

fn is_valid_target_key(key: &str) -> bool {
    !key.is_empty()
        && key != "."
        && key != ".."
        && !key.chars().any(|c| matches!(c, '/' | '\\' | '\0'))
}

#[cfg(test)]
mod tests {
    use super::is_valid_target_key;

    #[test]
    fn target_keys_must_be_single_path_components() {
        assert!(is_valid_target_key("com.example.app"));
        assert!(is_valid_target_key("my-lib-1a2b3c4d"));
        assert!(!is_valid_target_key(""));
        assert!(!is_valid_target_key(".."));
        assert!(!is_valid_target_key("a/b"));
        assert!(!is_valid_target_key("a\\b"));
    }
}
