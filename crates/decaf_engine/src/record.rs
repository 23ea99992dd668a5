//! Durable per-target job record (`job.ron`).

use std::fs;
use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};
use decaf_core::{BackendId, Job, JobSubmission, Outcome, StageKind, StageState};
use decaf_logging::decaf_warn;
use serde::{Deserialize, Serialize};

use crate::config::sources_dir;
use crate::persist::{AtomicFileWriter, PersistError, SourceLayout};

pub const RECORD_FILENAME: &str = "job.ron";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub kind: StageKind,
    pub state: StageState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub submission: JobSubmission,
    pub backend: BackendId,
    pub stages: Vec<StageRecord>,
    pub outcome: Option<Outcome>,
    pub ran_out_of_memory: bool,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(job: &Job) -> Self {
        let now = Utc::now();
        Self {
            submission: job.submission.clone(),
            backend: job.backend,
            stages: job
                .chain
                .iter()
                .map(|stage| StageRecord {
                    kind: stage.kind,
                    state: StageState::Enqueued,
                })
                .collect(),
            outcome: None,
            ran_out_of_memory: false,
            created_utc: now,
            updated_utc: now,
        }
    }

    pub fn set_stage(&mut self, ordinal: usize, state: StageState) {
        if let Some(stage) = self.stages.get_mut(ordinal) {
            stage.state = state;
            self.updated_utc = Utc::now();
        }
    }

    pub fn finish(&mut self, outcome: Outcome, ran_out_of_memory: bool) {
        self.outcome = Some(outcome);
        self.ran_out_of_memory = ran_out_of_memory;
        self.updated_utc = Utc::now();
    }

    /// A record without an outcome belongs to a job the process never finished.
    pub fn is_pending(&self) -> bool {
        self.outcome.is_none()
    }

    pub fn save(&self, layout: &SourceLayout) -> Result<(), PersistError> {
        let content = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::new())
            .map_err(|err| PersistError::Serialize(err.to_string()))?;
        AtomicFileWriter::new(layout.root().to_path_buf())
            .write(RECORD_FILENAME, content.as_bytes())?;
        Ok(())
    }

    pub fn load(layout: &SourceLayout) -> Result<Option<Self>, PersistError> {
        let path = layout.root().join(RECORD_FILENAME);
        let content = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        ron::from_str(&content)
            .map(Some)
            .map_err(|err| PersistError::Parse {
                path,
                message: err.to_string(),
            })
    }
}

/// Records of jobs that were still running when the process stopped.
pub fn pending_records(app_storage: &Path) -> Vec<JobRecord> {
    let Ok(entries) = fs::read_dir(sources_dir(app_storage)) else {
        return Vec::new();
    };
    let mut pending: Vec<JobRecord> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false))
        .filter_map(|entry| match JobRecord::load(&SourceLayout::at(entry.path())) {
            Ok(record) => record,
            Err(err) => {
                decaf_warn!("Skipping unreadable job record in {:?}: {}", entry.path(), err);
                None
            }
        })
        .filter(JobRecord::is_pending)
        .collect();
    pending.sort_by(|a, b| a.submission.target_key.cmp(&b.submission.target_key));
    pending
}
