//! Completion and corruption state derived from a target's output tree.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use walkdir::WalkDir;

use crate::config::sources_dir;
use crate::{JobRecord, SourceLayout, COMPLETE_MARKER, RECORD_FILENAME, STARTED_MARKER};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TreeState {
    Absent,
    /// Started but never completed: the process stopped mid-stage or the stage failed.
    Incomplete,
    Complete,
}

fn tree_state(dir: &Path) -> TreeState {
    if dir.join(COMPLETE_MARKER).is_file() {
        TreeState::Complete
    } else if dir.join(STARTED_MARKER).is_file() {
        TreeState::Incomplete
    } else {
        TreeState::Absent
    }
}

/// What the filesystem says about one target. Always recomputed, never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceInfo {
    pub target_key: String,
    pub label: Option<String>,
    pub source_directory: PathBuf,
    pub has_java_source: bool,
    pub has_resources: bool,
    pub is_corrupted: bool,
    pub size_bytes: u64,
}

impl SourceInfo {
    /// Scans `dir` (a `<app_storage>/sources/<target_key>` directory). Reads only.
    pub fn from_dir(dir: &Path) -> Self {
        let layout = SourceLayout::at(dir.to_path_buf());
        let java = tree_state(&layout.java());
        let resources = tree_state(&layout.resources());
        let label = JobRecord::load(&layout)
            .ok()
            .flatten()
            .map(|record| record.submission.label);

        Self {
            target_key: dir
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            label,
            source_directory: dir.to_path_buf(),
            has_java_source: java == TreeState::Complete,
            has_resources: resources == TreeState::Complete,
            is_corrupted: java == TreeState::Incomplete || resources == TreeState::Incomplete,
            size_bytes: tree_size(dir),
        }
    }

    /// True when `dir` looks like a target directory the engine produced.
    pub fn exists(dir: &Path) -> bool {
        let layout = SourceLayout::at(dir.to_path_buf());
        dir.is_dir()
            && (layout.java().is_dir()
                || layout.resources().is_dir()
                || dir.join(RECORD_FILENAME).is_file())
    }

    /// Java sources are complete and nothing was left half-written.
    pub fn is_usable(&self) -> bool {
        self.has_java_source && !self.is_corrupted
    }
}

fn tree_size(dir: &Path) -> u64 {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            let name = entry.file_name();
            name != STARTED_MARKER && name != COMPLETE_MARKER && name != RECORD_FILENAME
        })
        .filter_map(|entry| entry.metadata().ok())
        .map(|meta| meta.len())
        .sum()
}

/// Every recognized target under `<app_storage>/sources`, sorted by target key.
/// Corrupted or unrecognized directories are reported or skipped, never removed.
pub fn load_history(app_storage: &Path) -> Vec<SourceInfo> {
    let Ok(entries) = fs::read_dir(sources_dir(app_storage)) else {
        return Vec::new();
    };
    let mut history: Vec<SourceInfo> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| SourceInfo::exists(path))
        .map(|path| SourceInfo::from_dir(&path))
        .collect();
    history.sort_by(|a, b| a.target_key.cmp(&b.target_key));
    history
}
