use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;

use crate::config::sources_dir;

/// Written into a stage's output tree when the stage starts.
pub const STARTED_MARKER: &str = ".started";
/// Written into a stage's output tree when the stage succeeds.
pub const COMPLETE_MARKER: &str = ".complete";

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("output directory missing or not writable: {0}")]
    OutputDir(String),
    #[error("failed to serialize {0}")]
    Serialize(String),
    #[error("failed to parse {path:?}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Ensure output directory exists; create if missing.
pub fn ensure_output_dir(dir: &Path) -> Result<(), PersistError> {
    if dir.exists() {
        let meta = fs::metadata(dir).map_err(|e| PersistError::OutputDir(e.to_string()))?;
        if !meta.is_dir() {
            return Err(PersistError::OutputDir(format!(
                "{} is not a directory",
                dir.display()
            )));
        }
    } else {
        fs::create_dir_all(dir).map_err(|e| PersistError::OutputDir(e.to_string()))?;
    }
    Ok(())
}

/// Writes files under one directory through a temp file and a rename, so a
/// crash never leaves a half-written record behind.
pub struct AtomicFileWriter {
    dir: PathBuf,
}

impl AtomicFileWriter {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn write(&self, filename: &str, content: &[u8]) -> Result<PathBuf, PersistError> {
        ensure_output_dir(&self.dir)?;

        let target = self.dir.join(filename);
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(content)?;
        tmp.flush()?;
        tmp.as_file_mut().sync_all()?;

        tmp.persist(&target).map_err(|e| PersistError::Io(e.error))?;
        Ok(target)
    }
}

/// Directory layout of one target under `<app_storage>/sources/<target_key>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLayout {
    root: PathBuf,
}

impl SourceLayout {
    pub fn new(app_storage: &Path, target_key: &str) -> Self {
        Self::at(sources_dir(app_storage).join(target_key))
    }

    pub fn at(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn unpacked(&self) -> PathBuf {
        self.root.join("unpacked")
    }

    pub fn intermediate(&self) -> PathBuf {
        self.root.join("intermediate")
    }

    pub fn java(&self) -> PathBuf {
        self.root.join("java")
    }

    pub fn resources(&self) -> PathBuf {
        self.root.join("resources")
    }

    /// Marks `dir` as started and clears any completion left by an earlier run.
    pub fn mark_started(dir: &Path) -> Result<(), PersistError> {
        let writer = AtomicFileWriter::new(dir.to_path_buf());
        writer.write(STARTED_MARKER, b"")?;
        remove_file_if_exists(&dir.join(COMPLETE_MARKER))?;
        Ok(())
    }

    pub fn mark_complete(dir: &Path) -> Result<(), PersistError> {
        AtomicFileWriter::new(dir.to_path_buf()).write(COMPLETE_MARKER, b"")?;
        Ok(())
    }
}

pub(crate) fn remove_file_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

pub(crate) fn remove_dir_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}
