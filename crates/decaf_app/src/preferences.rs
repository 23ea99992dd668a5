use std::fs;
use std::path::Path;

use decaf_engine::{ensure_output_dir, AtomicFileWriter};
use decaf_logging::{decaf_error, decaf_info, decaf_warn};
use serde::{Deserialize, Serialize};

const PREFERENCES_FILENAME: &str = "preferences.ron";

/// Job defaults the user can change between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct Preferences {
    pub decompiler_backend: String,
    pub max_attempts: u32,
    pub chunk_size: usize,
    pub memory_threshold: u8,
    pub ignore_libraries: bool,
    pub keep_intermediate_files: bool,
    pub runtime_version: u32,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            decompiler_backend: "jadx".to_string(),
            max_attempts: 3,
            chunk_size: 500,
            memory_threshold: 80,
            ignore_libraries: true,
            keep_intermediate_files: false,
            runtime_version: 17,
        }
    }
}

/// Missing or unreadable preferences fall back to defaults.
pub(crate) fn load_preferences(storage: &Path) -> Preferences {
    let path = storage.join(PREFERENCES_FILENAME);
    let content = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Preferences::default();
        }
        Err(err) => {
            decaf_warn!("Failed to read preferences from {:?}: {}", path, err);
            return Preferences::default();
        }
    };

    match ron::from_str(&content) {
        Ok(preferences) => {
            decaf_info!("Loaded preferences from {:?}", path);
            preferences
        }
        Err(err) => {
            decaf_warn!("Failed to parse preferences from {:?}: {}", path, err);
            Preferences::default()
        }
    }
}

pub(crate) fn save_preferences(storage: &Path, preferences: &Preferences) {
    if let Err(err) = ensure_output_dir(storage) {
        decaf_error!("Failed to ensure storage dir {:?}: {}", storage, err);
        return;
    }

    let pretty = ron::ser::PrettyConfig::new();
    let content = match ron::ser::to_string_pretty(preferences, pretty) {
        Ok(text) => text,
        Err(err) => {
            decaf_error!("Failed to serialize preferences: {}", err);
            return;
        }
    };

    let writer = AtomicFileWriter::new(storage.to_path_buf());
    if let Err(err) = writer.write(PREFERENCES_FILENAME, content.as_bytes()) {
        decaf_error!("Failed to write preferences to {:?}: {}", storage, err);
    }
}
