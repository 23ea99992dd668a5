use std::path::{Path, PathBuf};
use std::time::Duration;

use decaf_core::DEFAULT_OOM_SAMPLES;

/// Package prefixes treated as bundled third-party libraries when a job asks
/// to ignore libraries.
pub const DEFAULT_LIBRARY_PREFIXES: &[&str] = &[
    "android/support/",
    "androidx/",
    "com/google/",
    "kotlin/",
    "kotlinx/",
    "okhttp3/",
    "okio/",
    "retrofit2/",
    "io/reactivex/",
    "org/jetbrains/",
];

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root for everything the engine writes; sources live in `<app_storage>/sources`.
    pub app_storage: PathBuf,
    /// Major version of the java runtime the backends run on.
    pub runtime_version: u32,
    /// Memory ceiling used for percentages. `None` uses total system memory.
    pub memory_ceiling_bytes: Option<u64>,
    pub memory_sample_interval: Duration,
    pub oom_consecutive_samples: u32,
    pub library_prefixes: Vec<String>,
}

impl EngineConfig {
    pub fn default_with_storage(app_storage: PathBuf) -> Self {
        Self {
            app_storage,
            runtime_version: 17,
            memory_ceiling_bytes: None,
            memory_sample_interval: Duration::from_millis(500),
            oom_consecutive_samples: DEFAULT_OOM_SAMPLES,
            library_prefixes: DEFAULT_LIBRARY_PREFIXES
                .iter()
                .map(|prefix| prefix.to_string())
                .collect(),
        }
    }

    pub fn sources_dir(&self) -> PathBuf {
        sources_dir(&self.app_storage)
    }
}

pub(crate) fn sources_dir(app_storage: &Path) -> PathBuf {
    app_storage.join("sources")
}
