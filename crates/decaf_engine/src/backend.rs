//! Decompiler backend adapters.
//!
//! Adapters only build tool invocations; running them is the executor's job.

use std::env;
use std::path::{Path, PathBuf};

use decaf_core::{BackendAvailability, BackendId};
use serde::Serialize;

use crate::StageError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendBinary {
    pub name: String,
    pub available: bool,
    pub path: Option<PathBuf>,
}

impl BackendBinary {
    /// A binary assumed to be reachable through `PATH` under its own name.
    pub fn on_path(name: &str) -> Self {
        Self {
            name: name.to_string(),
            available: true,
            path: None,
        }
    }

    pub fn missing(name: &str) -> Self {
        Self {
            name: name.to_string(),
            available: false,
            path: None,
        }
    }

    fn program(&self) -> String {
        self.path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| self.name.clone())
    }
}

/// Tools found on this host plus the runtime version they would run on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendCatalog {
    pub runtime_version: u32,
    pub jadx: BackendBinary,
    pub cfr: BackendBinary,
    pub fernflower: BackendBinary,
    pub dex2jar: BackendBinary,
}

impl BackendCatalog {
    pub fn detect(runtime_version: u32) -> Self {
        Self {
            runtime_version,
            jadx: probe_binary("jadx", &["jadx"]),
            cfr: probe_binary("cfr", &["cfr", "cfr-decompiler"]),
            fernflower: probe_binary("fernflower", &["fernflower", "java-decompiler"]),
            dex2jar: probe_binary("d2j-dex2jar", &["d2j-dex2jar", "d2j-dex2jar.sh"]),
        }
    }

    /// Catalog that trusts every tool to be on `PATH`.
    pub fn assume_installed(runtime_version: u32) -> Self {
        Self {
            runtime_version,
            jadx: BackendBinary::on_path("jadx"),
            cfr: BackendBinary::on_path("cfr"),
            fernflower: BackendBinary::on_path("fernflower"),
            dex2jar: BackendBinary::on_path("d2j-dex2jar"),
        }
    }

    pub fn binary(&self, backend: BackendId) -> &BackendBinary {
        match backend {
            BackendId::Jadx => &self.jadx,
            BackendId::Cfr => &self.cfr,
            BackendId::Fernflower => &self.fernflower,
        }
    }
}

impl BackendAvailability for BackendCatalog {
    fn is_available(&self, backend: BackendId) -> bool {
        self.runtime_version >= backend.min_runtime_version()
            && self.binary(backend).available
            && (backend.direct_to_source() || self.dex2jar.available)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolInvocation {
    pub program: String,
    pub args: Vec<String>,
    pub note: String,
}

/// Invocation contract for one backend, selected by [`BackendId`].
#[derive(Debug, Clone)]
pub enum BackendAdapter {
    Jadx(JadxAdapter),
    Cfr(CfrAdapter),
    Fernflower(FernflowerAdapter),
}

impl BackendAdapter {
    pub fn for_backend(backend: BackendId, catalog: &BackendCatalog) -> Self {
        match backend {
            BackendId::Jadx => BackendAdapter::Jadx(JadxAdapter {
                binary: catalog.jadx.clone(),
            }),
            BackendId::Cfr => BackendAdapter::Cfr(CfrAdapter {
                binary: catalog.cfr.clone(),
                dex2jar: catalog.dex2jar.clone(),
            }),
            BackendId::Fernflower => BackendAdapter::Fernflower(FernflowerAdapter {
                binary: catalog.fernflower.clone(),
                dex2jar: catalog.dex2jar.clone(),
            }),
        }
    }

    pub fn id(&self) -> BackendId {
        match self {
            BackendAdapter::Jadx(_) => BackendId::Jadx,
            BackendAdapter::Cfr(_) => BackendId::Cfr,
            BackendAdapter::Fernflower(_) => BackendId::Fernflower,
        }
    }

    /// Plans the dex → jar conversion for one chunk of dex files.
    pub fn plan_intermediate(
        &self,
        dex_files: &[PathBuf],
        out_dir: &Path,
    ) -> Result<Vec<ToolInvocation>, StageError> {
        let dex2jar = match self {
            BackendAdapter::Jadx(_) => {
                return Err(StageError::Fatal(
                    "jadx reads dex containers directly and has no intermediate step".to_string(),
                ))
            }
            BackendAdapter::Cfr(adapter) => &adapter.dex2jar,
            BackendAdapter::Fernflower(adapter) => &adapter.dex2jar,
        };
        Ok(dex_files
            .iter()
            .map(|dex| dex2jar_invocation(dex2jar, dex, out_dir))
            .collect())
    }

    /// Plans source generation for one chunk of inputs.
    pub fn plan_convert(&self, inputs: &[PathBuf], out_dir: &Path) -> Vec<ToolInvocation> {
        if inputs.is_empty() {
            return Vec::new();
        }
        match self {
            BackendAdapter::Jadx(adapter) => vec![adapter.invocation(inputs, out_dir)],
            BackendAdapter::Cfr(adapter) => inputs
                .iter()
                .map(|jar| adapter.invocation(jar, out_dir))
                .collect(),
            BackendAdapter::Fernflower(adapter) => vec![adapter.invocation(inputs, out_dir)],
        }
    }
}

#[derive(Debug, Clone)]
pub struct JadxAdapter {
    binary: BackendBinary,
}

impl JadxAdapter {
    fn invocation(&self, inputs: &[PathBuf], out_dir: &Path) -> ToolInvocation {
        let mut args = vec![
            "--no-res".to_string(),
            "-d".to_string(),
            out_dir.display().to_string(),
        ];
        args.extend(inputs.iter().map(|p| p.display().to_string()));
        ToolInvocation {
            program: self.binary.program(),
            args,
            note: format!("jadx source export for {} input(s)", inputs.len()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CfrAdapter {
    binary: BackendBinary,
    dex2jar: BackendBinary,
}

impl CfrAdapter {
    fn invocation(&self, jar: &Path, out_dir: &Path) -> ToolInvocation {
        ToolInvocation {
            program: self.binary.program(),
            args: vec![
                jar.display().to_string(),
                "--outputdir".to_string(),
                out_dir.display().to_string(),
            ],
            note: format!("cfr source export for {}", jar.display()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FernflowerAdapter {
    binary: BackendBinary,
    dex2jar: BackendBinary,
}

impl FernflowerAdapter {
    fn invocation(&self, jars: &[PathBuf], out_dir: &Path) -> ToolInvocation {
        let mut args = vec!["-dgs=1".to_string()];
        args.extend(jars.iter().map(|p| p.display().to_string()));
        args.push(out_dir.display().to_string());
        ToolInvocation {
            program: self.binary.program(),
            args,
            note: format!("fernflower source export for {} jar(s)", jars.len()),
        }
    }
}

fn dex2jar_invocation(binary: &BackendBinary, dex: &Path, out_dir: &Path) -> ToolInvocation {
    let stem = dex
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "classes".to_string());
    ToolInvocation {
        program: binary.program(),
        args: vec![
            "--force".to_string(),
            "--output".to_string(),
            out_dir.join(format!("{stem}.jar")).display().to_string(),
            dex.display().to_string(),
        ],
        note: format!("dex2jar conversion of {}", dex.display()),
    }
}

fn probe_binary(label: &str, candidates: &[&str]) -> BackendBinary {
    candidates
        .iter()
        .find_map(|candidate| find_in_path(candidate))
        .map(|path| BackendBinary {
            name: label.to_string(),
            available: true,
            path: Some(path),
        })
        .unwrap_or_else(|| BackendBinary::missing(label))
}

fn find_in_path(bin: &str) -> Option<PathBuf> {
    let path = env::var_os("PATH")?;
    for dir in env::split_paths(&path) {
        let candidate = dir.join(bin);
        if is_executable(&candidate) {
            return Some(candidate);
        }
        #[cfg(windows)]
        {
            for ext in ["exe", "bat", "cmd"] {
                let with_ext = dir.join(format!("{bin}.{ext}"));
                if with_ext.is_file() {
                    return Some(with_ext);
                }
            }
        }
    }
    None
}

fn is_executable(path: &Path) -> bool {
    if !path.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::metadata(path)
            .map(|md| md.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        true
    }
}
