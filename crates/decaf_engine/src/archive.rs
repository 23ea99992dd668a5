use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::StageError;

fn open(archive: &Path) -> Result<ZipArchive<File>, StageError> {
    let file = File::open(archive)?;
    Ok(ZipArchive::new(file)?)
}

/// Fails once `abort` fires. Blocking copies call this between files.
pub(crate) fn check_abort(abort: &CancellationToken) -> Result<(), StageError> {
    if abort.is_cancelled() {
        return Err(StageError::OutOfMemory("aborted before the chunk finished".to_string()));
    }
    Ok(())
}

/// Names of the file entries in a zip archive, in archive order.
pub(crate) fn list_entries(archive: &Path) -> Result<Vec<String>, StageError> {
    let zip = open(archive)?;
    Ok(zip
        .file_names()
        .filter(|name| !name.ends_with('/'))
        .map(str::to_owned)
        .collect())
}

/// Extracts the named entries below `dest`. Entries whose path would escape
/// `dest` are skipped. Stops between entries once `abort` fires.
pub(crate) fn extract_entries(
    archive: &Path,
    names: &[String],
    dest: &Path,
    abort: &CancellationToken,
) -> Result<usize, StageError> {
    let mut zip = open(archive)?;
    let mut written = 0;
    for name in names {
        check_abort(abort)?;
        let mut entry = zip.by_name(name)?;
        if entry.is_dir() {
            continue;
        }
        let Some(relative) = entry.enclosed_name() else {
            decaf_logging::decaf_warn!("Skipping unsafe archive entry {name}");
            continue;
        };
        let target = dest.join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        io::copy(&mut entry, &mut out)?;
        written += 1;
    }
    Ok(written)
}

/// Expands every entry of `jar` into `dest` and removes the jar.
pub(crate) fn expand_in_place(jar: &Path, dest: &Path) -> Result<(), StageError> {
    let names = list_entries(jar)?;
    extract_entries(jar, &names, dest, &CancellationToken::new())?;
    fs::remove_file(jar)?;
    Ok(())
}

/// Packs `files` into a new jar at `jar_path`, naming each entry by its path
/// relative to `root`.
pub(crate) fn pack_classes(
    files: &[PathBuf],
    root: &Path,
    jar_path: &Path,
    abort: &CancellationToken,
) -> Result<(), StageError> {
    if let Some(parent) = jar_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = ZipWriter::new(File::create(jar_path)?);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for file in files {
        check_abort(abort)?;
        let relative = file.strip_prefix(root).map_err(|_| {
            StageError::Fatal(format!("{} is outside {}", file.display(), root.display()))
        })?;
        writer.start_file(entry_name(relative), options)?;
        let mut input = File::open(file)?;
        io::copy(&mut input, &mut writer)?;
    }
    writer.finish()?;
    Ok(())
}

fn entry_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// True when `path` (an archive entry or a path relative to the unpack root,
/// `/`-separated) belongs to a bundled library.
pub(crate) fn is_library_path(path: &str, prefixes: &[String]) -> bool {
    let path = path.trim_start_matches('/');
    prefixes.iter().any(|prefix| path.starts_with(prefix.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let mut writer = ZipWriter::new(File::create(path).unwrap());
        for (name, body) in entries {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(body).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn library_prefixes_match_from_the_root() {
        let prefixes = vec!["androidx/".to_string(), "kotlin/".to_string()];
        assert!(is_library_path("androidx/core/View.class", &prefixes));
        assert!(is_library_path("/kotlin/Unit.class", &prefixes));
        assert!(!is_library_path("com/app/kotlin/Main.class", &prefixes));
    }

    #[test]
    fn unsafe_entries_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("evil.zip");
        write_zip(&archive, &[("../escape.txt", b"x"), ("ok/file.txt", b"y")]);

        let dest = dir.path().join("out");
        let names = list_entries(&archive).unwrap();
        let written = extract_entries(&archive, &names, &dest, &CancellationToken::new()).unwrap();

        assert_eq!(written, 1);
        assert!(dest.join("ok/file.txt").exists());
        assert!(!dir.path().join("escape.txt").exists());
    }

    #[test]
    fn packed_jar_expands_back() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("classes");
        fs::create_dir_all(root.join("com/app")).unwrap();
        let class = root.join("com/app/Main.class");
        fs::write(&class, b"cafebabe").unwrap();

        let jar = dir.path().join("chunk.jar");
        pack_classes(&[class], &root, &jar, &CancellationToken::new()).unwrap();
        assert_eq!(list_entries(&jar).unwrap(), vec!["com/app/Main.class"]);

        let dest = dir.path().join("expanded");
        expand_in_place(&jar, &dest).unwrap();
        assert!(!jar.exists());
        assert_eq!(fs::read(dest.join("com/app/Main.class")).unwrap(), b"cafebabe");
    }

    #[test]
    fn aborted_extraction_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("app.zip");
        write_zip(&archive, &[("a.txt", b"a"), ("b.txt", b"b")]);
        let abort = CancellationToken::new();
        abort.cancel();

        let dest = dir.path().join("out");
        let names = list_entries(&archive).unwrap();
        let result = extract_entries(&archive, &names, &dest, &abort);

        assert!(matches!(result, Err(StageError::OutOfMemory(_))));
        assert!(!dest.join("a.txt").exists());
        assert!(!dest.join("b.txt").exists());
    }
}
