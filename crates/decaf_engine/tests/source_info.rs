use std::fs;

use decaf_engine::{load_history, SourceInfo, SourceLayout, COMPLETE_MARKER, STARTED_MARKER};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn complete_tree(dir: &std::path::Path, file: &str, body: &str) {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join(STARTED_MARKER), "").unwrap();
    fs::write(dir.join(COMPLETE_MARKER), "").unwrap();
    fs::write(dir.join(file), body).unwrap();
}

#[test]
fn complete_trees_are_reported_present() {
    let temp = TempDir::new().unwrap();
    let layout = SourceLayout::new(temp.path(), "com.example.app");
    complete_tree(&layout.java(), "Main.java", "class Main {}");
    complete_tree(&layout.resources(), "strings.xml", "<resources/>");

    let info = SourceInfo::from_dir(layout.root());
    assert_eq!(info.target_key, "com.example.app");
    assert!(info.has_java_source);
    assert!(info.has_resources);
    assert!(!info.is_corrupted);
    assert!(info.is_usable());
    assert_eq!(info.size_bytes, ("class Main {}".len() + "<resources/>".len()) as u64);
    assert_eq!(info.label, None);
}

#[test]
fn started_without_completion_is_corrupted() {
    let temp = TempDir::new().unwrap();
    let layout = SourceLayout::new(temp.path(), "com.example.app");
    complete_tree(&layout.java(), "Main.java", "class Main {}");
    fs::create_dir_all(layout.resources()).unwrap();
    fs::write(layout.resources().join(STARTED_MARKER), "").unwrap();

    let info = SourceInfo::from_dir(layout.root());
    assert!(info.has_java_source);
    assert!(!info.has_resources);
    assert!(info.is_corrupted);
    assert!(!info.is_usable());
}

#[test]
fn scanning_twice_yields_identical_results() {
    let temp = TempDir::new().unwrap();
    let layout = SourceLayout::new(temp.path(), "com.example.app");
    complete_tree(&layout.java(), "Main.java", "class Main {}");
    fs::create_dir_all(layout.unpacked()).unwrap();
    fs::write(layout.unpacked().join("classes.dex"), "dex").unwrap();

    let first = SourceInfo::from_dir(layout.root());
    let second = SourceInfo::from_dir(layout.root());
    assert_eq!(first, second);
}

#[test]
fn history_is_sorted_and_leaves_corrupted_targets_in_place() {
    let temp = TempDir::new().unwrap();
    let good = SourceLayout::new(temp.path(), "b.good");
    complete_tree(&good.java(), "Main.java", "x");
    let broken = SourceLayout::new(temp.path(), "a.broken");
    fs::create_dir_all(broken.java()).unwrap();
    fs::write(broken.java().join(STARTED_MARKER), "").unwrap();
    let stray = temp.path().join("sources").join("stray");
    fs::create_dir_all(&stray).unwrap();

    let history = load_history(temp.path());
    let keys: Vec<&str> = history.iter().map(|info| info.target_key.as_str()).collect();
    assert_eq!(keys, vec!["a.broken", "b.good"]);
    assert!(history[0].is_corrupted);
    assert!(broken.java().join(STARTED_MARKER).is_file());
    assert!(stray.is_dir());
}

#[test]
fn history_of_empty_storage_is_empty() {
    let temp = TempDir::new().unwrap();
    assert!(load_history(temp.path()).is_empty());
}
