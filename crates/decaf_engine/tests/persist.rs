use std::fs;

use decaf_core::{BackendId, InputType, Job, JobSubmission, Outcome, StageState};
use decaf_engine::{
    ensure_output_dir, pending_records, AtomicFileWriter, JobRecord, SourceLayout,
    COMPLETE_MARKER, RECORD_FILENAME, STARTED_MARKER,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn job(target_key: &str) -> Job {
    let submission = JobSubmission {
        decompiler_backend: "cfr".to_string(),
        ignore_libraries: true,
        max_attempts: 2,
        chunk_size: 50,
        memory_threshold: 85,
        keep_intermediate_files: false,
        target_key: target_key.to_string(),
        label: "Sample".to_string(),
        input_file_path: "/tmp/sample.apk".into(),
        input_type: InputType::Apk,
    };
    Job::plan(submission, &|_: BackendId| true).unwrap()
}

#[test]
fn creates_missing_output_dir() {
    let temp = TempDir::new().unwrap();
    let new_dir = temp.path().join("out");
    assert!(!new_dir.exists());
    ensure_output_dir(&new_dir).unwrap();
    assert!(new_dir.is_dir());
}

#[test]
fn atomic_write_replaces_existing_file() {
    let temp = TempDir::new().unwrap();
    let writer = AtomicFileWriter::new(temp.path().to_path_buf());

    let first = writer.write("job.ron", b"first").unwrap();
    let second = writer.write("job.ron", b"second").unwrap();
    assert_eq!(first, second);
    assert_eq!(fs::read_to_string(&second).unwrap(), "second");
    assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 1);
}

#[test]
fn no_partial_file_when_target_dir_is_a_file() {
    let temp = TempDir::new().unwrap();
    let file_path = temp.path().join("not_a_dir");
    fs::write(&file_path, "x").unwrap();

    let writer = AtomicFileWriter::new(file_path.clone());
    assert!(writer.write("job.ron", b"data").is_err());
    assert!(!file_path.with_file_name("job.ron").exists());
}

#[test]
fn restarting_a_stage_clears_its_completion() {
    let temp = TempDir::new().unwrap();
    let layout = SourceLayout::new(temp.path(), "com.example.app");
    let java = layout.java();

    SourceLayout::mark_started(&java).unwrap();
    SourceLayout::mark_complete(&java).unwrap();
    assert!(java.join(COMPLETE_MARKER).is_file());

    SourceLayout::mark_started(&java).unwrap();
    assert!(java.join(STARTED_MARKER).is_file());
    assert!(!java.join(COMPLETE_MARKER).exists());
}

#[test]
fn job_record_survives_a_reload() {
    let temp = TempDir::new().unwrap();
    let layout = SourceLayout::new(temp.path(), "com.example.app");
    let mut record = JobRecord::new(&job("com.example.app"));
    record.set_stage(0, StageState::Running);
    record.save(&layout).unwrap();

    let loaded = JobRecord::load(&layout).unwrap().unwrap();
    assert_eq!(loaded, record);
    assert!(loaded.is_pending());
    assert_eq!(loaded.stages.len(), 4);
    assert!(layout.root().join(RECORD_FILENAME).is_file());
}

#[test]
fn missing_record_loads_as_none() {
    let temp = TempDir::new().unwrap();
    let layout = SourceLayout::new(temp.path(), "nothing.here");
    assert_eq!(JobRecord::load(&layout).unwrap(), None);
}

#[test]
fn pending_records_skip_finished_and_unreadable_jobs() {
    let temp = TempDir::new().unwrap();

    JobRecord::new(&job("b.pending"))
        .save(&SourceLayout::new(temp.path(), "b.pending"))
        .unwrap();
    JobRecord::new(&job("a.pending"))
        .save(&SourceLayout::new(temp.path(), "a.pending"))
        .unwrap();

    let mut done = JobRecord::new(&job("c.done"));
    done.finish(Outcome::Cancelled, false);
    done.save(&SourceLayout::new(temp.path(), "c.done")).unwrap();

    let garbage = SourceLayout::new(temp.path(), "d.garbage");
    fs::create_dir_all(garbage.root()).unwrap();
    fs::write(garbage.root().join(RECORD_FILENAME), "not ron (").unwrap();

    let keys: Vec<String> = pending_records(temp.path())
        .into_iter()
        .map(|record| record.submission.target_key)
        .collect();
    assert_eq!(keys, vec!["a.pending", "b.pending"]);
}
