use std::path::PathBuf;

use decaf_core::{
    build_chain, BackendId, ConfigurationError, InputType, Job, JobSubmission, StageKind,
};
use pretty_assertions::assert_eq;

fn all_available(_: BackendId) -> bool {
    true
}

fn submission(backend: &str) -> JobSubmission {
    JobSubmission {
        decompiler_backend: backend.to_string(),
        ignore_libraries: true,
        max_attempts: 3,
        chunk_size: 500,
        memory_threshold: 80,
        keep_intermediate_files: false,
        target_key: "com.example.app".to_string(),
        label: "Example".to_string(),
        input_file_path: PathBuf::from("/tmp/example.apk"),
        input_type: InputType::Apk,
    }
}

fn kinds(job: &Job) -> Vec<StageKind> {
    job.chain.iter().map(|stage| stage.kind).collect()
}

#[test]
fn combined_backend_skips_intermediate_conversion() {
    let job = Job::plan(submission("jadx"), &all_available).unwrap();
    assert_eq!(job.backend, BackendId::Jadx);
    assert_eq!(
        kinds(&job),
        vec![StageKind::Unpack, StageKind::Convert, StageKind::Resources]
    );
    let ordinals: Vec<_> = job.chain.iter().map(|stage| stage.ordinal).collect();
    assert_eq!(ordinals, vec![0, 1, 2]);
}

#[test]
fn split_backends_convert_through_an_intermediate_container() {
    for backend in ["cfr", "fernflower"] {
        let job = Job::plan(submission(backend), &all_available).unwrap();
        assert_eq!(
            kinds(&job),
            vec![
                StageKind::Unpack,
                StageKind::IntermediateConvert,
                StageKind::Convert,
                StageKind::Resources
            ]
        );
    }
}

#[test]
fn unknown_backend_is_a_configuration_error() {
    let err = Job::plan(submission("procyon"), &all_available).unwrap_err();
    assert_eq!(err, ConfigurationError::UnknownBackend("procyon".to_string()));
}

#[test]
fn unavailable_backend_is_rejected_before_planning() {
    let only_cfr = |backend: BackendId| backend == BackendId::Cfr;
    let err = Job::plan(submission("jadx"), &only_cfr).unwrap_err();
    assert_eq!(err, ConfigurationError::BackendUnavailable(BackendId::Jadx));
    assert!(build_chain(BackendId::Cfr, &only_cfr).is_ok());
}

#[test]
fn submission_bounds_are_validated() {
    let mut zero_chunks = submission("jadx");
    zero_chunks.chunk_size = 0;
    assert_eq!(
        Job::plan(zero_chunks, &all_available).unwrap_err(),
        ConfigurationError::ZeroChunkSize
    );

    let mut zero_attempts = submission("jadx");
    zero_attempts.max_attempts = 0;
    assert_eq!(
        Job::plan(zero_attempts, &all_available).unwrap_err(),
        ConfigurationError::ZeroAttempts
    );

    let mut threshold = submission("jadx");
    threshold.memory_threshold = 101;
    assert_eq!(
        Job::plan(threshold, &all_available).unwrap_err(),
        ConfigurationError::ThresholdOutOfRange(101)
    );

    let mut bad_key = submission("jadx");
    bad_key.target_key = "../escape".to_string();
    assert!(matches!(
        Job::plan(bad_key, &all_available).unwrap_err(),
        ConfigurationError::InvalidTargetKey(_)
    ));
}

#[test]
fn submission_uses_camel_case_wire_names() {
    let json = r#"{
        "decompilerBackend": "cfr",
        "ignoreLibraries": false,
        "maxAttempts": 2,
        "chunkSize": 100,
        "memoryThreshold": 75,
        "keepIntermediateFiles": true,
        "targetKey": "lib-1234abcd",
        "label": "lib.jar",
        "inputFilePath": "/data/lib.jar",
        "inputType": "jar"
    }"#;
    let parsed: JobSubmission = serde_json::from_str(json).unwrap();
    assert_eq!(parsed.input_type, InputType::Jar);
    assert_eq!(parsed.chunk_size, 100);
    assert!(parsed.keep_intermediate_files);
}
