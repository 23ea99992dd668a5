//! One stage of a job: chunked work, retries, memory watch, markers, cleanup.

use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use decaf_core::{
    normalize_line, InputType, Job, MemoryWatch, StageDescriptor, StageKind, StageResult,
};
use decaf_logging::{decaf_debug, decaf_info, decaf_trace, decaf_warn};
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::archive::{
    check_abort, expand_in_place, extract_entries, is_library_path, list_entries, pack_classes,
};
use crate::persist::{ensure_output_dir, remove_dir_if_exists, remove_file_if_exists};
use crate::{
    BackendAdapter, BackendExecutor, EngineConfig, LineSink, MemoryMonitor, MemoryProbe,
    ProgressEvent, ProgressSink, SourceLayout, StageError, ToolInvocation, COMPLETE_MARKER,
    STARTED_MARKER,
};

/// Everything a stage needs from its job and the engine.
pub(crate) struct StageContext {
    pub job: Job,
    pub layout: SourceLayout,
    pub adapter: BackendAdapter,
    pub config: Arc<EngineConfig>,
    pub executor: Arc<dyn BackendExecutor>,
    pub probe: Arc<dyn MemoryProbe>,
    pub sink: Arc<dyn ProgressSink>,
    pub cancel: CancellationToken,
}

/// Items a stage works through, chunk by chunk.
enum WorkItems {
    /// Entry names inside the input archive.
    Entries(Vec<String>),
    Files(Vec<PathBuf>),
}

impl WorkItems {
    fn len(&self) -> usize {
        match self {
            WorkItems::Entries(items) => items.len(),
            WorkItems::Files(items) => items.len(),
        }
    }
}

/// Routes backend output through the normalizer into status events.
struct NormalizingSink {
    sink: Arc<dyn ProgressSink>,
    title: &'static str,
}

impl LineSink for NormalizingSink {
    fn line(&self, raw: &str) {
        match normalize_line(raw) {
            Some(clean) => {
                decaf_debug!("{}: {}", self.title, clean);
                self.sink.emit(ProgressEvent::status(self.title, clean));
            }
            None => decaf_trace!("dropped backend line: {}", raw.trim_end()),
        }
    }
}

/// Runs one stage to a terminal result. Never panics on stage failures; every
/// error is folded into the returned [`StageResult`].
pub(crate) async fn run_stage(ctx: &StageContext, stage: StageDescriptor) -> StageResult {
    let kind = stage.kind;
    let title = kind.title();
    decaf_info!("{} [{}] stage {} started", ctx.job.target_key(), kind, stage.ordinal);
    ctx.sink
        .emit(ProgressEvent::status(title, "Started").with_secondary(ctx.job.submission.label.clone()));

    let outcome = match prepare_output(ctx, kind) {
        Ok(()) => run_with_monitor(ctx, kind).await,
        Err(err) => Err(err),
    };

    match outcome {
        Ok(()) => {
            decaf_info!("{} [{}] succeeded", ctx.job.target_key(), kind);
            StageResult::Succeeded
        }
        Err(StageError::Cancelled) => {
            decaf_info!("{} [{}] cancelled", ctx.job.target_key(), kind);
            StageResult::Cancelled
        }
        Err(err) => {
            decaf_warn!("{} [{}] failed: {}", ctx.job.target_key(), kind, err);
            StageResult::Failed {
                ran_out_of_memory: matches!(err, StageError::OutOfMemory(_)),
                message: err.to_string(),
            }
        }
    }
}

fn output_dir(layout: &SourceLayout, kind: StageKind) -> PathBuf {
    match kind {
        StageKind::Unpack => layout.unpacked(),
        StageKind::IntermediateConvert => layout.intermediate(),
        StageKind::Convert => layout.java(),
        StageKind::Resources => layout.resources(),
    }
}

fn prepare_output(ctx: &StageContext, kind: StageKind) -> Result<(), StageError> {
    let dir = output_dir(&ctx.layout, kind);
    if kind.writes_markers() {
        SourceLayout::mark_started(&dir)?;
    } else {
        ensure_output_dir(&dir)?;
    }
    Ok(())
}

async fn run_with_monitor(ctx: &StageContext, kind: StageKind) -> Result<(), StageError> {
    let submission = &ctx.job.submission;
    let oom = CancellationToken::new();
    let monitor = MemoryMonitor::spawn(
        ctx.probe.clone(),
        ctx.config.memory_sample_interval,
        MemoryWatch::new(submission.memory_threshold, ctx.config.oom_consecutive_samples),
        ctx.sink.clone(),
        oom.clone(),
    );

    let result = match collect_items(ctx, kind) {
        Ok(items) => run_chunks(ctx, kind, &items, &oom).await.map(|()| items),
        Err(err) => Err(err),
    };
    monitor.stop().await;
    let items = result?;

    finish_output(ctx, kind)?;
    if !submission.keep_intermediate_files {
        remove_consumed(ctx, kind, &items);
    }
    Ok(())
}

fn collect_items(ctx: &StageContext, kind: StageKind) -> Result<WorkItems, StageError> {
    let submission = &ctx.job.submission;
    let layout = &ctx.layout;
    match kind {
        StageKind::Unpack => {
            let input = &submission.input_file_path;
            if !input.is_file() {
                return Err(StageError::Fatal(format!(
                    "input file {} is missing",
                    input.display()
                )));
            }
            if !submission.input_type.is_archive() {
                return Ok(WorkItems::Files(vec![input.clone()]));
            }
            let mut entries = list_entries(input)?;
            if submission.ignore_libraries {
                entries.retain(|name| !is_library_path(name, &ctx.config.library_prefixes));
            }
            Ok(WorkItems::Entries(entries))
        }
        StageKind::IntermediateConvert => code_items(layout, submission.input_type),
        StageKind::Convert if ctx.adapter.id().direct_to_source() => {
            code_items(layout, submission.input_type)
        }
        StageKind::Convert => {
            let jars = files_matching(&layout.intermediate(), |path| has_extension(path, "jar"));
            if jars.is_empty() {
                return Err(StageError::Fatal(format!(
                    "no converted jars in {}",
                    layout.intermediate().display()
                )));
            }
            Ok(WorkItems::Files(jars))
        }
        StageKind::Resources => Ok(WorkItems::Files(files_matching(&layout.unpacked(), |path| {
            !is_code(path) && !is_marker(path)
        }))),
    }
}

/// Bytecode produced by the unpack stage: dex containers, or class files for jar input.
fn code_items(layout: &SourceLayout, input_type: InputType) -> Result<WorkItems, StageError> {
    let extension = match input_type {
        InputType::Jar => "class",
        InputType::Apk | InputType::Dex => "dex",
    };
    let files = files_matching(&layout.unpacked(), |path| has_extension(path, extension));
    if files.is_empty() {
        return Err(StageError::Fatal(format!(
            "no .{extension} files in {}",
            layout.unpacked().display()
        )));
    }
    Ok(WorkItems::Files(files))
}

async fn run_chunks(
    ctx: &StageContext,
    kind: StageKind,
    items: &WorkItems,
    oom: &CancellationToken,
) -> Result<(), StageError> {
    let submission = &ctx.job.submission;
    let max_attempts = submission.max_attempts.max(1);
    let ranges = chunk_ranges(items.len(), submission.chunk_size);
    let total = ranges.len();
    let mut failures = 0;

    for (index, range) in ranges.into_iter().enumerate() {
        if ctx.cancel.is_cancelled() {
            return Err(StageError::Cancelled);
        }
        ctx.sink.emit(ProgressEvent::status(
            kind.title(),
            format!("Chunk {} of {}", index + 1, total),
        ));

        loop {
            let attempt = tokio::select! {
                biased;
                _ = oom.cancelled() => Err(StageError::OutOfMemory(
                    "memory stayed above the configured threshold".to_string(),
                )),
                result = process_chunk(ctx, kind, index, items, range.clone(), oom) => result,
            };
            match attempt {
                Ok(()) => break,
                Err(err) if err.is_transient() => {
                    if ctx.cancel.is_cancelled() {
                        return Err(StageError::Cancelled);
                    }
                    failures += 1;
                    if failures >= max_attempts {
                        return Err(err);
                    }
                    decaf_warn!(
                        "{} [{}] chunk {} failed, retrying: {}",
                        ctx.job.target_key(),
                        kind,
                        index + 1,
                        err
                    );
                    ctx.sink.emit(ProgressEvent::status(
                        kind.title(),
                        format!(
                            "Retrying {} (attempt {} of {})",
                            kind.title().to_lowercase(),
                            failures + 1,
                            max_attempts
                        ),
                    ));
                }
                Err(err) => return Err(err),
            }
        }

        if ctx.cancel.is_cancelled() {
            return Err(StageError::Cancelled);
        }
    }
    Ok(())
}

fn chunk_ranges(len: usize, chunk_size: usize) -> Vec<Range<usize>> {
    let chunk_size = chunk_size.max(1);
    (0..len)
        .step_by(chunk_size)
        .map(|start| start..(start + chunk_size).min(len))
        .collect()
}

async fn process_chunk(
    ctx: &StageContext,
    kind: StageKind,
    index: usize,
    items: &WorkItems,
    range: Range<usize>,
    oom: &CancellationToken,
) -> Result<(), StageError> {
    let layout = &ctx.layout;
    // Dropping a blocking task does not stop it, so file work polls the abort token itself.
    let abort = oom.clone();
    match (kind, items) {
        (StageKind::Unpack, WorkItems::Entries(entries)) => {
            let archive = ctx.job.submission.input_file_path.clone();
            let names = entries[range].to_vec();
            let dest = layout.unpacked();
            blocking(move || extract_entries(&archive, &names, &dest, &abort).map(|_| ())).await
        }
        (StageKind::Unpack, WorkItems::Files(files)) => {
            let files = files[range].to_vec();
            let dest = layout.unpacked();
            blocking(move || copy_into(&files, &dest, &abort)).await
        }
        (StageKind::IntermediateConvert, WorkItems::Files(files))
            if ctx.job.submission.input_type == InputType::Jar =>
        {
            let files = files[range].to_vec();
            let root = layout.unpacked();
            let jar = layout.intermediate().join(format!("classes-{index:04}.jar"));
            blocking(move || pack_classes(&files, &root, &jar, &abort)).await
        }
        (StageKind::IntermediateConvert, WorkItems::Files(files)) => {
            let plan = ctx
                .adapter
                .plan_intermediate(&files[range], &layout.intermediate())?;
            run_plan(ctx, kind, &plan).await
        }
        (StageKind::Convert, WorkItems::Files(files)) => {
            let plan = ctx.adapter.plan_convert(&files[range], &layout.java());
            run_plan(ctx, kind, &plan).await
        }
        (StageKind::Resources, WorkItems::Files(files)) => {
            let files = files[range].to_vec();
            let root = layout.unpacked();
            let dest = layout.resources();
            blocking(move || copy_relative(&files, &root, &dest, &abort)).await
        }
        (kind, _) => Err(StageError::Fatal(format!("no work plan for stage {kind}"))),
    }
}

async fn run_plan(
    ctx: &StageContext,
    kind: StageKind,
    plan: &[ToolInvocation],
) -> Result<(), StageError> {
    let lines = NormalizingSink {
        sink: ctx.sink.clone(),
        title: kind.title(),
    };
    for invocation in plan {
        ctx.executor.execute(invocation, &lines).await?;
    }
    Ok(())
}

async fn blocking<F>(task: F) -> Result<(), StageError>
where
    F: FnOnce() -> Result<(), StageError> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|err| StageError::Fatal(format!("worker task failed: {err}")))?
}

fn finish_output(ctx: &StageContext, kind: StageKind) -> Result<(), StageError> {
    let dir = output_dir(&ctx.layout, kind);
    if kind == StageKind::Convert && ctx.adapter.id().emits_source_archive() {
        let jars = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && has_extension(path, "jar"));
        for jar in jars {
            expand_in_place(&jar, &dir)?;
        }
    }
    if kind.writes_markers() {
        SourceLayout::mark_complete(&dir)?;
    }
    Ok(())
}

/// Deletes what this stage consumed. Failures are logged; the stage already succeeded.
fn remove_consumed(ctx: &StageContext, kind: StageKind, items: &WorkItems) {
    let layout = &ctx.layout;
    let result = match (kind, items) {
        (StageKind::Unpack, _) => Ok(()),
        (StageKind::Convert, _) if !ctx.adapter.id().direct_to_source() => {
            remove_dir_if_exists(&layout.intermediate())
        }
        (StageKind::Resources, _) => remove_dir_if_exists(&layout.unpacked()),
        (_, WorkItems::Files(files)) => files.iter().try_for_each(|file| remove_file_if_exists(file)),
        (_, WorkItems::Entries(_)) => Ok(()),
    };
    if let Err(err) = result {
        decaf_warn!(
            "{} [{}] could not remove consumed input: {}",
            ctx.job.target_key(),
            kind,
            err
        );
    }
}

fn copy_into(files: &[PathBuf], dest: &Path, abort: &CancellationToken) -> Result<(), StageError> {
    for file in files {
        check_abort(abort)?;
        let name = file
            .file_name()
            .ok_or_else(|| StageError::Fatal(format!("{} has no file name", file.display())))?;
        fs::copy(file, dest.join(name))?;
    }
    Ok(())
}

fn copy_relative(
    files: &[PathBuf],
    root: &Path,
    dest: &Path,
    abort: &CancellationToken,
) -> Result<(), StageError> {
    for file in files {
        check_abort(abort)?;
        let relative = file.strip_prefix(root).map_err(|_| {
            StageError::Fatal(format!("{} is outside {}", file.display(), root.display()))
        })?;
        let target = dest.join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(file, target)?;
    }
    Ok(())
}

fn files_matching(root: &Path, keep: impl Fn(&Path) -> bool) -> Vec<PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| keep(path))
        .collect()
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
}

fn is_code(path: &Path) -> bool {
    has_extension(path, "dex") || has_extension(path, "class")
}

fn is_marker(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|name| name == STARTED_MARKER || name == COMPLETE_MARKER)
}
