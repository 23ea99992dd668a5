//! Command-line shell over the decaf engine.

mod preferences;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use decaf_core::{
    BackendAvailability, BackendId, ChainStatus, InputType, JobSubmission, MemoryBand, Outcome,
    StageState,
};
use decaf_engine::{
    archive_target_key, ensure_output_dir, load_history, pending_records, BackendCatalog,
    BusMessage, EngineConfig, EngineHandle, EventKind, TerminalResult,
};
use decaf_logging::{decaf_info, LogDestination};
use log::LevelFilter;

use crate::preferences::{load_preferences, save_preferences, Preferences};

#[derive(Parser)]
#[command(name = "decaf")]
#[command(about = "Decompile android packages and java archives into source", version)]
struct Cli {
    /// Storage root for sources, job records and preferences
    #[arg(long, global = true, default_value = "./decaf-data")]
    storage: PathBuf,

    /// Log debug output to the terminal
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decompile one input and follow its progress
    Run {
        /// The .apk, .jar or .dex file to decompile
        input: PathBuf,

        /// Backend to use (jadx, cfr, fernflower)
        #[arg(long, short = 'b')]
        backend: Option<String>,

        /// Target key; derived from the file name when omitted
        #[arg(long)]
        target_key: Option<String>,

        /// Display label; defaults to the file name
        #[arg(long)]
        label: Option<String>,

        #[arg(long)]
        chunk_size: Option<usize>,

        #[arg(long)]
        max_attempts: Option<u32>,

        /// Memory threshold in percent
        #[arg(long)]
        memory_threshold: Option<u8>,

        /// Decompile bundled libraries too
        #[arg(long)]
        include_libraries: bool,

        /// Keep unpacked and intermediate files
        #[arg(long)]
        keep_intermediate: bool,

        /// Print bus messages as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// List decompiled targets
    History {
        #[arg(long)]
        json: bool,
    },

    /// Show which backends can run on this host
    Backends,

    /// Restart jobs interrupted by a previous process
    Resume,

    /// Store new job defaults
    Configure {
        #[arg(long)]
        backend: Option<String>,
        #[arg(long)]
        chunk_size: Option<usize>,
        #[arg(long)]
        max_attempts: Option<u32>,
        #[arg(long)]
        memory_threshold: Option<u8>,
        #[arg(long)]
        runtime_version: Option<u32>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let destination = match ensure_output_dir(&cli.storage) {
        Ok(()) => LogDestination::Both(cli.storage.join("decaf.log")),
        Err(_) => LogDestination::Terminal,
    };
    decaf_logging::initialize(destination, level);

    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let preferences = load_preferences(&cli.storage);
    match cli.command {
        Commands::Run {
            input,
            backend,
            target_key,
            label,
            chunk_size,
            max_attempts,
            memory_threshold,
            include_libraries,
            keep_intermediate,
            json,
        } => {
            let file_name = input
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .context("input path has no file name")?;
            let submission = JobSubmission {
                decompiler_backend: backend.unwrap_or(preferences.decompiler_backend.clone()),
                ignore_libraries: preferences.ignore_libraries && !include_libraries,
                max_attempts: max_attempts.unwrap_or(preferences.max_attempts),
                chunk_size: chunk_size.unwrap_or(preferences.chunk_size),
                memory_threshold: memory_threshold.unwrap_or(preferences.memory_threshold),
                keep_intermediate_files: preferences.keep_intermediate_files || keep_intermediate,
                target_key: target_key.unwrap_or_else(|| archive_target_key(&file_name)),
                label: label.unwrap_or(file_name),
                input_type: input_type_for(&input)?,
                input_file_path: input,
            };
            run_job(&cli.storage, &preferences, submission, json)
        }
        Commands::History { json } => {
            print_history(&cli.storage, json)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Backends => {
            print_backends(&BackendCatalog::detect(preferences.runtime_version));
            Ok(ExitCode::SUCCESS)
        }
        Commands::Resume => resume(&cli.storage, &preferences),
        Commands::Configure {
            backend,
            chunk_size,
            max_attempts,
            memory_threshold,
            runtime_version,
        } => {
            let mut updated = preferences;
            if let Some(backend) = backend {
                let backend: BackendId = backend.parse()?;
                updated.decompiler_backend = backend.to_string();
            }
            updated.chunk_size = chunk_size.unwrap_or(updated.chunk_size);
            updated.max_attempts = max_attempts.unwrap_or(updated.max_attempts);
            updated.memory_threshold = memory_threshold.unwrap_or(updated.memory_threshold);
            updated.runtime_version = runtime_version.unwrap_or(updated.runtime_version);
            save_preferences(&cli.storage, &updated);
            println!("{updated:#?}");
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn input_type_for(input: &Path) -> Result<InputType> {
    let extension = input
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase());
    match extension.as_deref() {
        Some("apk") => Ok(InputType::Apk),
        Some("jar") => Ok(InputType::Jar),
        Some("dex") => Ok(InputType::Dex),
        _ => bail!("unsupported input {:?}: expected .apk, .jar or .dex", input),
    }
}

fn engine_config(storage: &Path, preferences: &Preferences) -> EngineConfig {
    let mut config = EngineConfig::default_with_storage(storage.to_path_buf());
    config.runtime_version = preferences.runtime_version;
    config
}

/// Sets a flag on Ctrl-C; the follow loop turns it into a cancellation request.
fn install_interrupt_flag() -> Result<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    let handler_flag = flag.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nReceived interrupt, cancelling...");
        handler_flag.store(true, Ordering::SeqCst);
    })
    .context("failed to install Ctrl-C handler")?;
    Ok(flag)
}

fn run_job(
    storage: &Path,
    preferences: &Preferences,
    submission: JobSubmission,
    json: bool,
) -> Result<ExitCode> {
    let engine = EngineHandle::new(engine_config(storage, preferences));
    let interrupted = install_interrupt_flag()?;
    let target_key = submission.target_key.clone();

    let rx = engine.subscribe(&target_key);
    engine
        .submit(submission)
        .with_context(|| format!("could not start job for {target_key}"))?;
    decaf_info!("Decompiling into {:?}", engine.config().sources_dir().join(&target_key));

    let result = follow(&target_key, &rx, &interrupted, json, || engine.cancel(&target_key))?;
    Ok(exit_code(&result))
}

/// Prints bus messages until the job's terminal result arrives. The interrupt
/// flag is polled on every message so a busy stream still forwards Ctrl-C.
fn follow(
    target_key: &str,
    rx: &mpsc::Receiver<BusMessage>,
    interrupted: &AtomicBool,
    json: bool,
    cancel: impl Fn(),
) -> Result<TerminalResult> {
    let mut printer = Printer::new(json);
    loop {
        if interrupted.swap(false, Ordering::SeqCst) {
            cancel();
        }
        match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(BusMessage::Terminal(result)) => {
                printer.print(&BusMessage::Terminal(result.clone()))?;
                return Ok(result);
            }
            Ok(message) => printer.print(&message)?,
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                bail!("engine stopped before {target_key} finished")
            }
        }
    }
}

fn exit_code(result: &TerminalResult) -> ExitCode {
    match result.outcome {
        Outcome::Succeeded => ExitCode::SUCCESS,
        Outcome::Failed => ExitCode::FAILURE,
        Outcome::Cancelled => ExitCode::from(130),
    }
}

/// Renders bus messages for a terminal. Memory samples are only shown when
/// their band changes.
struct Printer {
    json: bool,
    last_band: Option<MemoryBand>,
}

impl Printer {
    fn new(json: bool) -> Self {
        Self {
            json,
            last_band: None,
        }
    }

    fn print(&mut self, message: &BusMessage) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string(message)?);
            return Ok(());
        }
        match message {
            BusMessage::Status(event) => match event.kind {
                EventKind::Status => println!(
                    "{}: {}",
                    event.title.as_deref().unwrap_or("-"),
                    event.message.as_deref().unwrap_or("")
                ),
                EventKind::Memory => {
                    let percent = event.percent.unwrap_or(0.0);
                    let band = MemoryBand::from_percent(percent);
                    if self.last_band != Some(band) {
                        println!("memory: {percent:.1}% ({band:?})");
                        self.last_band = Some(band);
                    }
                }
                EventKind::Error => eprintln!("{}", event.message.as_deref().unwrap_or("")),
            },
            BusMessage::StageChanged {
                ordinal,
                stage,
                state,
                ..
            } => {
                if *state != StageState::Enqueued {
                    println!("[{}] {} {:?}", ordinal + 1, stage, state);
                }
            }
            BusMessage::Terminal(result) => println!("{}: {:?}", result.label, result.outcome),
        }
        Ok(())
    }
}

fn print_history(storage: &Path, json: bool) -> Result<()> {
    let history = load_history(storage);
    if json {
        println!("{}", serde_json::to_string_pretty(&history)?);
        return Ok(());
    }
    if history.is_empty() {
        println!("No decompiled targets in {:?}", storage);
        return Ok(());
    }
    for info in &history {
        let state = if info.is_corrupted {
            "incomplete"
        } else if info.is_usable() {
            "ready"
        } else {
            "partial"
        };
        println!(
            "{:<40} {:<10} java={} resources={} {:>10} bytes  {}",
            info.target_key,
            state,
            info.has_java_source,
            info.has_resources,
            info.size_bytes,
            info.label.as_deref().unwrap_or("")
        );
    }
    for record in pending_records(storage) {
        let states: Vec<StageState> = record.stages.iter().map(|stage| stage.state).collect();
        println!(
            "{:<40} interrupted ({:?}); run `decaf resume` to restart",
            record.submission.target_key,
            ChainStatus::reconcile(&states)
        );
    }
    Ok(())
}

fn print_backends(catalog: &BackendCatalog) {
    println!("java runtime: {}", catalog.runtime_version);
    for backend in BackendId::ALL {
        let binary = catalog.binary(backend);
        println!(
            "{:<12} {:<12} min runtime {:<3} {:<8} {}",
            backend.as_str(),
            if catalog.is_available(backend) {
                "available"
            } else {
                "unavailable"
            },
            backend.min_runtime_version(),
            if backend.direct_to_source() {
                "direct"
            } else {
                "split"
            },
            binary
                .path
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| format!("{} not found", binary.name))
        );
    }
    if !catalog.dex2jar.available {
        println!("split backends need {} on PATH", catalog.dex2jar.name);
    }
}

fn resume(storage: &Path, preferences: &Preferences) -> Result<ExitCode> {
    let pending = pending_records(storage);
    if pending.is_empty() {
        println!("Nothing to resume");
        return Ok(ExitCode::SUCCESS);
    }
    let engine = EngineHandle::new(engine_config(storage, preferences));
    let interrupted = install_interrupt_flag()?;
    let receivers: Vec<(String, mpsc::Receiver<BusMessage>)> = pending
        .iter()
        .map(|record| {
            let key = record.submission.target_key.clone();
            let rx = engine.subscribe(&key);
            (key, rx)
        })
        .collect();

    let resumed = engine.resume_pending();
    let mut code = ExitCode::SUCCESS;
    for (key, rx) in receivers {
        if !resumed.contains(&key) {
            continue;
        }
        println!("Resuming {key}");
        let result = follow(&key, &rx, &interrupted, false, || engine.cancel(&key))?;
        if result.outcome != Outcome::Succeeded {
            code = exit_code(&result);
        }
    }
    Ok(code)
}
