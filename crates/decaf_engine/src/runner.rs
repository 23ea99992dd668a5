use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::thread;

use decaf_core::{update, ConfigurationError, Effect, Job, JobState, JobSubmission, Msg};
use decaf_logging::{decaf_error, decaf_info, decaf_warn};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::stage::{run_stage, StageContext};
use crate::{
    pending_records, BackendAdapter, BackendCatalog, BackendExecutor, BusMessage, BusSink,
    EngineConfig, JobRecord, MemoryProbe, PersistError, ProcessExecutor, ProgressEvent,
    ProgressSink, SourceLayout, StatusBus, SysinfoProbe, TerminalResult,
};

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("a job for {0} is already active")]
    AlreadyActive(String),
    #[error("failed to record job: {0}")]
    Persist(#[from] PersistError),
    #[error("engine is no longer running")]
    EngineStopped,
}

enum EngineCommand {
    Run {
        job: Job,
        record: JobRecord,
        ticket: Ticket,
    },
}

/// Claim on a target key in the active set.
#[derive(Clone)]
struct Ticket {
    id: u64,
    cancel: CancellationToken,
}

struct Shared {
    config: Arc<EngineConfig>,
    catalog: BackendCatalog,
    executor: Arc<dyn BackendExecutor>,
    probe: Arc<dyn MemoryProbe>,
    bus: StatusBus,
    active: Mutex<HashMap<String, Ticket>>,
    next_ticket: AtomicU64,
}

impl Shared {
    fn claim(&self, target_key: &str) -> Result<Ticket, SubmitError> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active.contains_key(target_key) {
            return Err(SubmitError::AlreadyActive(target_key.to_string()));
        }
        let ticket = Ticket {
            id: self.next_ticket.fetch_add(1, Ordering::Relaxed),
            cancel: CancellationToken::new(),
        };
        active.insert(target_key.to_string(), ticket.clone());
        Ok(ticket)
    }

    /// Releases `target_key` only if `ticket` still holds it.
    fn release(&self, target_key: &str, ticket_id: u64) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active.get(target_key).is_some_and(|held| held.id == ticket_id) {
            active.remove(target_key);
        }
    }
}

/// Releases the key when a job task ends, including by panic.
struct ActiveGuard {
    shared: Arc<Shared>,
    target_key: String,
    ticket_id: u64,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.shared.release(&self.target_key, self.ticket_id);
    }
}

/// Front door of the engine. Jobs run on a background runtime; listeners
/// follow them through [`EngineHandle::subscribe`].
pub struct EngineHandle {
    cmd_tx: mpsc::Sender<EngineCommand>,
    shared: Arc<Shared>,
}

impl EngineHandle {
    pub fn new(config: EngineConfig) -> Self {
        let catalog = BackendCatalog::detect(config.runtime_version);
        let probe = Arc::new(SysinfoProbe::new(config.memory_ceiling_bytes));
        Self::with_parts(config, catalog, Arc::new(ProcessExecutor), probe)
    }

    pub fn with_parts(
        config: EngineConfig,
        catalog: BackendCatalog,
        executor: Arc<dyn BackendExecutor>,
        probe: Arc<dyn MemoryProbe>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let shared = Arc::new(Shared {
            config: Arc::new(config),
            catalog,
            executor,
            probe,
            bus: StatusBus::new(),
            active: Mutex::new(HashMap::new()),
            next_ticket: AtomicU64::new(1),
        });

        let worker_shared = shared.clone();
        thread::spawn(move || {
            let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
            while let Ok(command) = cmd_rx.recv() {
                let shared = worker_shared.clone();
                runtime.spawn(async move {
                    handle_command(shared, command).await;
                });
            }
        });

        Self { cmd_tx, shared }
    }

    /// Plans and starts a job. Rejects unknown or unavailable backends and
    /// target keys that already have an active job; neither case touches the
    /// active job.
    pub fn submit(&self, submission: JobSubmission) -> Result<(), SubmitError> {
        let job = Job::plan(submission, &self.shared.catalog)?;
        let target_key = job.target_key().to_string();
        let ticket = self.shared.claim(&target_key)?;

        let record = JobRecord::new(&job);
        let layout = SourceLayout::new(&self.shared.config.app_storage, &target_key);
        if let Err(err) = record.save(&layout) {
            self.shared.release(&target_key, ticket.id);
            return Err(err.into());
        }

        decaf_info!(
            "Submitted {} ({}, {} stages)",
            target_key,
            job.backend,
            job.chain.len()
        );
        let ticket_id = ticket.id;
        if self
            .cmd_tx
            .send(EngineCommand::Run {
                job,
                record,
                ticket,
            })
            .is_err()
        {
            self.shared.release(&target_key, ticket_id);
            return Err(SubmitError::EngineStopped);
        }
        Ok(())
    }

    /// Requests cancellation. Unknown and finished targets are ignored.
    pub fn cancel(&self, target_key: &str) {
        let active = self.shared.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(ticket) = active.get(target_key) {
            decaf_info!("Cancellation requested for {}", target_key);
            ticket.cancel.cancel();
        }
    }

    /// Subscribe before submitting to observe a job from its first event.
    pub fn subscribe(&self, target_key: &str) -> mpsc::Receiver<BusMessage> {
        self.shared.bus.subscribe(target_key)
    }

    pub fn is_active(&self, target_key: &str) -> bool {
        self.shared
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(target_key)
    }

    /// Resubmits jobs whose record has no outcome, i.e. the process stopped
    /// while they ran. Returns the target keys that were started again.
    pub fn resume_pending(&self) -> Vec<String> {
        let mut resumed = Vec::new();
        for record in pending_records(&self.shared.config.app_storage) {
            let target_key = record.submission.target_key.clone();
            match self.submit(record.submission) {
                Ok(()) => resumed.push(target_key),
                Err(err) => decaf_warn!("Could not resume {}: {}", target_key, err),
            }
        }
        resumed
    }

    pub fn catalog(&self) -> &BackendCatalog {
        &self.shared.catalog
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }
}

async fn handle_command(shared: Arc<Shared>, command: EngineCommand) {
    match command {
        EngineCommand::Run {
            job,
            record,
            ticket,
        } => run_job(shared, job, record, ticket).await,
    }
}

async fn run_job(shared: Arc<Shared>, job: Job, mut record: JobRecord, ticket: Ticket) {
    let target_key = job.target_key().to_string();
    let _guard = ActiveGuard {
        shared: shared.clone(),
        target_key: target_key.clone(),
        ticket_id: ticket.id,
    };
    let layout = SourceLayout::new(&shared.config.app_storage, &target_key);
    let sink: Arc<dyn ProgressSink> = Arc::new(BusSink::new(shared.bus.clone(), &target_key));
    let label = job.submission.label.clone();
    let mut state = JobState::new(&target_key, &job.chain);
    let ctx = StageContext {
        adapter: BackendAdapter::for_backend(job.backend, &shared.catalog),
        job,
        layout: layout.clone(),
        config: shared.config.clone(),
        executor: shared.executor.clone(),
        probe: shared.probe.clone(),
        sink,
        cancel: ticket.cancel.clone(),
    };

    let mut queue = VecDeque::from([Msg::Start]);
    let mut cancel_delivered = false;
    while let Some(next) = queue.pop_front() {
        let msg = if !cancel_delivered && ticket.cancel.is_cancelled() {
            cancel_delivered = true;
            queue.push_front(next);
            Msg::CancelRequested
        } else {
            next
        };

        let (updated, effects) = update(state, msg);
        state = updated;
        for effect in effects {
            match effect {
                Effect::StageChanged { stage, state } => {
                    record.set_stage(stage.ordinal, state);
                    save_record(&record, &layout);
                    shared.bus.publish(
                        &target_key,
                        BusMessage::StageChanged {
                            target_key: target_key.clone(),
                            ordinal: stage.ordinal,
                            stage: stage.kind,
                            state,
                        },
                    );
                }
                Effect::StartStage(stage) => {
                    let result = run_stage(&ctx, stage).await;
                    queue.push_back(Msg::StageFinished {
                        ordinal: stage.ordinal,
                        result,
                    });
                }
                Effect::Finish {
                    outcome,
                    ran_out_of_memory,
                    message,
                } => {
                    record.finish(outcome, ran_out_of_memory);
                    save_record(&record, &layout);
                    shared.release(&target_key, ticket.id);
                    decaf_info!("{} finished: {:?}", target_key, outcome);
                    let result = TerminalResult {
                        target_key: target_key.clone(),
                        outcome,
                        ran_out_of_memory,
                        label: label.clone(),
                        detail: message,
                    };
                    // The only error a job surfaces. Cancelled and succeeded jobs stay quiet.
                    if let Some(text) = result.user_message() {
                        ctx.sink.emit(ProgressEvent::error(label.clone(), text));
                    }
                    shared.bus.publish(&target_key, BusMessage::Terminal(result));
                }
            }
        }
    }
}

fn save_record(record: &JobRecord, layout: &SourceLayout) {
    if let Err(err) = record.save(layout) {
        decaf_error!("Failed to save job record in {:?}: {}", layout.root(), err);
    }
}
