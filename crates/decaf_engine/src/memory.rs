use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use decaf_core::{percent_used, MemoryWatch, WatchVerdict};
use decaf_logging::{decaf_trace, decaf_warn};
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{MemorySample, ProgressEvent, ProgressSink};

/// Source of memory readings in bytes.
pub trait MemoryProbe: Send + Sync {
    fn used_bytes(&self) -> u64;
    fn ceiling_bytes(&self) -> u64;
}

/// Reads the resident memory of this process and its direct children
/// (backend tools run as child processes).
pub struct SysinfoProbe {
    system: Mutex<System>,
    pid: Pid,
    ceiling: u64,
}

impl SysinfoProbe {
    pub fn new(ceiling_bytes: Option<u64>) -> Self {
        let mut system = System::new();
        system.refresh_memory();
        let ceiling = ceiling_bytes.unwrap_or_else(|| system.total_memory());
        Self {
            system: Mutex::new(system),
            pid: Pid::from_u32(std::process::id()),
            ceiling,
        }
    }
}

impl MemoryProbe for SysinfoProbe {
    fn used_bytes(&self) -> u64 {
        let Ok(mut system) = self.system.lock() else {
            decaf_warn!("Memory probe lock poisoned; reporting zero usage");
            return 0;
        };
        system.refresh_processes(ProcessesToUpdate::All, true);
        let own = system.process(self.pid).map(|p| p.memory()).unwrap_or(0);
        let children: u64 = system
            .processes()
            .values()
            .filter(|p| p.parent() == Some(self.pid))
            .map(|p| p.memory())
            .sum();
        own + children
    }

    fn ceiling_bytes(&self) -> u64 {
        self.ceiling
    }
}

/// Samples memory on a fixed interval while a stage runs.
///
/// Each sample is published as a `memory` event. When usage stays above the
/// threshold for the configured number of consecutive samples, `oom` is
/// cancelled so the stage can abort its current chunk. Dropping the monitor
/// stops sampling.
pub struct MemoryMonitor {
    stop: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl MemoryMonitor {
    pub fn spawn(
        probe: Arc<dyn MemoryProbe>,
        interval: Duration,
        mut watch: MemoryWatch,
        sink: Arc<dyn ProgressSink>,
        oom: CancellationToken,
    ) -> Self {
        let stop = CancellationToken::new();
        let stopped = stop.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = stopped.cancelled() => break,
                    _ = ticker.tick() => {
                        let sample = MemorySample {
                            timestamp: Utc::now(),
                            percent_used: percent_used(probe.used_bytes(), probe.ceiling_bytes()),
                        };
                        decaf_trace!("Memory sample {:.2}%", sample.percent_used);
                        sink.emit(ProgressEvent::memory(&sample));
                        if watch.observe(sample.percent_used) == WatchVerdict::Tripped
                            && !oom.is_cancelled()
                        {
                            decaf_warn!(
                                "Memory above threshold for {} consecutive samples",
                                watch.consecutive()
                            );
                            oom.cancel();
                        }
                    }
                }
            }
        });
        Self {
            stop,
            task: Some(task),
        }
    }

    /// Stops sampling and waits for the sampler, so no sample is published
    /// after this returns.
    pub async fn stop(mut self) {
        self.stop.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for MemoryMonitor {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}
