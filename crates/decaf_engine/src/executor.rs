use std::io;
use std::process::Stdio;

use decaf_logging::decaf_debug;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

use crate::{StageError, ToolInvocation};

/// Receives every raw output line a backend prints.
pub trait LineSink: Send + Sync {
    fn line(&self, raw: &str);
}

#[async_trait::async_trait]
pub trait BackendExecutor: Send + Sync {
    /// Runs one planned invocation to completion. Output lines go to `lines`.
    async fn execute(
        &self,
        invocation: &ToolInvocation,
        lines: &dyn LineSink,
    ) -> Result<(), StageError>;
}

/// Runs backends as child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessExecutor;

#[async_trait::async_trait]
impl BackendExecutor for ProcessExecutor {
    async fn execute(
        &self,
        invocation: &ToolInvocation,
        lines: &dyn LineSink,
    ) -> Result<(), StageError> {
        decaf_debug!(
            "Launching {} {:?} ({})",
            invocation.program,
            invocation.args,
            invocation.note
        );
        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the future (memory abort) must not leave the tool running.
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| map_spawn_error(&invocation.program, err))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (out_oom, err_oom) = tokio::join!(pump(stdout, lines), pump(stderr, lines));

        let status = child.wait().await.map_err(|err| {
            StageError::Transient(format!("wait failed for {}: {}", invocation.program, err))
        })?;

        if status.success() {
            Ok(())
        } else if out_oom || err_oom {
            Err(StageError::OutOfMemory(format!(
                "{} ran out of memory",
                invocation.program
            )))
        } else {
            Err(StageError::Transient(format!(
                "{} exited with {}",
                invocation.program, status
            )))
        }
    }
}

/// Forwards lines until EOF. Returns true when the tool reported an out-of-memory error.
async fn pump<R>(stream: Option<R>, lines: &dyn LineSink) -> bool
where
    R: AsyncRead + Unpin,
{
    let Some(stream) = stream else {
        return false;
    };
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    let mut saw_oom = false;
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                // Tools print in the platform charset; never stop reading on bad UTF-8.
                let line = String::from_utf8_lossy(&buf);
                if line.contains("OutOfMemoryError") {
                    saw_oom = true;
                }
                lines.line(&line);
            }
        }
    }
    saw_oom
}

fn map_spawn_error(program: &str, err: io::Error) -> StageError {
    if err.kind() == io::ErrorKind::NotFound {
        StageError::Fatal(format!("backend tool {program} not found"))
    } else {
        StageError::Transient(format!("failed to launch {program}: {err}"))
    }
}
