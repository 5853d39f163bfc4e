use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, warn};

use crate::error::Error;
use crate::registry::ExecutionRegistry;
use crate::types::{ExecutionResult, ExecutionStatus};

impl ExecutionStatus {
    const fn code(self) -> u8 {
        match self {
            ExecutionStatus::Running => 0,
            ExecutionStatus::Completed => 1,
            ExecutionStatus::TimedOut => 2,
            ExecutionStatus::Killed => 3,
            ExecutionStatus::Failed => 4,
        }
    }

    fn from_code(code: u8) -> Self {
        match code {
            0 => ExecutionStatus::Running,
            1 => ExecutionStatus::Completed,
            2 => ExecutionStatus::TimedOut,
            3 => ExecutionStatus::Killed,
            _ => ExecutionStatus::Failed,
        }
    }
}

/// Live view of one supervised process, shared with the registry so a
/// separate request can reach it. The supervisor stays the sole terminator
/// of the child; this handle only carries the status word and the cancel
/// signal.
#[derive(Debug)]
pub struct ExecutionHandle {
    id: String,
    pid: Option<u32>,
    started_at: Instant,
    status: AtomicU8,
    cancel: Notify,
}

impl ExecutionHandle {
    pub(crate) fn new(id: &str, pid: Option<u32>) -> Self {
        Self {
            id: id.to_string(),
            pid,
            started_at: Instant::now(),
            status: AtomicU8::new(ExecutionStatus::Running.code()),
            cancel: Notify::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn status(&self) -> ExecutionStatus {
        ExecutionStatus::from_code(self.status.load(Ordering::Acquire))
    }

    /// First-writer-wins terminal transition. Exactly one caller observes
    /// `true`; every later completion trigger loses the race here and must
    /// leave the process and the response alone.
    fn try_finish(&self, terminal: ExecutionStatus) -> bool {
        self.status
            .compare_exchange(
                ExecutionStatus::Running.code(),
                terminal.code(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Ask the supervisor to kill this execution. The stored permit means a
    /// cancel landing before the supervisor starts listening is not lost.
    pub(crate) fn request_cancel(&self) {
        self.cancel.notify_one();
    }
}

enum Trigger {
    Exited(std::io::Result<ExitStatus>),
    Deadline,
    Cancelled,
}

/// Runs compiled artifacts to a terminal state: feeds input, accumulates
/// output, enforces the wall-clock deadline, and arbitrates completion
/// against timeout and external cancellation.
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    /// Pause between SIGTERM and SIGKILL when reaping a process group
    term_grace: Duration,
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self {
            term_grace: Duration::from_millis(100),
        }
    }
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `artifact` to a terminal state within `deadline`.
    ///
    /// The process is spawned directly, never through a shell. It is
    /// registered under `id` for the duration of the run so
    /// `ExecutionRegistry::cancel` can reach it, and unregistered exactly
    /// once at the terminal transition. Exactly one of natural exit,
    /// deadline expiry, or cancellation produces the returned result.
    pub async fn run(
        &self,
        id: &str,
        artifact: &Path,
        stdin_text: Option<&str>,
        deadline: Duration,
        registry: &ExecutionRegistry,
    ) -> Result<ExecutionResult, Error> {
        let mut command = Command::new(artifact);
        command
            .stdin(if stdin_text.is_some() {
                Stdio::piped()
            } else {
                // No input: the child observes end-of-input instead of
                // blocking on a read forever.
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = artifact.parent() {
            command.current_dir(dir);
        }
        // Own process group, so a timed-out child cannot shelter descendants.
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command
            .spawn()
            .map_err(|e| Error::Spawn(format!("{}: {e}", artifact.display())))?;

        let handle = Arc::new(ExecutionHandle::new(id, child.id()));
        registry.register(handle.clone());
        debug!(id, pid = handle.pid(), "artifact spawned");

        if let Some(text) = stdin_text {
            if let Some(mut stdin) = child.stdin.take() {
                let mut payload = text.as_bytes().to_vec();
                payload.push(b'\n');
                // Closing the pipe when the task finishes is the EOF the
                // child is waiting for. A child that exits without reading
                // just breaks the pipe, which is fine.
                tokio::spawn(async move {
                    if let Err(e) = stdin.write_all(&payload).await {
                        debug!(error = %e, "stdin write did not complete");
                    }
                });
            }
        }

        let stdout_task = drain(child.stdout.take());
        let stderr_task = drain(child.stderr.take());

        let trigger = tokio::select! {
            exit = child.wait() => Trigger::Exited(exit),
            _ = time::sleep(deadline) => Trigger::Deadline,
            _ = handle.cancel.notified() => Trigger::Cancelled,
        };

        let (exit_status, timed_out) = match trigger {
            Trigger::Exited(Ok(status)) => {
                handle.try_finish(ExecutionStatus::Completed);
                (Some(status), false)
            }
            Trigger::Exited(Err(e)) => {
                handle.try_finish(ExecutionStatus::Failed);
                registry.unregister(id);
                return Err(Error::Io(e));
            }
            Trigger::Deadline => {
                if handle.try_finish(ExecutionStatus::TimedOut) {
                    warn!(id, deadline_secs = deadline.as_secs(), "execution deadline expired");
                    self.terminate(&mut child).await;
                }
                (child.wait().await.ok(), true)
            }
            Trigger::Cancelled => {
                if handle.try_finish(ExecutionStatus::Killed) {
                    debug!(id, "execution cancelled");
                    self.terminate(&mut child).await;
                }
                (child.wait().await.ok(), false)
            }
        };

        registry.unregister(id);

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        Ok(ExecutionResult {
            exit_code: exit_status.and_then(|status| status.code()),
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            timed_out,
        })
    }

    /// Kill the child and everything it spawned: SIGTERM first, SIGKILL for
    /// whatever ignores it.
    #[cfg(unix)]
    async fn terminate(&self, child: &mut Child) {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let Some(pid) = child.id() else {
            return;
        };
        let group = Pid::from_raw(pid as i32);
        let _ = killpg(group, Signal::SIGTERM);
        time::sleep(self.term_grace).await;
        let _ = killpg(group, Signal::SIGKILL);
    }

    /// Only the direct child can be reached on this platform.
    #[cfg(not(unix))]
    async fn terminate(&self, child: &mut Child) {
        let _ = child.start_kill();
    }
}

fn drain<R>(stream: Option<R>) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buffer = Vec::new();
        if let Some(mut stream) = stream {
            let _ = stream.read_to_end(&mut buffer).await;
        }
        buffer
    })
}
