pub mod launcher;

use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::engine::EngineMessage;
use crate::error::ProcessError;
use crate::output::StreamKind;
use launcher::{Launcher, SpawnPlan};

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// The single live child process.
///
/// Its output reaches the engine through reader tasks tagged with the
/// handle's generation, so anything still in flight after teardown is
/// recognisably stale.
pub struct ProcessHandle {
    generation: u64,
    pid: Option<u32>,
    child: Child,
    readers: Vec<JoinHandle<()>>,
    stdout_open: bool,
    stderr_open: bool,
    exited: bool,
}

impl ProcessHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Both stdio pipes have reached end-of-file.
    pub fn pipes_closed(&self) -> bool {
        !self.stdout_open && !self.stderr_open
    }

    /// Stop forwarding output and kill the child if it is still running.
    ///
    /// The signal is `SIGKILL` on unix (`TerminateProcess` on windows), so a
    /// child that ignores or traps `SIGTERM` still goes away. Does not wait
    /// for the exit.
    fn kill(&mut self) {
        for reader in self.readers.drain(..) {
            reader.abort();
        }
        if !self.exited
            && let Err(err) = self.child.start_kill()
        {
            tracing::debug!(pid = self.pid, "kill failed: {err}");
        }
    }
}

/// What changed after a child stream closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamClosed {
    /// Both pipes are now closed.
    pub disconnected: bool,
    /// The process had already exited, so the child is fully closed.
    pub closed: bool,
}

/// Outcome of a successful [`ProcessSupervisor::respawn`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Respawn {
    /// Nothing is configured to run.
    Idle,
    Spawned { pid: Option<u32>, generation: u64 },
}

/// Owns the child process and replaces it on every restart.
pub struct ProcessSupervisor {
    plan: SpawnPlan,
    launcher: Arc<dyn Launcher>,
    inbox: UnboundedSender<EngineMessage>,
    generation: u64,
    live: Option<ProcessHandle>,
}

impl ProcessSupervisor {
    pub(crate) fn new(
        plan: SpawnPlan,
        launcher: Arc<dyn Launcher>,
        inbox: UnboundedSender<EngineMessage>,
    ) -> Self {
        Self {
            plan,
            launcher,
            inbox,
            generation: 0,
            live: None,
        }
    }

    pub fn live(&self) -> Option<&ProcessHandle> {
        self.live.as_ref()
    }

    /// Whether a message tagged `generation` belongs to the live child.
    pub fn is_current(&self, generation: u64) -> bool {
        self.live.as_ref().is_some_and(|h| h.generation == generation)
    }

    /// Tear down the live child (if any) and start a new one.
    ///
    /// Teardown finishes before the new process is created: readers are
    /// aborted, the old child is signalled, and its handle dropped. A spawn
    /// failure is returned, never raised.
    pub fn respawn(&mut self) -> Result<Respawn, ProcessError> {
        self.teardown();

        let Some(mut command) = self.plan.command(self.launcher.as_ref()) else {
            tracing::debug!("nothing to run, restart only tore down the previous process");
            return Ok(Respawn::Idle);
        };

        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|err| ProcessError::Spawn {
            program: self.plan.program(self.launcher.as_ref()),
            message: err.to_string(),
        })?;

        self.generation += 1;
        let generation = self.generation;
        let pid = child.id();

        let mut readers = Vec::with_capacity(2);
        let stdout_open = match child.stdout.take() {
            Some(stdout) => {
                readers.push(forward(stdout, StreamKind::Stdout, generation, self.inbox.clone()));
                true
            }
            None => false,
        };
        let stderr_open = match child.stderr.take() {
            Some(stderr) => {
                readers.push(forward(stderr, StreamKind::Stderr, generation, self.inbox.clone()));
                true
            }
            None => false,
        };

        tracing::info!(pid, generation, "spawned {}", self.plan.program(self.launcher.as_ref()));

        self.live = Some(ProcessHandle {
            generation,
            pid,
            child,
            readers,
            stdout_open,
            stderr_open,
            exited: false,
        });
        Ok(Respawn::Spawned { pid, generation })
    }

    /// Detach and kill the live child (see [`ProcessHandle::kill`]). Does not
    /// wait for it to exit.
    pub fn teardown(&mut self) {
        let Some(mut handle) = self.live.take() else {
            return;
        };

        handle.kill();
        tracing::debug!(pid = handle.pid, generation = handle.generation, "tore down child");
        // Dropping the child leaves reaping to the runtime.
    }

    /// Resolve when the live child exits. Pending while there is none.
    pub async fn wait_live(&mut self) -> (u64, io::Result<ExitStatus>) {
        match self.live.as_mut() {
            Some(handle) if !handle.exited => {
                let status = handle.child.wait().await;
                handle.exited = true;
                (handle.generation, status)
            }
            _ => std::future::pending().await,
        }
    }

    /// Record that one of the live child's pipes reached end-of-file.
    pub fn stream_closed(&mut self, generation: u64, stream: StreamKind) -> StreamClosed {
        let Some(handle) = self.live.as_mut().filter(|h| h.generation == generation) else {
            return StreamClosed::default();
        };
        let was_open = !handle.pipes_closed();
        match stream {
            StreamKind::Stdout => handle.stdout_open = false,
            StreamKind::Stderr => handle.stderr_open = false,
        }
        let disconnected = was_open && handle.pipes_closed();
        StreamClosed {
            disconnected,
            closed: disconnected && handle.exited,
        }
    }
}

/// Copy one child pipe into the engine inbox until it closes.
fn forward<R>(
    mut reader: R,
    stream: StreamKind,
    generation: u64,
    inbox: UnboundedSender<EngineMessage>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    let message = EngineMessage::Output {
                        generation,
                        stream,
                        chunk: buf[..n].to_vec(),
                    };
                    if inbox.send(message).is_err() {
                        return;
                    }
                }
                Err(err) => {
                    tracing::debug!(?stream, generation, "read from child failed: {err}");
                    break;
                }
            }
        }
        let _ = inbox.send(EngineMessage::StreamEnd { generation, stream });
    })
}
