//! The watch engine: composition root and event loop.
//!
//! All engine state lives in one tokio task. Native watcher callbacks and
//! child-pipe readers only send [`EngineMessage`]s into its inbox; the loop
//! handles one message, timer, or child exit at a time, so nothing here needs
//! a lock.
//!
//! ```text
//! resolve paths -> stat (fan-out) -> open watchers -> started -> respawn
//! fs event -> ChangeFilter -> `change` -> RestartScheduler -> respawn
//! ```

use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::{Value, json};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use crate::config::WatcherConfig;
use crate::error::{ProcessError, WatchError};
use crate::highlight::{AnsiHighlighter, Highlighter};
use crate::output::{OutputPipe, OutputStream, StderrFormatter, StreamKind, output_channel};
use crate::paths;
use crate::process::launcher::{Launcher, ProgramLauncher, SpawnPlan};
use crate::process::{ProcessSupervisor, Respawn};
use crate::scheduler::RestartScheduler;
use crate::watcher::event::ChangeEvent;
use crate::watcher::filter::ChangeFilter;
use crate::watcher::{WatchTarget, stat_all};

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// Everything the engine reports to its subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// Every path was set up and the first process is about to start.
    Started,
    /// A matching file changed; a restart is scheduled.
    Change(ChangeEvent),
    /// A watched path went away and is no longer watched.
    Close { path: PathBuf },
    Error(WatchError),
    ProcSpawn { pid: Option<u32> },
    /// The child exited and both of its pipes are closed.
    ProcClose,
    /// Both of the child's pipes closed.
    ProcDisconnect,
    ProcError(ProcessError),
    ProcExit { code: Option<i32> },
}

impl Notification {
    /// Stable event name, as printed by the CLI.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Change(_) => "change",
            Self::Close { .. } => "close",
            Self::Error(_) => "error",
            Self::ProcSpawn { .. } => "proc-spawn",
            Self::ProcClose => "proc-close",
            Self::ProcDisconnect => "proc-disconnect",
            Self::ProcError(_) => "proc-error",
            Self::ProcExit { .. } => "proc-exit",
        }
    }

    /// JSON payload for message formatting, if the notification carries one.
    pub fn payload(&self) -> Option<Value> {
        match self {
            Self::Change(event) => serde_json::to_value(event).ok(),
            Self::Close { path } => Some(json!({ "path": path.display().to_string() })),
            Self::Error(err) => Some(json!({
                "context": err.context(),
                "path": err.path().display().to_string(),
                "message": err.to_string(),
            })),
            Self::ProcSpawn { pid } => Some(json!({ "pid": pid })),
            Self::ProcError(err) => Some(json!({ "message": err.to_string() })),
            Self::ProcExit { code } => Some(json!({ "code": code })),
            Self::Started | Self::ProcClose | Self::ProcDisconnect => None,
        }
    }
}

/// Subscriber to engine notifications. Any `Fn(&Notification)` qualifies.
///
/// Observers are called from the engine loop and must not block.
pub trait Observer: Send + Sync {
    fn on_notification(&self, notification: &Notification);
}

impl<F> Observer for F
where
    F: Fn(&Notification) + Send + Sync,
{
    fn on_notification(&self, notification: &Notification) {
        self(notification)
    }
}

#[derive(Clone, Default)]
struct Notifier {
    observers: Arc<Mutex<Vec<Arc<dyn Observer>>>>,
}

impl Notifier {
    fn subscribe(&self, observer: Arc<dyn Observer>) {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    fn emit(&self, notification: Notification) {
        let observers = self
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for observer in observers {
            observer.on_notification(&notification);
        }
    }
}

// ---------------------------------------------------------------------------
// WatchEngine
// ---------------------------------------------------------------------------

/// Lifecycle of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Watching,
    /// Transient, while a restart tears down and respawns the child.
    Restarting,
    Stopped,
}

/// Messages delivered to the engine loop from other tasks and threads.
pub(crate) enum EngineMessage {
    Fs {
        target: usize,
        result: notify::Result<notify::Event>,
    },
    Output {
        generation: u64,
        stream: StreamKind,
        chunk: Vec<u8>,
    },
    StreamEnd {
        generation: u64,
        stream: StreamKind,
    },
}

enum Control {
    Stop(oneshot::Sender<()>),
}

/// Watches paths and keeps exactly one child process running, restarting it
/// after matching changes.
///
/// Construct with [`crate::create_watcher`] or [`WatchEngine::new`], subscribe,
/// take the output streams, then [`start`](Self::start) inside a tokio runtime.
/// Dropping the engine ends its loop and kills the live child.
pub struct WatchEngine {
    config: Arc<WatcherConfig>,
    paths: Vec<PathBuf>,
    notifier: Notifier,
    launcher: Arc<dyn Launcher>,
    highlighter: Arc<dyn Highlighter>,
    stdout_tx: UnboundedSender<Vec<u8>>,
    stderr_tx: UnboundedSender<Vec<u8>>,
    stdout: Option<OutputStream>,
    stderr: Option<OutputStream>,
    state: Arc<watch::Sender<EngineState>>,
    control: Option<UnboundedSender<Control>>,
    task: Option<JoinHandle<()>>,
}

impl WatchEngine {
    pub fn new(config: WatcherConfig) -> Self {
        let paths = paths::resolve(config.watch_patterns(), config.cwd());
        let launcher: Arc<dyn Launcher> = Arc::new(ProgramLauncher::new(config.launcher()));
        let (stdout_tx, stdout) = output_channel();
        let (stderr_tx, stderr) = output_channel();
        let (state, _) = watch::channel(EngineState::Idle);

        Self {
            config: Arc::new(config),
            paths,
            notifier: Notifier::default(),
            launcher,
            highlighter: Arc::new(AnsiHighlighter),
            stdout_tx,
            stderr_tx,
            stdout: Some(stdout),
            stderr: Some(stderr),
            state: Arc::new(state),
            control: None,
            task: None,
        }
    }

    /// Replace the backend used to run `script`.
    pub fn with_launcher(mut self, launcher: Arc<dyn Launcher>) -> Self {
        self.launcher = launcher;
        self
    }

    /// Replace the stderr highlighting capability.
    pub fn with_highlighter(mut self, highlighter: Arc<dyn Highlighter>) -> Self {
        self.highlighter = highlighter;
        self
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    /// Absolute, de-duplicated paths that `start` will watch.
    pub fn watch_paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn subscribe(&self, observer: impl Observer + 'static) {
        self.notifier.subscribe(Arc::new(observer));
    }

    /// The child's stdout as forwarded by the engine. Available once, and only
    /// before [`start`](Self::start): a stream not taken by then is dropped so
    /// its output is discarded instead of buffered.
    pub fn take_stdout(&mut self) -> Option<OutputStream> {
        self.stdout.take()
    }

    /// The child's stderr as forwarded (and, in development, formatted). Same
    /// rules as [`take_stdout`](Self::take_stdout).
    pub fn take_stderr(&mut self) -> Option<OutputStream> {
        self.stderr.take()
    }

    pub fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    /// Begin watching and spawn the first process.
    ///
    /// Must be called from within a tokio runtime. Calling it again is a no-op.
    pub fn start(&mut self) {
        if self.control.is_some() {
            tracing::warn!("watch engine already started");
            return;
        }

        if self.stdout.take().is_some() {
            tracing::debug!("stdout was not taken, child stdout is discarded");
        }
        if self.stderr.take().is_some() {
            tracing::debug!("stderr was not taken, child stderr is discarded");
        }

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();

        let formatter = StderrFormatter::new(
            self.config.stderr_ignore().to_vec(),
            Arc::clone(&self.highlighter),
        );
        let output = OutputPipe::new(
            self.config.run_mode(),
            formatter,
            self.stdout_tx.clone(),
            self.stderr_tx.clone(),
        );
        let supervisor = ProcessSupervisor::new(
            SpawnPlan::from_config(self.config.exec(), self.config.script()),
            Arc::clone(&self.launcher),
            inbox_tx.clone(),
        );

        let event_loop = EventLoop {
            paths: self.paths.clone(),
            targets: Vec::new(),
            filter: self.config.filter().clone(),
            scheduler: RestartScheduler::new(self.config.restart_delay()),
            supervisor,
            output,
            notifier: self.notifier.clone(),
            state: Arc::clone(&self.state),
            inbox_tx,
            inbox: inbox_rx,
            control: control_rx,
        };

        self.task = Some(tokio::spawn(event_loop.run()));
        self.control = Some(control_tx);
    }

    /// Stop watching every path. Returns once all watchers are detached.
    ///
    /// The live child keeps running, and a restart that is already scheduled
    /// still fires.
    pub async fn stop(&self) {
        let Some(control) = &self.control else {
            self.state.send_replace(EngineState::Stopped);
            return;
        };
        let (ack_tx, ack_rx) = oneshot::channel();
        if control.send(Control::Stop(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }
}

impl Drop for WatchEngine {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

struct EventLoop {
    paths: Vec<PathBuf>,
    targets: Vec<WatchTarget>,
    filter: ChangeFilter,
    scheduler: RestartScheduler,
    supervisor: ProcessSupervisor,
    output: OutputPipe,
    notifier: Notifier,
    state: Arc<watch::Sender<EngineState>>,
    inbox_tx: UnboundedSender<EngineMessage>,
    inbox: UnboundedReceiver<EngineMessage>,
    control: UnboundedReceiver<Control>,
}

impl EventLoop {
    async fn run(mut self) {
        self.setup().await;

        loop {
            tokio::select! {
                control = self.control.recv() => match control {
                    Some(Control::Stop(ack)) => {
                        self.stop_watching();
                        let _ = ack.send(());
                    }
                    None => break,
                },
                Some(message) = self.inbox.recv() => self.handle(message),
                _ = self.scheduler.due() => self.respawn(),
                () = self.output.flush_due() => self.output.flush_stderr(),
                (generation, status) = self.supervisor.wait_live() => self.on_exit(generation, status),
            }
        }

        self.supervisor.teardown();
        tracing::debug!("watch engine loop finished");
    }

    fn current_state(&self) -> EngineState {
        *self.state.borrow()
    }

    fn set_state(&self, state: EngineState) {
        self.state.send_replace(state);
    }

    /// Stat every path, open a watcher for each one that exists, then start
    /// the first process. Any failure is reported per path; the first process
    /// is only started when every path came up.
    async fn setup(&mut self) {
        let paths = self.paths.clone();
        let stats = stat_all(&paths).await;
        let mut failed = false;

        for (id, (path, stat)) in paths.into_iter().zip(stats).enumerate() {
            let opened = match stat {
                Ok(metadata) => {
                    WatchTarget::open(id, path.clone(), metadata, self.inbox_tx.clone())
                        .map_err(|err| err.to_string())
                }
                Err(err) => Err(err.to_string()),
            };
            match opened {
                Ok(target) => self.targets.push(target),
                Err(message) => {
                    failed = true;
                    tracing::warn!(path = %path.display(), "cannot watch: {message}");
                    self.notifier
                        .emit(Notification::Error(WatchError::Setup { path, message }));
                }
            }
        }

        self.set_state(EngineState::Watching);
        if failed {
            return;
        }
        self.notifier.emit(Notification::Started);
        self.respawn();
    }

    fn handle(&mut self, message: EngineMessage) {
        match message {
            EngineMessage::Fs { target, result } => self.on_fs_event(target, result),
            EngineMessage::Output {
                generation,
                stream,
                chunk,
            } => {
                if self.supervisor.is_current(generation) {
                    self.output.push(stream, chunk);
                } else {
                    tracing::trace!(generation, "dropped output from a replaced process");
                }
            }
            EngineMessage::StreamEnd { generation, stream } => {
                if !self.supervisor.is_current(generation) {
                    return;
                }
                self.output.end(stream);
                let closed = self.supervisor.stream_closed(generation, stream);
                if closed.disconnected {
                    self.notifier.emit(Notification::ProcDisconnect);
                }
                if closed.closed {
                    self.notifier.emit(Notification::ProcClose);
                }
            }
        }
    }

    fn on_fs_event(&mut self, id: usize, result: notify::Result<notify::Event>) {
        if self.current_state() == EngineState::Stopped {
            return;
        }
        let Some(index) = self.targets.iter().position(|t| t.id() == id) else {
            return;
        };

        match result {
            Ok(event) => {
                for change in self.targets[index].changes(&event) {
                    if self.filter.matches(change.filename.as_deref()) {
                        self.notifier.emit(Notification::Change(change));
                        self.scheduler.schedule();
                    }
                }
                if self.targets[index].is_closed_by(&event) {
                    let target = self.targets.remove(index);
                    tracing::debug!(path = %target.path().display(), "watched path removed");
                    self.notifier.emit(Notification::Close {
                        path: target.path().to_path_buf(),
                    });
                }
            }
            Err(err) => {
                let target = self.targets.remove(index);
                self.notifier.emit(Notification::Error(WatchError::FsWatcher {
                    path: target.path().to_path_buf(),
                    message: err.to_string(),
                }));
            }
        }
    }

    fn respawn(&mut self) {
        let stopped = self.current_state() == EngineState::Stopped;
        if !stopped {
            self.set_state(EngineState::Restarting);
        }

        match self.supervisor.respawn() {
            Ok(Respawn::Spawned { pid, .. }) => {
                self.notifier.emit(Notification::ProcSpawn { pid });
            }
            Ok(Respawn::Idle) => {}
            Err(err) => {
                tracing::warn!("{err}");
                self.notifier.emit(Notification::ProcError(err));
            }
        }

        if !stopped {
            self.set_state(EngineState::Watching);
        }
    }

    /// Close every native watcher. The child and any scheduled restart are left alone.
    fn stop_watching(&mut self) {
        for mut target in self.targets.drain(..) {
            if let Err(err) = target.close() {
                self.notifier.emit(Notification::Error(WatchError::Stop {
                    path: target.path().to_path_buf(),
                    message: err.to_string(),
                }));
            }
        }
        self.set_state(EngineState::Stopped);
        tracing::debug!("stopped watching");
    }

    fn on_exit(&mut self, generation: u64, status: io::Result<ExitStatus>) {
        match status {
            Ok(status) => {
                tracing::debug!(generation, %status, "child exited");
                self.notifier.emit(Notification::ProcExit {
                    code: status.code(),
                });
                if self
                    .supervisor
                    .live()
                    .is_some_and(|handle| handle.pipes_closed())
                {
                    self.notifier.emit(Notification::ProcClose);
                }
            }
            Err(err) => {
                self.notifier
                    .emit(Notification::ProcError(ProcessError::Wait(err.to_string())));
            }
        }
    }
}
