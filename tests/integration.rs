/// End-to-end tests for the watch engine on a real filesystem.
///
/// Each test watches a fresh temporary directory and runs a small `sh` script
/// through the launcher, so they need a POSIX shell but no Node installation.
/// Timings are generous: native watchers on CI can lag by tens of milliseconds.
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use devwatch::config::RunMode;
use devwatch::highlight::PlainHighlighter;
use devwatch::process::launcher::ProgramLauncher;
use devwatch::{EngineState, Notification, WatchEngine, WatcherConfig, WatcherOptions};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::{sleep, timeout};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const WAIT: Duration = Duration::from_secs(10);

/// Engine watching `dir` that runs `script` (a shell script body) on every restart.
fn engine(dir: &Path, script: &str, delay_ms: f64) -> WatchEngine {
    let script_path = dir.join("app.sh");
    std::fs::write(&script_path, script).unwrap();

    let options = WatcherOptions {
        watch_patterns: vec![".".into()],
        restart_delay: delay_ms,
        script: script_path.display().to_string(),
        cwd: Some(dir.to_path_buf()),
        ..WatcherOptions::default()
    };
    let config = WatcherConfig::try_from(options)
        .unwrap()
        .with_run_mode(RunMode::Development);
    WatchEngine::new(config)
        .with_launcher(Arc::new(ProgramLauncher::new("sh")))
        .with_highlighter(Arc::new(PlainHighlighter))
}

fn record(engine: &WatchEngine) -> UnboundedReceiver<Notification> {
    let (tx, rx) = mpsc::unbounded_channel();
    engine.subscribe(move |n: &Notification| {
        let _ = tx.send(n.clone());
    });
    rx
}

/// Wait for the next notification called `name`, skipping others.
async fn expect(rx: &mut UnboundedReceiver<Notification>, name: &str) -> Notification {
    timeout(WAIT, async {
        loop {
            let n = rx.recv().await.expect("engine dropped its observers");
            if n.name() == name {
                return n;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for `{name}`"))
}

/// Everything received within `window`.
async fn drain_for(rx: &mut UnboundedReceiver<Notification>, window: Duration) -> Vec<Notification> {
    let mut seen = Vec::new();
    let _ = timeout(window, async {
        while let Some(n) = rx.recv().await {
            seen.push(n);
        }
    })
    .await;
    seen
}

fn count(seen: &[Notification], name: &str) -> usize {
    seen.iter().filter(|n| n.name() == name).count()
}

/// Let the native watcher settle so setup-time events do not leak into a test.
async fn settle() {
    sleep(Duration::from_millis(200)).await;
}

// ---------------------------------------------------------------------------
// Startup
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_start_runs_process_and_forwards_stdout() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine(dir.path(), "echo hello\n", 0.0);
    let mut events = record(&engine);
    let mut stdout = engine.take_stdout().unwrap();

    engine.start();
    expect(&mut events, "started").await;
    let Notification::ProcSpawn { pid } = expect(&mut events, "proc-spawn").await else {
        unreachable!()
    };
    assert!(pid.is_some());

    let chunk = timeout(WAIT, stdout.recv()).await.unwrap().unwrap();
    assert_eq!(chunk, b"hello\n");
    expect(&mut events, "proc-exit").await;
}

// ---------------------------------------------------------------------------
// Change handling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_matching_change_restarts_process() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine(dir.path(), "sleep 30\n", 0.0);
    let mut events = record(&engine);
    engine.start();
    expect(&mut events, "proc-spawn").await;
    settle().await;

    std::fs::write(dir.path().join("a.js"), "console.log(1)").unwrap();

    let Notification::Change(change) = expect(&mut events, "change").await else {
        unreachable!()
    };
    assert_eq!(change.filename.as_deref(), Some("a.js"));
    assert_eq!(change.path, engine.watch_paths()[0]);
    expect(&mut events, "proc-spawn").await;
}

#[tokio::test]
async fn test_non_matching_change_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine(dir.path(), "sleep 30\n", 0.0);
    let mut events = record(&engine);
    engine.start();
    expect(&mut events, "proc-spawn").await;
    settle().await;

    std::fs::write(dir.path().join("notes.txt"), "todo").unwrap();

    let seen = drain_for(&mut events, Duration::from_millis(500)).await;
    assert_eq!(count(&seen, "change"), 0);
    assert_eq!(count(&seen, "proc-spawn"), 0);
}

#[tokio::test]
async fn test_burst_of_changes_restarts_once() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine(dir.path(), "sleep 30\n", 400.0);
    let mut events = record(&engine);
    engine.start();
    expect(&mut events, "proc-spawn").await;
    settle().await;

    for i in 0..5 {
        std::fs::write(dir.path().join("a.js"), format!("v{i}")).unwrap();
        sleep(Duration::from_millis(20)).await;
    }

    let seen = drain_for(&mut events, Duration::from_millis(1500)).await;
    assert!(count(&seen, "change") >= 5);
    assert_eq!(count(&seen, "proc-spawn"), 1);
}

#[tokio::test]
async fn test_restart_drops_output_of_replaced_process() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine(dir.path(), "sleep 2\necho late\nsleep 30\n", 0.0);
    let mut events = record(&engine);
    let mut stdout = engine.take_stdout().unwrap();
    engine.start();
    expect(&mut events, "proc-spawn").await;
    settle().await;

    // Replace the first process before it prints, then let the second one print.
    std::fs::write(dir.path().join("a.js"), "x").unwrap();
    expect(&mut events, "proc-spawn").await;

    let chunk = timeout(WAIT, stdout.recv()).await.unwrap().unwrap();
    assert_eq!(chunk, b"late\n");
    sleep(Duration::from_millis(300)).await;
    assert!(stdout.try_recv().is_none());
}

// ---------------------------------------------------------------------------
// Stop
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_stop_detaches_watchers() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine(dir.path(), "sleep 30\n", 0.0);
    let mut events = record(&engine);
    engine.start();
    expect(&mut events, "proc-spawn").await;

    engine.stop().await;
    assert_eq!(engine.state(), EngineState::Stopped);

    std::fs::write(dir.path().join("a.js"), "x").unwrap();
    let seen = drain_for(&mut events, Duration::from_millis(500)).await;
    assert_eq!(count(&seen, "change"), 0);
    assert_eq!(count(&seen, "proc-spawn"), 0);
}

#[tokio::test]
async fn test_pending_restart_still_fires_after_stop() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine(dir.path(), "sleep 30\n", 500.0);
    let mut events = record(&engine);
    engine.start();
    expect(&mut events, "proc-spawn").await;
    settle().await;

    std::fs::write(dir.path().join("a.js"), "x").unwrap();
    expect(&mut events, "change").await;
    engine.stop().await;

    expect(&mut events, "proc-spawn").await;
    assert_eq!(engine.state(), EngineState::Stopped);
}

// ---------------------------------------------------------------------------
// Setup failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_missing_path_reports_setup_error() {
    let dir = tempfile::tempdir().unwrap();
    let options = WatcherOptions {
        watch_patterns: vec!["does-not-exist".into()],
        exec: "true".into(),
        cwd: Some(dir.path().to_path_buf()),
        ..WatcherOptions::default()
    };
    let mut engine = devwatch::create_watcher(options).unwrap();
    let mut events = record(&engine);
    engine.start();

    let Notification::Error(err) = expect(&mut events, "error").await else {
        unreachable!()
    };
    assert_eq!(err.context(), "setup error");
    assert!(err.to_string().starts_with("setup error: "));

    let seen = drain_for(&mut events, Duration::from_millis(300)).await;
    assert_eq!(count(&seen, "started"), 0);
    assert_eq!(count(&seen, "proc-spawn"), 0);
}

#[test]
fn test_exec_and_script_are_rejected() {
    let options = WatcherOptions {
        exec: "node a.js".into(),
        script: "b.js".into(),
        ..WatcherOptions::default()
    };
    let err = devwatch::create_watcher(options).err().unwrap();
    assert_eq!(err.to_string(), "you can use exec or script, but not both");
}
