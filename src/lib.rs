//! devwatch: watch files and keep a development process running, restarting it
//! when a matching file changes.
//!
//! ```no_run
//! # async fn run() -> Result<(), devwatch::error::ConfigError> {
//! use devwatch::{Notification, WatcherOptions, create_watcher};
//!
//! let mut engine = create_watcher(WatcherOptions {
//!     watch_patterns: vec!["src".into()],
//!     script: "dist/index.js".into(),
//!     restart_delay: 200.0,
//!     ..WatcherOptions::default()
//! })?;
//! engine.subscribe(|n: &Notification| eprintln!("{}", n.name()));
//! engine.start();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod highlight;
pub mod output;
pub mod paths;
pub mod process;
pub mod scheduler;
pub mod watcher;

pub use config::{RunMode, WatcherConfig, WatcherOptions};
pub use engine::{EngineState, Notification, Observer, WatchEngine};
pub use error::{ConfigError, ProcessError, WatchError};
pub use output::OutputStream;
pub use watcher::event::{ChangeEvent, ChangeKind};

/// Validate `options` and build an engine. Nothing is watched or spawned until
/// [`WatchEngine::start`].
pub fn create_watcher(options: WatcherOptions) -> Result<WatchEngine, ConfigError> {
    let config = WatcherConfig::try_from(options)?;
    Ok(WatchEngine::new(config))
}
