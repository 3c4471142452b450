use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::watcher::filter::ChangeFilter;

/// Name of the optional configuration file read from the working directory.
pub const CONFIG_FILE: &str = "devwatch.toml";

/// Extensions watched when none are configured.
pub const DEFAULT_EXTENSIONS: &[&str] = &["js", "jsx", "json"];

/// Program used to run `script` when no launcher is configured.
pub const DEFAULT_LAUNCHER: &str = "node";

/// stderr lines containing any of these are dropped in development mode.
pub const DEFAULT_STDERR_IGNORE: &[&str] = &[
    "internal/modules/cjs/loader.js",
    "internal/bootstrap/node.js",
    "node:internal/",
];

/// Raw watcher options, as read from `devwatch.toml` or assembled by the CLI.
///
/// Nothing here is validated; [`WatcherConfig::try_from`] does that once.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct WatcherOptions {
    /// Files or directories to watch, absolute or relative to the working directory.
    #[serde(rename = "watch")]
    pub watch_patterns: Vec<String>,
    /// Quiet period in milliseconds before a restart.
    pub restart_delay: f64,
    pub extensions: Vec<String>,
    /// Shell-style command line to run directly.
    pub exec: String,
    /// Script path handed to the launcher.
    pub script: String,
    pub debug: bool,
    pub launcher: String,
    pub stderr_ignore: Vec<String>,
    /// Overrides the process working directory for resolving relative patterns.
    #[serde(skip)]
    pub cwd: Option<PathBuf>,
}

impl Default for WatcherOptions {
    fn default() -> Self {
        Self {
            watch_patterns: Vec::new(),
            restart_delay: 0.0,
            extensions: DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            exec: String::new(),
            script: String::new(),
            debug: false,
            launcher: DEFAULT_LAUNCHER.to_string(),
            stderr_ignore: DEFAULT_STDERR_IGNORE.iter().map(|s| s.to_string()).collect(),
            cwd: None,
        }
    }
}

impl WatcherOptions {
    /// Load options from `devwatch.toml` in the given directory.
    ///
    /// Returns defaults if the file does not exist or cannot be parsed.
    pub fn load(root: &Path) -> Self {
        let config_path = root.join(CONFIG_FILE);

        if !config_path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match toml::from_str::<Self>(&contents) {
                Ok(options) => options,
                Err(err) => {
                    tracing::warn!("failed to parse {CONFIG_FILE}: {err}. Using defaults.");
                    Self::default()
                }
            },
            Err(err) => {
                tracing::warn!("failed to read {CONFIG_FILE}: {err}. Using defaults.");
                Self::default()
            }
        }
    }
}

/// How the child's stderr is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Buffer, filter and highlight stderr.
    #[default]
    Development,
    /// Forward stderr untouched.
    Production,
}

impl RunMode {
    /// Read the mode from `DEVWATCH_ENV`, then `NODE_ENV`.
    pub fn from_env() -> Self {
        let value = std::env::var("DEVWATCH_ENV")
            .or_else(|_| std::env::var("NODE_ENV"))
            .ok();
        Self::from_value(value.as_deref())
    }

    pub fn from_value(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.eq_ignore_ascii_case("production") => Self::Production,
            _ => Self::Development,
        }
    }
}

/// Validated, immutable watcher configuration.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    watch_patterns: Vec<String>,
    extensions: Vec<String>,
    restart_delay: Duration,
    exec: String,
    script: String,
    debug: bool,
    launcher: String,
    stderr_ignore: Vec<String>,
    run_mode: RunMode,
    cwd: PathBuf,
    filter: ChangeFilter,
}

impl TryFrom<WatcherOptions> for WatcherConfig {
    type Error = ConfigError;

    fn try_from(options: WatcherOptions) -> Result<Self, Self::Error> {
        let delay = options.restart_delay;
        if !delay.is_finite() || delay < 0.0 {
            return Err(ConfigError::InvalidDelay(delay));
        }

        if !options.exec.is_empty() && !options.script.is_empty() {
            return Err(ConfigError::ExecAndScript);
        }

        if let Some(index) = options.watch_patterns.iter().position(|p| p.trim().is_empty()) {
            return Err(ConfigError::EmptyWatchPattern { index });
        }

        if let Some(index) = options.extensions.iter().position(|e| e.trim().is_empty()) {
            return Err(ConfigError::EmptyExtension { index });
        }

        let mut extensions: Vec<String> = Vec::with_capacity(options.extensions.len());
        for ext in options.extensions {
            let ext = ext.trim().trim_start_matches('.').to_string();
            if !extensions.contains(&ext) {
                extensions.push(ext);
            }
        }
        let filter = ChangeFilter::new(&extensions)?;

        let cwd = match options.cwd {
            Some(cwd) => cwd,
            None => std::env::current_dir()
                .map_err(|err| ConfigError::WorkingDirectory(err.to_string()))?,
        };

        let restart_delay = Duration::try_from_secs_f64(delay / 1000.0)
            .map_err(|_| ConfigError::InvalidDelay(delay))?;

        Ok(Self {
            watch_patterns: options.watch_patterns,
            extensions,
            restart_delay,
            exec: options.exec,
            script: options.script,
            debug: options.debug,
            launcher: options.launcher,
            stderr_ignore: options.stderr_ignore,
            run_mode: RunMode::from_env(),
            cwd,
            filter,
        })
    }
}

impl WatcherConfig {
    pub fn with_run_mode(mut self, run_mode: RunMode) -> Self {
        self.run_mode = run_mode;
        self
    }

    pub fn watch_patterns(&self) -> &[String] {
        &self.watch_patterns
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    pub fn restart_delay(&self) -> Duration {
        self.restart_delay
    }

    pub fn exec(&self) -> &str {
        &self.exec
    }

    pub fn script(&self) -> &str {
        &self.script
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    pub fn launcher(&self) -> &str {
        &self.launcher
    }

    pub fn stderr_ignore(&self) -> &[String] {
        &self.stderr_ignore
    }

    pub fn run_mode(&self) -> RunMode {
        self.run_mode
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Extension filter compiled from [`extensions`](Self::extensions).
    pub fn filter(&self) -> &ChangeFilter {
        &self.filter
    }
}
