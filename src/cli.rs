use clap::Parser;

use devwatch::WatcherOptions;

/// Watch files and restart a development process when they change.
///
/// Options given here are merged over `devwatch.toml` in the working
/// directory: watch paths and extensions are appended, everything else
/// overrides.
#[derive(Parser, Debug)]
#[command(name = "devwatch", version, about, long_about = None)]
pub struct Cli {
    /// File or directory to watch (repeatable).
    #[arg(short, long = "watch", value_name = "PATH", required = true)]
    pub watch: Vec<String>,

    /// Extra file extensions that trigger a restart (comma-separated, e.g. "ts,mjs").
    #[arg(long, value_delimiter = ',')]
    pub ext: Vec<String>,

    /// Milliseconds to wait after the last change before restarting.
    #[arg(short, long)]
    pub delay: Option<f64>,

    /// Program used to run `--script`.
    #[arg(long)]
    pub launcher: Option<String>,

    /// Script handed to the launcher on every restart.
    #[arg(long)]
    pub script: Option<String>,

    /// Command line to run directly; consumes the rest of the arguments.
    #[arg(long, num_args = 1.., allow_hyphen_values = true)]
    pub exec: Vec<String>,

    /// Print every engine notification, not just errors.
    #[arg(long)]
    pub debug: bool,
}

impl Cli {
    /// Merge the command line over options loaded from the config file.
    pub fn into_options(self, base: WatcherOptions) -> WatcherOptions {
        let mut options = base;
        options.watch_patterns.extend(self.watch);
        options.extensions.extend(self.ext);
        if let Some(delay) = self.delay {
            options.restart_delay = delay;
        }
        if let Some(launcher) = self.launcher {
            options.launcher = launcher;
        }
        if let Some(script) = self.script {
            options.script = script;
        }
        if !self.exec.is_empty() {
            options.exec = self.exec.join(" ");
        }
        options.debug |= self.debug;
        options
    }
}
