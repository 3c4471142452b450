mod cli;
mod msg;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::Cli;
use devwatch::{Notification, WatcherOptions, create_watcher, highlight};
use msg::msg;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let cwd = std::env::current_dir().context("cannot read the working directory")?;
    let options = cli.into_options(WatcherOptions::load(&cwd));
    let debug = options.debug;

    let mut engine = create_watcher(options)?.with_highlighter(highlight::for_stderr());

    engine.subscribe(move |n: &Notification| {
        let always = matches!(n, Notification::Error(_) | Notification::ProcError(_));
        if always || debug {
            eprint!("{}", msg(n.name(), n.payload().as_ref()));
        }
    });

    if let Some(stdout) = engine.take_stdout() {
        tokio::spawn(stdout.pipe(tokio::io::stdout()));
    }
    if let Some(stderr) = engine.take_stderr() {
        tokio::spawn(stderr.pipe(tokio::io::stderr()));
    }

    engine.start();
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    engine.stop().await;

    Ok(())
}
