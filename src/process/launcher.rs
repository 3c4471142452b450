use std::ffi::OsString;

use tokio::process::Command;

/// Process-creation backend for script mode.
///
/// Given the argument list (the script path), produce the command that runs it.
pub trait Launcher: Send + Sync {
    fn command(&self, args: &[String]) -> Command;

    /// Name used in logs and spawn errors.
    fn program(&self) -> String;
}

/// Runs scripts through a fixed interpreter, e.g. `node dist/index.js`.
#[derive(Debug, Clone)]
pub struct ProgramLauncher {
    program: OsString,
}

impl ProgramLauncher {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Launcher for ProgramLauncher {
    fn command(&self, args: &[String]) -> Command {
        let mut command = Command::new(&self.program);
        command.args(args);
        command
    }

    fn program(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }
}

/// What `respawn` should start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpawnPlan {
    /// Neither `exec` nor `script` configured: restarts only tear down.
    Idle,
    /// Run a command line directly.
    Exec { program: String, args: Vec<String> },
    /// Hand the script to the launcher.
    Script { args: Vec<String> },
}

impl SpawnPlan {
    pub fn from_config(exec: &str, script: &str) -> Self {
        if !exec.trim().is_empty() {
            return parse_exec(exec);
        }
        if script.is_empty() {
            return Self::Idle;
        }
        Self::Script {
            args: vec![script.to_string()],
        }
    }

    /// Build the command for this plan; `None` for [`SpawnPlan::Idle`].
    pub fn command(&self, launcher: &dyn Launcher) -> Option<Command> {
        match self {
            Self::Idle => None,
            Self::Exec { program, args } => {
                let mut command = Command::new(program);
                command.args(args);
                Some(command)
            }
            Self::Script { args } => Some(launcher.command(args)),
        }
    }

    pub fn program(&self, launcher: &dyn Launcher) -> String {
        match self {
            Self::Idle => String::new(),
            Self::Exec { program, .. } => program.clone(),
            Self::Script { .. } => launcher.program(),
        }
    }
}

/// Split an `exec` command line into program and arguments.
///
/// One leading `"` or `'` is stripped; a trailing quote is left in place, so
/// `"node app.js"` runs `node` with the argument `app.js"`. Splitting is on
/// whitespace only; there is no shell quoting.
pub fn parse_exec(exec: &str) -> SpawnPlan {
    let trimmed = exec.trim();
    let unquoted = trimmed
        .strip_prefix('"')
        .or_else(|| trimmed.strip_prefix('\''))
        .unwrap_or(trimmed);

    let mut parts = unquoted.split_whitespace().map(str::to_string);
    match parts.next() {
        Some(program) => SpawnPlan::Exec {
            program,
            args: parts.collect(),
        },
        None => SpawnPlan::Idle,
    }
}
