//! External command abstraction
//!
//! Every privileged step and the final application launch go through
//! [`CommandRunner`], so the provisioning and launch sequences can be
//! driven against a recording runner in tests.

use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;

/// A fully specified external command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemCommand {
    /// Program to execute
    pub program: String,
    /// Command line arguments
    pub args: Vec<String>,
    /// Extra environment variables
    pub env: Vec<(String, String)>,
    /// Working directory
    pub working_dir: Option<PathBuf>,
}

impl SystemCommand {
    /// Create a command with no arguments
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            working_dir: None,
        }
    }

    /// Add an argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the working directory
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Build a command from an argument vector.
    ///
    /// Leading `NAME=value` tokens become environment variables of the
    /// command, the way a shell would treat them. Returns `None` when no
    /// program token remains.
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let split = argv
            .iter()
            .position(|token| parse_assignment(token).is_none())?;

        let env = argv[..split]
            .iter()
            .filter_map(|token| parse_assignment(token))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        Some(Self {
            program: argv[split].clone(),
            args: argv[split + 1..].to_vec(),
            env,
            working_dir: None,
        })
    }
}

impl TryFrom<&[String]> for SystemCommand {
    type Error = CommandError;

    fn try_from(argv: &[String]) -> Result<Self, Self::Error> {
        Self::from_argv(argv).ok_or_else(|| CommandError::NoProgram(argv.join(" ")))
    }
}

fn parse_assignment(token: &str) -> Option<(&str, &str)> {
    let (name, value) = token.split_once('=')?;
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    valid.then_some((name, value))
}

impl fmt::Display for SystemCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in &self.env {
            write!(f, "{}={} ", key, value)?;
        }
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Exit status of a command that could be spawned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Exited with status zero
    Success,
    /// Exited non-zero, or was killed by a signal (`None`)
    Failed(Option<i32>),
}

impl CommandOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CommandOutcome::Success)
    }
}

impl From<std::process::ExitStatus> for CommandOutcome {
    fn from(status: std::process::ExitStatus) -> Self {
        if status.success() {
            CommandOutcome::Success
        } else {
            CommandOutcome::Failed(status.code())
        }
    }
}

/// How a failing step is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// A failure is expected in some host states; log it and continue
    BestEffort,
    /// A failure aborts the sequence
    Required,
}

/// Result of a step that did not abort the sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepResult {
    /// Command succeeded
    Done,
    /// Best-effort command failed; the failure was logged and swallowed
    Ignored { command: String, reason: String },
}

/// Executes external commands
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command with inherited stdio and wait for it to exit
    async fn run(&self, command: &SystemCommand) -> Result<CommandOutcome, CommandError>;

    /// Run a command and return its trimmed stdout
    async fn capture(&self, command: &SystemCommand) -> Result<String, CommandError>;

    /// Put the controlling terminal back into a sane line discipline.
    ///
    /// Called from drop guards, so it is synchronous and never fails.
    fn restore_terminal(&self) {
        match std::process::Command::new("stty")
            .arg("sane")
            .stdin(Stdio::inherit())
            .status()
        {
            Ok(status) if !status.success() => {
                log::debug!("stty sane exited with {}", status);
            }
            Ok(_) => {}
            Err(e) => log::debug!("Failed to run stty sane: {}", e),
        }
    }
}

/// Runs commands on the host through tokio
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl SystemRunner {
    fn command(command: &SystemCommand) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&command.program);
        cmd.args(&command.args)
            .envs(command.env.iter().map(|(k, v)| (k, v)));
        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, command: &SystemCommand) -> Result<CommandOutcome, CommandError> {
        log::debug!("Running: {}", command);
        let status = Self::command(command)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|e| CommandError::SpawnFailed {
                command: command.to_string(),
                source: e,
            })?;
        Ok(status.into())
    }

    async fn capture(&self, command: &SystemCommand) -> Result<String, CommandError> {
        log::debug!("Capturing: {}", command);
        let output = Self::command(command)
            .stdin(Stdio::null())
            .stderr(Stdio::inherit())
            .output()
            .await
            .map_err(|e| CommandError::SpawnFailed {
                command: command.to_string(),
                source: e,
            })?;

        if !output.status.success() {
            return Err(CommandError::Failed {
                command: command.to_string(),
                code: output.status.code(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Run one step under a failure policy.
///
/// Spawn errors and non-zero exits are both failures: under
/// [`Policy::BestEffort`] they are logged and returned as
/// [`StepResult::Ignored`], under [`Policy::Required`] they are errors.
pub async fn run_step<R>(
    runner: &R,
    command: &SystemCommand,
    policy: Policy,
) -> Result<StepResult, CommandError>
where
    R: CommandRunner + ?Sized,
{
    let failure = match runner.run(command).await {
        Ok(CommandOutcome::Success) => return Ok(StepResult::Done),
        Ok(CommandOutcome::Failed(code)) => CommandError::Failed {
            command: command.to_string(),
            code,
        },
        Err(e) => e,
    };

    match policy {
        Policy::Required => Err(failure),
        Policy::BestEffort => {
            log::warn!("{}, ignoring it", failure);
            Ok(StepResult::Ignored {
                command: command.to_string(),
                reason: failure.to_string(),
            })
        }
    }
}

/// How privileged host commands are issued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privilege {
    /// Already running as root
    Root,
    /// Prefix commands with `sudo`
    Sudo,
}

impl Privilege {
    /// Pick `Root` when the effective uid is 0
    #[cfg(unix)]
    pub fn detect() -> Self {
        if nix::unistd::geteuid().is_root() {
            Privilege::Root
        } else {
            Privilege::Sudo
        }
    }

    #[cfg(not(unix))]
    pub fn detect() -> Self {
        Privilege::Sudo
    }

    /// Wrap `program` so it runs with elevated privileges
    pub fn command(&self, program: &str) -> SystemCommand {
        match self {
            Privilege::Root => SystemCommand::new(program),
            Privilege::Sudo => SystemCommand::new("sudo").arg(program),
        }
    }
}

/// Errors that can occur when running external commands
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Failed to spawn '{command}': {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{command}' exited with {}", exit_description(.code))]
    Failed { command: String, code: Option<i32> },

    #[error("No program to run in '{0}'")]
    NoProgram(String),
}

fn exit_description(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {}", code),
        None => "a signal".to_string(),
    }
}
