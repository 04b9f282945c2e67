/// External command execution
///
/// Every subprocess dcborg-cli starts (borg, docker-compose, ping, ssh, hook
/// scripts) goes through a `CommandRunner`. The runner captures stdout and
/// stderr as one interleaved text, echoes each line to the log, and hands the
/// exit status back as data. A nonzero exit is a normal result; only a failure
/// to spawn (or an exceeded timeout) is an error.

use std::borrow::Cow;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::error::{BackupError, BackupResult};

const SEPARATOR: &str =
    "----------------------------------------------------------------------------";

/// A command line plus the subprocess settings it runs with
#[derive(Clone, Default)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Added on top of the inherited process environment
    pub env: Vec<(String, Zeroizing<String>)>,
    pub current_dir: Option<PathBuf>,
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    /// Split a shell-style command line ("docker compose up -d") into a command
    pub fn from_line(line: &str) -> BackupResult<Self> {
        let mut words = shell_words::split(line)
            .map_err(|e| BackupError::config(format!("Cannot parse command '{}': {}", line, e)))?
            .into_iter();
        let program = words
            .next()
            .ok_or_else(|| BackupError::config("Empty command line"))?;
        Ok(Self::new(program).args(words))
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), Zeroizing::new(value.into())));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The command line as a shell would read it; only words that need it
    /// are quoted, so `user@host:repo::archive` stays readable in the log
    pub fn command_line(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|word| display_word(word))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn env_keys(&self) -> Vec<&str> {
        self.env.iter().map(|(key, _)| key.as_str()).collect()
    }
}

impl fmt::Debug for CommandSpec {
    // Environment values may hold the repository passphrase
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSpec")
            .field("command", &self.command_line())
            .field("env", &self.env_keys())
            .field("current_dir", &self.current_dir)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

fn display_word(word: &str) -> Cow<'_, str> {
    let needs_quoting = word.is_empty()
        || word
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '\'' | '"' | '\\' | '$' | '`' | ';' | '&' | '|'));
    if needs_quoting {
        shell_words::quote(word)
    } else {
        Cow::Borrowed(word)
    }
}

/// Exit status and combined stdout/stderr of one finished command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub status: i32,
    pub output: String,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Trait for running external commands
///
/// Abstracts process spawning so the orchestrator and checks can be driven
/// by a scripted runner in tests.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &CommandSpec) -> BackupResult<CommandResult>;
}

/// Runs commands as real subprocesses, or only echoes them in dry-run mode
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellRunner {
    dry_run: bool,
}

impl ShellRunner {
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, command: &CommandSpec) -> BackupResult<CommandResult> {
        run(command, self.dry_run).await
    }
}

/// Run `command`, or in dry-run mode return its command line with status 0
/// without spawning anything
pub async fn run(command: &CommandSpec, dry_run: bool) -> BackupResult<CommandResult> {
    let command_line = command.command_line();

    info!("{}", SEPARATOR);
    if dry_run {
        info!(env = ?command.env_keys(), "Dry run, not executing: {}", command_line);
        info!("{}", SEPARATOR);
        return Ok(CommandResult {
            status: 0,
            output: command_line,
        });
    }

    info!("Executing this command: {}", command_line);
    debug!(env = ?command.env_keys(), cwd = ?command.current_dir, "Subprocess settings");

    let result = match command.timeout {
        Some(limit) => tokio::time::timeout(limit, execute(command))
            .await
            .map_err(|_| BackupError::CommandTimedOut {
                command: command_line.clone(),
                after: limit,
            })?,
        None => execute(command).await,
    };

    let result = result.map_err(|source| BackupError::ExecutorError {
        command: command_line.clone(),
        source,
    })?;

    info!(status = result.status, "Finished: {}", command_line);
    info!("{}", SEPARATOR);
    Ok(result)
}

async fn execute(command: &CommandSpec) -> std::io::Result<CommandResult> {
    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args)
        .envs(command.env.iter().map(|(key, value)| (key.as_str(), value.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(dir) = &command.current_dir {
        cmd.current_dir(dir);
    }

    let mut child = cmd.spawn()?;

    // Both pipes feed one channel so lines keep their arrival order
    let (tx, mut rx) = mpsc::unbounded_channel();
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_lines(stdout, tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_lines(stderr, tx.clone()));
    }
    drop(tx);

    let mut output = String::new();
    while let Some(line) = rx.recv().await {
        info!(target: "dcborg_cli::subprocess", "subprocess: {}", line);
        output.push_str(&line);
        output.push('\n');
    }

    let status = child.wait().await?;

    Ok(CommandResult {
        // Killed by a signal: no exit code, report as generic failure
        status: status.code().unwrap_or(-1),
        output,
    })
}

async fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf)
                    .trim_end_matches(['\r', '\n'])
                    .to_string();
                if tx.send(line).is_err() {
                    break;
                }
            }
        }
    }
}
