//! Error types for dcborg-cli
//!
//! Every variant is fatal to the current backup attempt. Nothing here is
//! retried internally; the orchestrator notifies, restores the stack when it
//! took it down, and hands the error back to `main`.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    /// Configuration or secrets file is missing, malformed or inconsistent
    #[error("Configuration error: {0}")]
    ConfigurationInvalid(String),

    #[error("{0} is not installed locally")]
    ToolNotInstalled(String),

    #[error("Host {0} not pingable")]
    HostUnreachable(String),

    /// Authentication-only login to the backup host failed
    #[error("Error ssh'ing to {target}: {detail}")]
    ConnectionError { target: String, detail: String },

    #[error("Couldn't create/acquire the repository lock. Check if you can delete the lock.")]
    LockError,

    #[error("Repository {0} does not exist, do you need to 'borg init' it?")]
    RepositoryNotFound(String),

    #[error("Configuration says the repository is encrypted, but borg reports it isn't repokey encrypted")]
    EncryptionMismatch,

    #[error("The supplied repository passphrase is wrong")]
    WrongPassphrase,

    /// Nonzero exit of a borg subcommand that no classifier recognised
    #[error("Error running borg {subcommand}: {output}")]
    ToolError { subcommand: String, output: String },

    #[error("Error running '{action}' on the container stack: {output}")]
    StackError { action: String, output: String },

    #[error("Compose file {} does not exist", .0.display())]
    ComposeFileNotFound(PathBuf),

    /// The command could not be spawned at all (e.g. binary not found)
    #[error("Failed to execute '{command}'")]
    ExecutorError {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{command}' did not finish within {after:?}")]
    CommandTimedOut { command: String, after: Duration },

    #[error("This process expects to run as {expected} but runs as {actual}")]
    UnexpectedUser { expected: String, actual: String },

    #[error("{stage} hook '{hook}' failed: {detail}")]
    HookFailed {
        hook: String,
        stage: &'static str,
        detail: String,
    },

    #[error("Notification failed: {0}")]
    Notification(String),
}

impl BackupError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigurationInvalid(msg.into())
    }

    pub fn tool(subcommand: impl Into<String>, output: impl Into<String>) -> Self {
        Self::ToolError {
            subcommand: subcommand.into(),
            output: output.into(),
        }
    }

    pub fn stack(action: impl Into<String>, output: impl Into<String>) -> Self {
        Self::StackError {
            action: action.into(),
            output: output.into(),
        }
    }

    /// True for errors raised before anything destructive could have happened
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::ConfigurationInvalid(_))
    }
}

impl From<serde_yaml::Error> for BackupError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::ConfigurationInvalid(err.to_string())
    }
}

/// Result type alias for dcborg-cli operations
pub type BackupResult<T> = Result<T, BackupError>;
