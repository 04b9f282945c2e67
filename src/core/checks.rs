/// Pre-backup checks
///
/// Runs in a fixed order and stops at the first failure: expected user, host
/// reachable, borg installed, ssh login, repository query, encryption. In
/// dry-run mode nothing is checked.

use std::path::PathBuf;

use tracing::{debug, info};

use crate::core::borg;
use crate::core::classifier;
use crate::core::config::{Configuration, Secrets};
use crate::core::runner::{CommandRunner, CommandSpec};
use crate::error::{BackupError, BackupResult};
use crate::utils::{
    current_user, BORG_BINARY, PING_TIMEOUT, SSH_CONNECT_TIMEOUT_SECS, SSH_LOGIN_TIMEOUT,
};

/// Facts about the local machine the checks depend on
pub trait LocalSystem: Send + Sync {
    fn current_user(&self) -> Option<String>;
    fn find_tool(&self, name: &str) -> Option<PathBuf>;
}

/// The machine this process runs on
#[derive(Debug, Clone, Copy, Default)]
pub struct HostSystem;

impl LocalSystem for HostSystem {
    fn current_user(&self) -> Option<String> {
        current_user()
    }

    fn find_tool(&self, name: &str) -> Option<PathBuf> {
        which::which(name).ok()
    }
}

pub struct PreconditionChecker<'a> {
    runner: &'a dyn CommandRunner,
    system: &'a dyn LocalSystem,
}

impl<'a> PreconditionChecker<'a> {
    pub fn new(runner: &'a dyn CommandRunner, system: &'a dyn LocalSystem) -> Self {
        Self { runner, system }
    }

    pub async fn check(&self, config: &Configuration, secrets: &Secrets) -> BackupResult<()> {
        if config.dry_run {
            info!("Dry run, skipping pre-backup checks");
            return Ok(());
        }

        self.check_user(&config.expected_user)?;
        self.check_host_reachable(&config.borgserver).await?;
        self.check_tool_installed()?;
        self.check_login(config).await?;
        self.check_repository(config, secrets).await
    }

    fn check_user(&self, expected: &str) -> BackupResult<()> {
        let actual = self.system.current_user().unwrap_or_default();
        if actual != expected {
            return Err(BackupError::UnexpectedUser {
                expected: expected.to_string(),
                actual,
            });
        }
        Ok(())
    }

    async fn check_host_reachable(&self, host: &str) -> BackupResult<()> {
        info!("pinging {}", host);
        let spec = CommandSpec::new("ping")
            .args(["-c", "1", host])
            .timeout(PING_TIMEOUT);

        match self.runner.run(&spec).await {
            Ok(result) if result.success() => Ok(()),
            Ok(_) | Err(BackupError::CommandTimedOut { .. }) => {
                Err(BackupError::HostUnreachable(host.to_string()))
            }
            Err(err) => Err(err),
        }
    }

    fn check_tool_installed(&self) -> BackupResult<()> {
        match self.system.find_tool(BORG_BINARY) {
            Some(path) => {
                debug!("borg at {}", path.display());
                Ok(())
            }
            None => Err(BackupError::ToolNotInstalled(BORG_BINARY.to_string())),
        }
    }

    async fn check_login(&self, config: &Configuration) -> BackupResult<()> {
        let target = config.login_target();
        let spec = CommandSpec::new("ssh")
            .args(["-o", "BatchMode=yes", "-o"])
            .arg(format!("ConnectTimeout={}", SSH_CONNECT_TIMEOUT_SECS))
            .arg(target.as_str())
            .arg("echo")
            .timeout(SSH_LOGIN_TIMEOUT);

        match self.runner.run(&spec).await {
            Ok(result) if result.success() => Ok(()),
            Ok(result) => Err(BackupError::ConnectionError {
                target,
                detail: result.output.trim().to_string(),
            }),
            Err(BackupError::CommandTimedOut { after, .. }) => Err(BackupError::ConnectionError {
                target,
                detail: format!("no answer within {:?}", after),
            }),
            Err(err) => Err(err),
        }
    }

    async fn check_repository(&self, config: &Configuration, secrets: &Secrets) -> BackupResult<()> {
        let info = borg::info(self.runner, config, secrets).await?;

        if config.repo_encrypted {
            if !classifier::encrypted_with_repokey(&info.output) {
                return Err(BackupError::EncryptionMismatch);
            }
            if classifier::passphrase_incorrect(&info.output) {
                return Err(BackupError::WrongPassphrase);
            }
        }
        Ok(())
    }
}
