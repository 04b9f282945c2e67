/// borg command construction and invocation
///
/// Builds the `borg info|create|prune` command lines for the configured
/// repository. The passphrase travels only in the subprocess environment,
/// never as an argument, so it stays out of process listings and logs.

use chrono::{DateTime, Utc};
use tracing::info;

use crate::core::classifier;
use crate::core::config::{Configuration, Secrets};
use crate::core::runner::{CommandResult, CommandRunner, CommandSpec};
use crate::error::{BackupError, BackupResult};
use crate::utils::{
    ARCHIVE_TIMESTAMP_FORMAT, BORG_BINARY, BORG_PASSPHRASE_ENV, BORG_RELOCATED_REPO_ENV,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BorgSubcommand {
    Create,
    Info,
    Prune,
}

impl BorgSubcommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Info => "info",
            Self::Prune => "prune",
        }
    }

    /// Extra parameters configured for this subcommand
    pub fn parameters<'a>(&self, config: &'a Configuration) -> &'a str {
        match self {
            Self::Create => &config.borg_parameters.create,
            Self::Info => &config.borg_parameters.info,
            Self::Prune => &config.borg_parameters.prune,
        }
    }
}

/// `<prefix>-<YYYY-MM-DD-HHMMSS>` in UTC
pub fn archive_name(prefix: &str, at: DateTime<Utc>) -> String {
    format!("{}-{}", prefix, at.format(ARCHIVE_TIMESTAMP_FORMAT))
}

fn base_command(
    subcommand: BorgSubcommand,
    config: &Configuration,
    secrets: &Secrets,
) -> BackupResult<CommandSpec> {
    let params = shell_words::split(subcommand.parameters(config)).map_err(|e| {
        BackupError::config(format!(
            "borg_parameters.{} cannot be parsed: {}",
            subcommand.as_str(),
            e
        ))
    })?;

    // An empty passphrase makes borg fail instead of prompting on a terminal
    let passphrase = secrets
        .passphrase
        .as_ref()
        .map(|p| p.expose())
        .unwrap_or_default();

    let mut spec = CommandSpec::new(BORG_BINARY)
        .arg(subcommand.as_str())
        .args(params)
        .env(BORG_PASSPHRASE_ENV, passphrase);

    if let Some(relocated) = &config.relocated_repo_access_is_ok {
        spec = spec.env(BORG_RELOCATED_REPO_ENV, relocated.as_str());
    }

    Ok(spec)
}

/// `borg info <params> user@host:repo`
pub fn info_command(config: &Configuration, secrets: &Secrets) -> BackupResult<CommandSpec> {
    Ok(base_command(BorgSubcommand::Info, config, secrets)?.arg(config.repository_location()))
}

/// `borg create <params> user@host:repo::archive root/folder`
pub fn create_command(
    config: &Configuration,
    secrets: &Secrets,
    archive: &str,
) -> BackupResult<CommandSpec> {
    Ok(base_command(BorgSubcommand::Create, config, secrets)?
        .arg(format!("{}::{}", config.repository_location(), archive))
        .arg(config.source_path().display().to_string()))
}

/// `borg prune <params> user@host:repo`
pub fn prune_command(config: &Configuration, secrets: &Secrets) -> BackupResult<CommandSpec> {
    Ok(base_command(BorgSubcommand::Prune, config, secrets)?.arg(config.repository_location()))
}

/// Query the repository and classify failures of the query itself
///
/// Returns the raw output on success so callers can inspect encryption.
pub async fn info(
    runner: &dyn CommandRunner,
    config: &Configuration,
    secrets: &Secrets,
) -> BackupResult<CommandResult> {
    let result = runner.run(&info_command(config, secrets)?).await?;

    if classifier::lock_unavailable(&result.output) {
        return Err(BackupError::LockError);
    }

    if !result.success() {
        if classifier::repository_missing(&result.output) {
            return Err(BackupError::RepositoryNotFound(config.repository_location()));
        }
        if classifier::passphrase_incorrect(&result.output) {
            return Err(BackupError::WrongPassphrase);
        }
        return Err(BackupError::tool("info", result.output));
    }

    Ok(result)
}

pub async fn create(
    runner: &dyn CommandRunner,
    config: &Configuration,
    secrets: &Secrets,
    archive: &str,
) -> BackupResult<()> {
    info!(archive = %archive, source = %config.source_path().display(), "Creating borg archive");

    let result = runner.run(&create_command(config, secrets, archive)?).await?;
    if !result.success() {
        return Err(BackupError::tool("create", result.output));
    }
    Ok(())
}

pub async fn prune(
    runner: &dyn CommandRunner,
    config: &Configuration,
    secrets: &Secrets,
) -> BackupResult<()> {
    info!(repository = %config.repository_location(), "Pruning borg repository");

    let result = runner.run(&prune_command(config, secrets)?).await?;
    if !result.success() {
        return Err(BackupError::tool("prune", result.output));
    }
    Ok(())
}
