/// Docker Compose stack control
///
/// The stack of the backed-up folder is only ever toggled: `down` before the
/// archive is taken, `up -d` afterwards. Commands run in the compose folder
/// instead of changing the process working directory.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::core::config::{ComposeLocation, Configuration};
use crate::core::runner::{CommandRunner, CommandSpec};
use crate::error::{BackupError, BackupResult};
use crate::utils::is_file_readable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackAction {
    Down,
    Up,
}

impl StackAction {
    fn args(&self) -> &'static [&'static str] {
        match self {
            Self::Down => &["down"],
            Self::Up => &["up", "-d"],
        }
    }
}

#[derive(Debug, Clone)]
pub struct ComposeStack {
    command: CommandSpec,
    location: ComposeLocation,
}

impl ComposeStack {
    /// `None` when stack management is disabled for this target
    pub fn from_config(config: &Configuration) -> BackupResult<Option<Self>> {
        let Some(location) = config.compose.clone() else {
            return Ok(None);
        };
        let command = CommandSpec::from_line(&config.compose_command)?;
        Ok(Some(Self { command, location }))
    }

    pub fn folder(&self) -> &Path {
        &self.location.folder
    }

    pub fn compose_file(&self) -> &Path {
        &self.location.file
    }

    /// Verify the stack descriptor exists and return the folder to run in
    pub fn ensure_descriptor(&self) -> BackupResult<PathBuf> {
        if !is_file_readable(&self.location.file) {
            return Err(BackupError::ComposeFileNotFound(self.location.file.clone()));
        }
        debug!("Stack working directory is {}", self.location.folder.display());
        Ok(self.location.folder.clone())
    }

    /// The full command for `action`, e.g. `docker-compose up -d`
    pub fn command(&self, action: StackAction) -> CommandSpec {
        self.command
            .clone()
            .args(action.args().iter().copied())
            .current_dir(&self.location.folder)
    }

    /// Execute docker-compose command
    pub async fn compose_command(
        &self,
        runner: &dyn CommandRunner,
        action: StackAction,
    ) -> BackupResult<()> {
        let spec = self.command(action);
        info!(folder = %self.location.folder.display(), "Running {}", spec);

        let result = runner.run(&spec).await?;
        if !result.success() {
            return Err(BackupError::stack(spec.command_line(), result.output));
        }
        Ok(())
    }

    pub async fn down(&self, runner: &dyn CommandRunner) -> BackupResult<()> {
        self.compose_command(runner, StackAction::Down).await
    }

    pub async fn up(&self, runner: &dyn CommandRunner) -> BackupResult<()> {
        self.compose_command(runner, StackAction::Up).await
    }
}
