/// Pre/post backup hooks
///
/// A hook may provide a `pre` step (before the stack goes down) and a `post`
/// step (after pruning). Either may be missing; a missing step is reported
/// as `HookOutcome::Absent` and logged, never treated as an error.
///
/// Hooks are resolved once at startup from the `prepost` config value:
/// - `mountpoints`: built-in guard that refuses to back up unmounted disks
/// - anything else: a directory `<hooks-dir>/<name>/` holding executable
///   `pre` and/or `post` scripts

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;

use crate::core::config::Configuration;
use crate::core::runner::{CommandRunner, CommandSpec};
use crate::error::{BackupError, BackupResult};
use crate::utils::{is_mountpoint, truncate_string, MOUNTPOINT_HOOK};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOutcome {
    Ran,
    Absent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookStage {
    Pre,
    Post,
}

impl HookStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pre => "pre",
            Self::Post => "post",
        }
    }
}

/// Trait for user-supplied steps around the backup
///
/// Both steps default to `Absent`, so an implementation only overrides what
/// it actually does.
#[async_trait]
pub trait Hook: Send + Sync {
    fn name(&self) -> String;

    async fn pre(&self, _runner: &dyn CommandRunner, _config: &Configuration) -> BackupResult<HookOutcome> {
        Ok(HookOutcome::Absent)
    }

    async fn post(&self, _runner: &dyn CommandRunner, _config: &Configuration) -> BackupResult<HookOutcome> {
        Ok(HookOutcome::Absent)
    }
}

/// Run one stage of `hook`, logging when the hook has nothing for it
pub async fn run_stage(
    hook: &dyn Hook,
    stage: HookStage,
    runner: &dyn CommandRunner,
    config: &Configuration,
) -> BackupResult<HookOutcome> {
    let outcome = match stage {
        HookStage::Pre => hook.pre(runner, config).await?,
        HookStage::Post => hook.post(runner, config).await?,
    };

    match outcome {
        HookOutcome::Ran => info!("Executed {}-script of hook '{}'", stage.as_str(), hook.name()),
        HookOutcome::Absent => info!("No {}() step found in hook '{}'", stage.as_str(), hook.name()),
    }
    Ok(outcome)
}

/// Resolve the configured hook, failing early when it does not exist
pub fn resolve(config: &Configuration, hooks_dir: &Path) -> BackupResult<Option<Box<dyn Hook>>> {
    let Some(name) = config.prepost.as_deref() else {
        return Ok(None);
    };

    if name == MOUNTPOINT_HOOK {
        if config.required_mountpoints.is_empty() {
            return Err(BackupError::config(
                "prepost 'mountpoints' needs a non-empty required_mountpoints list",
            ));
        }
        return Ok(Some(Box::new(MountpointHook::new(config.required_mountpoints.clone()))));
    }

    let dir = hooks_dir.join(name);
    info!("importing hook '{}' from {}", name, dir.display());
    if !dir.is_dir() {
        return Err(BackupError::config(format!(
            "Prepost hook {} not found.",
            dir.display()
        )));
    }
    Ok(Some(Box::new(ScriptHook::new(name, dir))))
}

/// Executable `pre`/`post` scripts in a hook directory
#[derive(Debug, Clone)]
pub struct ScriptHook {
    name: String,
    dir: PathBuf,
}

impl ScriptHook {
    pub fn new(name: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            dir: dir.into(),
        }
    }

    fn script(&self, stage: HookStage) -> Option<PathBuf> {
        let path = self.dir.join(stage.as_str());
        let executable = path
            .metadata()
            .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
            .unwrap_or(false);
        executable.then_some(path)
    }

    async fn run_script(
        &self,
        stage: HookStage,
        runner: &dyn CommandRunner,
        config: &Configuration,
    ) -> BackupResult<HookOutcome> {
        let Some(script) = self.script(stage) else {
            return Ok(HookOutcome::Absent);
        };

        let working_dir = config
            .compose
            .as_ref()
            .map(|compose| compose.folder.clone())
            .unwrap_or_else(|| self.dir.clone());

        let mut spec = CommandSpec::new(script.display().to_string()).current_dir(working_dir);
        for (key, value) in config.hook_environment() {
            spec = spec.env(key, value);
        }

        let result = runner.run(&spec).await?;
        if !result.success() {
            return Err(BackupError::HookFailed {
                hook: self.name.clone(),
                stage: stage.as_str(),
                detail: format!(
                    "exit status {}: {}",
                    result.status,
                    truncate_string(result.output.trim(), 500)
                ),
            });
        }
        Ok(HookOutcome::Ran)
    }
}

#[async_trait]
impl Hook for ScriptHook {
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn pre(&self, runner: &dyn CommandRunner, config: &Configuration) -> BackupResult<HookOutcome> {
        self.run_script(HookStage::Pre, runner, config).await
    }

    async fn post(&self, runner: &dyn CommandRunner, config: &Configuration) -> BackupResult<HookOutcome> {
        self.run_script(HookStage::Post, runner, config).await
    }
}

/// Refuses to start a backup while any required disk is not mounted, so an
/// empty mount directory never replaces the real data in the repository
#[derive(Debug, Clone)]
pub struct MountpointHook {
    mountpoints: Vec<PathBuf>,
}

impl MountpointHook {
    pub fn new(mountpoints: Vec<PathBuf>) -> Self {
        Self { mountpoints }
    }
}

#[async_trait]
impl Hook for MountpointHook {
    fn name(&self) -> String {
        MOUNTPOINT_HOOK.to_string()
    }

    async fn pre(&self, _runner: &dyn CommandRunner, _config: &Configuration) -> BackupResult<HookOutcome> {
        for mountpoint in &self.mountpoints {
            let mounted = is_mountpoint(mountpoint).map_err(|e| BackupError::HookFailed {
                hook: self.name(),
                stage: HookStage::Pre.as_str(),
                detail: format!("cannot read mount table: {}", e),
            })?;
            if !mounted {
                return Err(BackupError::HookFailed {
                    hook: self.name(),
                    stage: HookStage::Pre.as_str(),
                    detail: format!("{} is not a mountpoint", mountpoint.display()),
                });
            }
        }
        Ok(HookOutcome::Ran)
    }
}
