/// Backup orchestration
///
/// One attempt walks a fixed sequence of stages:
///
/// `Start → Preconditions → PreHook? → StackDown? → CreateArchive → StackUp?
///  → Prune → PostHook? → NotifySuccess → Done`
///
/// Any error leaves the sequence and enters `Recovery`: the failure is sent to
/// every notification channel, the container stack is brought back up if this
/// attempt took it down, and the original error is returned. Failures inside
/// recovery are logged and never replace that error.

use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{error, info, warn};

use crate::core::borg;
use crate::core::checks::{LocalSystem, PreconditionChecker};
use crate::core::compose::ComposeStack;
use crate::core::config::{Configuration, Secrets};
use crate::core::hooks::{self, Hook, HookStage};
use crate::core::notify::{self, Notifications};
use crate::core::runner::CommandRunner;
use crate::error::{BackupError, BackupResult};
use crate::utils::error_report;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    Preconditions,
    PreHook,
    StackDown,
    CreateArchive,
    StackUp,
    Prune,
    PostHook,
    NotifySuccess,
    Done,
    Recovery,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::Preconditions => "preconditions",
            Self::PreHook => "pre-hook",
            Self::StackDown => "stack-down",
            Self::CreateArchive => "create-archive",
            Self::StackUp => "stack-up",
            Self::Prune => "prune",
            Self::PostHook => "post-hook",
            Self::NotifySuccess => "notify-success",
            Self::Done => "done",
            Self::Recovery => "recovery",
        };
        f.write_str(name)
    }
}

/// State of one backup attempt
#[derive(Debug, Default)]
pub struct RunContext {
    /// Directory stack commands and hook scripts run in
    pub working_dir: Option<PathBuf>,
    /// Set once stack-down is issued, cleared by a successful stack-up
    pub stack_down: bool,
    pub stages: Vec<Stage>,
    pub archive: Option<String>,
}

impl RunContext {
    fn enter(&mut self, stage: Stage) {
        info!(stage = %stage, "Entering stage");
        self.stages.push(stage);
    }

    pub fn current(&self) -> Option<Stage> {
        self.stages.last().copied()
    }
}

/// Summary of a successful attempt
#[derive(Debug, Clone)]
pub struct RunReport {
    pub stages: Vec<Stage>,
    pub archive: String,
    pub elapsed: Duration,
}

pub struct Orchestrator<'a> {
    config: &'a Configuration,
    secrets: &'a Secrets,
    runner: &'a dyn CommandRunner,
    system: &'a dyn LocalSystem,
    notifications: &'a Notifications,
    hook: Option<&'a dyn Hook>,
    stack: Option<ComposeStack>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        config: &'a Configuration,
        secrets: &'a Secrets,
        runner: &'a dyn CommandRunner,
        system: &'a dyn LocalSystem,
        notifications: &'a Notifications,
    ) -> BackupResult<Self> {
        Ok(Self {
            config,
            secrets,
            runner,
            system,
            notifications,
            hook: None,
            stack: ComposeStack::from_config(config)?,
        })
    }

    pub fn with_hook(mut self, hook: Option<&'a dyn Hook>) -> Self {
        self.hook = hook;
        self
    }

    /// Run one backup attempt
    pub async fn run(&self) -> BackupResult<RunReport> {
        let started = Instant::now();
        let mut ctx = RunContext::default();

        match self.advance(&mut ctx).await {
            Ok(archive) => {
                let elapsed = started.elapsed();
                info!(
                    folder = %self.config.foldername,
                    archive = %archive,
                    "Backup finished in {}",
                    humantime::format_duration(Duration::from_secs(elapsed.as_secs()))
                );
                Ok(RunReport {
                    stages: ctx.stages,
                    archive,
                    elapsed,
                })
            }
            Err(err) => {
                let failed_in = ctx.current().unwrap_or(Stage::Start);
                error!(stage = %failed_in, "Backup failed: {}", err);
                ctx.enter(Stage::Recovery);
                self.recover(&mut ctx, &err).await;
                Err(err)
            }
        }
    }

    async fn advance(&self, ctx: &mut RunContext) -> BackupResult<String> {
        ctx.enter(Stage::Start);
        if self.config.dry_run {
            warn!("Dry run: commands are logged, not executed");
        }

        ctx.enter(Stage::Preconditions);
        PreconditionChecker::new(self.runner, self.system)
            .check(self.config, self.secrets)
            .await?;

        if let Some(hook) = self.hook {
            ctx.enter(Stage::PreHook);
            hooks::run_stage(hook, HookStage::Pre, self.runner, self.config).await?;
        }

        if let Some(stack) = &self.stack {
            ctx.enter(Stage::StackDown);
            ctx.working_dir = Some(stack.ensure_descriptor()?);
            ctx.stack_down = true;
            stack.down(self.runner).await?;
        }

        ctx.enter(Stage::CreateArchive);
        let archive = borg::archive_name(&self.config.borgarchive, Utc::now());
        ctx.archive = Some(archive.clone());
        borg::create(self.runner, self.config, self.secrets, &archive).await?;

        if let Some(stack) = &self.stack {
            ctx.enter(Stage::StackUp);
            stack.up(self.runner).await?;
            ctx.stack_down = false;
        }

        ctx.enter(Stage::Prune);
        borg::prune(self.runner, self.config, self.secrets).await?;

        if let Some(hook) = self.hook {
            ctx.enter(Stage::PostHook);
            hooks::run_stage(hook, HookStage::Post, self.runner, self.config).await?;
        }

        ctx.enter(Stage::NotifySuccess);
        self.notifications
            .broadcast(&notify::success_message(self.config))
            .await;

        ctx.enter(Stage::Done);
        Ok(archive)
    }

    async fn recover(&self, ctx: &mut RunContext, err: &BackupError) {
        let report = error_report(err);
        self.notifications
            .broadcast(&notify::failure_message(self.config, &report))
            .await;

        let Some(stack) = self.stack.as_ref().filter(|_| ctx.stack_down) else {
            return;
        };

        info!("Bringing the container stack back up");
        match stack.up(self.runner).await {
            Ok(()) => ctx.stack_down = false,
            Err(restore) => error!(
                "Restoring the container stack failed, it stays down: {}",
                error_report(&restore)
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{ConfigFile, SecretsFile};
    use crate::core::hooks::HookOutcome;
    use crate::core::notify::MockNotifier;
    use crate::core::runner::{CommandResult, CommandSpec, ShellRunner};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Succeeds every command except those whose line starts with a failing prefix
    struct RecordingRunner {
        failing: Vec<&'static str>,
        info_output: &'static str,
        seen: Mutex<Vec<String>>,
    }

    impl RecordingRunner {
        fn new(failing: Vec<&'static str>) -> Self {
            Self {
                failing,
                info_output: "Encrypted: No\n",
                seen: Mutex::new(Vec::new()),
            }
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }

        fn count(&self, prefix: &str) -> usize {
            self.seen().iter().filter(|line| line.starts_with(prefix)).count()
        }
    }

    #[async_trait]
    impl CommandRunner for RecordingRunner {
        async fn run(&self, command: &CommandSpec) -> BackupResult<CommandResult> {
            let line = command.command_line();
            self.seen.lock().unwrap().push(line.clone());

            let status = if self.failing.iter().any(|prefix| line.starts_with(prefix)) { 2 } else { 0 };
            let output = if line.starts_with("borg info") {
                self.info_output.to_string()
            } else if status != 0 {
                format!("{} went wrong", line.split(' ').take(2).collect::<Vec<_>>().join(" "))
            } else {
                String::new()
            };
            Ok(CommandResult { status, output })
        }
    }

    struct RootWithBorg;

    impl LocalSystem for RootWithBorg {
        fn current_user(&self) -> Option<String> {
            Some("root".to_string())
        }

        fn find_tool(&self, name: &str) -> Option<PathBuf> {
            Some(PathBuf::from("/usr/bin").join(name))
        }
    }

    #[derive(Default)]
    struct CountingHook {
        pre: AtomicUsize,
        post: AtomicUsize,
    }

    #[async_trait]
    impl Hook for CountingHook {
        fn name(&self) -> String {
            "counting".to_string()
        }

        async fn pre(&self, _runner: &dyn CommandRunner, _config: &Configuration) -> BackupResult<HookOutcome> {
            self.pre.fetch_add(1, Ordering::SeqCst);
            Ok(HookOutcome::Ran)
        }
    }

    /// A config rooted in a temp dir; `with_descriptor` creates the compose file
    fn setup(extra: &str, with_descriptor: bool) -> (tempfile::TempDir, Configuration, Secrets) {
        let root = tempfile::tempdir().unwrap();
        if with_descriptor {
            let folder = root.path().join("nextcloud");
            std::fs::create_dir_all(&folder).unwrap();
            std::fs::write(folder.join("docker-compose.yaml"), "services: {}\n").unwrap();
        }

        let raw: ConfigFile = serde_yaml::from_str(&format!(
            "foldername: nextcloud\n\
             borgserver: ch-s011.rsync.net\n\
             rootfolder: {}/\n\
             expected_user: root\n\
             repo_encrypted: false\n{}",
            root.path().display(),
            extra
        ))
        .unwrap();
        let secrets_file: SecretsFile = serde_yaml::from_str("borguser: 12345").unwrap();
        let config = Configuration::resolve(raw, &secrets_file).unwrap();
        let secrets = Secrets::resolve(secrets_file, &config).unwrap();
        (root, config, secrets)
    }

    fn expect_one_message(prefix: &'static str) -> Notifications {
        let mut notifier = MockNotifier::new();
        notifier.expect_name().return_const("mock".to_string());
        notifier
            .expect_send()
            .withf(move |message| message.starts_with(prefix))
            .times(1)
            .returning(|_| Ok(()));
        Notifications::new(vec![Box::new(notifier)])
    }

    #[tokio::test]
    async fn test_successful_sequence() {
        let (_root, config, secrets) = setup("", true);
        let runner = RecordingRunner::new(vec![]);
        let notifications = expect_one_message("borg-backup of nextcloud finished successfully.");

        let report = Orchestrator::new(&config, &secrets, &runner, &RootWithBorg, &notifications)
            .unwrap()
            .run()
            .await
            .unwrap();

        assert_eq!(
            report.stages,
            vec![
                Stage::Start,
                Stage::Preconditions,
                Stage::StackDown,
                Stage::CreateArchive,
                Stage::StackUp,
                Stage::Prune,
                Stage::NotifySuccess,
                Stage::Done,
            ]
        );
        assert!(report.archive.starts_with("nextcloud-"));

        let seen = runner.seen();
        let programs: Vec<&str> = seen.iter().map(|line| line.split(' ').next().unwrap()).collect();
        assert_eq!(
            programs,
            vec!["ping", "ssh", "borg", "docker-compose", "borg", "docker-compose", "borg"]
        );
        assert_eq!(seen[3], "docker-compose down");
        assert!(seen[4].starts_with("borg create 12345@ch-s011.rsync.net:nextcloud::nextcloud-"));
        assert_eq!(seen[5], "docker-compose up -d");
        assert!(seen[6].starts_with("borg prune -v --list"));
    }

    #[tokio::test]
    async fn test_hook_stages_wrap_the_backup() {
        let (_root, config, secrets) = setup("docker_compose: false\n", false);
        let runner = RecordingRunner::new(vec![]);
        let notifications = Notifications::default();
        let hook = CountingHook::default();

        let report = Orchestrator::new(&config, &secrets, &runner, &RootWithBorg, &notifications)
            .unwrap()
            .with_hook(Some(&hook))
            .run()
            .await
            .unwrap();

        assert_eq!(
            report.stages,
            vec![
                Stage::Start,
                Stage::Preconditions,
                Stage::PreHook,
                Stage::CreateArchive,
                Stage::Prune,
                Stage::PostHook,
                Stage::NotifySuccess,
                Stage::Done,
            ]
        );
        assert_eq!(hook.pre.load(Ordering::SeqCst), 1);
        assert_eq!(hook.post.load(Ordering::SeqCst), 0);
        assert_eq!(runner.count("docker-compose"), 0);
    }

    #[tokio::test]
    async fn test_missing_descriptor_stops_before_stack_and_archive() {
        let (_root, config, secrets) = setup("", false);
        let runner = RecordingRunner::new(vec![]);
        let notifications = expect_one_message("ERROR: borg-backup for nextcloud failed with reason:");

        let err = Orchestrator::new(&config, &secrets, &runner, &RootWithBorg, &notifications)
            .unwrap()
            .run()
            .await
            .unwrap_err();

        assert!(matches!(err, BackupError::ComposeFileNotFound(_)));
        assert_eq!(runner.count("docker-compose"), 0);
        assert_eq!(runner.count("borg create"), 0);
    }

    #[tokio::test]
    async fn test_create_failure_restores_stack_once() {
        let (_root, config, secrets) = setup("", true);
        let runner = RecordingRunner::new(vec!["borg create"]);
        let notifications = expect_one_message("ERROR: borg-backup for nextcloud failed with reason:\nError running borg create");

        let err = Orchestrator::new(&config, &secrets, &runner, &RootWithBorg, &notifications)
            .unwrap()
            .run()
            .await
            .unwrap_err();

        match err {
            BackupError::ToolError { subcommand, output } => {
                assert_eq!(subcommand, "create");
                assert_eq!(output, "borg create went wrong");
            }
            other => panic!("expected ToolError, got {:?}", other),
        }
        assert_eq!(runner.count("docker-compose up -d"), 1);
        assert_eq!(runner.count("borg prune"), 0);
    }

    #[tokio::test]
    async fn test_failed_restore_keeps_original_error() {
        let (_root, config, secrets) = setup("", true);
        let runner = RecordingRunner::new(vec!["borg create", "docker-compose up"]);
        let notifications = Notifications::default();

        let err = Orchestrator::new(&config, &secrets, &runner, &RootWithBorg, &notifications)
            .unwrap()
            .run()
            .await
            .unwrap_err();

        assert!(matches!(err, BackupError::ToolError { .. }));
        assert_eq!(runner.count("docker-compose up -d"), 1);
    }

    #[tokio::test]
    async fn test_stack_up_failure_is_not_retried() {
        let (_root, config, secrets) = setup("", true);
        let runner = RecordingRunner::new(vec!["docker-compose up"]);
        let notifications = Notifications::default();

        let err = Orchestrator::new(&config, &secrets, &runner, &RootWithBorg, &notifications)
            .unwrap()
            .run()
            .await
            .unwrap_err();

        // still flagged down, so recovery makes the one extra restore attempt
        assert!(matches!(err, BackupError::StackError { .. }));
        assert_eq!(runner.count("docker-compose up -d"), 2);
        assert_eq!(runner.count("borg prune"), 0);
    }

    #[tokio::test]
    async fn test_precondition_failure_leaves_stack_alone() {
        let (_root, config, secrets) = setup("", true);
        let mut runner = RecordingRunner::new(vec!["borg info"]);
        runner.info_output = "Repository 12345@ch-s011.rsync.net:nextcloud does not exist.";
        let notifications = expect_one_message("ERROR:");

        let err = Orchestrator::new(&config, &secrets, &runner, &RootWithBorg, &notifications)
            .unwrap()
            .run()
            .await
            .unwrap_err();

        assert!(matches!(err, BackupError::RepositoryNotFound(_)));
        assert_eq!(runner.count("docker-compose"), 0);
        assert_eq!(runner.count("borg create"), 0);
    }

    #[tokio::test]
    async fn test_prune_failure_after_stack_is_back_up() {
        let (_root, config, secrets) = setup("", true);
        let runner = RecordingRunner::new(vec!["borg prune"]);
        let notifications = Notifications::default();

        let err = Orchestrator::new(&config, &secrets, &runner, &RootWithBorg, &notifications)
            .unwrap()
            .run()
            .await
            .unwrap_err();

        assert!(matches!(err, BackupError::ToolError { ref subcommand, .. } if subcommand == "prune"));
        assert_eq!(runner.count("docker-compose up -d"), 1);
    }

    #[tokio::test]
    async fn test_dry_run_walks_every_stage_without_spawning() {
        let (_root, config, secrets) = setup("debug: true\n", true);
        let runner = ShellRunner::new(config.dry_run);
        let notifications = Notifications::default();

        let report = Orchestrator::new(&config, &secrets, &runner, &RootWithBorg, &notifications)
            .unwrap()
            .run()
            .await
            .unwrap();

        assert_eq!(report.stages.first(), Some(&Stage::Start));
        assert_eq!(report.stages.last(), Some(&Stage::Done));
        assert!(report.stages.contains(&Stage::StackDown));
    }
}
