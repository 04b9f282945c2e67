mod cli;

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cli::{Cli, VERSION_WITH_BUILD};
use dcborg_cli::core::{config, hooks, HostSystem, Notifications, Orchestrator, ShellRunner};
use dcborg_cli::utils::error_report;
use dcborg_cli::BackupError;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<BackupError>() {
                Some(backup) => error!("{}", error_report(backup)),
                None => error!("{:#}", err),
            }
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_filter()));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(cli.verbose))
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    info!("dcborg-cli {}", VERSION_WITH_BUILD);

    // Nothing below has touched the stack yet, so load errors need no recovery
    let (config, secrets) = config::load(&cli.config, &cli.secrets)?;
    let config = config.with_dry_run(cli.dry_run);
    let hook = hooks::resolve(&config, &cli.hooks_dir)?;
    let notifications = Notifications::from_config(&config, &secrets)?;

    info!(
        folder = %config.foldername,
        repository = %config.repository_location(),
        dry_run = config.dry_run,
        "Starting backup"
    );

    let runner = ShellRunner::new(config.dry_run);
    let report = Orchestrator::new(&config, &secrets, &runner, &HostSystem, &notifications)?
        .with_hook(hook.as_deref())
        .run()
        .await?;

    info!(archive = %report.archive, stages = report.stages.len(), "Done");
    Ok(())
}
