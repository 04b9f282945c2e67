/// CLI argument parsing

use std::path::PathBuf;

use clap::Parser;

use dcborg_cli::utils::DEFAULT_HOOKS_DIR;

// Build timestamp injected at compile time
pub const VERSION_WITH_BUILD: &str = concat!(env!("CARGO_PKG_VERSION"), " (built: ", env!("BUILD_TIMESTAMP"), ")");

#[derive(Parser, Debug)]
#[command(name = "dcborg-cli")]
#[command(author, version = VERSION_WITH_BUILD, about, long_about = None)]
pub struct Cli {
    /// Config file of the folder to back up (YAML)
    pub config: PathBuf,

    /// Secrets file with the borg user, repo passwords and telegram credentials (YAML)
    pub secrets: PathBuf,

    /// Log every command instead of running it; skips the pre-backup checks
    #[arg(long)]
    pub dry_run: bool,

    /// Directory holding pre/post hook folders
    #[arg(long, default_value = DEFAULT_HOOKS_DIR)]
    pub hooks_dir: PathBuf,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    pub fn log_filter(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else {
            "info"
        }
    }
}
