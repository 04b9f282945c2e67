/// Tool names, file names and fixed parameters used across dcborg-cli

use std::time::Duration;

/// The backup tool driven by this crate
pub const BORG_BINARY: &str = "borg";

/// Passphrase variable read by borg; only ever set in a subprocess environment
pub const BORG_PASSPHRASE_ENV: &str = "BORG_PASSPHRASE";
pub const BORG_RELOCATED_REPO_ENV: &str = "BORG_RELOCATED_REPO_ACCESS_IS_OK";

/// Retention applied when the config file has no `borg_parameters` block
pub const DEFAULT_PRUNE_PARAMETERS: &str =
    "-v --list --keep-within=1d --keep-daily=7 --keep-weekly=4 --keep-monthly=12";

/// Default paths
pub const DEFAULT_COMPOSE_COMMAND: &str = "docker-compose";
pub const COMPOSE_FILE_NAME: &str = "docker-compose.yaml";
pub const DEFAULT_HOOKS_DIR: &str = "prepost";
pub const MTAB_PATH: &str = "/etc/mtab";
pub const PROC_MOUNTS_PATH: &str = "/proc/self/mounts";

/// Archive names are `<prefix>-<UTC timestamp>`
pub const ARCHIVE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H%M%S";

/// Bounds for the connectivity probes; every other command runs unbounded
pub const PING_TIMEOUT: Duration = Duration::from_secs(10);
pub const SSH_LOGIN_TIMEOUT: Duration = Duration::from_secs(15);
pub const SSH_CONNECT_TIMEOUT_SECS: u32 = 5;

/// Prefix for configuration values exported to hook scripts
pub const HOOK_ENV_PREFIX: &str = "DCBORG_";

pub const TELEGRAM_API_URL: &str = "https://api.telegram.org";
pub const TELEGRAM_TIMEOUT: Duration = Duration::from_secs(30);

/// Built-in hook names
pub const MOUNTPOINT_HOOK: &str = "mountpoints";
