/// Configuration management for backup targets
///
/// Reads the config and secrets YAML files, applies defaults and validation,
/// and produces the immutable `Configuration` and `Secrets` values every later
/// step borrows. Nothing is mutated after `load` returns.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer};
use zeroize::Zeroizing;

use crate::error::{BackupError, BackupResult};
use crate::utils::{
    DEFAULT_COMPOSE_COMMAND, DEFAULT_PRUNE_PARAMETERS, COMPOSE_FILE_NAME, HOOK_ENV_PREFIX,
};

/// Extra command line parameters per borg subcommand
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BorgParameters {
    pub create: String,
    pub info: String,
    pub prune: String,
}

impl Default for BorgParameters {
    fn default() -> Self {
        Self {
            create: String::new(),
            info: String::new(),
            prune: DEFAULT_PRUNE_PARAMETERS.to_string(),
        }
    }
}

/// Location of the container stack backing the backed-up folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeLocation {
    pub folder: PathBuf,
    pub file: PathBuf,
}

/// Resolved, validated settings for one backup target
#[derive(Debug, Clone)]
pub struct Configuration {
    pub foldername: String,
    pub borgserver: String,
    pub borguser: String,
    pub borgrepo: String,
    pub borgarchive: String,
    pub rootfolder: String,
    pub expected_user: String,
    pub repo_encrypted: bool,
    pub docker_compose: bool,
    pub telegram: bool,
    pub prepost: Option<String>,
    pub borg_parameters: BorgParameters,
    pub relocated_repo_access_is_ok: Option<String>,
    pub compose: Option<ComposeLocation>,
    pub compose_command: String,
    pub required_mountpoints: Vec<PathBuf>,
    pub dry_run: bool,
}

impl Configuration {
    /// Load and resolve a config file; the secrets must already be loaded
    pub fn load<P: AsRef<Path>>(config_file: P, secrets: &SecretsFile) -> BackupResult<Self> {
        let config_file = config_file.as_ref();
        let content = read_file(config_file, "Configuration yaml")?;
        let raw: ConfigFile = serde_yaml::from_str(&content).map_err(|e| {
            BackupError::config(format!("{}: {}", config_file.display(), e))
        })?;

        Self::resolve(raw, secrets)
    }

    /// Apply defaults and validation to a parsed config file
    pub fn resolve(raw: ConfigFile, secrets: &SecretsFile) -> BackupResult<Self> {
        if !raw.rootfolder.ends_with('/') {
            return Err(BackupError::config("rootfolder needs to end with '/'"));
        }

        if raw.telegram && secrets.telegram.is_none() {
            return Err(BackupError::config(
                "telegram is enabled but secrets file has no telegram section (bot_token, chatids)",
            ));
        }

        let borg_parameters = match raw.borg_parameters {
            None => BorgParameters::default(),
            Some(block) => BorgParameters {
                create: block.create.unwrap_or_default(),
                info: block.info.unwrap_or_default(),
                prune: block.prune.unwrap_or_default(),
            },
        };

        let compose = raw.docker_compose.then(|| {
            let folder = PathBuf::from(format!("{}{}", raw.rootfolder, raw.foldername));
            ComposeLocation {
                file: folder.join(COMPOSE_FILE_NAME),
                folder,
            }
        });

        let prepost = raw.prepost.into_name()?.map(strip_script_suffix);

        Ok(Self {
            borgrepo: raw.borgrepo.unwrap_or_else(|| raw.foldername.clone()),
            borgarchive: raw.borgarchive.unwrap_or_else(|| raw.foldername.clone()),
            borguser: secrets.borguser.clone(),
            foldername: raw.foldername,
            borgserver: raw.borgserver,
            rootfolder: raw.rootfolder,
            expected_user: raw.expected_user,
            repo_encrypted: raw.repo_encrypted,
            docker_compose: raw.docker_compose,
            telegram: raw.telegram,
            prepost,
            borg_parameters,
            relocated_repo_access_is_ok: raw.borg_relocated_repo_access_is_ok,
            compose,
            compose_command: raw
                .compose_command
                .unwrap_or_else(|| DEFAULT_COMPOSE_COMMAND.to_string()),
            required_mountpoints: raw.required_mountpoints,
            dry_run: raw.debug,
        })
    }

    /// Force dry-run regardless of the config file
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run |= dry_run;
        self
    }

    /// `user@host:repo`
    pub fn repository_location(&self) -> String {
        format!("{}@{}:{}", self.borguser, self.borgserver, self.borgrepo)
    }

    /// `user@host`
    pub fn login_target(&self) -> String {
        format!("{}@{}", self.borguser, self.borgserver)
    }

    /// The folder that gets archived
    pub fn source_path(&self) -> PathBuf {
        PathBuf::from(format!("{}{}", self.rootfolder, self.foldername))
    }

    /// Settings exported to hook scripts as `DCBORG_<KEY>` variables
    pub fn hook_environment(&self) -> Vec<(String, String)> {
        let mut vars = vec![
            ("foldername", self.foldername.clone()),
            ("borgserver", self.borgserver.clone()),
            ("borguser", self.borguser.clone()),
            ("borgrepo", self.borgrepo.clone()),
            ("borgarchive", self.borgarchive.clone()),
            ("rootfolder", self.rootfolder.clone()),
            ("expected_user", self.expected_user.clone()),
            ("repo_encrypted", self.repo_encrypted.to_string()),
            ("docker_compose", self.docker_compose.to_string()),
            ("debug", self.dry_run.to_string()),
            ("source_path", self.source_path().display().to_string()),
        ];
        if let Some(compose) = &self.compose {
            vars.push(("compose_folder", compose.folder.display().to_string()));
            vars.push(("compose_file", compose.file.display().to_string()));
        }

        vars.into_iter()
            .map(|(key, value)| (format!("{}{}", HOOK_ENV_PREFIX, key.to_uppercase()), value))
            .collect()
    }
}

/// Raw config file as written by the user
#[derive(Debug, Deserialize)]
pub struct ConfigFile {
    pub foldername: String,
    pub borgserver: String,
    pub rootfolder: String,
    pub expected_user: String,
    pub repo_encrypted: bool,
    pub borgrepo: Option<String>,
    pub borgarchive: Option<String>,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub telegram: bool,
    #[serde(default = "default_true")]
    pub docker_compose: bool,
    #[serde(default)]
    pub prepost: HookSetting,
    pub borg_parameters: Option<BorgParametersFile>,
    pub borg_relocated_repo_access_is_ok: Option<String>,
    pub compose_command: Option<String>,
    #[serde(default)]
    pub required_mountpoints: Vec<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BorgParametersFile {
    pub create: Option<String>,
    pub info: Option<String>,
    pub prune: Option<String>,
}

/// `prepost: false` or `prepost: <hook name>`
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum HookSetting {
    Toggle(bool),
    Named(String),
}

impl Default for HookSetting {
    fn default() -> Self {
        Self::Toggle(false)
    }
}

impl HookSetting {
    fn into_name(self) -> BackupResult<Option<String>> {
        match self {
            Self::Toggle(false) => Ok(None),
            Self::Toggle(true) => Err(BackupError::config(
                "prepost must be false or the name of a hook, not true",
            )),
            Self::Named(name) if name.trim().is_empty() => Ok(None),
            Self::Named(name) => Ok(Some(name)),
        }
    }
}

fn default_true() -> bool {
    true
}

fn strip_script_suffix(name: String) -> String {
    for suffix in [".py", ".sh"] {
        if let Some(stripped) = name.strip_suffix(suffix) {
            return stripped.to_string();
        }
    }
    name
}

/// Raw secrets file
#[derive(Deserialize)]
pub struct SecretsFile {
    #[serde(deserialize_with = "string_or_number")]
    pub borguser: String,
    #[serde(default)]
    pub repo_passwords: HashMap<String, String>,
    pub telegram: Option<TelegramSecrets>,
}

impl fmt::Debug for SecretsFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretsFile")
            .field("borguser", &self.borguser)
            .field("repo_passwords", &self.repo_passwords.keys().collect::<Vec<_>>())
            .field("telegram", &self.telegram.is_some())
            .finish()
    }
}

impl SecretsFile {
    pub fn load<P: AsRef<Path>>(secrets_file: P) -> BackupResult<Self> {
        let secrets_file = secrets_file.as_ref();
        let content = read_file(secrets_file, "Secrets yaml")?;
        serde_yaml::from_str(&content)
            .map_err(|e| BackupError::config(format!("{}: {}", secrets_file.display(), e)))
    }
}

#[derive(Clone, Deserialize)]
pub struct TelegramSecrets {
    pub bot_token: String,
    #[serde(deserialize_with = "strings_or_numbers")]
    pub chatids: Vec<String>,
}

impl fmt::Debug for TelegramSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramSecrets")
            .field("bot_token", &"<redacted>")
            .field("chatids", &self.chatids)
            .finish()
    }
}

/// Repository passphrase; zeroed on drop and never printed
#[derive(Clone)]
pub struct Passphrase(Zeroizing<String>);

impl Passphrase {
    pub fn new(value: impl Into<String>) -> Self {
        Self(Zeroizing::new(value.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Passphrase(<redacted>)")
    }
}

/// Credentials resolved for the configured target
#[derive(Debug, Clone)]
pub struct Secrets {
    pub borguser: String,
    pub passphrase: Option<Passphrase>,
    pub telegram: Option<TelegramSecrets>,
}

impl Secrets {
    /// Pick the passphrase of `config.foldername` out of the secrets file
    pub fn resolve(file: SecretsFile, config: &Configuration) -> BackupResult<Self> {
        let SecretsFile {
            borguser,
            mut repo_passwords,
            telegram,
        } = file;

        let passphrase = if config.repo_encrypted {
            let password = repo_passwords.remove(&config.foldername).ok_or_else(|| {
                BackupError::config(format!(
                    "Password for repo not found. The key of the repo-password must be the same as foldername {}",
                    config.foldername
                ))
            })?;
            Some(Passphrase::new(password))
        } else {
            None
        };

        Ok(Self {
            borguser,
            passphrase,
            telegram,
        })
    }
}

/// Load both files and resolve them into the values a backup run needs
pub fn load(config_file: &Path, secrets_file: &Path) -> BackupResult<(Configuration, Secrets)> {
    let secrets_raw = SecretsFile::load(secrets_file)?;
    let config = Configuration::load(config_file, &secrets_raw)?;
    let secrets = Secrets::resolve(secrets_raw, &config)?;
    Ok((config, secrets))
}

fn read_file(path: &Path, what: &str) -> BackupResult<String> {
    if !path.is_file() {
        return Err(BackupError::config(format!(
            "{} {} not found.",
            what,
            path.display()
        )));
    }
    fs::read_to_string(path)
        .map_err(|e| BackupError::config(format!("Failed to read {}: {}", path.display(), e)))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    String(String),
    Int(i64),
}

impl From<StringOrNumber> for String {
    fn from(value: StringOrNumber) -> Self {
        match value {
            StringOrNumber::String(s) => s,
            StringOrNumber::Int(n) => n.to_string(),
        }
    }
}

// rsync.net style accounts and telegram chat ids are often written as bare numbers
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    StringOrNumber::deserialize(deserializer).map(String::from)
}

fn strings_or_numbers<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Vec::<StringOrNumber>::deserialize(deserializer)
        .map(|values| values.into_iter().map(String::from).collect())
}
