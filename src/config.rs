//! Configuration file handling for the ledger.
//!
//! The configuration file is stored at `$LEDGER_HOME/config.json` and contains the address of the
//! remote store, its public API key, backup settings, and the location of the session credentials.

use crate::backup::Backup;
use crate::error::{IntoResult, Res};
use crate::{utils, Error, ErrorType, Result};
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

const APP_NAME: &str = "ledger";
const CONFIG_VERSION: u8 = 1;
const BACKUP_COPIES: u32 = 5;
const SECRETS: &str = ".secrets";
const BACKUPS: &str = ".backups";
const SESSION_JSON: &str = "session.json";
const CONFIG_JSON: &str = "config.json";

/// The `Config` object represents the configuration of the app. You instantiate it by providing
/// the path to `$LEDGER_HOME` and from there it loads `$LEDGER_HOME/config.json`. It provides
/// paths to other items that are either configurable or are expected in a certain location within
/// the ledger home directory.
#[derive(Debug, Clone)]
pub struct Config {
    root: PathBuf,
    backups: PathBuf,
    secrets: PathBuf,
    config_path: PathBuf,
    config_file: ConfigFile,
}

/// The identity of a signed-in user, stored in the session file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub user_id: String,
    pub access_token: String,
}

impl Credentials {
    pub fn new(user_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            access_token: access_token.into(),
        }
    }
}

impl Config {
    /// Creates the data directory, its subdirectories and an initial `config.json` file.
    ///
    /// # Arguments
    /// - `dir` - The directory that will be the root of data directory, e.g. `$HOME/ledger`
    /// - `remote_url` - The base URL of the remote store, e.g. `https://abcd.example.co`
    /// - `api_key` - The public key of the remote project, sent with every request.
    ///
    /// # Errors
    /// - Returns an error if any file operations fail.
    pub async fn create(dir: impl Into<PathBuf>, remote_url: &str, api_key: &str) -> Result<Self> {
        create(dir.into(), remote_url, api_key)
            .await
            .pub_result(ErrorType::Config)
    }

    /// This will
    /// - validate that the `ledger_home` exists and that the config file exists
    /// - load the config file
    /// - validate that the backups and secrets directories exist
    /// - return the loaded configuration object
    pub async fn load(ledger_home: impl Into<PathBuf>) -> Result<Self> {
        load(ledger_home.into())
            .await
            .pub_result(ErrorType::Config)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn backups(&self) -> &Path {
        &self.backups
    }

    pub fn secrets(&self) -> &Path {
        &self.secrets
    }

    pub fn remote_url(&self) -> &str {
        &self.config_file.remote_url
    }

    pub fn api_key(&self) -> &str {
        &self.config_file.api_key
    }

    pub fn backup_copies(&self) -> u32 {
        self.config_file.backup_copies
    }

    /// Creates a new `Backup` instance for managing backup files.
    pub fn backup(&self) -> Backup {
        Backup::new(self)
    }

    /// Returns the stored `session_path` if it is absolute, otherwise resolves the relative path.
    pub fn session_path(&self) -> PathBuf {
        let p = self.config_file.session_path();
        if p.is_absolute() {
            return p;
        }
        self.root.join(p)
    }

    /// Reads the credentials written by `ledger auth`.
    pub async fn load_credentials(&self) -> Result<Credentials> {
        let path = self.session_path();
        if !path.is_file() {
            return Err(Error::new(
                ErrorType::Session,
                anyhow::anyhow!(
                    "Not signed in, there is no session file at '{}'. Run 'ledger auth' first.",
                    path.display()
                ),
            ));
        }
        utils::deserialize(&path)
            .await
            .pub_result(ErrorType::Session)
    }

    /// Writes `credentials` to the session file.
    pub async fn save_credentials(&self, credentials: &Credentials) -> Result<()> {
        let path = self.session_path();
        debug!("Saving session for user {} to {}", credentials.user_id, path.display());
        utils::serialize(&path, credentials)
            .await
            .pub_result(ErrorType::Filesystem)
    }

    /// Deletes the session file. Returns `false` if there was none.
    pub async fn remove_credentials(&self) -> Result<bool> {
        let path = self.session_path();
        if !path.is_file() {
            return Ok(false);
        }
        utils::remove(&path)
            .await
            .pub_result(ErrorType::Filesystem)?;
        Ok(true)
    }
}

async fn create(maybe_relative: PathBuf, remote_url: &str, api_key: &str) -> Res<Config> {
    url::Url::parse(remote_url).with_context(|| format!("Invalid remote URL '{remote_url}'"))?;

    // Create the directory if it does not exist
    utils::make_dir(&maybe_relative)
        .await
        .context("Unable to create the ledger home directory")?;

    // Canonicalize the directory path
    let root = utils::canonicalize(&maybe_relative).await?;

    // Create the subdirectories
    let backups = root.join(BACKUPS);
    utils::make_dir(&backups).await?;
    let secrets = root.join(SECRETS);
    utils::make_dir(&secrets).await?;

    let config_path = root.join(CONFIG_JSON);
    let config_file = ConfigFile {
        remote_url: remote_url.to_string(),
        api_key: api_key.to_string(),
        ..ConfigFile::default()
    };
    config_file.save(&config_path).await?;

    Ok(Config {
        root,
        backups,
        secrets,
        config_path,
        config_file,
    })
}

async fn load(maybe_relative: PathBuf) -> Res<Config> {
    let root = utils::canonicalize(&maybe_relative)
        .await
        .context("Ledger Home is missing")?;

    let config_path = root.join(CONFIG_JSON);
    if !config_path.is_file() {
        bail!("The config file is missing '{}'", config_path.display())
    }
    let config_file = ConfigFile::load(&config_path).await?;

    let config = Config {
        backups: root.join(BACKUPS),
        secrets: root.join(SECRETS),
        root,
        config_path,
        config_file,
    };
    if !config.backups.is_dir() {
        bail!(
            "The backups directory is missing '{}'",
            config.backups.display()
        )
    }
    if !config.secrets.is_dir() {
        bail!(
            "The secrets directory is missing '{}'",
            config.secrets.display()
        )
    }
    Ok(config)
}

/// Represents the serialization and deserialization format of the configuration file.
///
/// Example configuration:
/// ```json
/// {
///   "app_name": "ledger",
///   "config_version": 1,
///   "remote_url": "https://abcd.example.co",
///   "api_key": "public-anon-key",
///   "backup_copies": 5,
///   "session_path": ".secrets/session.json"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
struct ConfigFile {
    /// Application name, should always be "ledger"
    app_name: String,

    /// Configuration file version
    config_version: u8,

    /// Base URL of the remote store
    remote_url: String,

    /// Public key of the remote project
    api_key: String,

    /// Number of backup copies to keep
    #[serde(default = "default_backup_copies")]
    backup_copies: u32,

    /// Path to the session credentials (optional, relative to config.json or absolute)
    /// Defaults to $LEDGER_HOME/.secrets/session.json if not specified
    #[serde(default, skip_serializing_if = "Option::is_none")]
    session_path: Option<PathBuf>,
}

fn default_backup_copies() -> u32 {
    BACKUP_COPIES
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            app_name: APP_NAME.to_string(),
            config_version: CONFIG_VERSION,
            remote_url: String::new(),
            api_key: String::new(),
            backup_copies: BACKUP_COPIES,
            session_path: None,
        }
    }
}

impl ConfigFile {
    /// Loads a ConfigFile asynchronously from the specified path.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed
    async fn load(path: impl AsRef<Path>) -> Res<Self> {
        let config: ConfigFile = utils::deserialize(path.as_ref()).await?;

        // Validate app_name
        anyhow::ensure!(
            config.app_name == APP_NAME,
            "Invalid app_name in config file: expected '{}', got '{}'",
            APP_NAME,
            config.app_name
        );

        Ok(config)
    }

    /// Saves the ConfigFile to the specified path.
    async fn save(&self, path: impl AsRef<Path>) -> Res<()> {
        utils::serialize(path.as_ref(), self)
            .await
            .context("Unable to write config file")
    }

    /// Gets the session path.
    ///
    /// If the path is relative, it should be interpreted as relative to the config.json file.
    /// If None, defaults to $LEDGER_HOME/.secrets/session.json
    fn session_path(&self) -> PathBuf {
        self.session_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(SECRETS).join(SESSION_JSON))
    }
}
