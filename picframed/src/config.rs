use std::path::{Path, PathBuf};
use std::time::Duration;

use picframe_drive::{ClientSecrets, OAuthError};
use thiserror::Error;

use crate::media::ExtensionSet;
use crate::storage::budget::{DEFAULT_CEILING_PERCENT, DEFAULT_EVICTION_MARGIN_PERCENT};

const APP_DIR: &str = "picframe";
const DEFAULT_FOLDER_ID: &str = "root";
const DEFAULT_SYNC_INTERVAL_MINS: u64 = 10;
const DEFAULT_SLIDESHOW_SECS: u64 = 5;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be a percentage no greater than 100, got `{value}`")]
    PercentOutOfRange { name: &'static str, value: String },
    #[error("PICFRAME_EXTENSIONS does not name any extension")]
    NoExtensions,
}

/// Where defaults live when no explicit path is configured.
#[derive(Debug, Clone)]
pub struct BaseDirs {
    pub home: PathBuf,
    pub data_dir: PathBuf,
    pub config_dir: PathBuf,
}

impl BaseDirs {
    pub fn detect() -> Self {
        let home = dirs::home_dir().unwrap_or_else(std::env::temp_dir);
        Self {
            data_dir: dirs::data_dir().unwrap_or_else(|| home.join(".local/share")),
            config_dir: dirs::config_dir().unwrap_or_else(|| home.join(".config")),
            home,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FrameConfig {
    pub images_dir: PathBuf,
    pub credentials_path: PathBuf,
    pub token_path: PathBuf,
    pub folder_id: String,
    pub max_storage_percent: f64,
    pub eviction_margin_percent: f64,
    pub sync_interval: Duration,
    pub slideshow_interval: Duration,
    pub extensions: ExtensionSet,
    pub http_timeout: Duration,
    pub log_dir: Option<PathBuf>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

impl FrameConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok(), &BaseDirs::detect())
    }

    pub fn from_lookup<F>(lookup: F, dirs: &BaseDirs) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let path_or = |name: &str, default: PathBuf| {
            var(name)
                .map(|value| expand_with_home(&value, &dirs.home))
                .unwrap_or(default)
        };
        let u64_or = |name: &str, default: u64| {
            var(name)
                .and_then(|value| value.parse::<u64>().ok())
                .filter(|value| *value > 0)
                .unwrap_or(default)
        };

        let max_storage_percent = read_percent(
            "PICFRAME_MAX_STORAGE_PERCENT",
            var("PICFRAME_MAX_STORAGE_PERCENT"),
            DEFAULT_CEILING_PERCENT,
            false,
        )?;
        let eviction_margin_percent = read_percent(
            "PICFRAME_EVICTION_MARGIN_PERCENT",
            var("PICFRAME_EVICTION_MARGIN_PERCENT"),
            DEFAULT_EVICTION_MARGIN_PERCENT,
            true,
        )?;
        let extensions = match var("PICFRAME_EXTENSIONS") {
            Some(raw) => ExtensionSet::parse_list(&raw),
            None => ExtensionSet::default(),
        };
        if extensions.is_empty() {
            return Err(ConfigError::NoExtensions);
        }

        let app_config = dirs.config_dir.join(APP_DIR);
        Ok(Self {
            images_dir: path_or(
                "PICFRAME_IMAGES_DIR",
                dirs.data_dir.join(APP_DIR).join("images"),
            ),
            credentials_path: path_or("PICFRAME_CREDENTIALS", app_config.join("credentials.json")),
            token_path: path_or("PICFRAME_TOKEN_PATH", app_config.join("token.json")),
            folder_id: var("PICFRAME_FOLDER_ID").unwrap_or_else(|| DEFAULT_FOLDER_ID.to_string()),
            max_storage_percent,
            eviction_margin_percent,
            sync_interval: Duration::from_secs(
                u64_or("PICFRAME_SYNC_INTERVAL_MINS", DEFAULT_SYNC_INTERVAL_MINS)
                    .saturating_mul(60),
            ),
            slideshow_interval: Duration::from_secs(u64_or(
                "PICFRAME_SLIDESHOW_SECS",
                DEFAULT_SLIDESHOW_SECS,
            )),
            extensions,
            http_timeout: Duration::from_secs(u64_or(
                "PICFRAME_HTTP_TIMEOUT_SECS",
                DEFAULT_HTTP_TIMEOUT_SECS,
            )),
            log_dir: var("PICFRAME_LOG_DIR").map(|value| expand_with_home(&value, &dirs.home)),
            client_id: var("PICFRAME_CLIENT_ID"),
            client_secret: var("PICFRAME_CLIENT_SECRET"),
        })
    }

    /// OAuth client credentials: the environment pair wins over the credentials file.
    ///
    /// Returns `None` when neither is available.
    pub fn client_secrets(&self) -> Result<Option<ClientSecrets>, OAuthError> {
        if let (Some(client_id), Some(client_secret)) = (&self.client_id, &self.client_secret) {
            return Ok(Some(ClientSecrets {
                client_id: client_id.clone(),
                client_secret: client_secret.clone(),
            }));
        }
        if !self.credentials_path.is_file() {
            return Ok(None);
        }
        ClientSecrets::load(&self.credentials_path).map(Some)
    }
}

fn read_percent(
    name: &'static str,
    raw: Option<String>,
    default: f64,
    allow_zero: bool,
) -> Result<f64, ConfigError> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    match raw.parse::<f64>() {
        Ok(value) if value <= 100.0 && (value > 0.0 || (allow_zero && value == 0.0)) => Ok(value),
        _ => Err(ConfigError::PercentOutOfRange { name, value: raw }),
    }
}

fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}
