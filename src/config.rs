use std::fs;
use std::path::PathBuf;

use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::error::DicomError;
use crate::http::DEFAULT_TIMEOUT_SECS;

pub const CONFIG_FILE_NAME: &str = "dicom-pull.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub service_account: Option<PathBuf>,
    #[serde(default)]
    pub dicom_store: Option<String>,
    #[serde(default)]
    pub output: Option<PathBuf>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_retries: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub service_account: Option<PathBuf>,
    pub dicom_store: Option<String>,
    pub output: Option<PathBuf>,
    pub timeout_secs: u64,
    pub max_retries: usize,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// An explicit path must exist; otherwise `./dicom-pull.json`, then the user
    /// config directory, then built-in defaults.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, DicomError> {
        let config_path = match path {
            Some(path) => Some(PathBuf::from(path)),
            None => Self::discover(),
        };

        let config = match config_path {
            Some(config_path) => {
                tracing::debug!(path = %config_path.display(), "loading config");
                let content = fs::read_to_string(&config_path)
                    .map_err(|_| DicomError::ConfigRead(config_path.clone()))?;
                serde_json::from_str(&content)
                    .map_err(|err| DicomError::ConfigParse(err.to_string()))?
            }
            None => Config::default(),
        };

        Ok(Self::resolve_config(config))
    }

    pub fn resolve_config(config: Config) -> ResolvedConfig {
        ResolvedConfig {
            service_account: config.service_account,
            dicom_store: config.dicom_store,
            output: config.output,
            timeout_secs: config.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
            max_retries: config.max_retries.unwrap_or(0),
        }
    }

    fn discover() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return Some(local);
        }
        BaseDirs::new()
            .map(|dirs| dirs.config_dir().join("dicom-pull").join("config.json"))
            .filter(|path| path.exists())
    }
}
