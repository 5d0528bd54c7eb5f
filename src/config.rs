// Optional YAML configuration for the command-line front end

use crate::error::{Result, StoreError};
use crate::storage::{FileStorage, SqliteStorage, Storage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

pub const APP_NAME: &str = "todostore";

/// Account used when neither the config file nor the command line names one
pub const DEFAULT_USER: &str = "user-1";

const CONFIG_FILE: &str = "config.yaml";
const DB_FILE: &str = "todostore.db";

/// Persistence medium behind the store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Sqlite,
    Files,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Sqlite => f.write_str("sqlite"),
            Backend::Files => f.write_str("files"),
        }
    }
}

impl FromStr for Backend {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sqlite" => Ok(Backend::Sqlite),
            "files" => Ok(Backend::Files),
            _ => Err(StoreError::invalid("backend", s)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_dir: Option<PathBuf>,
    pub backend: Backend,
    pub user: Option<String>,
}

impl Config {
    /// `<config_dir>/todostore/config.yaml`, if the platform has a config dir
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        info!(path = %path.display(), backend = %config.backend, "Loaded config");
        Ok(config)
    }

    /// Load from `path` if given, otherwise from the default location
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => match Self::default_path() {
                Some(path) => Self::load(&path),
                None => Ok(Self::default()),
            },
        }
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        dirs::data_dir()
            .map(|dir| dir.join(APP_NAME))
            .ok_or_else(|| StoreError::unavailable("could not determine a data directory"))
    }

    pub fn user(&self) -> &str {
        self.user.as_deref().unwrap_or(DEFAULT_USER)
    }

    /// Create the data directory and open the configured medium
    pub fn open_storage(&self) -> Result<Box<dyn Storage>> {
        let dir = self.data_dir()?;
        fs::create_dir_all(&dir)?;

        let storage: Box<dyn Storage> = match self.backend {
            Backend::Sqlite => Box::new(SqliteStorage::open(dir.join(DB_FILE))?),
            Backend::Files => Box::new(FileStorage::open(&dir)?),
        };
        info!(dir = %dir.display(), backend = %self.backend, "Opened storage");
        Ok(storage)
    }
}
