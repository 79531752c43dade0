//! Layered engine configuration.
//!
//! Sources are applied in order: built-in defaults, an optional TOML file and
//! finally `DERIVA__`-prefixed environment variables, e.g.
//! `DERIVA__PAGING__MAX_PAGE_SIZE=500`.

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::{DerivaError, Result};

pub const DEFAULT_CONFIG_FILE: &str = "deriva";

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct StorageConfig {
    /// Path of the SQLite database file. In-memory when absent.
    pub path: Option<String>,
    /// How long a statement waits for a contended lock before failing.
    pub busy_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PagingConfig {
    pub default_page_size: usize,
    pub max_page_size: usize,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LoggingConfig {
    pub filter: String,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct EngineConfig {
    pub storage: StorageConfig,
    pub paging: PagingConfig,
    pub logging: LoggingConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_ms: 5000,
        }
    }
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self {
            default_page_size: 20,
            max_page_size: 2000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".into(),
        }
    }
}

impl EngineConfig {
    /// Loads `deriva.toml` from the working directory if present.
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    pub fn load_from(file: &str) -> Result<Self> {
        let defaults = Self::default();
        let settings = Config::builder()
            .set_default(
                "storage.busy_timeout_ms",
                defaults.storage.busy_timeout_ms as i64,
            )?
            .set_default(
                "paging.default_page_size",
                defaults.paging.default_page_size as i64,
            )?
            .set_default("paging.max_page_size", defaults.paging.max_page_size as i64)?
            .set_default("logging.filter", defaults.logging.filter)?
            .add_source(File::with_name(file).required(false))
            .add_source(
                Environment::with_prefix("DERIVA")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let loaded: EngineConfig = settings.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> Result<()> {
        if self.paging.default_page_size == 0 {
            return Err(DerivaError::Config(
                "paging.default_page_size must be greater than zero".into(),
            ));
        }
        if self.paging.max_page_size == 0 {
            return Err(DerivaError::Config(
                "paging.max_page_size must be greater than zero".into(),
            ));
        }
        if self.paging.default_page_size > self.paging.max_page_size {
            return Err(DerivaError::Config(format!(
                "paging.default_page_size ({}) exceeds paging.max_page_size ({})",
                self.paging.default_page_size, self.paging.max_page_size
            )));
        }
        Ok(())
    }
}
