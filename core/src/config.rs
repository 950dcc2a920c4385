//! Runtime configuration
//!
//! Sources, lowest precedence first:
//! 1. built-in defaults
//! 2. a TOML file (explicit path, or `MODRT_CONFIG_PATH`)
//! 3. `MODRT_*` environment variables (a `.env` file is loaded first)
//! 4. overrides set on the builder

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use config::{Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::state::DEFAULT_KEY_PREFIX;

pub const CONFIG_PATH_ENV: &str = "MODRT_CONFIG_PATH";
pub const ENV_PREFIX: &str = "MODRT";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// `tracing` filter used when `RUST_LOG` is unset
    pub log_filter: String,

    /// Emit per-step trace records
    pub trace_enabled: bool,

    /// Prefix of the durable storage keys holding synced mod variables
    pub storage_key_prefix: String,

    /// Tab the runtime runs in; required for tab-scoped variables
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<u64>,

    /// Interrupt on renderer bricks instead of running them
    pub headless: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            log_filter: "info".to_string(),
            trace_enabled: true,
            storage_key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            tab_id: None,
            headless: true,
        }
    }
}

impl RuntimeConfig {
    pub fn builder() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder::default()
    }

    /// Load from the default sources
    pub fn load() -> Result<Self> {
        Self::builder().build()
    }

    /// Load with an explicit config file
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        Self::builder().config_path(Some(path.as_ref().to_path_buf())).build()
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    fn validate(&self) -> Result<()> {
        if self.storage_key_prefix.trim().is_empty() {
            bail!("storage_key_prefix must not be empty");
        }
        if self.log_filter.trim().is_empty() {
            bail!("log_filter must not be empty");
        }
        Ok(())
    }
}

/// Builder for [`RuntimeConfig`]; `None` overrides leave the loaded value alone
#[derive(Debug, Clone)]
pub struct RuntimeConfigBuilder {
    config_path: Option<PathBuf>,
    log_filter: Option<String>,
    tab_id: Option<u64>,
    headless: Option<bool>,
    trace_enabled: Option<bool>,
    read_env: bool,
}

impl Default for RuntimeConfigBuilder {
    fn default() -> Self {
        Self {
            config_path: None,
            log_filter: None,
            tab_id: None,
            headless: None,
            trace_enabled: None,
            read_env: true,
        }
    }
}

impl RuntimeConfigBuilder {
    pub fn config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    pub fn log_filter(mut self, filter: Option<String>) -> Self {
        self.log_filter = filter;
        self
    }

    pub fn tab_id(mut self, tab_id: Option<u64>) -> Self {
        self.tab_id = tab_id;
        self
    }

    pub fn headless(mut self, headless: Option<bool>) -> Self {
        self.headless = headless;
        self
    }

    pub fn trace_enabled(mut self, enabled: Option<bool>) -> Self {
        self.trace_enabled = enabled;
        self
    }

    /// Ignore `.env` and `MODRT_*` variables
    pub fn without_env(mut self) -> Self {
        self.read_env = false;
        self
    }

    pub fn build(self) -> Result<RuntimeConfig> {
        if self.read_env {
            dotenvy::dotenv().ok();
        }

        let path = self.config_path.or_else(|| {
            if self.read_env {
                std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from)
            } else {
                None
            }
        });

        let mut sources = config::Config::builder();
        if let Some(path) = &path {
            if !path.exists() {
                bail!("Config file not found: {}", path.display());
            }
            sources = sources.add_source(File::from(path.as_path()).format(FileFormat::Toml).required(true));
        }
        if self.read_env {
            sources = sources.add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true));
        }

        let mut config: RuntimeConfig = sources
            .build()
            .context("Failed to read configuration sources")?
            .try_deserialize()
            .context("Invalid configuration")?;

        if let Some(filter) = self.log_filter {
            config.log_filter = filter;
        }
        if let Some(tab_id) = self.tab_id {
            config.tab_id = Some(tab_id);
        }
        if let Some(headless) = self.headless {
            config.headless = headless;
        }
        if let Some(enabled) = self.trace_enabled {
            config.trace_enabled = enabled;
        }

        config.validate()?;
        Ok(config)
    }
}
