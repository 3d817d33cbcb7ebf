use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use baff_core::{EntityTypeDescriptor, StoreTypeDescriptor, TypeRegistry};
use serde::Deserialize;

use crate::store_manager::DEFAULT_CACHE_SIZE;

const CONFIG_DIR: &str = ".baff";
const CONFIG_FILE: &str = "config.toml";

/// Top-level cache configuration loaded from `.baff/config.toml`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct CacheConfig {
    /// Registry sizing and notification buffering.
    #[serde(default)]
    pub cache: CacheSettings,
    /// Session identity sent with fetches.
    #[serde(default)]
    pub session: SessionConfig,
    /// Entity type declarations.
    #[serde(default)]
    pub entities: Vec<EntityTypeDescriptor>,
    /// Store type declarations.
    #[serde(default)]
    pub stores: Vec<StoreTypeDescriptor>,
}

impl CacheConfig {
    /// Path of the configuration file under a working directory.
    #[must_use]
    pub fn config_path(workdir: impl AsRef<Path>) -> PathBuf {
        workdir.as_ref().join(CONFIG_DIR).join(CONFIG_FILE)
    }

    /// Load configuration from a working directory. A missing file yields defaults.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read, parsed or validated.
    pub fn from_workdir(workdir: impl AsRef<Path>) -> Result<Self> {
        let config_path = Self::config_path(workdir);
        if !config_path.exists() {
            return Ok(Self::default());
        }
        Self::from_path(&config_path)
    }

    /// Load configuration from an explicit file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_path(path: &Path) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&contents).with_context(|| format!("failed to load {}", path.display()))
    }

    /// Parse and validate configuration text.
    ///
    /// # Errors
    /// Returns an error for malformed TOML or an inconsistent type declaration.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents).context("failed to parse cache configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Build the type registry declared by this configuration.
    ///
    /// # Errors
    /// Returns an error for duplicate names or dangling type references.
    pub fn registry(&self) -> Result<TypeRegistry> {
        TypeRegistry::from_descriptors(self.entities.iter().cloned(), self.stores.iter().cloned())
            .context("invalid type declarations")
    }

    fn validate(&self) -> Result<()> {
        self.cache.validate()?;
        self.session.validate()?;
        self.registry().map(|_| ())
    }
}

/// Registry sizing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Stores retained before idle ones are evicted.
    pub size: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            size: DEFAULT_CACHE_SIZE,
        }
    }
}

impl CacheSettings {
    fn validate(&self) -> Result<()> {
        if self.size == 0 {
            bail!("cache size must be at least 1");
        }
        Ok(())
    }
}

/// Session identity.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SessionConfig {
    /// User name sent as the `username` request parameter.
    #[serde(default)]
    pub username: Option<String>,
}

impl SessionConfig {
    fn validate(&self) -> Result<()> {
        if self.username.as_deref().is_some_and(|name| name.trim().is_empty()) {
            bail!("session username must not be empty");
        }
        Ok(())
    }
}
