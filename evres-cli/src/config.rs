//! TOML configuration file handling.

use std::path::{Path, PathBuf};

use anyhow::Context;
use event_resolver::ResolverConfig;
use event_resolver::config::CacheConfig;
use tracing::debug;

use crate::error::Result;

const APP_DIR: &str = "evres";
const CONFIG_FILE: &str = "config.toml";
const CACHE_FILE: &str = "streams.json";

pub struct AppConfig;

impl AppConfig {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
    }

    /// Defaults with the cache placed in the platform cache directory.
    pub fn defaults() -> ResolverConfig {
        let mut config = ResolverConfig::default();
        if let Some(dir) = dirs::cache_dir() {
            config.cache.path = dir.join(APP_DIR).join(CACHE_FILE);
        }
        config
    }

    fn resolve_path(path: Option<&Path>) -> Option<PathBuf> {
        path.map(Path::to_path_buf).or_else(Self::default_path)
    }

    /// Load the configuration, falling back to defaults when no file exists.
    pub fn load(path: Option<&Path>) -> Result<ResolverConfig> {
        let Some(path) = Self::resolve_path(path) else {
            return Ok(Self::defaults());
        };
        if !path.exists() {
            debug!(path = %path.display(), "No configuration file, using defaults");
            return Ok(Self::defaults());
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let mut config: ResolverConfig = toml::from_str(&content)?;

        // a file without a [cache] path keeps the platform cache location
        if config.cache.path == CacheConfig::default().path {
            config.cache.path = Self::defaults().cache.path;
        }
        Ok(config)
    }

    /// Overwrite the configuration file with defaults.
    pub fn reset(path: Option<&Path>) -> Result<PathBuf> {
        let path = Self::resolve_path(path)
            .context("no configuration directory available on this platform")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        std::fs::write(&path, Self::show(&Self::defaults())?)
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }

    pub fn show(config: &ResolverConfig) -> Result<String> {
        Ok(toml::to_string_pretty(config)?)
    }
}
