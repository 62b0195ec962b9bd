use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::env_vars;

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct FsdumpConfig {
    #[serde(default)]
    pub metadata: MetadataSection,
    #[serde(default)]
    pub log: LogSection,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MetadataSection {
    /// Root whose `.fscrypt/protectors` holds protectors missing from the mountpoint.
    pub fallback_root: PathBuf,
}

impl Default for MetadataSection {
    fn default() -> Self {
        Self {
            fallback_root: PathBuf::from("/"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LogSection {
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

/// Resolve the config file path: `--config`, then `FSDUMP_CONFIG`, then XDG.
pub fn resolve_config_path(flag: Option<&Path>) -> anyhow::Result<PathBuf> {
    if let Some(path) = flag {
        return Ok(path.to_path_buf());
    }
    if let Ok(value) = std::env::var(env_vars::CONFIG) {
        if !value.trim().is_empty() {
            return Ok(PathBuf::from(value));
        }
    }
    default_config_path()
}

/// Load the config, falling back to defaults when no file exists.
///
/// A path given explicitly must exist.
pub fn load_config(flag: Option<&Path>) -> anyhow::Result<FsdumpConfig> {
    let path = resolve_config_path(flag)?;
    if !path.exists() {
        if flag.is_some() {
            return Err(anyhow::anyhow!("Config file {} not found", path.display()));
        }
        return Ok(FsdumpConfig::default());
    }
    read_config(&path)
}

pub fn default_config_path() -> anyhow::Result<PathBuf> {
    Ok(xdg_config_dir()?.join("config.toml"))
}

pub fn read_config(path: &Path) -> anyhow::Result<FsdumpConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config {}: {}", path.display(), e))?;
    toml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("Failed to parse config {}: {}", path.display(), e))
}

pub fn xdg_config_dir() -> anyhow::Result<PathBuf> {
    if let Ok(value) = std::env::var("XDG_CONFIG_HOME") {
        if !value.trim().is_empty() {
            return Ok(PathBuf::from(value).join("fsdump"));
        }
    }
    Ok(home_dir()?.join(".config").join("fsdump"))
}

fn home_dir() -> anyhow::Result<PathBuf> {
    let home = std::env::var("HOME")
        .map_err(|_| anyhow::anyhow!("HOME is not set; cannot resolve default paths"))?;
    Ok(PathBuf::from(home))
}
