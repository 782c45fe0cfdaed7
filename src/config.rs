//! Configuration loading for av.
//!
//! Two layers, repo over user:
//! - `<repo>/.av/config.toml` — per-repository settings, committed or not at
//!   the team's discretion.
//! - `<config-dir>/av/config.toml` — user-level defaults.
//!
//! Only settings the core consumes live here: the remote name used for
//! remote-tracking lookups, and an optional trunk override for repositories
//! whose default branch cannot be detected.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default remote name when nothing is configured
pub const DEFAULT_REMOTE: &str = "origin";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Remote used for remote-tracking branch lookups (default "origin")
    #[serde(default)]
    pub remote: Option<String>,

    /// Trunk branch override. When unset, the trunk is detected from the
    /// remote HEAD or the conventional main/master names.
    #[serde(default)]
    pub trunk: Option<String>,
}

impl Config {
    /// Load configuration for a repository working directory.
    ///
    /// User-level config is read first, then the repo-level file overrides
    /// any field it sets. A missing file at either level is not an error.
    pub fn load(workdir: &Path) -> Result<Self> {
        let mut config = Self::load_file(&Self::user_config_path())?.unwrap_or_default();

        if let Some(repo) = Self::load_file(&workdir.join(".av").join("config.toml"))? {
            if repo.remote.is_some() {
                config.remote = repo.remote;
            }
            if repo.trunk.is_some() {
                config.trunk = repo.trunk;
            }
        }

        Ok(config)
    }

    /// The effective remote name.
    pub fn remote_name(&self) -> &str {
        self.remote.as_deref().unwrap_or(DEFAULT_REMOTE)
    }

    fn user_config_path() -> std::path::PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| std::path::PathBuf::from("."))
            .join("av")
            .join("config.toml")
    }

    fn load_file(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {:?}", path))?;
        let config = toml::from_str(&contents)
            .with_context(|| format!("invalid config at {:?}", path))?;

        Ok(Some(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_missing_config_uses_defaults() -> Result<()> {
        let dir = tempdir()?;
        let config = Config::load(dir.path())?;
        assert_eq!(config.remote_name(), "origin");
        assert!(config.trunk.is_none());
        Ok(())
    }

    #[test]
    fn test_repo_config_overrides() -> Result<()> {
        let dir = tempdir()?;
        fs::create_dir_all(dir.path().join(".av"))?;
        fs::write(
            dir.path().join(".av").join("config.toml"),
            "remote = \"upstream\"\ntrunk = \"develop\"\n",
        )?;

        let config = Config::load(dir.path())?;
        assert_eq!(config.remote_name(), "upstream");
        assert_eq!(config.trunk.as_deref(), Some("develop"));
        Ok(())
    }

    #[test]
    fn test_invalid_toml_is_an_error() -> Result<()> {
        let dir = tempdir()?;
        fs::create_dir_all(dir.path().join(".av"))?;
        fs::write(dir.path().join(".av").join("config.toml"), "remote = [broken")?;

        assert!(Config::load(dir.path()).is_err());
        Ok(())
    }
}
