use std::path::PathBuf;

use anyhow::Context;
use mediascan_core::ScanOptions;
use serde::Serialize;

/// Fully resolved configuration handed to the binary.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    #[serde(flatten)]
    pub scan: ScanOptions,
    pub database: DatabaseConfig,
    #[serde(skip)]
    pub metadata: ConfigMetadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseConfig {
    /// PostgreSQL URL. Records are kept in memory when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 5,
        }
    }
}

impl DatabaseConfig {
    /// Same URL with any password replaced, for logging.
    pub fn redacted_url(&self) -> Option<String> {
        let url = self.url.as_deref()?;
        let Some((scheme, rest)) = url.split_once("://") else {
            return Some(url.to_string());
        };
        let Some((credentials, host)) = rest.rsplit_once('@') else {
            return Some(url.to_string());
        };
        let user = credentials.split(':').next().unwrap_or_default();
        Some(format!("{scheme}://{user}:***@{host}"))
    }
}

/// Where the configuration came from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConfigSource {
    #[default]
    Default,
    EnvPath(PathBuf),
    EnvInline,
    File(PathBuf),
}

#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub source: ConfigSource,
    pub env_file_loaded: bool,
}

impl Config {
    /// Resolve relative watched paths and media root against the working
    /// directory.
    pub fn normalize_paths(&mut self) -> anyhow::Result<()> {
        let cwd = std::env::current_dir().context("failed to resolve working directory")?;
        let scanner = &mut self.scan.scanner;
        for path in scanner.paths.iter_mut() {
            if path.is_relative() {
                *path = cwd.join(&*path);
            }
        }
        if let Some(root) = scanner.media_root.as_mut()
            && root.is_relative()
        {
            *root = cwd.join(&*root);
        }
        Ok(())
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
