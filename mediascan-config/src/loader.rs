use std::fs;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use thiserror::Error;

use crate::models::{Config, ConfigMetadata, ConfigSource, DatabaseConfig};
use crate::sources::{EnvConfig, FileConfig};
use crate::validation::{self, ConfigGuardRailError, ConfigWarnings};

static DEFAULT_CONFIG_LOCATIONS: Lazy<Vec<PathBuf>> = Lazy::new(|| {
    vec![
        PathBuf::from("mediascan.toml"),
        PathBuf::from("mediascan.json"),
        PathBuf::from("config/mediascan.toml"),
        PathBuf::from("config/mediascan.json"),
    ]
});

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
    /// Directory default candidates are resolved against. Defaults to the
    /// working directory.
    pub search_dir: Option<PathBuf>,
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("configuration file missing: {path}")]
    MissingConfig { path: PathBuf },
    #[error("failed to read configuration {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("filesystem initialization failed")]
    Filesystem { source: anyhow::Error },
    #[error(transparent)]
    GuardRail(#[from] ConfigGuardRailError),
    #[error(transparent)]
    EnvFile(#[from] dotenvy::Error),
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    pub fn with_search_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.options.search_dir = Some(dir.into());
        self
    }

    /// Load `.env`, then resolve against the process environment.
    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true).or_else(|err| match err {
                dotenvy::Error::Io(_) => Ok(false),
                _ => Err(err),
            })?,
            None => dotenvy::dotenv().map(|_| true).or_else(|err| match err {
                dotenvy::Error::Io(_) => Ok(false),
                _ => Err(err),
            })?,
        };

        let mut load = self.load_with_env(EnvConfig::gather())?;
        load.config.metadata.env_file_loaded = env_file_loaded;
        Ok(load)
    }

    /// Resolve against an explicit environment snapshot.
    pub fn load_with_env(&self, env: EnvConfig) -> Result<ConfigLoad, ConfigLoadError> {
        let (file, source) = self.load_file_config(&env)?;
        let mut warnings = ConfigWarnings::default();
        if source == ConfigSource::Default {
            warnings.push_with_hint(
                "No configuration file found; using built-in defaults",
                "Create mediascan.toml or set MEDIASCAN_CONFIG_PATH",
            );
        }

        let mut config = compose_config(file, env, source);
        config
            .normalize_paths()
            .map_err(|source| ConfigLoadError::Filesystem { source })?;
        warnings.extend(validation::apply_guard_rails(&config)?);
        Ok(ConfigLoad { config, warnings })
    }

    fn load_file_config(
        &self,
        env: &EnvConfig,
    ) -> Result<(FileConfig, ConfigSource), ConfigLoadError> {
        if let Some(path) = &self.options.config_path {
            return Ok((read_config_file(path)?, ConfigSource::File(path.clone())));
        }
        if let Some(path) = &env.config_path {
            return Ok((read_config_file(path)?, ConfigSource::EnvPath(path.clone())));
        }
        if let Some(raw) = &env.config_json {
            let file = parse_json(raw, "MEDIASCAN_CONFIG_JSON")?;
            return Ok((file, ConfigSource::EnvInline));
        }

        let search_dir = self.options.search_dir.as_deref().unwrap_or(Path::new(""));
        let default = DEFAULT_CONFIG_LOCATIONS
            .iter()
            .map(|candidate| search_dir.join(candidate))
            .find(|candidate| candidate.exists());
        match default {
            Some(path) => Ok((read_config_file(&path)?, ConfigSource::File(path))),
            None => Ok((FileConfig::default(), ConfigSource::Default)),
        }
    }
}

fn read_config_file(path: &Path) -> Result<FileConfig, ConfigLoadError> {
    if !path.exists() {
        return Err(ConfigLoadError::MissingConfig {
            path: path.to_path_buf(),
        });
    }
    let contents = fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let origin = path.display().to_string();

    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => parse_json(&contents, &origin),
        Some("toml") => toml::from_str(&contents).map_err(|err| ConfigLoadError::Parse {
            origin,
            source: err.into(),
        }),
        _ => parse_from_str(&contents, &origin),
    }
}

/// Try TOML first, then JSON.
pub fn parse_from_str(contents: &str, origin: &str) -> Result<FileConfig, ConfigLoadError> {
    toml::from_str(contents).or_else(|toml_err| {
        serde_json::from_str(contents).map_err(|json_err| ConfigLoadError::Parse {
            origin: origin.to_string(),
            source: anyhow::anyhow!("toml error: {toml_err}; json error: {json_err}"),
        })
    })
}

fn parse_json(raw: &str, origin: &str) -> Result<FileConfig, ConfigLoadError> {
    serde_json::from_str(raw).map_err(|err| ConfigLoadError::Parse {
        origin: origin.to_string(),
        source: err.into(),
    })
}

/// Layer environment overrides on top of the file configuration.
fn compose_config(file: FileConfig, env: EnvConfig, source: ConfigSource) -> Config {
    let FileConfig {
        scan: mut options,
        database: file_database,
    } = file;

    if let Some(root) = env.media_root {
        options.scanner.paths = vec![root.clone()];
        options.scanner.media_root = Some(root);
    }
    if let Some(ffmpeg) = env.ffmpeg_path {
        options.tools.ffmpeg = ffmpeg;
    }
    if let Some(ffprobe) = env.ffprobe_path {
        options.tools.ffprobe = ffprobe;
    }
    if let Some(enabled) = env.watchdog_enabled {
        options.watchdog.enabled = enabled;
    }

    let defaults = DatabaseConfig::default();
    let database = DatabaseConfig {
        url: env
            .database_url
            .or(file_database.url)
            .filter(|url| !url.trim().is_empty()),
        max_connections: file_database
            .max_connections
            .unwrap_or(defaults.max_connections),
    };

    Config {
        scan: options,
        database,
        metadata: ConfigMetadata {
            source,
            env_file_loaded: false,
        },
    }
}
