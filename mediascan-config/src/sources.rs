use std::path::PathBuf;

use mediascan_core::ScanOptions;
use serde::{Deserialize, Serialize};

/// Raw configuration as written in a file.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FileConfig {
    #[serde(flatten)]
    pub scan: ScanOptions,
    pub database: FileDatabaseConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileDatabaseConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<u32>,
}

/// Environment-derived configuration values.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub config_json: Option<String>,
    pub media_root: Option<PathBuf>,
    pub ffmpeg_path: Option<String>,
    pub ffprobe_path: Option<String>,
    pub database_url: Option<String>,
    pub watchdog_enabled: Option<bool>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        Self {
            config_path: var("MEDIASCAN_CONFIG_PATH").map(PathBuf::from),
            config_json: var("MEDIASCAN_CONFIG_JSON"),
            media_root: var("MEDIA_ROOT").map(PathBuf::from),
            ffmpeg_path: var("FFMPEG_PATH"),
            ffprobe_path: var("FFPROBE_PATH"),
            database_url: var("DATABASE_URL"),
            watchdog_enabled: var("WATCHDOG_ENABLED").and_then(|raw| parse_bool(&raw)),
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
