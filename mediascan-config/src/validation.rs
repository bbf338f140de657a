use thiserror::Error;

use crate::models::Config;

#[derive(Debug, Error)]
pub enum ConfigGuardRailError {
    #[error("no watched paths configured")]
    NoWatchedPaths,
    #[error("thumbnail width must be non-zero")]
    ZeroThumbnailWidth,
    #[error("scanner poll interval must be non-zero")]
    ZeroPollInterval,
    #[error("scanner queue capacity must be non-zero")]
    ZeroQueueCapacity,
    #[error("watchdog {field} must be non-zero")]
    ZeroWatchdogDuration { field: &'static str },
}

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push<S: Into<String>>(&mut self, message: S) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint<S: Into<String>, H: Into<String>>(&mut self, message: S, hint: H) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn extend(&mut self, other: ConfigWarnings) {
        self.items.extend(other.items);
    }

    /// Emit every warning through `tracing`.
    pub fn log(&self) {
        for warning in &self.items {
            match &warning.hint {
                Some(hint) => tracing::warn!(hint = %hint, "{}", warning.message),
                None => tracing::warn!("{}", warning.message),
            }
        }
    }
}

pub fn apply_guard_rails(config: &Config) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let scan = &config.scan;
    let mut warnings = ConfigWarnings::default();

    if scan.scanner.paths.is_empty() {
        return Err(ConfigGuardRailError::NoWatchedPaths);
    }
    if scan.thumbnails.width == 0 {
        return Err(ConfigGuardRailError::ZeroThumbnailWidth);
    }
    if scan.scanner.poll_interval_ms == 0 {
        return Err(ConfigGuardRailError::ZeroPollInterval);
    }
    if scan.scanner.queue_capacity == 0 {
        return Err(ConfigGuardRailError::ZeroQueueCapacity);
    }
    if scan.watchdog.enabled {
        if scan.watchdog.interval_ms == 0 {
            return Err(ConfigGuardRailError::ZeroWatchdogDuration { field: "interval_ms" });
        }
        if scan.watchdog.timeout_ms == 0 {
            return Err(ConfigGuardRailError::ZeroWatchdogDuration { field: "timeout_ms" });
        }
    }

    for path in &scan.scanner.paths {
        if !path.exists() {
            warnings.push(format!("Watched path {} does not exist yet", path.display()));
        }
    }

    if let Some(root) = &scan.scanner.media_root
        && !scan.scanner.paths.iter().any(|path| path.starts_with(root))
    {
        warnings.push_with_hint(
            format!(
                "Media root {} does not contain any watched path",
                root.display()
            ),
            "Every scanned file will be ignored; point media_root at a parent of the watched paths",
        );
    }

    if config.database.url.is_none() {
        warnings.push_with_hint(
            "DATABASE_URL not configured; records are kept in memory and lost on restart",
            "Set DATABASE_URL or add a [database] section to the config file",
        );
    }

    if scan.tools.timeout_ms == 0 {
        warnings.push("External tool timeout disabled; a hung ffmpeg stalls the scan queue");
    }

    let settle_ms = scan.scanner.stability_threshold_ms + scan.scanner.poll_interval_ms;
    if scan.watchdog.enabled && scan.watchdog.timeout_ms <= settle_ms {
        warnings.push_with_hint(
            format!(
                "Watchdog timeout ({} ms) is not longer than the write stabilization delay ({} ms)",
                scan.watchdog.timeout_ms, settle_ms
            ),
            "Raise watchdog.timeout_ms or the watchdog will restart a healthy process",
        );
    }

    Ok(warnings)
}
