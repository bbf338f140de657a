//! Runtime options consumed by the scanner components.
//!
//! Everything here deserializes with defaults so a configuration file only
//! needs to mention the knobs it changes. Durations are plain millisecond
//! integers.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// All options grouped the way the configuration file lays them out.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ScanOptions {
    pub scanner: ScannerOptions,
    pub tools: ToolOptions,
    pub thumbnails: ThumbnailOptions,
    pub metadata: MetadataOptions,
    pub watchdog: WatchdogOptions,
}

/// Watched roots and watcher tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScannerOptions {
    /// Directories watched recursively.
    pub paths: Vec<PathBuf>,
    /// Root that record ids are computed against. Defaults to the first
    /// watched path.
    pub media_root: Option<PathBuf>,
    /// A file must keep the same size for this long before it is scanned.
    pub stability_threshold_ms: u64,
    /// How often growing files are re-checked.
    pub poll_interval_ms: u64,
    /// Capacity of the ordered event queue between watcher and pipeline.
    pub queue_capacity: usize,
    /// Re-run the reconciliation sweep on this cadence. `None` runs it once
    /// at startup only.
    pub sweep_interval_ms: Option<u64>,
}

impl Default for ScannerOptions {
    fn default() -> Self {
        Self {
            paths: vec![PathBuf::from("media")],
            media_root: None,
            stability_threshold_ms: 2_000,
            poll_interval_ms: 1_000,
            queue_capacity: 1_024,
            sweep_interval_ms: None,
        }
    }
}

impl ScannerOptions {
    pub fn media_root(&self) -> &Path {
        self.media_root
            .as_deref()
            .or_else(|| self.paths.first().map(PathBuf::as_path))
            .unwrap_or_else(|| Path::new("."))
    }

    pub fn stability_threshold(&self) -> Duration {
        Duration::from_millis(self.stability_threshold_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        self.sweep_interval_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

/// Locations of the external binaries.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ToolOptions {
    pub ffmpeg: String,
    pub ffprobe: String,
    /// Upper bound for a single tool invocation. `0` disables the bound.
    pub timeout_ms: u64,
}

impl Default for ToolOptions {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
            timeout_ms: 600_000,
        }
    }
}

impl ToolOptions {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}

/// Output size of extracted stills. `-1` keeps the aspect ratio.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ThumbnailOptions {
    pub width: i32,
    pub height: i32,
}

impl Default for ThumbnailOptions {
    fn default() -> Self {
        Self {
            width: 256,
            height: -1,
        }
    }
}

/// Extended metadata toggles and detector thresholds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetadataOptions {
    /// Produce the `mediainfo` structure at all.
    pub enabled: bool,
    pub field_order: bool,
    /// Frames decoded by the interlace detector.
    pub field_order_scan_frames: u32,
    pub scenes: bool,
    pub scene_threshold: f64,
    pub black_detection: bool,
    pub black_duration: f64,
    pub black_ratio: f64,
    pub black_threshold: f64,
    pub freeze_detection: bool,
    pub freeze_noise: f64,
    pub freeze_duration: f64,
}

impl Default for MetadataOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            field_order: false,
            field_order_scan_frames: 200,
            scenes: true,
            scene_threshold: 0.4,
            black_detection: true,
            black_duration: 2.0,
            black_ratio: 0.98,
            black_threshold: 0.1,
            freeze_detection: false,
            freeze_noise: 0.001,
            freeze_duration: 2.0,
        }
    }
}

impl MetadataOptions {
    /// True when the combined filter pass has anything to do.
    pub fn any_detector(&self) -> bool {
        self.scenes || self.black_detection || self.freeze_detection
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WatchdogOptions {
    pub enabled: bool,
    /// Sentinel file name, looked up directly below the media root.
    pub sentinel: String,
    pub interval_ms: u64,
    /// Deadline for each of the inject and retract phases.
    pub timeout_ms: u64,
    /// Delay between a fatal probe failure and process exit.
    pub grace_ms: u64,
}

impl Default for WatchdogOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            sentinel: "watchdog.mov".to_string(),
            interval_ms: 5 * 60 * 1_000,
            timeout_ms: 10 * 1_000,
            grace_ms: 1_000,
        }
    }
}

impl WatchdogOptions {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let options: ScanOptions = serde_json::from_str(
            r#"{ "scanner": { "paths": ["/srv/media"] }, "metadata": { "freeze_detection": true } }"#,
        )
        .unwrap();

        assert_eq!(options.scanner.paths, vec![PathBuf::from("/srv/media")]);
        assert_eq!(options.scanner.stability_threshold_ms, 2_000);
        assert_eq!(options.scanner.media_root(), Path::new("/srv/media"));
        assert!(options.metadata.freeze_detection);
        assert!(options.metadata.scenes);
        assert_eq!(options.watchdog.sentinel, "watchdog.mov");
    }

    #[test]
    fn zero_tool_timeout_is_unbounded() {
        let tools = ToolOptions {
            timeout_ms: 0,
            ..ToolOptions::default()
        };
        assert!(tools.timeout().is_none());
        assert_eq!(
            ToolOptions::default().timeout(),
            Some(Duration::from_secs(600))
        );
    }

    #[test]
    fn no_detectors_means_no_filter_pass() {
        let metadata = MetadataOptions {
            scenes: false,
            black_detection: false,
            freeze_detection: false,
            ..MetadataOptions::default()
        };
        assert!(!metadata.any_detector());
    }
}
