//! Field order, scene change, black and freeze detection via ffmpeg filters.
//!
//! All detectors report on ffmpeg's stderr, so everything here boils down to
//! building a filter graph and scraping the diagnostics it prints.

use std::ffi::OsString;
use std::path::Path;

use mediascan_model::{BlackSegment, FieldOrder, FreezeSegment};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::config::MetadataOptions;
use crate::error::{MediaError, Result};
use crate::tools::ToolRunner;

static IDET_SUMMARY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Multi frame detection: TFF:\s+(\d+)\s+BFF:\s+(\d+)\s+Progressive:\s+(\d+)")
        .expect("valid idet regex")
});

static SHOWINFO_PTS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Parsed_showinfo_(.*)pts_time:([\d.]+)\s+").expect("valid showinfo regex")
});

static BLACK_SEGMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"black_start:\s*(\d+(?:\.\d+)?)\s+black_end:\s*(\d+(?:\.\d+)?)\s+black_duration:\s*(\d+(?:\.\d+)?)",
    )
    .expect("valid blackdetect regex")
});

static FREEZE_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"lavfi\.freezedetect\.freeze_(start|duration|end):\s*(\d+(?:\.\d+)?)")
        .expect("valid freezedetect regex")
});

#[cfg(windows)]
const NULL_SINK: &str = "NUL";
#[cfg(not(windows))]
const NULL_SINK: &str = "/dev/null";

/// Everything the combined filter pass found.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Detections {
    pub scenes: Vec<f64>,
    pub blacks: Vec<BlackSegment>,
    pub freezes: Vec<FreezeSegment>,
}

#[derive(Debug, Clone)]
pub struct SceneAnalyzer {
    runner: ToolRunner,
    options: MetadataOptions,
}

impl SceneAnalyzer {
    pub fn new(runner: ToolRunner, options: MetadataOptions) -> Self {
        Self { runner, options }
    }

    /// Run the interlace detector over the first frames of `path`.
    pub async fn field_order(&self, path: &Path) -> Result<FieldOrder> {
        if !self.options.field_order {
            return Ok(FieldOrder::Unknown);
        }
        let output = self
            .runner
            .ffmpeg(idet_args(path, self.options.field_order_scan_frames))
            .await?;
        Ok(parse_field_order(&output.stderr))
    }

    /// Run every enabled detector in one decode of `path`. Returns an empty
    /// result without spawning anything when no detector is enabled.
    pub async fn detect(&self, path: &Path) -> Result<Detections> {
        let Some(graph) = filter_graph(&self.options) else {
            return Ok(Detections::default());
        };
        debug!(path = %path.display(), %graph, "Running detection pass");
        let output = self.runner.ffmpeg(detect_args(path, &graph)).await?;
        parse_detections(&output.stderr)
    }
}

fn idet_args(path: &Path, frames: u32) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-hide_banner".into(), "-i".into()];
    args.push(path.as_os_str().to_os_string());
    args.extend(
        [
            "-filter:v".to_string(),
            "idet".to_string(),
            "-frames:v".to_string(),
            frames.to_string(),
            "-an".to_string(),
            "-f".to_string(),
            "rawvideo".to_string(),
            "-y".to_string(),
            NULL_SINK.to_string(),
        ]
        .into_iter()
        .map(OsString::from),
    );
    args
}

fn detect_args(path: &Path, graph: &str) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-hide_banner".into(), "-i".into()];
    args.push(path.as_os_str().to_os_string());
    args.extend(
        ["-filter:v", graph, "-an", "-f", "null", "-"]
            .into_iter()
            .map(OsString::from),
    );
    args
}

/// Combined graph in scene, black, freeze order, or `None` when every
/// detector is off.
pub fn filter_graph(options: &MetadataOptions) -> Option<String> {
    let mut parts = Vec::with_capacity(3);
    if options.scenes {
        parts.push(format!(
            "select='gt(scene,{})',showinfo",
            options.scene_threshold
        ));
    }
    if options.black_detection {
        parts.push(format!(
            "blackdetect=d={}:pic_th={}:pix_th={}",
            options.black_duration, options.black_ratio, options.black_threshold
        ));
    }
    if options.freeze_detection {
        parts.push(format!(
            "freezedetect=n={}:d={}",
            options.freeze_noise, options.freeze_duration
        ));
    }
    (!parts.is_empty()).then(|| parts.join(","))
}

/// Read the idet multi-frame summary. Low interlace counts on both fields
/// mean progressive.
pub fn parse_field_order(stderr: &str) -> FieldOrder {
    let Some(caps) = IDET_SUMMARY.captures(stderr) else {
        return FieldOrder::Unknown;
    };
    let count = |i: usize| caps[i].parse::<u64>().unwrap_or(0);
    FieldOrder::from_counts(count(1), count(2))
}

#[derive(Debug, Default)]
struct OpenFreeze {
    start: f64,
    duration: Option<f64>,
    end: Option<f64>,
}

/// Scrape showinfo, blackdetect and freezedetect output in one pass.
///
/// Freeze segments arrive as separate start, duration and end lines. Each
/// duration and end is paired with the oldest segment still missing that
/// field; any leftover line or unfinished segment is an error.
pub fn parse_detections(stderr: &str) -> Result<Detections> {
    let mut detections = Detections::default();
    let mut freezes: Vec<OpenFreeze> = Vec::new();

    for line in stderr.lines() {
        if let Some(caps) = SHOWINFO_PTS.captures(line) {
            if let Ok(pts) = caps[2].parse::<f64>() {
                detections.scenes.push(pts);
            }
            continue;
        }

        if let Some(caps) = BLACK_SEGMENT.captures(line) {
            let field = |i: usize| caps[i].parse::<f64>().unwrap_or(0.0);
            detections.blacks.push(BlackSegment {
                start: field(1),
                end: field(2),
                duration: field(3),
            });
            continue;
        }

        if let Some(caps) = FREEZE_FIELD.captures(line) {
            let value = caps[2].parse::<f64>().unwrap_or(0.0);
            match &caps[1] {
                "start" => freezes.push(OpenFreeze {
                    start: value,
                    ..OpenFreeze::default()
                }),
                "duration" => {
                    let open = freezes
                        .iter_mut()
                        .find(|f| f.duration.is_none())
                        .ok_or_else(|| unpaired("freeze_duration", value))?;
                    open.duration = Some(value);
                }
                _ => {
                    let open = freezes
                        .iter_mut()
                        .find(|f| f.end.is_none())
                        .ok_or_else(|| unpaired("freeze_end", value))?;
                    open.end = Some(value);
                }
            }
        }
    }

    detections.freezes = freezes
        .into_iter()
        .map(|open| match (open.duration, open.end) {
            (Some(duration), Some(end)) => Ok(FreezeSegment {
                start: open.start,
                duration,
                end,
            }),
            _ => Err(MediaError::InvalidMedia(format!(
                "freeze starting at {} was never closed",
                open.start
            ))),
        })
        .collect::<Result<_>>()?;

    Ok(detections)
}

fn unpaired(field: &str, value: f64) -> MediaError {
    MediaError::InvalidMedia(format!("{field} {value} has no matching freeze_start"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_keeps_fixed_order_and_skips_disabled() {
        let mut options = MetadataOptions {
            freeze_detection: true,
            ..MetadataOptions::default()
        };
        assert_eq!(
            filter_graph(&options).unwrap(),
            "select='gt(scene,0.4)',showinfo,blackdetect=d=2:pic_th=0.98:pix_th=0.1,freezedetect=n=0.001:d=2"
        );

        options.black_detection = false;
        options.scenes = false;
        assert_eq!(filter_graph(&options).unwrap(), "freezedetect=n=0.001:d=2");

        options.freeze_detection = false;
        assert!(filter_graph(&options).is_none());
    }

    #[tokio::test]
    async fn disabled_detectors_do_not_spawn_tools() {
        let options = MetadataOptions {
            field_order: false,
            scenes: false,
            black_detection: false,
            freeze_detection: false,
            ..MetadataOptions::default()
        };
        let runner = ToolRunner::new(&crate::config::ToolOptions {
            ffmpeg: "mediascan-definitely-not-installed".to_string(),
            ..Default::default()
        });
        let analyzer = SceneAnalyzer::new(runner, options);
        let path = Path::new("/media/clip.mov");

        assert_eq!(analyzer.field_order(path).await.unwrap(), FieldOrder::Unknown);
        assert_eq!(analyzer.detect(path).await.unwrap(), Detections::default());
    }

    #[test]
    fn idet_summary_classification() {
        let progressive = "[Parsed_idet_0 @ 0x1] Multi frame detection: TFF:     3 BFF:     0 Progressive:   190 Undetermined:     7";
        assert_eq!(parse_field_order(progressive), FieldOrder::Progressive);

        let tff = "Multi frame detection: TFF:   150 BFF:    12 Progressive:    30";
        assert_eq!(parse_field_order(tff), FieldOrder::Tff);

        let bff = "Multi frame detection: TFF:    11 BFF:   160 Progressive:    20";
        assert_eq!(parse_field_order(bff), FieldOrder::Bff);

        assert_eq!(parse_field_order("no summary here"), FieldOrder::Unknown);
    }

    #[test]
    fn scrapes_all_detectors_from_one_log() {
        let stderr = "\
[Parsed_showinfo_1 @ 0x55] n:   0 pts:  12012 pts_time:0.4004  duration:   1001
[Parsed_showinfo_1 @ 0x55] n:   1 pts: 150150 pts_time:5.005   duration:   1001
[blackdetect @ 0x56] black_start:0 black_end:2.04 black_duration:2.04
[freezedetect @ 0x57] lavfi.freezedetect.freeze_start: 10.01
[freezedetect @ 0x57] lavfi.freezedetect.freeze_duration: 3.003
[freezedetect @ 0x57] lavfi.freezedetect.freeze_end: 13.013
[blackdetect @ 0x56] black_start:20.5 black_end:23 black_duration:2.5
";
        let detections = parse_detections(stderr).unwrap();
        assert_eq!(detections.scenes, vec![0.4004, 5.005]);
        assert_eq!(
            detections.blacks,
            vec![
                BlackSegment { start: 0.0, duration: 2.04, end: 2.04 },
                BlackSegment { start: 20.5, duration: 2.5, end: 23.0 },
            ]
        );
        assert_eq!(
            detections.freezes,
            vec![FreezeSegment { start: 10.01, duration: 3.003, end: 13.013 }]
        );
    }

    #[test]
    fn interleaved_freeze_lines_pair_in_start_order() {
        let stderr = "\
lavfi.freezedetect.freeze_start: 1
lavfi.freezedetect.freeze_start: 8
lavfi.freezedetect.freeze_duration: 2
lavfi.freezedetect.freeze_end: 3
lavfi.freezedetect.freeze_duration: 4
lavfi.freezedetect.freeze_end: 12
";
        let detections = parse_detections(stderr).unwrap();
        assert_eq!(
            detections.freezes,
            vec![
                FreezeSegment { start: 1.0, duration: 2.0, end: 3.0 },
                FreezeSegment { start: 8.0, duration: 4.0, end: 12.0 },
            ]
        );
    }

    #[test]
    fn mismatched_freeze_lines_fail_loudly() {
        let orphan_end = "lavfi.freezedetect.freeze_end: 3\n";
        assert!(parse_detections(orphan_end).is_err());

        let unclosed = "lavfi.freezedetect.freeze_start: 1\nlavfi.freezedetect.freeze_duration: 2\n";
        assert!(parse_detections(unclosed).is_err());
    }
}
