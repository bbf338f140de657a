use async_trait::async_trait;
use mediascan_model::{FormatInfo, MediaInfo, StreamInfo};
use tracing::warn;

use super::probe::{self, ProbeReport};
use super::scene::SceneAnalyzer;
use crate::config::MetadataOptions;
use crate::error::Result;
use crate::scan::actors::{ExtractedInfo, InfoActor, ScanJob};
use crate::tools::ToolRunner;

/// Probes a file with ffprobe, classifies it and, when enabled, assembles
/// the extended `mediainfo` report.
#[derive(Debug, Clone)]
pub struct MetadataExtractor {
    runner: ToolRunner,
    scenes: SceneAnalyzer,
    options: MetadataOptions,
}

impl MetadataExtractor {
    pub fn new(runner: ToolRunner, options: MetadataOptions) -> Self {
        let scenes = SceneAnalyzer::new(runner.clone(), options.clone());
        Self {
            runner,
            scenes,
            options,
        }
    }

    pub async fn probe(&self, job: &ScanJob) -> Result<ProbeReport> {
        let output = self.runner.ffprobe(probe::probe_args(&job.path)).await?;
        probe::parse_report(&output.stdout)
    }

    async fn mediainfo(&self, job: &ScanJob, report: &ProbeReport) -> Result<MediaInfo> {
        let (field_order, detections) = tokio::try_join!(
            self.scenes.field_order(&job.path),
            self.scenes.detect(&job.path)
        )?;

        Ok(MediaInfo {
            name: job.id.clone(),
            path: job.path.clone(),
            size: job.size,
            time: job.modified_ms,
            field_order,
            scenes: detections.scenes,
            freezes: detections.freezes,
            blacks: detections.blacks,
            streams: report.streams.iter().map(StreamInfo::from).collect(),
            format: FormatInfo::from(&report.format),
        })
    }
}

#[async_trait]
impl InfoActor for MetadataExtractor {
    async fn extract(&self, job: &ScanJob) -> Result<ExtractedInfo> {
        let report = self.probe(job).await?;
        let summary = probe::classify(&report)?;

        let mediainfo = if self.options.enabled {
            match self.mediainfo(job, &report).await {
                Ok(info) => Some(info),
                Err(err) => {
                    warn!(id = %job.id, path = %job.path.display(), error = %err, "Mediainfo Failed");
                    None
                }
            }
        } else {
            None
        };

        Ok(ExtractedInfo { summary, mediainfo })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    use mediascan_model::{ClipType, FieldOrder, RecordId, Timebase};

    use super::*;
    use crate::config::ToolOptions;
    use crate::error::MediaError;

    fn fake_tool(dir: &Path, name: &str, body: &str) -> String {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn job() -> ScanJob {
        ScanJob {
            id: RecordId::new("SHOW/EP01"),
            path: PathBuf::from("/media/show/ep01.mov"),
            size: 12345,
            modified_ms: 1_700_000_000_000,
        }
    }

    #[tokio::test]
    async fn extracts_summary_and_mediainfo_from_tool_output() {
        let dir = tempfile::tempdir().unwrap();
        let ffprobe = fake_tool(
            dir.path(),
            "ffprobe",
            r#"cat <<'JSON'
{"streams":[{"codec_type":"video","pix_fmt":"yuv420p","avg_frame_rate":"30000/1001","width":1920}],
 "format":{"format_name":"mov","duration":"5.0","size":"12345"}}
JSON"#,
        );
        let ffmpeg = fake_tool(
            dir.path(),
            "ffmpeg",
            r#"echo "[blackdetect @ 0x1] black_start:0 black_end:2 black_duration:2" >&2"#,
        );
        let runner = ToolRunner::new(&ToolOptions {
            ffmpeg,
            ffprobe,
            ..ToolOptions::default()
        });
        let options = MetadataOptions {
            scenes: false,
            ..MetadataOptions::default()
        };

        let extracted = MetadataExtractor::new(runner, options).extract(&job()).await.unwrap();
        assert_eq!(extracted.summary.clip_type, ClipType::Movie);
        assert_eq!(extracted.summary.timebase, Timebase::new(1001, 30000));
        assert_eq!(extracted.summary.duration_frames, 149);

        let info = extracted.mediainfo.unwrap();
        assert_eq!(info.name, RecordId::new("SHOW/EP01"));
        assert_eq!(info.field_order, FieldOrder::Unknown);
        assert_eq!(info.blacks.len(), 1);
        assert_eq!(info.streams[0].width, Some(1920));
        assert_eq!(info.format.size.as_deref(), Some("12345"));
    }

    #[tokio::test]
    async fn failing_detection_keeps_summary() {
        let dir = tempfile::tempdir().unwrap();
        let ffprobe = fake_tool(
            dir.path(),
            "ffprobe",
            r#"echo '{"streams":[{"codec_type":"audio"}],"format":{"duration":"1"}}'"#,
        );
        let ffmpeg = fake_tool(dir.path(), "ffmpeg", "exit 1");
        let runner = ToolRunner::new(&ToolOptions {
            ffmpeg,
            ffprobe,
            ..ToolOptions::default()
        });

        let extracted = MetadataExtractor::new(runner, MetadataOptions::default())
            .extract(&job())
            .await
            .unwrap();
        assert_eq!(extracted.summary.clip_type, ClipType::Audio);
        assert!(extracted.mediainfo.is_none());
    }

    #[tokio::test]
    async fn streamless_probe_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ffprobe = fake_tool(dir.path(), "ffprobe", r#"echo '{"streams":[],"format":{}}'"#);
        let runner = ToolRunner::new(&ToolOptions {
            ffprobe,
            ..ToolOptions::default()
        });

        let err = MetadataExtractor::new(runner, MetadataOptions::default())
            .extract(&job())
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::NotMedia(_)));
    }
}
