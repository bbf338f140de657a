use std::ffi::OsString;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::trace;

use crate::config::ThumbnailOptions;
use crate::error::Result;
use crate::fs::epoch_ms;
use crate::scan::actors::{ExtractedThumbnail, ScanJob, ThumbnailActor};
use crate::tools::ToolRunner;

const TEMP_PREFIX: &str = "mediascan-thumb-";

/// Extracts one representative frame as PNG through a temporary file.
#[derive(Debug, Clone)]
pub struct ThumbnailGenerator {
    runner: ToolRunner,
    options: ThumbnailOptions,
    temp_dir: Option<PathBuf>,
}

impl ThumbnailGenerator {
    pub fn new(runner: ToolRunner, options: ThumbnailOptions) -> Self {
        Self {
            runner,
            options,
            temp_dir: None,
        }
    }

    /// Place temporary files in `dir` instead of the system temp directory.
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    fn thumbnail_args(&self, input: &Path, output: &Path) -> Vec<OsString> {
        let scale = format!(
            "thumbnail,scale={}:{}",
            self.options.width, self.options.height
        );
        let mut args: Vec<OsString> = vec!["-hide_banner".into(), "-i".into()];
        args.push(input.as_os_str().to_os_string());
        args.extend(
            ["-frames:v", "1", "-vf", scale.as_str(), "-threads", "1", "-y"]
                .into_iter()
                .map(OsString::from),
        );
        args.push(output.as_os_str().to_os_string());
        args
    }
}

#[async_trait]
impl ThumbnailActor for ThumbnailGenerator {
    async fn generate(&self, job: &ScanJob) -> Result<ExtractedThumbnail> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(TEMP_PREFIX).suffix(".png");
        let temp = match &self.temp_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        // The path outlives the handle and is removed when dropped, error
        // paths included.
        let temp_path = temp.into_temp_path();

        self.runner
            .ffmpeg(self.thumbnail_args(&job.path, &temp_path))
            .await?;

        let md = tokio::fs::metadata(&temp_path).await?;
        let modified_ms = md.modified().map(epoch_ms).unwrap_or(0);
        let png = tokio::fs::read(&temp_path).await?;
        trace!(id = %job.id, bytes = png.len(), "Thumbnail extracted");

        temp_path.close()?;

        Ok(ExtractedThumbnail {
            size: md.len(),
            png,
            modified_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolOptions;
    use mediascan_model::RecordId;

    fn job() -> ScanJob {
        ScanJob {
            id: RecordId::new("CLIP"),
            path: PathBuf::from("/media/clip.mov"),
            size: 1,
            modified_ms: 1,
        }
    }

    fn leftovers(dir: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.file_name()
                    .is_some_and(|n| n.to_string_lossy().starts_with(TEMP_PREFIX))
            })
            .collect()
    }

    #[test]
    fn args_request_single_scaled_png_frame() {
        let generator = ThumbnailGenerator::new(
            ToolRunner::new(&ToolOptions::default()),
            ThumbnailOptions::default(),
        );
        let args = generator.thumbnail_args(Path::new("/media/a b.mov"), Path::new("/tmp/x.png"));
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            [
                "-hide_banner", "-i", "/media/a b.mov", "-frames:v", "1", "-vf",
                "thumbnail,scale=256:-1", "-threads", "1", "-y", "/tmp/x.png"
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn reads_frame_and_removes_temp_file() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let ffmpeg = dir.path().join("ffmpeg");
        // Last argument is the output path.
        std::fs::write(&ffmpeg, "#!/bin/sh\nfor last; do :; done\nprintf 'PNGDATA' > \"$last\"\n").unwrap();
        std::fs::set_permissions(&ffmpeg, std::fs::Permissions::from_mode(0o755)).unwrap();

        let scratch = dir.path().join("scratch");
        std::fs::create_dir(&scratch).unwrap();
        let generator = ThumbnailGenerator::new(
            ToolRunner::new(&ToolOptions {
                ffmpeg: ffmpeg.to_string_lossy().into_owned(),
                ..ToolOptions::default()
            }),
            ThumbnailOptions::default(),
        )
        .with_temp_dir(&scratch);

        let thumb = generator.generate(&job()).await.unwrap();
        assert_eq!(thumb.png, b"PNGDATA");
        assert_eq!(thumb.size, 7);
        assert!(thumb.modified_ms > 0);
        assert!(leftovers(&scratch).is_empty());
    }

    #[tokio::test]
    async fn failed_extraction_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let generator = ThumbnailGenerator::new(
            ToolRunner::new(&ToolOptions {
                ffmpeg: "mediascan-definitely-not-installed".to_string(),
                ..ToolOptions::default()
            }),
            ThumbnailOptions::default(),
        )
        .with_temp_dir(dir.path());

        assert!(generator.generate(&job()).await.is_err());
        assert!(leftovers(dir.path()).is_empty());
    }
}
