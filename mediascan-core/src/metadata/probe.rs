//! `ffprobe` report parsing and clip classification.

use std::ffi::OsString;
use std::path::Path;

use mediascan_model::{ClipSummary, ClipType, CodecInfo, FormatInfo, StreamInfo, Timebase};
use serde::{Deserialize, Deserializer};

use crate::error::{MediaError, Result};

/// Anything at or below this many seconds is a still image.
pub const STILL_MAX_DURATION: f64 = 1.0 / 24.0;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProbeReport {
    #[serde(default)]
    pub streams: Vec<ProbeStream>,
    #[serde(default)]
    pub format: ProbeFormat,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProbeStream {
    pub codec_long_name: Option<String>,
    pub codec_type: Option<String>,
    pub codec_time_base: Option<String>,
    pub codec_tag_string: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub is_avc: Option<String>,

    pub width: Option<u32>,
    pub height: Option<u32>,
    pub sample_aspect_ratio: Option<String>,
    pub display_aspect_ratio: Option<String>,
    pub pix_fmt: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub bits_per_raw_sample: Option<String>,

    pub sample_fmt: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub sample_rate: Option<String>,
    pub channels: Option<u32>,
    pub channel_layout: Option<String>,
    pub bits_per_sample: Option<u32>,

    pub r_frame_rate: Option<String>,
    pub avg_frame_rate: Option<String>,
    pub time_base: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub start_time: Option<String>,
    pub duration_ts: Option<i64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub duration: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub bit_rate: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub max_bit_rate: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub nb_frames: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProbeFormat {
    pub format_name: Option<String>,
    pub format_long_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub size: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub start_time: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub duration: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub bit_rate: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub max_bit_rate: Option<String>,
}

/// ffprobe prints most numbers as strings, but not consistently across
/// versions. Accept either.
fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(
        match Option::<serde_json::Value>::deserialize(deserializer)? {
            Some(serde_json::Value::String(s)) => Some(s),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            Some(serde_json::Value::Bool(b)) => Some(b.to_string()),
            _ => None,
        },
    )
}

pub fn probe_args(path: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-hide_banner".into(), "-i".into()];
    args.push(path.as_os_str().to_os_string());
    args.extend(
        ["-show_streams", "-show_format", "-print_format", "json"]
            .into_iter()
            .map(OsString::from),
    );
    args
}

/// Parse ffprobe's JSON output. A report without streams is not media.
pub fn parse_report(stdout: &[u8]) -> Result<ProbeReport> {
    let report: ProbeReport = serde_json::from_slice(stdout)
        .map_err(|e| MediaError::InvalidMedia(format!("unparseable ffprobe output: {e}")))?;
    if report.streams.is_empty() {
        return Err(MediaError::NotMedia("probe reported no streams".to_string()));
    }
    Ok(report)
}

/// Fraction with both parts non-zero.
fn usable_fraction(value: Option<&str>) -> Option<(u64, u64)> {
    Timebase::parse_fraction(value?).filter(|(num, den)| *num > 0 && *den > 0)
}

/// Container duration in seconds, falling back to one frame at 24 fps.
pub fn duration_seconds(format: &ProbeFormat) -> f64 {
    format
        .duration
        .as_deref()
        .and_then(|raw| raw.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs != 0.0)
        .unwrap_or(STILL_MAX_DURATION)
}

/// Decide the clip type, timebase and length in frames from the first
/// stream and the container duration.
///
/// Rates or time bases with a zero part (ffprobe prints `0/0` for unknown)
/// are skipped: `avg_frame_rate`, then `r_frame_rate`, then the stream
/// `time_base`, then 1/25. A zero timebase is never produced.
pub fn classify(report: &ProbeReport) -> Result<ClipSummary> {
    let primary = report
        .streams
        .first()
        .ok_or_else(|| MediaError::NotMedia("probe reported no streams".to_string()))?;
    let duration = duration_seconds(&report.format);

    let mut timebase = usable_fraction(primary.time_base.as_deref())
        .map(|(num, den)| Timebase::new(num, den))
        .unwrap_or(Timebase::PAL);

    let clip_type = if primary.pix_fmt.is_some() {
        let rate = usable_fraction(primary.avg_frame_rate.as_deref())
            .or_else(|| usable_fraction(primary.r_frame_rate.as_deref()));
        if let Some((fps_num, fps_den)) = rate {
            timebase = Timebase::new(fps_den, fps_num);
        }
        if duration <= STILL_MAX_DURATION {
            ClipType::Still
        } else {
            ClipType::Movie
        }
    } else {
        ClipType::Audio
    };

    Ok(ClipSummary {
        clip_type,
        duration_frames: timebase.frames_in(duration),
        timebase,
    })
}

impl From<&ProbeStream> for StreamInfo {
    fn from(s: &ProbeStream) -> Self {
        StreamInfo {
            codec: CodecInfo {
                long_name: s.codec_long_name.clone(),
                kind: s.codec_type.clone(),
                time_base: s.codec_time_base.clone(),
                tag_string: s.codec_tag_string.clone(),
                is_avc: s.is_avc.clone(),
            },
            width: s.width,
            height: s.height,
            sample_aspect_ratio: s.sample_aspect_ratio.clone(),
            display_aspect_ratio: s.display_aspect_ratio.clone(),
            pix_fmt: s.pix_fmt.clone(),
            bits_per_raw_sample: s.bits_per_raw_sample.clone(),
            sample_fmt: s.sample_fmt.clone(),
            sample_rate: s.sample_rate.clone(),
            channels: s.channels,
            channel_layout: s.channel_layout.clone(),
            bits_per_sample: s.bits_per_sample,
            time_base: s.time_base.clone(),
            start_time: s.start_time.clone(),
            duration_ts: s.duration_ts,
            duration: s.duration.clone(),
            bit_rate: s.bit_rate.clone(),
            max_bit_rate: s.max_bit_rate.clone(),
            nb_frames: s.nb_frames.clone(),
        }
    }
}

impl From<&ProbeFormat> for FormatInfo {
    fn from(f: &ProbeFormat) -> Self {
        FormatInfo {
            name: f.format_name.clone(),
            long_name: f.format_long_name.clone(),
            size: f.size.clone(),
            start_time: f.start_time.clone(),
            duration: f.duration.clone(),
            bit_rate: f.bit_rate.clone(),
            max_bit_rate: f.max_bit_rate.clone(),
        }
    }
}
