//! Single-line `cinf`/`tinf` summaries.
//!
//! Both lines are space separated, CRLF terminated and start with the quoted
//! record id. Consumers of the legacy media protocol parse them verbatim, so
//! the layout here must not drift:
//!
//! ```text
//! "CLIP1" MOVIE 12345 20240101120000 149 1001/30000\r\n
//! "CLIP1" 20240101T120000 5120\r\n
//! ```

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Local, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};
use crate::record::MediaRecord;
use crate::record_id::RecordId;

const CINF_TIME_FORMAT: &str = "%Y%m%d%H%M%S";
const TINF_TIME_FORMAT: &str = "%Y%m%dT%H%M%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ClipType {
    Still,
    Movie,
    Audio,
}

impl ClipType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClipType::Still => "STILL",
            ClipType::Movie => "MOVIE",
            ClipType::Audio => "AUDIO",
        }
    }
}

impl fmt::Display for ClipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClipType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "STILL" => Ok(ClipType::Still),
            "MOVIE" => Ok(ClipType::Movie),
            "AUDIO" => Ok(ClipType::Audio),
            other => Err(ModelError::MalformedSummary(other.to_string())),
        }
    }
}

/// Duration of one tick, `num/den` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timebase {
    pub num: u64,
    pub den: u64,
}

impl Timebase {
    /// 25 fps.
    pub const PAL: Timebase = Timebase { num: 1, den: 25 };

    pub const fn new(num: u64, den: u64) -> Self {
        Self { num, den }
    }

    /// Parse a `num/den` pair. Returns `None` for anything that is not two
    /// unsigned integers separated by `/`.
    pub fn parse_fraction(value: &str) -> Option<(u64, u64)> {
        let (num, den) = value.trim().split_once('/')?;
        Some((num.trim().parse().ok()?, den.trim().parse().ok()?))
    }

    /// Number of whole ticks in `seconds`, or 0 when the result is not a
    /// finite number.
    pub fn frames_in(&self, seconds: f64) -> u64 {
        let frames = (seconds * self.den as f64 / self.num as f64).floor();
        if frames.is_finite() && frames >= 0.0 {
            frames as u64
        } else {
            0
        }
    }
}

impl fmt::Display for Timebase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

impl FromStr for Timebase {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        Timebase::parse_fraction(s)
            .map(|(num, den)| Timebase::new(num, den))
            .ok_or_else(|| ModelError::MalformedSummary(s.to_string()))
    }
}

/// Classification result that feeds the `cinf` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipSummary {
    pub clip_type: ClipType,
    pub duration_frames: u64,
    pub timebase: Timebase,
}

/// Convert epoch milliseconds into local wall-clock time.
pub fn local_time(epoch_ms: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp_millis(epoch_ms)
        .map(|utc| utc.with_timezone(&Local).naive_local())
}

pub fn encode_cinf(
    id: &RecordId,
    summary: &ClipSummary,
    size: u64,
    changed: NaiveDateTime,
) -> String {
    format!(
        "\"{}\" {} {} {} {} {}\r\n",
        id,
        summary.clip_type,
        size,
        changed.format(CINF_TIME_FORMAT),
        summary.duration_frames,
        summary.timebase
    )
}

pub fn encode_tinf(id: &RecordId, time: NaiveDateTime, size: u64) -> String {
    format!("\"{}\" {} {}\r\n", id, time.format(TINF_TIME_FORMAT), size)
}

/// Fields recovered from a `cinf` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CinfLine {
    pub id: RecordId,
    pub clip_type: ClipType,
    pub size: u64,
    pub changed: String,
    pub duration: u64,
    pub timebase: Timebase,
}

impl FromStr for CinfLine {
    type Err = ModelError;

    fn from_str(line: &str) -> Result<Self> {
        let malformed = || ModelError::MalformedSummary(line.to_string());
        let (id, rest) = split_quoted_id(line).ok_or_else(malformed)?;
        let fields: Vec<&str> = rest.split_whitespace().collect();
        let [clip_type, size, changed, duration, timebase] = fields.as_slice()
        else {
            return Err(malformed());
        };

        Ok(Self {
            id,
            clip_type: clip_type.parse()?,
            size: size.parse().map_err(|_| malformed())?,
            changed: changed.to_string(),
            duration: duration.parse().map_err(|_| malformed())?,
            timebase: timebase.parse()?,
        })
    }
}

/// Split `"ID" rest` into the id and the remainder.
fn split_quoted_id(line: &str) -> Option<(RecordId, &str)> {
    let body = line.trim_end_matches(['\r', '\n']).strip_prefix('"')?;
    let close = body.rfind('"')?;
    Some((RecordId::new(&body[..close]), &body[close + 1..]))
}

/// Consumer view of a record, decoded from its `cinf`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaSummary {
    pub id: RecordId,
    pub file: PathBuf,
    pub time: i64,
    pub size: u64,
    #[serde(rename = "type")]
    pub clip_type: ClipType,
    pub changed: String,
    pub duration: u64,
    pub timebase: Timebase,
}

impl MediaSummary {
    pub fn from_record(record: &MediaRecord) -> Result<Self> {
        let cinf: CinfLine = record
            .cinf
            .as_deref()
            .ok_or(ModelError::MissingField("cinf"))?
            .parse()?;

        Ok(Self {
            id: record.id.clone(),
            file: record
                .media_path
                .clone()
                .ok_or(ModelError::MissingField("mediaPath"))?,
            time: record.media_time.ok_or(ModelError::MissingField("mediaTime"))?,
            size: record.media_size.ok_or(ModelError::MissingField("mediaSize"))?,
            clip_type: cinf.clip_type,
            changed: cinf.changed,
            duration: cinf.duration,
            timebase: cinf.timebase,
        })
    }
}

/// Consumer view of a record's thumbnail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThumbnailSummary {
    pub id: RecordId,
    pub path: String,
    pub time: i64,
    pub size: u64,
}

impl ThumbnailSummary {
    pub fn from_record(record: &MediaRecord) -> Result<Self> {
        Ok(Self {
            id: record.id.clone(),
            path: record.id.thumbnail_path(),
            time: record.thumb_time.ok_or(ModelError::MissingField("thumbTime"))?,
            size: record.thumb_size.ok_or(ModelError::MissingField("thumbSize"))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn noon() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .and_then(|d| d.and_hms_opt(12, 0, 0))
            .unwrap()
    }

    #[test]
    fn cinf_matches_protocol_byte_for_byte() {
        let summary = ClipSummary {
            clip_type: ClipType::Movie,
            duration_frames: 149,
            timebase: Timebase::new(1001, 30000),
        };
        let line = encode_cinf(&RecordId::new("CLIP1"), &summary, 12345, noon());
        assert_eq!(line, "\"CLIP1\" MOVIE 12345 20240101120000 149 1001/30000\r\n");
    }

    #[test]
    fn tinf_matches_protocol_byte_for_byte() {
        let line = encode_tinf(&RecordId::new("CLIP1"), noon(), 5120);
        assert_eq!(line, "\"CLIP1\" 20240101T120000 5120\r\n");
    }

    #[test]
    fn frames_floor_and_degenerate_timebases() {
        assert_eq!(Timebase::new(1001, 30000).frames_in(5.0), 149);
        assert_eq!(Timebase::PAL.frames_in(1.0 / 24.0), 1);
        assert_eq!(Timebase::new(0, 0).frames_in(5.0), 0);
        assert_eq!(Timebase::new(0, 25).frames_in(5.0), 0);
    }

    #[test]
    fn cinf_decodes_back_into_summary() {
        let mut record = MediaRecord::new(RecordId::new("SHOW/EP 01"));
        record.media_path = Some(PathBuf::from("/media/show/ep 01.mov"));
        record.media_time = Some(1_700_000_000_000);
        record.media_size = Some(12345);
        record.cinf =
            Some("\"SHOW/EP 01\" STILL 12345 20240101120000 1 1/25\r\n".to_string());

        let summary = MediaSummary::from_record(&record).unwrap();
        assert_eq!(summary.clip_type, ClipType::Still);
        assert_eq!(summary.changed, "20240101120000");
        assert_eq!(summary.duration, 1);
        assert_eq!(summary.timebase, Timebase::PAL);
        assert_eq!(summary.file, PathBuf::from("/media/show/ep 01.mov"));
    }

    #[test]
    fn malformed_cinf_is_rejected() {
        assert!("\"A\" MOVIE 1 2".parse::<CinfLine>().is_err());
        assert!("A MOVIE 1 2 3 1/25".parse::<CinfLine>().is_err());
        assert!("\"A\" VIDEO 1 2 3 1/25".parse::<CinfLine>().is_err());
    }

    #[test]
    fn thumbnail_summary_requires_thumbnail_fields() {
        let mut record = MediaRecord::new(RecordId::new("CLIP1"));
        assert_eq!(
            ThumbnailSummary::from_record(&record),
            Err(ModelError::MissingField("thumbTime"))
        );
        record.thumb_time = Some(10);
        record.thumb_size = Some(20);
        let thumb = ThumbnailSummary::from_record(&record).unwrap();
        assert_eq!(thumb.path, "thumbnail/CLIP1.png");
        assert_eq!(thumb.size, 20);
    }
}
