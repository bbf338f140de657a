use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::record_id::RecordId;

/// Interlacing classification produced by the field-order scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldOrder {
    Progressive,
    Tff,
    Bff,
    #[default]
    Unknown,
}

impl FieldOrder {
    /// Classify from the multi-frame idet counters. Both counters at or below
    /// ten means progressive, otherwise the larger one wins.
    pub fn from_counts(tff: u64, bff: u64) -> Self {
        if tff <= 10 && bff <= 10 {
            FieldOrder::Progressive
        } else if tff > bff {
            FieldOrder::Tff
        } else {
            FieldOrder::Bff
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldOrder::Progressive => "progressive",
            FieldOrder::Tff => "tff",
            FieldOrder::Bff => "bff",
            FieldOrder::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FieldOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A run of black frames, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlackSegment {
    pub start: f64,
    pub duration: f64,
    pub end: f64,
}

/// A run of frozen frames, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FreezeSegment {
    pub start: f64,
    pub duration: f64,
    pub end: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CodecInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub long_name: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_base: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag_string: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_avc: Option<String>,
}

/// Per-stream technical details copied from the prober report.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StreamInfo {
    pub codec: CodecInfo,

    // Video
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_aspect_ratio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_aspect_ratio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pix_fmt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bits_per_raw_sample: Option<String>,

    // Audio
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_fmt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_layout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bits_per_sample: Option<u32>,

    // Common
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_base: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ts: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bit_rate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_bit_rate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nb_frames: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FormatInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub long_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bit_rate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_bit_rate: Option<String>,
}

/// Extended metadata stored under `mediainfo`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub name: RecordId,
    pub path: PathBuf,
    pub size: u64,
    pub time: i64,
    pub field_order: FieldOrder,
    #[serde(default)]
    pub scenes: Vec<f64>,
    #[serde(default)]
    pub freezes: Vec<FreezeSegment>,
    #[serde(default)]
    pub blacks: Vec<BlackSegment>,
    #[serde(default)]
    pub streams: Vec<StreamInfo>,
    #[serde(default)]
    pub format: FormatInfo,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_order_thresholds() {
        assert_eq!(FieldOrder::from_counts(10, 10), FieldOrder::Progressive);
        assert_eq!(FieldOrder::from_counts(0, 3), FieldOrder::Progressive);
        assert_eq!(FieldOrder::from_counts(11, 4), FieldOrder::Tff);
        assert_eq!(FieldOrder::from_counts(4, 11), FieldOrder::Bff);
        // Ties above the threshold fall to bff.
        assert_eq!(FieldOrder::from_counts(50, 50), FieldOrder::Bff);
    }

    #[test]
    fn field_order_serializes_lowercase() {
        let json = serde_json::to_string(&FieldOrder::Tff).unwrap();
        assert_eq!(json, "\"tff\"");
    }
}
