use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::media_info::MediaInfo;
use crate::record_id::RecordId;

/// Name of the attachment holding the extracted still.
pub const THUMBNAIL_ATTACHMENT: &str = "thumb.png";

/// Content type of [`THUMBNAIL_ATTACHMENT`].
pub const THUMBNAIL_CONTENT_TYPE: &str = "image/png";

/// Binary blob stored alongside a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub content_type: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

/// One indexed media file.
///
/// Field names on the wire follow the document layout existing consumers
/// already read (`_id`, `mediaPath`, `cinf`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRecord {
    #[serde(rename = "_id")]
    pub id: RecordId,
    /// Store revision this copy was read at; `None` for unsaved records.
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_size: Option<u64>,
    /// Modification time of the source file, epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_time: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cinf: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mediainfo: Option<MediaInfo>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumb_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumb_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tinf: Option<String>,

    #[serde(
        rename = "_attachments",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub attachments: BTreeMap<String, Attachment>,
}

impl MediaRecord {
    /// Fresh, unsaved record keyed by `id`.
    pub fn new(id: RecordId) -> Self {
        Self {
            id,
            revision: None,
            media_path: None,
            media_size: None,
            media_time: None,
            cinf: None,
            mediainfo: None,
            thumb_size: None,
            thumb_time: None,
            tinf: None,
            attachments: BTreeMap::new(),
        }
    }

    /// True when the record was computed from a file with this size and
    /// modification time.
    pub fn matches_stat(&self, size: u64, modified_ms: i64) -> bool {
        self.media_size == Some(size) && self.media_time == Some(modified_ms)
    }

    /// True when the record already belongs to a different source file.
    pub fn conflicts_with(&self, path: &Path) -> bool {
        self.media_path
            .as_deref()
            .is_some_and(|stored| stored != path)
    }

    pub fn thumbnail(&self) -> Option<&Attachment> {
        self.attachments.get(THUMBNAIL_ATTACHMENT)
    }

    pub fn set_thumbnail(&mut self, data: Vec<u8>) {
        self.attachments.insert(
            THUMBNAIL_ATTACHMENT.to_string(),
            Attachment {
                content_type: THUMBNAIL_CONTENT_TYPE.to_string(),
                data,
            },
        );
    }
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &[u8],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stat_match_requires_both_fields() {
        let mut record = MediaRecord::new(RecordId::new("A"));
        assert!(!record.matches_stat(10, 5));
        record.media_size = Some(10);
        assert!(!record.matches_stat(10, 5));
        record.media_time = Some(5);
        assert!(record.matches_stat(10, 5));
        assert!(!record.matches_stat(10, 6));
    }

    #[test]
    fn conflict_only_for_different_stored_path() {
        let mut record = MediaRecord::new(RecordId::new("A"));
        assert!(!record.conflicts_with(Path::new("/media/a.mov")));
        record.media_path = Some(PathBuf::from("/media/a.mov"));
        assert!(!record.conflicts_with(Path::new("/media/a.mov")));
        assert!(record.conflicts_with(Path::new("/media/A.mp4")));
    }

    #[test]
    fn document_layout_uses_legacy_keys() {
        let mut record = MediaRecord::new(RecordId::new("CLIP"));
        record.media_path = Some(PathBuf::from("/media/clip.mov"));
        record.media_size = Some(42);
        record.set_thumbnail(vec![0x89, b'P', b'N', b'G']);

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["_id"], "CLIP");
        assert_eq!(value["mediaPath"], "/media/clip.mov");
        assert_eq!(value["mediaSize"], 42);
        assert!(value.get("_rev").is_none());
        assert_eq!(value["_attachments"]["thumb.png"]["content_type"], "image/png");

        let back: MediaRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back.thumbnail().map(|a| a.data.clone()), Some(vec![0x89, b'P', b'N', b'G']));
    }
}
