//! Core data model definitions shared across mediascan crates.
#![allow(missing_docs)]

pub mod error;
pub mod media_info;
pub mod record;
pub mod record_id;
pub mod summary;

pub use error::{ModelError, Result as ModelResult};
pub use media_info::{
    BlackSegment, CodecInfo, FieldOrder, FormatInfo, FreezeSegment, MediaInfo,
    StreamInfo,
};
pub use record::{
    Attachment, MediaRecord, THUMBNAIL_ATTACHMENT, THUMBNAIL_CONTENT_TYPE,
};
pub use record_id::{RecordId, is_within_root, normalize_lexically};
pub use summary::{
    CinfLine, ClipSummary, ClipType, MediaSummary, ThumbnailSummary, Timebase,
    encode_cinf, encode_tinf, local_time,
};
