pub mod extractor;
pub mod probe;
pub mod scene;

pub use extractor::MetadataExtractor;
pub use probe::{ProbeReport, classify, parse_report};
pub use scene::{Detections, SceneAnalyzer};
