use std::fmt::{self, Display};
use std::path::PathBuf;

/// Errors produced by model constructors and summary-line parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// The path does not live below the configured media root.
    OutsideRoot { root: PathBuf, path: PathBuf },
    /// Normalization produced an empty identifier (the path is the root).
    EmptyId(PathBuf),
    /// A cinf/tinf line could not be decoded.
    MalformedSummary(String),
    /// The record is missing a field required for the requested view.
    MissingField(&'static str),
}

impl Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::OutsideRoot { root, path } => write!(
                f,
                "{} is not inside media root {}",
                path.display(),
                root.display()
            ),
            ModelError::EmptyId(path) => {
                write!(f, "{} normalizes to an empty record id", path.display())
            }
            ModelError::MalformedSummary(line) => {
                write!(f, "malformed summary line: {line:?}")
            }
            ModelError::MissingField(field) => {
                write!(f, "record has no {field}")
            }
        }
    }
}

impl std::error::Error for ModelError {}

pub type Result<T> = std::result::Result<T, ModelError>;
