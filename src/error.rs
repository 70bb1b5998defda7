use std::path::PathBuf;
use thiserror::Error;

/// Failures while bringing the conversion engine up.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("engine load failed: {0}")]
    Load(String),

    #[error("engine load timed out after {0}s")]
    Timeout(u64),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConversionError {
    #[error("unreadable file {}: {reason}", path.display())]
    UnreadableFile { path: PathBuf, reason: String },

    #[error(transparent)]
    EngineUnavailable(#[from] EngineError),

    #[error("engine failure: {0}")]
    EngineFailure(String),

    #[error("conversion cancelled")]
    Cancelled,
}

impl ConversionError {
    pub fn unreadable(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::UnreadableFile {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExportError {
    #[error("cannot write {}: {reason}", path.display())]
    WriteFailure { path: PathBuf, reason: String },

    #[error("unsupported content: {0}")]
    UnsupportedContent(String),

    #[error("encoding failed: {0}")]
    Encode(String),

    /// Some tables could not be written; the others were.
    #[error("{} of {total} table(s) failed: {}", .failed.len(), .failed.join("; "))]
    TablesFailed {
        total: usize,
        failed: Vec<String>,
        written: Vec<PathBuf>,
    },
}

impl ExportError {
    /// Files that were written before or despite the failure.
    pub fn written(&self) -> &[PathBuf] {
        match self {
            Self::TablesFailed { written, .. } => written,
            _ => &[],
        }
    }

    pub fn write(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Self::WriteFailure {
            path: path.into(),
            reason: err.to_string(),
        }
    }
}

/// Reasons a request is refused before it is queued.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    #[error("no export formats requested")]
    NoFormats,

    #[error(transparent)]
    Rejected(#[from] ConversionError),

    #[error("conversion worker has shut down")]
    ShutDown,
}
