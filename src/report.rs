use crate::{
    error::{ConversionError, ExportError},
    export::ExportFormat,
    orchestrator::RequestHandle,
};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExportOutcome {
    Success {
        files: Vec<PathBuf>,
    },
    Failure {
        reason: String,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        files: Vec<PathBuf>,
        #[serde(skip)]
        error: ExportError,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportResult {
    pub format: ExportFormat,
    pub destination: PathBuf,
    #[serde(flatten)]
    pub outcome: ExportOutcome,
}

impl ExportResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ExportOutcome::Success { .. })
    }

    /// Files on disk for this format; a partial tabular failure keeps the
    /// tables that were written.
    pub fn files(&self) -> &[PathBuf] {
        match &self.outcome {
            ExportOutcome::Success { files } | ExportOutcome::Failure { files, .. } => files,
        }
    }

    pub fn error(&self) -> Option<&ExportError> {
        match &self.outcome {
            ExportOutcome::Success { .. } => None,
            ExportOutcome::Failure { error, .. } => Some(error),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Done,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestReport {
    pub handle: RequestHandle,
    pub source: PathBuf,
    pub status: RequestStatus,
    pub page_count: usize,
    pub table_count: usize,
    pub exports: Vec<ExportResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Typed conversion failure behind `error`, when the request failed before exporting.
    #[serde(skip)]
    pub failure: Option<ConversionError>,
    pub started: String,
    pub finished: String,
}

impl RequestReport {
    pub fn failed_exports(&self) -> impl Iterator<Item = &ExportResult> {
        self.exports.iter().filter(|e| !e.is_success())
    }

    pub fn output_files(&self) -> impl Iterator<Item = &PathBuf> {
        self.exports.iter().flat_map(|e| e.files())
    }
}
