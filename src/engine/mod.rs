pub mod adapter;
pub mod docling;
pub mod python;

use crate::document::StructuredDocument;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub use adapter::{CancelToken, EngineAdapter, EngineState};

/// Something that can bring up a document-understanding session.
///
/// `load` is expensive (model download and construction) and is called at most
/// once per successful adapter lifetime; the returned session is driven from a
/// single thread at a time.
pub trait Engine: Send + Sync + 'static {
    type Session: EngineSession;

    fn doctor(&self) -> Result<EngineDiag>;
    fn load(&self) -> Result<Self::Session>;
}

pub trait EngineSession: Send + 'static {
    fn convert(&mut self, input: &Path) -> Result<StructuredDocument>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineDiag {
    pub python_exe: String,
    pub python_version: String,
    pub docling_version: Option<String>,
    pub models_dir: String,
    pub offline: bool,
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
}
