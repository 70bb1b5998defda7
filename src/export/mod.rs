//! Export pipeline: one encoder per output format.
//!
//! Encoders only read the `StructuredDocument`, so several formats of the same
//! document can be written at once (`Exporter::export_all`).

pub mod html;
pub mod json;
pub mod markdown;
pub mod tabular;
pub mod xlsx;

use crate::{
    config::{Config, Postprocess},
    document::StructuredDocument,
    error::ExportError,
    report::{ExportOutcome, ExportResult},
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    /// Full document tree as JSON.
    Structured,
    /// Markdown.
    PlainText,
    /// One CSV (and optionally XLSX) file per detected table.
    Tabular,
    /// Standalone HTML page.
    Markup,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 4] = [
        ExportFormat::Structured,
        ExportFormat::PlainText,
        ExportFormat::Tabular,
        ExportFormat::Markup,
    ];

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Structured => "json",
            ExportFormat::PlainText => "md",
            ExportFormat::Tabular => "csv",
            ExportFormat::Markup => "html",
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            ExportFormat::Structured => "structured",
            ExportFormat::PlainText => "plain_text",
            ExportFormat::Tabular => "tabular",
            ExportFormat::Markup => "markup",
        }
    }

    /// `<dir>/<stem>.<ext>`; for tabular this is the base the per-table names derive from.
    pub fn destination(self, dir: &Path, stem: &str) -> PathBuf {
        dir.join(format!("{stem}.{}", self.extension()))
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" | "structured" => Ok(ExportFormat::Structured),
            "markdown" | "md" | "plain_text" | "text" => Ok(ExportFormat::PlainText),
            "csv" | "xlsx" | "excel" | "tabular" => Ok(ExportFormat::Tabular),
            "html" | "markup" => Ok(ExportFormat::Markup),
            other => Err(format!("unknown export format: {other}")),
        }
    }
}

/// Parses format tags, dropping duplicates while keeping first-seen order.
pub fn parse_formats<S: AsRef<str>>(tags: &[S]) -> Result<Vec<ExportFormat>, String> {
    let mut out = Vec::new();
    for tag in tags {
        let f: ExportFormat = tag.as_ref().parse()?;
        if !out.contains(&f) {
            out.push(f);
        }
    }
    Ok(out)
}

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub json_indent: usize,
    pub tabular_csv: bool,
    pub tabular_xlsx: bool,
    pub html_max_width_px: u32,
    pub postprocess: Postprocess,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl ExportOptions {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            json_indent: cfg.export.json_indent,
            tabular_csv: cfg.export.tabular_csv,
            tabular_xlsx: cfg.export.tabular_xlsx,
            html_max_width_px: cfg.export.html_max_width_px,
            postprocess: cfg.postprocess.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Exporter {
    opts: ExportOptions,
}

impl Exporter {
    pub fn new(opts: ExportOptions) -> Self {
        Self { opts }
    }

    pub fn options(&self) -> &ExportOptions {
        &self.opts
    }

    /// Writes `doc` as `format` to `destination` and returns every file produced.
    ///
    /// Tabular output derives one file per table from the destination stem
    /// (`doc.csv` -> `doc_table_1.csv`, ...); a document without tables yields
    /// an empty list. A table that cannot be written does not stop the others;
    /// the export then fails with `TablesFailed`, which still lists the files
    /// that were written.
    pub fn export(
        &self,
        doc: &StructuredDocument,
        format: ExportFormat,
        destination: &Path,
    ) -> Result<Vec<PathBuf>, ExportError> {
        debug!("export {format} -> {}", destination.display());
        match format {
            ExportFormat::Structured => {
                let bytes = json::encode(doc, self.opts.json_indent)?;
                write_file(destination, &bytes)?;
                Ok(vec![destination.to_path_buf()])
            }
            ExportFormat::PlainText => {
                let text = markdown::encode(doc, &self.opts.postprocess)?;
                write_file(destination, text.as_bytes())?;
                Ok(vec![destination.to_path_buf()])
            }
            ExportFormat::Markup => {
                let title = page_title(doc, destination);
                let page = html::encode(doc, &title, self.opts.html_max_width_px)?;
                write_file(destination, page.as_bytes())?;
                Ok(vec![destination.to_path_buf()])
            }
            ExportFormat::Tabular => self.export_tables(doc, destination),
        }
    }

    fn export_tables(
        &self,
        doc: &StructuredDocument,
        destination: &Path,
    ) -> Result<Vec<PathBuf>, ExportError> {
        if doc.tables.is_empty() {
            debug!("no tables detected; tabular export is empty");
            return Ok(Vec::new());
        }
        let dir = destination.parent().unwrap_or_else(|| Path::new("."));
        let stem = file_stem(destination);
        let mut written = Vec::new();
        let mut failed = Vec::new();
        for (i, table) in doc.tables.iter().enumerate() {
            // Built as a whole name: the stem may itself contain dots.
            let name = |ext: &str| dir.join(format!("{stem}_table_{}.{ext}", i + 1));
            if self.opts.tabular_csv {
                let path = name("csv");
                match tabular::encode_csv(table).and_then(|bytes| write_file(&path, &bytes)) {
                    Ok(()) => written.push(path),
                    Err(err) => failed.push(format!("table {} csv: {err}", i + 1)),
                }
            }
            if self.opts.tabular_xlsx {
                let path = name("xlsx");
                match xlsx::encode(table).and_then(|bytes| write_file(&path, &bytes)) {
                    Ok(()) => written.push(path),
                    Err(err) => failed.push(format!("table {} xlsx: {err}", i + 1)),
                }
            }
        }
        if failed.is_empty() {
            Ok(written)
        } else {
            for f in &failed {
                warn!("skipped {f}");
            }
            Err(ExportError::TablesFailed {
                total: doc.tables.len(),
                failed,
                written,
            })
        }
    }

    /// Exports every format independently, in parallel; one result per format,
    /// in the order given. A failing format never stops its siblings.
    pub fn export_all(
        &self,
        doc: &StructuredDocument,
        formats: &[ExportFormat],
        dir: &Path,
        stem: &str,
    ) -> Vec<ExportResult> {
        self.export_all_with(doc, formats, dir, stem, |_| {})
    }

    /// Like `export_all`, calling `on_result` from the exporting thread as each
    /// format finishes.
    pub fn export_all_with<F>(
        &self,
        doc: &StructuredDocument,
        formats: &[ExportFormat],
        dir: &Path,
        stem: &str,
        on_result: F,
    ) -> Vec<ExportResult>
    where
        F: Fn(&ExportResult) + Sync,
    {
        formats
            .par_iter()
            .map(|&format| {
                let result = self.export_one(doc, format, dir, stem);
                on_result(&result);
                result
            })
            .collect()
    }

    pub fn export_one(
        &self,
        doc: &StructuredDocument,
        format: ExportFormat,
        dir: &Path,
        stem: &str,
    ) -> ExportResult {
        let destination = format.destination(dir, stem);
        let outcome = match self.export(doc, format, &destination) {
            Ok(files) => {
                info!("exported {format}: {} file(s)", files.len());
                ExportOutcome::Success { files }
            }
            Err(err) => {
                warn!("export {format} failed: {err}");
                ExportOutcome::Failure {
                    reason: err.to_string(),
                    files: err.written().to_vec(),
                    error: err,
                }
            }
        };
        ExportResult {
            format,
            destination,
            outcome,
        }
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string())
}

fn page_title(doc: &StructuredDocument, destination: &Path) -> String {
    if doc.name.trim().is_empty() {
        file_stem(destination)
    } else {
        doc.name.clone()
    }
}

/// Writes through `<name>.part` and renames, so the final name never holds a
/// truncated file.
fn write_file(path: &Path, bytes: &[u8]) -> Result<(), ExportError> {
    let mut part = path.as_os_str().to_owned();
    part.push(".part");
    let part = PathBuf::from(part);

    std::fs::write(&part, bytes).map_err(|e| ExportError::write(path, e))?;
    if let Err(err) = std::fs::rename(&part, path) {
        std::fs::remove_file(&part).ok();
        return Err(ExportError::write(path, err));
    }
    Ok(())
}
