use anyhow::{anyhow, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Expands user-supplied inputs into the list of files to convert.
///
/// Folders contribute their `*.pdf` files (any case), sorted by lowercase
/// file name; `recursive` also walks subfolders. Plain paths are passed through
/// untouched, including ones that do not exist, so submission can report them.
/// The same file listed twice is converted once.
pub fn collect_inputs(paths: &[PathBuf], recursive: bool, reject_urls: bool) -> Result<Vec<PathBuf>> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for path in paths {
        let raw = path.display().to_string();
        if looks_like_url(&raw) {
            if reject_urls {
                return Err(anyhow!("URL inputs are disabled: {raw}"));
            }
            warn!("URL inputs are not supported, skipping: {raw}");
            continue;
        }

        let found = if path.is_dir() {
            let pdfs = pdfs_in(path, recursive);
            debug!("{}: {} pdf(s)", path.display(), pdfs.len());
            pdfs
        } else {
            vec![path.clone()]
        };

        for file in found {
            let key = std::fs::canonicalize(&file).unwrap_or_else(|_| file.clone());
            if seen.insert(key) {
                out.push(file);
            }
        }
    }
    Ok(out)
}

fn pdfs_in(dir: &Path, recursive: bool) -> Vec<PathBuf> {
    let mut walker = WalkDir::new(dir).min_depth(1);
    if !recursive {
        walker = walker.max_depth(1);
    }
    let mut files: Vec<PathBuf> = walker
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| is_pdf_name(p))
        .collect();
    files.sort_by_cached_key(|p| {
        let name = p
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        (name, p.clone())
    });
    files
}

pub fn is_pdf_name(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
}

pub fn looks_like_url(s: &str) -> bool {
    let s = s.to_ascii_lowercase();
    s.starts_with("http://") || s.starts_with("https://") || s.starts_with("file://")
}
