use pdf_extractor::inputs::{collect_inputs, is_pdf_name, looks_like_url};
use std::path::{Path, PathBuf};

fn touch(path: &Path) -> PathBuf {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, b"%PDF-1.4\n").unwrap();
    path.to_path_buf()
}

fn names(paths: &[PathBuf]) -> Vec<String> {
    paths
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect()
}

#[test]
fn folders_expand_to_sorted_pdfs() {
    let tmp = tempfile::tempdir().unwrap();
    touch(&tmp.path().join("b.pdf"));
    touch(&tmp.path().join("A.PDF"));
    touch(&tmp.path().join("c.Pdf"));
    touch(&tmp.path().join("notes.txt"));
    touch(&tmp.path().join("nested").join("deep.pdf"));

    let flat = collect_inputs(&[tmp.path().to_path_buf()], false, true).unwrap();
    assert_eq!(names(&flat), vec!["A.PDF", "b.pdf", "c.Pdf"]);

    let deep = collect_inputs(&[tmp.path().to_path_buf()], true, true).unwrap();
    assert_eq!(names(&deep), vec!["A.PDF", "b.pdf", "c.Pdf", "deep.pdf"]);
}

#[test]
fn duplicates_are_collapsed_and_missing_files_kept() {
    let tmp = tempfile::tempdir().unwrap();
    let a = touch(&tmp.path().join("a.pdf"));
    let missing = tmp.path().join("missing.pdf");

    let out = collect_inputs(
        &[a.clone(), tmp.path().to_path_buf(), missing.clone(), a.clone()],
        false,
        true,
    )
    .unwrap();

    assert_eq!(out, vec![a, missing]);
}

#[test]
fn url_inputs_are_rejected_or_skipped() {
    let url = PathBuf::from("https://example.com/report.pdf");
    assert!(collect_inputs(&[url.clone()], false, true).is_err());
    assert!(collect_inputs(&[url], false, false).unwrap().is_empty());

    assert!(looks_like_url("FILE:///tmp/a.pdf"));
    assert!(!looks_like_url("/tmp/http.pdf"));
    assert!(is_pdf_name(Path::new("x.PDF")));
    assert!(!is_pdf_name(Path::new("x.pdf.txt")));
}
