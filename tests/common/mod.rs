#![allow(dead_code)]

use anyhow::{bail, Result};
use crossbeam_channel::Sender;
use pdf_extractor::{
    document::{Cell, Node, Page, StructuredDocument, Table},
    engine::{Engine, EngineDiag, EngineSession},
    error::EngineError,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Blocks conversions until opened.
#[derive(Clone, Default)]
pub struct Gate(Arc<(Mutex<bool>, Condvar)>);

impl Gate {
    pub fn open(&self) {
        let (lock, cv) = &*self.0;
        *lock.lock().unwrap() = true;
        cv.notify_all();
    }

    fn wait(&self) {
        let (lock, cv) = &*self.0;
        let mut open = lock.lock().unwrap();
        while !*open {
            open = cv.wait(open).unwrap();
        }
    }
}

/// Knobs and counters shared between a test and its `FakeEngine`.
#[derive(Clone, Default)]
pub struct Script {
    pub loads: Arc<AtomicUsize>,
    pub converts: Arc<AtomicUsize>,
    /// Number of upcoming loads that fail.
    pub failing_loads: Arc<AtomicUsize>,
    pub load_delay: Duration,
    pub gate: Option<Gate>,
    /// Receives each source path as its conversion starts.
    pub started: Option<Sender<PathBuf>>,
}

impl Script {
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn converts(&self) -> usize {
        self.converts.load(Ordering::SeqCst)
    }
}

pub struct FakeEngine {
    pub script: Script,
}

impl FakeEngine {
    pub fn new(script: Script) -> Self {
        Self { script }
    }
}

impl Engine for FakeEngine {
    type Session = FakeSession;

    fn doctor(&self) -> Result<EngineDiag> {
        Ok(EngineDiag {
            python_exe: "fake".into(),
            python_version: "0".into(),
            docling_version: None,
            models_dir: String::new(),
            offline: true,
            ok: true,
            error: None,
        })
    }

    fn load(&self) -> Result<FakeSession> {
        self.script.loads.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.script.load_delay);
        let failing = self.script.failing_loads.load(Ordering::SeqCst);
        if failing > 0 {
            self.script.failing_loads.store(failing - 1, Ordering::SeqCst);
            return Err(EngineError::Load("layout model missing".into()).into());
        }
        Ok(FakeSession {
            script: self.script.clone(),
        })
    }
}

pub struct FakeSession {
    script: Script,
}

impl EngineSession for FakeSession {
    fn convert(&mut self, input: &Path) -> Result<StructuredDocument> {
        self.script.converts.fetch_add(1, Ordering::SeqCst);
        if let Some(tx) = &self.script.started {
            let _ = tx.send(input.to_path_buf());
        }
        if let Some(gate) = &self.script.gate {
            gate.wait();
        }
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        if stem.contains("broken") {
            bail!("layout model crashed on {}", input.display());
        }
        Ok(sample_doc(&stem))
    }
}

/// Three pages, one table on page 2.
pub fn sample_doc(name: &str) -> StructuredDocument {
    let table = Table {
        index: 0,
        page: Some(2),
        caption: Some("Table 1: Revenue by region".into()),
        num_rows: 3,
        num_cols: 2,
        rows: vec![
            vec![Cell::header("Region"), Cell::header("Revenue")],
            vec![Cell::body("North"), Cell::body("10")],
            vec![Cell::body("South"), Cell::body("12")],
        ],
    };
    StructuredDocument {
        name: name.to_string(),
        pages: (1..=3)
            .map(|page_no| Page {
                page_no,
                width: 612.0,
                height: 792.0,
            })
            .collect(),
        body: vec![
            Node::Furniture {
                text: "ACME Corp confidential".into(),
                page: Some(1),
            },
            Node::Title {
                text: "Quarterly Report".into(),
                page: Some(1),
            },
            Node::Heading {
                level: 1,
                text: "Results".into(),
                page: Some(1),
            },
            Node::Paragraph {
                text: "Revenue grew while costs < budget.".into(),
                page: Some(1),
            },
            Node::List {
                ordered: false,
                items: vec![
                    Node::ListItem {
                        text: "first".into(),
                        marker: Some("-".into()),
                        children: vec![],
                        page: Some(1),
                    },
                    Node::ListItem {
                        text: "second".into(),
                        marker: Some("-".into()),
                        children: vec![],
                        page: Some(1),
                    },
                ],
            },
            Node::Table { index: 0 },
            Node::Paragraph {
                text: "Closing remarks.".into(),
                page: Some(3),
            },
        ],
        tables: vec![table],
    }
}

/// A document whose only text is page furniture.
pub fn empty_doc() -> StructuredDocument {
    StructuredDocument {
        name: "blank".into(),
        pages: vec![Page {
            page_no: 1,
            width: 612.0,
            height: 792.0,
        }],
        body: vec![Node::Furniture {
            text: "Page 1".into(),
            page: Some(1),
        }],
        tables: vec![],
    }
}

pub fn write_pdf(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"%PDF-1.4\n%\xe2\xe3\xcf\xd3\n1 0 obj\n<<>>\nendobj\n%%EOF\n").unwrap();
    path
}
