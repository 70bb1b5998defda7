//! Translation of Docling's `export_to_dict()` output into `StructuredDocument`.
//!
//! Docling keeps items in flat arrays (`texts`, `tables`, `pictures`, `groups`)
//! and expresses the reading order as `$ref` pointers hanging off `body`. We
//! walk those pointers once and emit explicit `Node` variants.

use crate::document::{Cell, CellKind, Node, Page, StructuredDocument, Table};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

const MAX_DEPTH: usize = 64;

#[derive(Debug, Deserialize)]
struct DoclingDict {
    #[serde(default)]
    name: String,
    #[serde(default)]
    body: RawGroup,
    #[serde(default)]
    groups: Vec<RawGroup>,
    #[serde(default)]
    texts: Vec<RawText>,
    #[serde(default)]
    tables: Vec<RawTable>,
    #[serde(default)]
    pictures: Vec<RawPicture>,
    #[serde(default)]
    pages: BTreeMap<String, RawPage>,
}

#[derive(Debug, Default, Deserialize)]
struct RawRef {
    #[serde(rename = "$ref")]
    target: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawGroup {
    #[serde(default)]
    children: Vec<RawRef>,
    #[serde(default)]
    label: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawProv {
    #[serde(default)]
    page_no: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RawText {
    #[serde(default)]
    label: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    content_layer: Option<String>,
    #[serde(default)]
    prov: Vec<RawProv>,
    #[serde(default)]
    children: Vec<RawRef>,
    #[serde(default)]
    level: Option<u8>,
    #[serde(default)]
    marker: Option<String>,
    #[serde(default)]
    code_language: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawTable {
    #[serde(default)]
    prov: Vec<RawProv>,
    #[serde(default)]
    captions: Vec<RawRef>,
    #[serde(default)]
    data: RawTableData,
}

#[derive(Debug, Default, Deserialize)]
struct RawTableData {
    #[serde(default)]
    num_rows: usize,
    #[serde(default)]
    num_cols: usize,
    #[serde(default)]
    grid: Vec<Vec<RawCell>>,
    #[serde(default)]
    table_cells: Vec<RawCell>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawCell {
    #[serde(default)]
    text: String,
    #[serde(default)]
    row_span: Option<usize>,
    #[serde(default)]
    col_span: Option<usize>,
    #[serde(default)]
    start_row_offset_idx: Option<usize>,
    #[serde(default)]
    start_col_offset_idx: Option<usize>,
    #[serde(default)]
    column_header: bool,
    #[serde(default)]
    row_header: bool,
}

#[derive(Debug, Deserialize)]
struct RawPicture {
    #[serde(default)]
    prov: Vec<RawProv>,
    #[serde(default)]
    captions: Vec<RawRef>,
}

#[derive(Debug, Deserialize)]
struct RawPage {
    #[serde(default)]
    page_no: Option<u32>,
    #[serde(default)]
    size: RawSize,
}

#[derive(Debug, Default, Deserialize)]
struct RawSize {
    #[serde(default)]
    width: f64,
    #[serde(default)]
    height: f64,
}

enum Target {
    Text(usize),
    Table(usize),
    Picture(usize),
    Group(usize),
}

fn parse_ref(target: &str) -> Option<Target> {
    let rest = target.strip_prefix("#/")?;
    let (kind, idx) = rest.split_once('/')?;
    let idx: usize = idx.parse().ok()?;
    match kind {
        "texts" => Some(Target::Text(idx)),
        "tables" => Some(Target::Table(idx)),
        "pictures" => Some(Target::Picture(idx)),
        "groups" => Some(Target::Group(idx)),
        _ => None,
    }
}

pub fn from_docling_value(value: serde_json::Value) -> Result<StructuredDocument> {
    let dict: DoclingDict =
        serde_json::from_value(value).with_context(|| "decoding docling document dict")?;
    Ok(Translator::new(&dict).run())
}

pub fn from_docling_str(raw: &str) -> Result<StructuredDocument> {
    let value: serde_json::Value =
        serde_json::from_str(raw).with_context(|| "parsing docling document JSON")?;
    from_docling_value(value)
}

struct Translator<'a> {
    dict: &'a DoclingDict,
    visited: HashSet<&'a str>,
}

impl<'a> Translator<'a> {
    fn new(dict: &'a DoclingDict) -> Self {
        Self {
            dict,
            visited: HashSet::new(),
        }
    }

    fn run(mut self) -> StructuredDocument {
        let dict = self.dict;
        let body = self.nodes(&dict.body.children, 0);

        let mut pages: Vec<Page> = dict
            .pages
            .iter()
            .map(|(key, p)| Page {
                page_no: p.page_no.or_else(|| key.parse().ok()).unwrap_or(0),
                width: p.size.width,
                height: p.size.height,
            })
            .collect();
        pages.sort_by_key(|p| p.page_no);

        let tables = dict
            .tables
            .iter()
            .enumerate()
            .map(|(i, t)| self.table(i, t))
            .collect();

        StructuredDocument {
            name: dict.name.clone(),
            pages,
            body,
            tables,
        }
    }

    fn nodes(&mut self, refs: &'a [RawRef], depth: usize) -> Vec<Node> {
        refs.iter()
            .filter_map(|r| self.node(r, depth))
            .collect()
    }

    fn node(&mut self, r: &'a RawRef, depth: usize) -> Option<Node> {
        if depth > MAX_DEPTH {
            warn!("docling tree deeper than {MAX_DEPTH}; truncating at {}", r.target);
            return None;
        }
        if !self.visited.insert(r.target.as_str()) {
            debug!("skipping repeated ref {}", r.target);
            return None;
        }
        let dict = self.dict;
        match parse_ref(&r.target) {
            Some(Target::Text(i)) => match dict.texts.get(i) {
                Some(t) => Some(self.text_node(t, depth)),
                None => dangling(&r.target),
            },
            Some(Target::Table(i)) if i < dict.tables.len() => Some(Node::Table { index: i }),
            Some(Target::Picture(i)) => match dict.pictures.get(i) {
                Some(p) => Some(Node::Picture {
                    caption: self.caption_text(&p.captions),
                    page: first_page(&p.prov),
                }),
                None => dangling(&r.target),
            },
            Some(Target::Group(i)) => match dict.groups.get(i) {
                Some(g) => Some(self.group_node(g, depth)),
                None => dangling(&r.target),
            },
            _ => dangling(&r.target),
        }
    }

    fn group_node(&mut self, g: &'a RawGroup, depth: usize) -> Node {
        let children = self.nodes(&g.children, depth + 1);
        match g.label.as_str() {
            "list" | "ordered_list" => {
                let ordered = g.label == "ordered_list"
                    || g.children.iter().any(|c| self.is_enumerated(c));
                Node::List {
                    ordered,
                    items: children,
                }
            }
            _ => Node::Group {
                label: (!g.name.is_empty()).then(|| g.name.clone()),
                children,
            },
        }
    }

    fn is_enumerated(&self, r: &RawRef) -> bool {
        match parse_ref(&r.target) {
            Some(Target::Text(i)) => self
                .dict
                .texts
                .get(i)
                .and_then(|t| t.marker.as_deref())
                .is_some_and(|m| m.trim_end_matches(['.', ')']).parse::<u32>().is_ok()),
            _ => false,
        }
    }

    fn text_node(&mut self, t: &'a RawText, depth: usize) -> Node {
        let text = t.text.clone();
        let page = first_page(&t.prov);
        if t.content_layer.as_deref() == Some("furniture") {
            return Node::Furniture { text, page };
        }
        match t.label.as_str() {
            "title" => Node::Title { text, page },
            "section_header" => Node::Heading {
                level: t.level.unwrap_or(1).clamp(1, 6),
                text,
                page,
            },
            "list_item" => Node::ListItem {
                text,
                marker: t.marker.clone().filter(|m| !m.is_empty()),
                children: self.nodes(&t.children, depth + 1),
                page,
            },
            "code" => Node::Code {
                text,
                language: t.code_language.clone(),
                page,
            },
            "formula" => Node::Formula { text, page },
            "caption" => Node::Caption { text, page },
            "footnote" => Node::Footnote { text, page },
            "page_header" | "page_footer" => Node::Furniture { text, page },
            _ => Node::Paragraph { text, page },
        }
    }

    fn caption_text(&mut self, refs: &'a [RawRef]) -> Option<String> {
        let dict = self.dict;
        let parts: Vec<&str> = refs
            .iter()
            .filter_map(|r| match parse_ref(&r.target) {
                Some(Target::Text(i)) => {
                    self.visited.insert(r.target.as_str());
                    dict.texts.get(i).map(|t| t.text.as_str())
                }
                _ => None,
            })
            .filter(|s| !s.trim().is_empty())
            .collect();
        (!parts.is_empty()).then(|| parts.join(" "))
    }

    fn table(&mut self, index: usize, t: &'a RawTable) -> Table {
        let rows = if t.data.grid.is_empty() {
            grid_from_cells(&t.data)
        } else {
            t.data
                .grid
                .iter()
                .map(|row| row.iter().map(cell).collect())
                .collect()
        };
        let num_rows = rows.len().max(t.data.num_rows);
        let num_cols = rows
            .iter()
            .map(Vec::len)
            .max()
            .unwrap_or(0)
            .max(t.data.num_cols);
        Table {
            index,
            page: first_page(&t.prov),
            caption: self.caption_text(&t.captions),
            num_rows,
            num_cols,
            rows,
        }
    }
}

fn dangling(target: &str) -> Option<Node> {
    warn!("dangling docling ref {target}");
    None
}

fn first_page(prov: &[RawProv]) -> Option<u32> {
    prov.iter().find_map(|p| p.page_no)
}

fn cell(raw: &RawCell) -> Cell {
    let kind = if raw.column_header {
        CellKind::ColumnHeader
    } else if raw.row_header {
        CellKind::RowHeader
    } else {
        CellKind::Body
    };
    Cell {
        text: raw.text.clone(),
        kind,
        row_span: raw.row_span.unwrap_or(1).max(1),
        col_span: raw.col_span.unwrap_or(1).max(1),
    }
}

/// Rebuilds the grid from the flat cell list when Docling omitted `grid`.
fn grid_from_cells(data: &RawTableData) -> Vec<Vec<Cell>> {
    let mut grid = vec![vec![Cell::body(""); data.num_cols]; data.num_rows];
    for raw in &data.table_cells {
        let (Some(r0), Some(c0)) = (raw.start_row_offset_idx, raw.start_col_offset_idx) else {
            continue;
        };
        let c = cell(raw);
        for r in r0..(r0 + c.row_span).min(data.num_rows) {
            for col in c0..(c0 + c.col_span).min(data.num_cols) {
                grid[r][col] = c.clone();
            }
        }
    }
    grid
}
