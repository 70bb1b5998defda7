//! In-memory result of a successful conversion.
//!
//! The engine's loosely typed output is translated into these variants at the
//! boundary (see `engine::docling`), so encoders only ever match on explicit
//! node and cell kinds.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredDocument {
    pub name: String,
    pub pages: Vec<Page>,
    /// Body content in reading order.
    pub body: Vec<Node>,
    /// Detected tables; `Node::Table` refers into this list by index.
    pub tables: Vec<Table>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub page_no: u32,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    Title {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        page: Option<u32>,
    },
    Heading {
        level: u8,
        text: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        page: Option<u32>,
    },
    Paragraph {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        page: Option<u32>,
    },
    List {
        ordered: bool,
        items: Vec<Node>,
    },
    ListItem {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        marker: Option<String>,
        #[serde(skip_serializing_if = "Vec::is_empty", default)]
        children: Vec<Node>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        page: Option<u32>,
    },
    Code {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        language: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        page: Option<u32>,
    },
    Formula {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        page: Option<u32>,
    },
    Caption {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        page: Option<u32>,
    },
    Footnote {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        page: Option<u32>,
    },
    Picture {
        #[serde(skip_serializing_if = "Option::is_none", default)]
        caption: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        page: Option<u32>,
    },
    Table {
        index: usize,
    },
    Group {
        #[serde(skip_serializing_if = "Option::is_none", default)]
        label: Option<String>,
        children: Vec<Node>,
    },
    /// Page headers and footers; kept in the tree, left out of readable exports.
    Furniture {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        page: Option<u32>,
    },
}

impl Node {
    /// True when the node (or anything under it) carries readable content.
    pub fn has_content(&self) -> bool {
        match self {
            Node::Title { text, .. }
            | Node::Heading { text, .. }
            | Node::Paragraph { text, .. }
            | Node::Code { text, .. }
            | Node::Formula { text, .. }
            | Node::Caption { text, .. }
            | Node::Footnote { text, .. } => !text.trim().is_empty(),
            Node::ListItem { text, children, .. } => {
                !text.trim().is_empty() || children.iter().any(Node::has_content)
            }
            Node::List { items, .. } => items.iter().any(Node::has_content),
            Node::Group { children, .. } => children.iter().any(Node::has_content),
            Node::Picture { .. } | Node::Table { .. } => true,
            Node::Furniture { .. } => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub caption: Option<String>,
    pub num_rows: usize,
    pub num_cols: usize,
    /// Row-major grid; spanned cells are repeated in every slot they cover.
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    /// Leading rows made only of column headers.
    pub fn header_row_count(&self) -> usize {
        self.rows
            .iter()
            .take_while(|row| {
                !row.is_empty() && row.iter().all(|c| c.kind == CellKind::ColumnHeader)
            })
            .count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CellKind {
    ColumnHeader,
    RowHeader,
    #[default]
    Body,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub text: String,
    pub kind: CellKind,
    #[serde(default = "one", skip_serializing_if = "is_one")]
    pub row_span: usize,
    #[serde(default = "one", skip_serializing_if = "is_one")]
    pub col_span: usize,
}

impl Cell {
    pub fn body(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: CellKind::Body,
            row_span: 1,
            col_span: 1,
        }
    }

    pub fn header(text: impl Into<String>) -> Self {
        Self {
            kind: CellKind::ColumnHeader,
            ..Self::body(text)
        }
    }
}

fn one() -> usize {
    1
}

fn is_one(v: &usize) -> bool {
    *v == 1
}

impl StructuredDocument {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    pub fn has_body_content(&self) -> bool {
        self.body.iter().any(Node::has_content)
    }

    pub fn table(&self, index: usize) -> Option<&Table> {
        self.tables.get(index)
    }
}
