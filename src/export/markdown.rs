use crate::{
    config::Postprocess,
    document::{Node, StructuredDocument, Table},
    error::ExportError,
    postprocess::normalize_text,
};

pub fn encode(doc: &StructuredDocument, post: &Postprocess) -> Result<String, ExportError> {
    if !doc.has_body_content() {
        return Err(ExportError::UnsupportedContent(
            "document has no readable body content".into(),
        ));
    }
    let mut blocks = Vec::new();
    for node in &doc.body {
        render(doc, node, &mut blocks);
    }
    Ok(normalize_text(post, &blocks.join("\n\n")))
}

fn render(doc: &StructuredDocument, node: &Node, blocks: &mut Vec<String>) {
    match node {
        Node::Title { text, .. } => blocks.push(format!("# {}", one_line(text))),
        Node::Heading { level, text, .. } => {
            let hashes = "#".repeat((*level as usize + 1).min(6));
            blocks.push(format!("{hashes} {}", one_line(text)));
        }
        Node::Paragraph { text, .. } | Node::Caption { text, .. } | Node::Footnote { text, .. } => {
            if !text.trim().is_empty() {
                blocks.push(text.trim().to_string());
            }
        }
        Node::List { ordered, items } => {
            let mut lines = Vec::new();
            list_lines(items, *ordered, 0, &mut lines);
            if !lines.is_empty() {
                blocks.push(lines.join("\n"));
            }
        }
        Node::ListItem { .. } => {
            let mut lines = Vec::new();
            list_lines(std::slice::from_ref(node), false, 0, &mut lines);
            blocks.push(lines.join("\n"));
        }
        Node::Code { text, language, .. } => {
            let lang = language.as_deref().unwrap_or("");
            blocks.push(format!("```{lang}\n{}\n```", text.trim_end()));
        }
        Node::Formula { text, .. } => {
            if !text.trim().is_empty() {
                blocks.push(format!("$${}$$", text.trim()));
            }
        }
        Node::Picture { caption, .. } => {
            blocks.push("<!-- image -->".to_string());
            if let Some(c) = caption {
                blocks.push(c.trim().to_string());
            }
        }
        Node::Table { index } => {
            if let Some(table) = doc.table(*index) {
                if let Some(c) = &table.caption {
                    blocks.push(c.trim().to_string());
                }
                if let Some(t) = pipe_table(table) {
                    blocks.push(t);
                }
            }
        }
        Node::Group { children, .. } => {
            for child in children {
                render(doc, child, blocks);
            }
        }
        Node::Furniture { .. } => {}
    }
}

fn list_lines(items: &[Node], ordered: bool, depth: usize, lines: &mut Vec<String>) {
    let indent = "    ".repeat(depth);
    let mut n = 0;
    for item in items {
        match item {
            Node::ListItem {
                text,
                marker,
                children,
                ..
            } => {
                n += 1;
                let bullet = if ordered {
                    marker
                        .as_deref()
                        .filter(|m| m.trim_end_matches(['.', ')']).parse::<u32>().is_ok())
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("{n}."))
                } else {
                    "-".to_string()
                };
                lines.push(format!("{indent}{bullet} {}", one_line(text)));
                list_lines(children, false, depth + 1, lines);
            }
            Node::List { ordered, items } => list_lines(items, *ordered, depth + 1, lines),
            other => {
                let mut nested = Vec::new();
                render_nested(other, &mut nested);
                lines.extend(nested.into_iter().map(|l| format!("{indent}    {l}")));
            }
        }
    }
}

/// Non-list content that ended up inside a list is kept as indented text.
fn render_nested(node: &Node, lines: &mut Vec<String>) {
    match node {
        Node::Title { text, .. }
        | Node::Heading { text, .. }
        | Node::Paragraph { text, .. }
        | Node::Caption { text, .. }
        | Node::Footnote { text, .. }
        | Node::Code { text, .. }
        | Node::Formula { text, .. } => lines.push(one_line(text)),
        Node::Group { children, .. } => {
            for c in children {
                render_nested(c, lines);
            }
        }
        _ => {}
    }
}

pub(crate) fn pipe_table(table: &Table) -> Option<String> {
    let cols = table.rows.iter().map(Vec::len).max().unwrap_or(0);
    if cols == 0 {
        return None;
    }
    let header_rows = table.header_row_count().max(1);
    let row = |cells: &[crate::document::Cell]| {
        let mut out: Vec<String> = cells.iter().map(|c| escape_cell(&c.text)).collect();
        out.resize(cols, String::new());
        format!("| {} |", out.join(" | "))
    };

    let mut lines = Vec::with_capacity(table.rows.len() + 1);
    // Markdown only knows one header row; the last header row is the most specific.
    lines.push(row(&table.rows[header_rows - 1]));
    lines.push(format!("|{}|", vec!["---"; cols].join("|")));
    for cells in &table.rows[header_rows..] {
        lines.push(row(cells));
    }
    Some(lines.join("\n"))
}

fn escape_cell(text: &str) -> String {
    one_line(text).replace('|', "\\|")
}

fn one_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
