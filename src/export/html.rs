use crate::{
    document::{CellKind, Node, StructuredDocument, Table},
    error::ExportError,
};
use std::fmt::Write;

pub fn encode(doc: &StructuredDocument, title: &str, max_width_px: u32) -> Result<String, ExportError> {
    if !doc.has_body_content() {
        return Err(ExportError::UnsupportedContent(
            "document has no readable body content".into(),
        ));
    }
    let mut body = String::new();
    for node in &doc.body {
        render(doc, node, &mut body);
    }
    Ok(page(title, &body, max_width_px))
}

fn render(doc: &StructuredDocument, node: &Node, out: &mut String) {
    match node {
        Node::Title { text, .. } => line(out, format_args!("<h1>{}</h1>", escape(text))),
        Node::Heading { level, text, .. } => {
            let h = (*level as usize + 1).min(6);
            line(out, format_args!("<h{h}>{}</h{h}>", escape(text)));
        }
        Node::Paragraph { text, .. } => line(out, format_args!("<p>{}</p>", escape(text))),
        Node::Caption { text, .. } => {
            line(out, format_args!("<p class=\"caption\">{}</p>", escape(text)))
        }
        Node::Footnote { text, .. } => {
            line(out, format_args!("<p class=\"footnote\">{}</p>", escape(text)))
        }
        Node::Code { text, language, .. } => {
            let class = language
                .as_deref()
                .map(|l| format!(" class=\"language-{}\"", escape(l)))
                .unwrap_or_default();
            line(out, format_args!("<pre><code{class}>{}</code></pre>", escape(text)));
        }
        Node::Formula { text, .. } => {
            line(out, format_args!("<div class=\"formula\">{}</div>", escape(text)))
        }
        Node::List { ordered, items } => list(doc, *ordered, items, out),
        Node::ListItem { .. } => list(doc, false, std::slice::from_ref(node), out),
        Node::Picture { caption, .. } => {
            out.push_str("<figure>");
            if let Some(c) = caption {
                let _ = write!(out, "<figcaption>{}</figcaption>", escape(c));
            }
            out.push_str("</figure>\n");
        }
        Node::Table { index } => {
            if let Some(t) = doc.table(*index) {
                table(t, out);
            }
        }
        Node::Group { children, .. } => {
            for child in children {
                render(doc, child, out);
            }
        }
        Node::Furniture { .. } => {}
    }
}

fn list(doc: &StructuredDocument, ordered: bool, items: &[Node], out: &mut String) {
    let tag = if ordered { "ol" } else { "ul" };
    let _ = writeln!(out, "<{tag}>");
    for item in items {
        match item {
            Node::ListItem { text, children, .. } => {
                let _ = write!(out, "<li>{}", escape(text));
                if !children.is_empty() {
                    out.push('\n');
                    for c in children {
                        render(doc, c, out);
                    }
                }
                out.push_str("</li>\n");
            }
            other => {
                out.push_str("<li>");
                render(doc, other, out);
                out.push_str("</li>\n");
            }
        }
    }
    let _ = writeln!(out, "</{tag}>");
}

fn table(t: &Table, out: &mut String) {
    out.push_str("<table>\n");
    if let Some(c) = &t.caption {
        let _ = writeln!(out, "<caption>{}</caption>", escape(c));
    }
    // Spanned cells are repeated in the grid; emit each once with its span.
    for (r, row) in t.rows.iter().enumerate() {
        out.push_str("<tr>");
        let mut c = 0;
        while c < row.len() {
            let cell = &row[c];
            let covered_from_above = r > 0
                && cell.row_span > 1
                && t.rows[r - 1].get(c).is_some_and(|above| above == cell);
            let step = cell.col_span.max(1).min(row.len() - c);
            if !covered_from_above {
                let tag = match cell.kind {
                    CellKind::ColumnHeader | CellKind::RowHeader => "th",
                    CellKind::Body => "td",
                };
                let mut attrs = String::new();
                if step > 1 {
                    let _ = write!(attrs, " colspan=\"{step}\"");
                }
                if cell.row_span > 1 {
                    let _ = write!(attrs, " rowspan=\"{}\"", cell.row_span);
                }
                let _ = write!(out, "<{tag}{attrs}>{}</{tag}>", escape(&cell.text));
            }
            c += step;
        }
        out.push_str("</tr>\n");
    }
    out.push_str("</table>\n");
}

fn line(out: &mut String, args: std::fmt::Arguments<'_>) {
    let _ = out.write_fmt(args);
    out.push('\n');
}

pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(ch),
        }
    }
    out
}

fn page(title: &str, body: &str, max_width_px: u32) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{title}</title>
    <style>
        body {{
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            max-width: {max_width_px}px;
            margin: 0 auto;
            padding: 2rem;
            line-height: 1.6;
        }}
        h1, h2, h3 {{ color: #333; }}
        table {{
            border-collapse: collapse;
            width: 100%;
            margin: 1rem 0;
        }}
        th, td {{
            border: 1px solid #ddd;
            padding: 8px;
            text-align: left;
        }}
        th {{ background-color: #f5f5f5; }}
        .caption, figcaption {{ font-style: italic; color: #555; }}
        .footnote {{ font-size: 0.85em; color: #666; }}
    </style>
</head>
<body>
{body}</body>
</html>
"#,
        title = escape(title),
    )
}
