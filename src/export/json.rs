use crate::{document::StructuredDocument, error::ExportError};
use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};

/// Pretty JSON with `indent` spaces; `0` gives compact output. Field order is
/// fixed by the type definitions, so the same document always encodes to the
/// same bytes.
pub fn encode(doc: &StructuredDocument, indent: usize) -> Result<Vec<u8>, ExportError> {
    let mut out = Vec::with_capacity(4096);
    if indent == 0 {
        serde_json::to_writer(&mut out, doc).map_err(|e| ExportError::Encode(e.to_string()))?;
    } else {
        let pad = " ".repeat(indent);
        let mut ser = Serializer::with_formatter(&mut out, PrettyFormatter::with_indent(pad.as_bytes()));
        doc.serialize(&mut ser)
            .map_err(|e| ExportError::Encode(e.to_string()))?;
    }
    out.push(b'\n');
    Ok(out)
}
