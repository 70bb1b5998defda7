use crate::{document::Table, error::ExportError};

/// One CSV record per grid row, padded to the table width. Header rows are
/// written as ordinary leading records, matching how the grid was detected.
pub fn encode_csv(table: &Table) -> Result<Vec<u8>, ExportError> {
    let width = table
        .rows
        .iter()
        .map(Vec::len)
        .max()
        .unwrap_or(0)
        .max(table.num_cols);
    let mut wtr = csv::WriterBuilder::new()
        .flexible(false)
        .from_writer(Vec::new());
    for row in &table.rows {
        let mut record: Vec<&str> = row.iter().map(|c| c.text.as_str()).collect();
        record.resize(width, "");
        wtr.write_record(&record)
            .map_err(|e| ExportError::Encode(format!("table {}: {e}", table.index + 1)))?;
    }
    wtr.into_inner()
        .map_err(|e| ExportError::Encode(format!("table {}: {e}", table.index + 1)))
}
