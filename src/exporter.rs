use crate::error::PipelineError;
use crate::types::ReportResult;
use csv::WriterBuilder;
use log::{debug, warn};
use serde_json::Value;
use std::path::Path;

const PREVIEW_ROWS: usize = 5;

/// Writes `result` to `path` as CSV and returns the number of data rows written.
///
/// The header is the first record's keys in payload order, followed by any key that
/// only shows up in a later record. Cells missing from a record are left empty.
pub fn export(result: &ReportResult, path: &Path) -> Result<usize, PipelineError> {
    let mut wtr = WriterBuilder::new().from_path(path)?;

    if result.is_empty() {
        warn!("Report returned no rows, writing empty file {}", path.display());
        wtr.flush().map_err(csv::Error::from)?;
        return Ok(0);
    }

    let columns = columns(result);
    wtr.write_record(&columns)?;

    for (i, record) in result.records.iter().enumerate() {
        let row: Vec<String> = columns
            .iter()
            .map(|c| record.get(c.as_str()).map(cell).unwrap_or_default())
            .collect();
        if i < PREVIEW_ROWS {
            debug!("{}: {}", path.display(), row.join(" | "));
        }
        wtr.write_record(&row)?;
    }

    wtr.flush().map_err(csv::Error::from)?;
    Ok(result.len())
}

fn columns(result: &ReportResult) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for record in &result.records {
        for key in record.keys() {
            if !columns.iter().any(|c| c == key) {
                columns.push(key.clone());
            }
        }
    }
    columns
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(_) | Value::Number(_) | Value::Array(_) | Value::Object(_) => {
            value.to_string()
        }
    }
}
