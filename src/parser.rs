use crate::error::PipelineError;
use crate::types::{FilterSpec, ReportDefinition};
use chrono::NaiveDate;
use log::debug;
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

/// Reads a JSON array of report definitions.
pub async fn parse_definitions(path: &Path) -> Result<Vec<ReportDefinition>, PipelineError> {
    let mut file = File::open(path)
        .await
        .map_err(|e| PipelineError::Definitions(format!("{}: {}", path.display(), e)))?;

    let mut contents = String::new();
    file.read_to_string(&mut contents)
        .await
        .map_err(|e| PipelineError::Definitions(format!("{}: {}", path.display(), e)))?;

    let definitions: Vec<ReportDefinition> = serde_json::from_str(&contents)
        .map_err(|e| PipelineError::Definitions(format!("{}: {}", path.display(), e)))?;

    for definition in &definitions {
        if definition.report_name.trim().is_empty() || definition.output_csv.trim().is_empty() {
            return Err(PipelineError::Definitions(format!(
                "{}: every report needs a report_name and an output_csv",
                path.display()
            )));
        }
        debug!("Parsed definition: {:?}", definition);
    }

    Ok(definitions)
}

/// The reports this deployment runs when no definitions file is given.
pub fn default_definitions() -> Vec<ReportDefinition> {
    let receipt_window = NaiveDate::from_ymd_opt(2025, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .zip(NaiveDate::from_ymd_opt(2025, 7, 30).and_then(|d| d.and_hms_opt(23, 59, 59)));

    let mut unit_filters = vec![FilterSpec::column("Owner"), FilterSpec::column("Product ID")];
    if let Some((start, end)) = receipt_window {
        unit_filters.push(FilterSpec::DateRange {
            column: "Receipt Date".to_string(),
            start,
            end,
        });
    }
    unit_filters.extend([
        FilterSpec::column("Unit"),
        FilterSpec::column("Location"),
        FilterSpec::column("On Hand Total"),
    ]);

    vec![
        ReportDefinition {
            report_name: "Unit Details (by owner) with Current Balance".to_string(),
            filters: unit_filters,
            output_csv: "unit_details_with_current_balance.csv".to_string(),
        },
        ReportDefinition {
            report_name: "expected arrivals".to_string(),
            filters: vec![],
            output_csv: "expected_arrivals.csv".to_string(),
        },
        ReportDefinition {
            report_name: "Warehouse Locations - 2".to_string(),
            filters: vec![],
            output_csv: "warehouse_locations.csv".to_string(),
        },
        ReportDefinition {
            report_name: "Shipping Report".to_string(),
            filters: vec![],
            output_csv: "shipping_report.csv".to_string(),
        },
    ]
}
