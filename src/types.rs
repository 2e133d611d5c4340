use crate::error::PipelineError;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// One row of a finished report, keyed by column name in payload order.
pub type Record = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone)]
pub struct Credential {
    pub username: String,
    pub password: String,
    pub system_id: String,
    pub token: Option<String>,
}

impl Credential {
    pub fn authorization(&self) -> Result<String, PipelineError> {
        match &self.token {
            Some(token) => Ok(format!("bearer {}", token)),
            None => Err(PipelineError::Auth {
                status: "no token".to_string(),
                message: "credential has not been authenticated".to_string(),
            }),
        }
    }
}

/// A report filter as the reporting API expects it. A date range needs both bounds;
/// anything else in the entry is rejected rather than dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged, try_from = "RawFilter")]
pub enum FilterSpec {
    DateRange {
        #[serde(rename = "filterColumnName")]
        column: String,
        #[serde(rename = "startDate", serialize_with = "wms_datetime::serialize")]
        start: NaiveDateTime,
        #[serde(rename = "endDate", serialize_with = "wms_datetime::serialize")]
        end: NaiveDateTime,
    },
    Column {
        #[serde(rename = "filterColumnName")]
        column: String,
    },
}

impl FilterSpec {
    pub fn column(name: &str) -> Self {
        FilterSpec::Column {
            column: name.to_string(),
        }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawFilter {
    #[serde(rename = "filterColumnName")]
    column: String,
    #[serde(rename = "startDate", default)]
    start: Option<String>,
    #[serde(rename = "endDate", default)]
    end: Option<String>,
}

impl TryFrom<RawFilter> for FilterSpec {
    type Error = String;

    fn try_from(raw: RawFilter) -> Result<Self, Self::Error> {
        match (raw.start, raw.end) {
            (None, None) => Ok(FilterSpec::Column { column: raw.column }),
            (Some(start), Some(end)) => Ok(FilterSpec::DateRange {
                start: wms_datetime::parse(&start)
                    .map_err(|e| format!("{}: startDate {:?}: {}", raw.column, start, e))?,
                end: wms_datetime::parse(&end)
                    .map_err(|e| format!("{}: endDate {:?}: {}", raw.column, end, e))?,
                column: raw.column,
            }),
            _ => Err(format!(
                "{}: a date range needs both startDate and endDate",
                raw.column
            )),
        }
    }
}

mod wms_datetime {
    use chrono::NaiveDateTime;
    use serde::Serializer;

    const FORMAT: &str = "%m/%d/%Y %I:%M:%S %p";

    pub fn parse(raw: &str) -> chrono::ParseResult<NaiveDateTime> {
        NaiveDateTime::parse_from_str(raw, FORMAT)
    }

    pub fn serialize<S: Serializer>(value: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.format(FORMAT).to_string())
    }
}

/// Payload posted to the job-submission endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRequest {
    #[serde(rename = "reportName")]
    pub report_name: String,
    pub filters: Vec<FilterSpec>,
}

/// A configured report: what to run and where the CSV goes.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReportDefinition {
    pub report_name: String,
    #[serde(default)]
    pub filters: Vec<FilterSpec>,
    pub output_csv: String,
}

impl ReportDefinition {
    pub fn request(&self) -> ReportRequest {
        ReportRequest {
            report_name: self.report_name.clone(),
            filters: self.filters.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskId(String);

impl TaskId {
    /// Task identifiers arrive as strings or numbers; both are kept as opaque text.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::String(s) if !s.is_empty() => Some(TaskId(s.clone())),
            serde_json::Value::Number(n) => Some(TaskId(n.to_string())),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Done,
    TooLarge,
    Unknown(String),
}

impl JobStatus {
    pub fn from_remote(raw: &str) -> Self {
        match raw {
            "Done" => JobStatus::Done,
            "Request too Large" => JobStatus::TooLarge,
            "Pending" | "Processing" | "Queued" | "Running" | "In Progress" => JobStatus::Pending,
            other => JobStatus::Unknown(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportResult {
    pub records: Vec<Record>,
}

impl ReportResult {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug)]
pub struct ReportOutcome {
    pub definition: ReportDefinition,
    pub status: ReportStatus,
    pub rows: usize,
    pub remote_name: Option<String>,
    pub duration: Duration,
    pub error: Option<String>,
}

#[derive(Debug, PartialEq)]
pub enum ReportStatus {
    Success,
    Failed,
}

#[derive(Debug)]
pub struct RunSummary {
    pub total_reports: usize,
    pub successful_reports: usize,
    pub failed_reports: usize,
    pub total_rows: usize,
    pub total_duration: Duration,
    pub outcomes: Vec<ReportOutcome>,
}

impl RunSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed_reports == 0
    }
}
