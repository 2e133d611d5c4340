use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to load report definitions: {0}")]
    Definitions(String),

    #[error("Authentication failed: {status} {message}")]
    Auth { status: String, message: String },

    #[error("Failed to start report task: {0}")]
    Submission(String),

    #[error("Error checking report status: {0}")]
    StatusCheck(String),

    #[error("Report request too large: {0}")]
    PayloadTooLarge(String),

    #[error("Report task did not complete after {attempts} status checks")]
    Timeout { attempts: u32 },

    #[error("Error retrieving report data: {0}")]
    Fetch(String),

    #[error("Failed to write CSV: {0}")]
    Write(#[from] csv::Error),

    #[error("Document store authentication failed: {0}")]
    RemoteAuth(String),

    #[error("Archive step failed: {0}")]
    Archive(String),

    #[error("Upload failed: {0}")]
    Upload(String),
}

impl PipelineError {
    /// Formats an unsuccessful HTTP exchange the way every stage reports it.
    pub fn describe_response(status: reqwest::StatusCode, body: &str) -> String {
        if body.is_empty() {
            format!("HTTP {}", status)
        } else {
            format!("HTTP {}: {}", status, body)
        }
    }
}
