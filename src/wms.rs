use crate::error::PipelineError;
use crate::types::{Credential, JobStatus, Record, ReportRequest, ReportResult, TaskId};
use log::{debug, info};
use reqwest::header::AUTHORIZATION;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

/// Builds the HTTP client shared by every stage of a run.
pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client, PipelineError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| PipelineError::Config(format!("Failed to create HTTP client: {}", e)))
}

#[derive(Deserialize)]
struct LoginResponse {
    #[serde(rename = "Token")]
    token: Option<String>,
}

#[derive(Deserialize)]
struct SubmitResponse {
    #[serde(rename = "TaskId")]
    task_id: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct StatusResponse {
    #[serde(rename = "Status")]
    status: Option<String>,
}

#[derive(Deserialize)]
struct DataResponse {
    #[serde(rename = "Data")]
    data: Option<serde_json::Value>,
}

/// Thin client over the warehouse reporting API. Every call maps its failure onto the
/// taxonomy entry of the stage that made it.
#[derive(Clone)]
pub struct WmsClient {
    client: reqwest::Client,
    base_url: String,
}

impl WmsClient {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// `reports/<task>[/<tail>]`, with the task id encoded as a single path segment.
    fn task_url(&self, task_id: &TaskId, tail: Option<&str>) -> Result<reqwest::Url, String> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| format!("invalid base URL {}: {}", self.base_url, e))?;
        url.path_segments_mut()
            .map_err(|_| format!("base URL {} cannot carry a path", self.base_url))?
            .pop_if_empty()
            .push("reports")
            .push(task_id.as_str())
            .extend(tail);
        Ok(url)
    }

    pub async fn login(&self, credential: &Credential) -> Result<String, PipelineError> {
        let auth_error = |status: String, message: String| PipelineError::Auth { status, message };

        let resp = self
            .client
            .post(self.url("Login"))
            .form(&[
                ("userName", credential.username.as_str()),
                ("password", credential.password.as_str()),
                ("systemId", credential.system_id.as_str()),
            ])
            .send()
            .await
            .map_err(|e| auth_error("request failed".to_string(), e.to_string()))?;

        let status = resp.status();
        if status != StatusCode::OK {
            let body = resp.text().await.unwrap_or_default();
            return Err(auth_error(status.to_string(), body));
        }

        let login: LoginResponse = resp
            .json()
            .await
            .map_err(|e| auth_error(status.to_string(), format!("invalid login response: {}", e)))?;
        login
            .token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| auth_error(status.to_string(), "login response had no Token".to_string()))
    }

    /// Probes the token-validation endpoint. `Ok(false)` means the server rejected the token.
    pub async fn validate_token(&self, token: &str) -> Result<bool, reqwest::Error> {
        let resp = self
            .client
            .get(self.url("token"))
            .header(AUTHORIZATION, format!("bearer {}", token))
            .send()
            .await?;
        Ok(resp.status() == StatusCode::OK)
    }

    pub async fn submit_report(
        &self,
        request: &ReportRequest,
        credential: &Credential,
    ) -> Result<TaskId, PipelineError> {
        let resp = self
            .client
            .post(self.url("reports"))
            .header(AUTHORIZATION, credential.authorization()?)
            .json(request)
            .send()
            .await
            .map_err(|e| PipelineError::Submission(e.to_string()))?;

        let status = resp.status();
        if status != StatusCode::OK {
            let body = resp.text().await.unwrap_or_default();
            return Err(PipelineError::Submission(PipelineError::describe_response(
                status, &body,
            )));
        }

        let submitted: SubmitResponse = resp
            .json()
            .await
            .map_err(|e| PipelineError::Submission(format!("invalid response: {}", e)))?;
        let task_id = submitted
            .task_id
            .as_ref()
            .and_then(TaskId::from_json)
            .ok_or_else(|| PipelineError::Submission("response had no TaskId".to_string()))?;

        info!("Task started. Task ID: {}", task_id);
        Ok(task_id)
    }

    pub async fn report_status(
        &self,
        task_id: &TaskId,
        credential: &Credential,
    ) -> Result<JobStatus, PipelineError> {
        let url = self
            .task_url(task_id, Some("status"))
            .map_err(PipelineError::StatusCheck)?;
        let resp = self
            .client
            .get(url)
            .header(AUTHORIZATION, credential.authorization()?)
            .send()
            .await
            .map_err(|e| PipelineError::StatusCheck(e.to_string()))?;

        let status = resp.status();
        if status != StatusCode::OK {
            let body = resp.text().await.unwrap_or_default();
            return Err(PipelineError::StatusCheck(PipelineError::describe_response(
                status, &body,
            )));
        }

        let body: StatusResponse = resp
            .json()
            .await
            .map_err(|e| PipelineError::StatusCheck(format!("invalid response: {}", e)))?;
        let raw = body.status.unwrap_or_default();
        debug!("Task {} status: {:?}", task_id, raw);
        Ok(JobStatus::from_remote(&raw))
    }

    pub async fn fetch_report(
        &self,
        task_id: &TaskId,
        credential: &Credential,
    ) -> Result<ReportResult, PipelineError> {
        let url = self
            .task_url(task_id, None)
            .map_err(PipelineError::Fetch)?;
        let resp = self
            .client
            .get(url)
            .header(AUTHORIZATION, credential.authorization()?)
            .send()
            .await
            .map_err(|e| PipelineError::Fetch(e.to_string()))?;

        let status = resp.status();
        if status != StatusCode::OK {
            let body = resp.text().await.unwrap_or_default();
            return Err(PipelineError::Fetch(PipelineError::describe_response(
                status, &body,
            )));
        }

        let body: DataResponse = resp
            .json()
            .await
            .map_err(|e| PipelineError::Fetch(format!("invalid response: {}", e)))?;
        let data = body
            .data
            .ok_or_else(|| PipelineError::Fetch("response had no Data field".to_string()))?;
        records_from_json(data)
    }

    /// Lists the reports the API makes available to this account.
    pub async fn available_reports(
        &self,
        credential: &Credential,
    ) -> Result<ReportResult, PipelineError> {
        let resp = self
            .client
            .get(self.url("reports"))
            .header(AUTHORIZATION, credential.authorization()?)
            .send()
            .await
            .map_err(|e| PipelineError::Fetch(e.to_string()))?;

        let status = resp.status();
        if status != StatusCode::OK {
            let body = resp.text().await.unwrap_or_default();
            return Err(PipelineError::Fetch(PipelineError::describe_response(
                status, &body,
            )));
        }

        let data: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| PipelineError::Fetch(format!("invalid response: {}", e)))?;
        records_from_json(data)
    }
}

fn records_from_json(data: serde_json::Value) -> Result<ReportResult, PipelineError> {
    let rows = match data {
        serde_json::Value::Array(rows) => rows,
        other => {
            return Err(PipelineError::Fetch(format!(
                "unexpected data format: expected an array, got {}",
                other
            )))
        }
    };

    let records = rows
        .into_iter()
        .map(|row| match row {
            serde_json::Value::Object(map) => Ok::<Record, PipelineError>(map),
            other => Err(PipelineError::Fetch(format!(
                "unexpected data format: row is not an object: {}",
                other
            ))),
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ReportResult { records })
}
