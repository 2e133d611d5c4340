use crate::config::PollConfig;
use crate::error::PipelineError;
use crate::types::{Credential, JobStatus, ReportRequest, ReportResult, TaskId};
use crate::wms::WmsClient;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::time::Duration;

/// Waits between status checks. Swapped out in tests to avoid real delays.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Runs one asynchronous report job: submit, poll until done, fetch.
pub struct ReportRunner<S = TokioSleeper> {
    client: WmsClient,
    polling: PollConfig,
    sleeper: S,
}

impl ReportRunner<TokioSleeper> {
    pub fn new(client: WmsClient, polling: PollConfig) -> Self {
        Self::with_sleeper(client, polling, TokioSleeper)
    }
}

impl<S: Sleeper> ReportRunner<S> {
    pub fn with_sleeper(client: WmsClient, polling: PollConfig, sleeper: S) -> Self {
        Self {
            client,
            polling,
            sleeper,
        }
    }

    pub async fn run_report(
        &self,
        request: &ReportRequest,
        credential: &Credential,
    ) -> Result<ReportResult, PipelineError> {
        info!("Starting report: {}", request.report_name);
        let task_id = self.client.submit_report(request, credential).await?;
        self.wait_for_completion(&task_id, credential).await?;
        let result = self.client.fetch_report(&task_id, credential).await?;
        info!(
            "Report {} returned {} rows",
            request.report_name,
            result.len()
        );
        Ok(result)
    }

    async fn wait_for_completion(
        &self,
        task_id: &TaskId,
        credential: &Credential,
    ) -> Result<(), PipelineError> {
        let max_attempts = self.polling.max_attempts;

        for attempt in 1..=max_attempts {
            match self.client.report_status(task_id, credential).await? {
                JobStatus::Done => {
                    debug!("Task {} done after {} status checks", task_id, attempt);
                    return Ok(());
                }
                JobStatus::TooLarge => {
                    return Err(PipelineError::PayloadTooLarge(format!(
                        "task {} was rejected by the server",
                        task_id
                    )));
                }
                JobStatus::Pending => {
                    debug!("Task {} pending ({}/{})", task_id, attempt, max_attempts);
                }
                JobStatus::Unknown(raw) => {
                    warn!(
                        "Task {} reported unrecognised status {:?} ({}/{})",
                        task_id, raw, attempt, max_attempts
                    );
                }
            }

            if attempt < max_attempts {
                self.sleeper.sleep(self.polling.interval).await;
            }
        }

        Err(PipelineError::Timeout {
            attempts: max_attempts,
        })
    }
}
