use crate::docstore::{timestamped_name, Gateway};
use crate::error::PipelineError;
use crate::exporter;
use crate::runner::{ReportRunner, Sleeper, TokioSleeper};
use crate::types::{Credential, ReportDefinition, ReportOutcome, ReportStatus, RunSummary};
use crate::wms::WmsClient;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

pub const CATALOG_CSV: &str = "available_reports.csv";

pub struct Pipeline<S = TokioSleeper> {
    runner: ReportRunner<S>,
    gateway: Option<Gateway>,
    output_dir: PathBuf,
    keep_local: bool,
}

impl<S: Sleeper> Pipeline<S> {
    pub fn new(
        runner: ReportRunner<S>,
        gateway: Option<Gateway>,
        output_dir: PathBuf,
        keep_local: bool,
    ) -> Self {
        Self {
            runner,
            gateway,
            output_dir,
            keep_local,
        }
    }

    /// Runs every definition once, in order. A failing report never stops the ones after it.
    pub async fn run_all(
        &self,
        definitions: &[ReportDefinition],
        credential: &Credential,
    ) -> Result<RunSummary, PipelineError> {
        tokio::fs::create_dir_all(&self.output_dir).await.map_err(|e| {
            PipelineError::Config(format!(
                "cannot create output directory {}: {}",
                self.output_dir.display(),
                e
            ))
        })?;

        let m = MultiProgress::new();
        let start_time = Instant::now();
        let mut outcomes = Vec::with_capacity(definitions.len());

        info!("Running {} reports", definitions.len());
        for definition in definitions {
            let pb = m.add(self.create_progress_bar(definition));
            outcomes.push(self.run_one(definition, credential, &pb).await);
        }

        let total_duration = start_time.elapsed();
        let total_reports = outcomes.len();
        let successful_reports = outcomes
            .iter()
            .filter(|o| o.status == ReportStatus::Success)
            .count();
        let total_rows = outcomes.iter().map(|o| o.rows).sum();

        Ok(RunSummary {
            total_reports,
            successful_reports,
            failed_reports: total_reports - successful_reports,
            total_rows,
            total_duration,
            outcomes,
        })
    }

    async fn run_one(
        &self,
        definition: &ReportDefinition,
        credential: &Credential,
        pb: &ProgressBar,
    ) -> ReportOutcome {
        let start_time = Instant::now();
        let mut rows = 0;
        let mut remote_name = None;

        let result = async {
            pb.set_message(format!("{}: waiting for report", definition.report_name));
            let report = self
                .runner
                .run_report(&definition.request(), credential)
                .await?;

            pb.set_message(format!("{}: exporting", definition.report_name));
            let local_path = self.output_dir.join(&definition.output_csv);
            rows = match exporter::export(&report, &local_path) {
                Ok(rows) => rows,
                Err(e) => {
                    remove_local(&local_path).await;
                    return Err(e);
                }
            };
            info!("Saved {} ({} rows)", local_path.display(), rows);

            if let Some(gateway) = &self.gateway {
                pb.set_message(format!("{}: publishing", definition.report_name));
                let name = timestamped_name(
                    &definition.output_csv,
                    chrono::Local::now().naive_local(),
                );
                gateway
                    .publish(&local_path, &name, gateway.target_folder())
                    .await?;
                remote_name = Some(name);

                if !self.keep_local {
                    remove_local(&local_path).await;
                }
            }

            Ok::<(), PipelineError>(())
        }
        .await;

        let duration = start_time.elapsed();
        let (status, error) = match result {
            Ok(()) => {
                pb.finish_with_message(format!("{}: done", definition.report_name));
                (ReportStatus::Success, None)
            }
            Err(e) => {
                let error_msg = e.to_string();
                error!("Report {} failed: {}", definition.report_name, error_msg);
                pb.finish_with_message(format!("{}: failed", definition.report_name));
                (ReportStatus::Failed, Some(error_msg))
            }
        };

        ReportOutcome {
            definition: definition.clone(),
            status,
            rows,
            remote_name,
            duration,
            error,
        }
    }

    fn create_progress_bar(&self, definition: &ReportDefinition) -> ProgressBar {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(definition.report_name.clone());
        pb.enable_steady_tick(Duration::from_millis(120));
        pb
    }
}

/// Saves the list of reports available to this account as [`CATALOG_CSV`].
pub async fn export_catalog(
    client: &WmsClient,
    credential: &Credential,
    output_dir: &Path,
) -> Result<usize, PipelineError> {
    let catalog = client.available_reports(credential).await?;
    let path = output_dir.join(CATALOG_CSV);
    let rows = exporter::export(&catalog, &path)?;
    info!("Saved {} ({} reports)", path.display(), rows);
    Ok(rows)
}

async fn remove_local(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Could not remove {}: {}", path.display(), e);
        }
    }
}
