mod auth;
mod cli;
mod config;
mod docstore;
mod error;
mod exporter;
mod parser;
mod pipeline;
mod runner;
mod types;
mod wms;

use anyhow::{bail, Context};
use auth::TokenProvider;
use clap::Parser;
use cli::Cli;
use colored::*;
use config::Config;
use docstore::Gateway;
use log::{error, info};
use pipeline::Pipeline;
use runner::ReportRunner;
use types::ReportStatus;
use wms::WmsClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    info!("Starting warehouse report sync");

    let cli = Cli::parse();
    let config = Config::from_env(&cli.env_file, !cli.no_upload)
        .context("Invalid configuration")?;

    let definitions = match &cli.reports {
        Some(path) => parser::parse_definitions(path).await?,
        None => parser::default_definitions(),
    };
    info!("Loaded {} report definitions", definitions.len());

    let http = wms::build_http_client(config.wms.request_timeout)?;
    let client = WmsClient::new(http.clone(), &config.wms.base_url);

    let credential = match TokenProvider::new(client.clone(), &config.wms)
        .persist_to(config.env_file.clone())
        .obtain_credential()
        .await
    {
        Ok(credential) => {
            println!("{}", "Authorization header obtained successfully.".green());
            credential
        }
        Err(e) => {
            error!("Failed to obtain authorization: {}", e);
            eprintln!("{}", "Failed to obtain authorization header.".red());
            return Err(e.into());
        }
    };

    if cli.catalog {
        match pipeline::export_catalog(&client, &credential, &cli.output_dir).await {
            Ok(_) => println!("Saved {} successfully.", pipeline::CATALOG_CSV),
            Err(e) => {
                error!("Failed to retrieve available reports: {}", e);
                eprintln!("{}", "Failed to retrieve available reports".red());
            }
        }
    }

    let gateway = config
        .docstore
        .clone()
        .map(|docstore| Gateway::new(http.clone(), docstore));
    let runner = ReportRunner::new(client, config.polling);
    let pipeline = Pipeline::new(runner, gateway, cli.output_dir.clone(), cli.keep_local);

    let summary = pipeline.run_all(&definitions, &credential).await?;

    println!("\n{}", "Report Summary:".bold());
    println!("Total reports: {}", summary.total_reports);
    println!(
        "Succeeded: {} of {}",
        summary.successful_reports.to_string().green(),
        summary.total_reports
    );
    println!("Failed: {}", summary.failed_reports.to_string().red());
    println!("Total rows exported: {}", summary.total_rows);
    println!("Total duration: {:.2?}", summary.total_duration);

    if summary.successful_reports > 0 {
        println!("\n{}", "Successful Reports:".green().bold());
        for outcome in summary
            .outcomes
            .iter()
            .filter(|o| o.status == ReportStatus::Success)
        {
            let destination = outcome
                .remote_name
                .clone()
                .unwrap_or_else(|| outcome.definition.output_csv.clone());
            println!(
                "✓ {} -> {} ({} rows in {:.2?})",
                outcome.definition.report_name.green(),
                destination,
                outcome.rows,
                outcome.duration
            );
        }
    }

    if summary.failed_reports > 0 {
        println!("\n{}", "Failed Reports:".red().bold());
        for outcome in summary
            .outcomes
            .iter()
            .filter(|o| o.status == ReportStatus::Failed)
        {
            println!(
                "✗ {} - Error: {}",
                outcome.definition.report_name.red(),
                outcome.error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    if summary.all_succeeded() {
        println!("\n{}", "All reports completed successfully".green());
        Ok(())
    } else {
        error!("{} reports failed", summary.failed_reports);
        bail!(
            "{} of {} reports failed",
            summary.failed_reports,
            summary.total_reports
        )
    }
}
