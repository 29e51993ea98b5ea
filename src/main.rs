//! mailsheet — polls Gmail for unread mail and logs each message as a
//! row in a Google Sheet, exactly once.

mod config;
mod google;
mod ledger;
mod parser;
mod pipeline;

use std::process::ExitCode;
use std::time::Duration;

use config::Config;
use google::gmail::GmailClient;
use google::sheets::SheetsClient;
use ledger::Ledger;
use pipeline::{RunParams, RunSummary};

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    tokio::select! {
        result = run() => match result {
            Ok(summary) => {
                println!("Processed {} new message(s)", summary.processed);
                println!("Total recorded in ledger: {}", summary.total_recorded);
                ExitCode::SUCCESS
            }
            Err(e) => {
                log::error!("Run failed: {}", e);
                ExitCode::FAILURE
            }
        },
        // An interrupted run discards unsaved ledger additions; the sheet-
        // side duplicate check re-derives them next run.
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\nInterrupted");
            ExitCode::SUCCESS
        }
    }
}

async fn run() -> Result<RunSummary, Box<dyn std::error::Error>> {
    let cfg = Config::load()?;
    log::info!(
        "Starting run: query={:?} max_results={} sheet={:?}",
        cfg.query,
        cfg.max_results,
        cfg.sheet_name
    );

    let access_token = google::auth::ensure_access_token().await?;

    let gmail = GmailClient::new(access_token.clone());
    let sheets = SheetsClient::new(
        access_token,
        cfg.spreadsheet_id.clone(),
        cfg.sheet_name.clone(),
        cfg.column_headers.len(),
    );

    let mut ledger = Ledger::load(config::ledger_path());

    let params = RunParams {
        query: cfg.query,
        max_results: cfg.max_results,
        column_headers: cfg.column_headers,
        rate_limit_delay: Duration::from_millis(cfg.rate_limit_ms),
    };

    let summary = pipeline::run(&gmail, &sheets, &mut ledger, &params).await?;
    Ok(summary)
}
