pub mod cli;
pub mod config;
pub mod mailbox;
pub mod run;
pub mod runlog;

use std::io::Write;

use appledger_ynab::YnabClient;
use chrono::{Local, Utc};

use crate::cli::Cli;
use crate::config::{AppMode, RuntimeConfig};
use crate::run::{RunContext, RunError, RunOptions, RunReport, EXIT_FAILURE, EXIT_OK};
use crate::runlog::{LogSink, Outcome, RunLog, RunMode};

/// Runs one invocation and returns the process exit code.
///
/// Every invocation writes at least one run log entry: a `failed` entry when the
/// run stops before any receipt is read, and a `noop` entry when email mode
/// selects nothing.
pub async fn execute(cli: Cli) -> u8 {
    let mode = if cli.dry_run { RunMode::DryRun } else { RunMode::Live };
    let mut sink = LogSink::new(cli.log.clone(), cli.dry_run);

    let reports = match run_all(&cli, &mut sink).await {
        Ok(reports) => reports,
        Err(e) => {
            tracing::error!("{e}");
            let source = cli
                .receipt_path
                .as_ref()
                .map_or_else(|| "mailbox".to_string(), |p| p.display().to_string());
            let mut log = RunLog::new(mode, source);
            log.fail(&e);
            vec![RunReport { log, error: Some(e) }]
        }
    };

    let mut stdout = std::io::stdout().lock();
    let mut code = reports.iter().map(RunReport::exit_code).max().unwrap_or(EXIT_OK);
    for report in &reports {
        if let Err(e) = sink.write(&report.log, &mut stdout) {
            tracing::error!("Failed to write run log: {e}");
            code = code.max(EXIT_FAILURE);
        }
    }
    let _ = stdout.flush();
    code
}

async fn run_all(cli: &Cli, sink: &mut LogSink) -> Result<Vec<RunReport>, RunError> {
    let config = config::discover(cli.config.as_deref()).and_then(|p| RuntimeConfig::load(&p))?;
    if let Some(path) = cli.log.clone().or_else(|| config.app.log_path.clone()) {
        *sink = LogSink::new(Some(path), cli.dry_run);
    }

    let mode = config.app.mode;
    match (mode, &cli.receipt_path) {
        (AppMode::Local, None) => {
            return Err(RunError::Usage(
                "A receipt path is required when app.mode is 'local'".into(),
            ));
        }
        (AppMode::Email, Some(_)) => {
            return Err(RunError::Usage(
                "Do not pass a receipt path when app.mode is 'email'".into(),
            ));
        }
        _ => {}
    }

    let client = YnabClient::new(&config.ynab.api_url, &config.ynab.api_token, &config.ynab.budget_id)?;
    let options = RunOptions {
        dry_run: cli.dry_run,
        reimport: cli.reimport,
    };
    let email = config.email.clone();
    let mut ctx = RunContext::new(config, client, options, Local::now().date_naive());

    if let Some(path) = &cli.receipt_path {
        return Ok(vec![ctx.process_file(path).await]);
    }

    let email = email.ok_or(config::ConfigError::MissingEmailSection)?;
    let paths = mailbox::select_receipts(&email, Utc::now())?;
    if paths.is_empty() {
        tracing::info!("No receipts selected from {}", email.inbox_dir.display());
        let run_mode = if cli.dry_run { RunMode::DryRun } else { RunMode::Live };
        let mut log = RunLog::new(run_mode, email.inbox_dir.display().to_string());
        log.outcome = Outcome::Noop;
        return Ok(vec![RunReport { log, error: None }]);
    }

    let mut reports = Vec::with_capacity(paths.len());
    for path in &paths {
        reports.push(ctx.process_file(path).await);
    }
    Ok(reports)
}
