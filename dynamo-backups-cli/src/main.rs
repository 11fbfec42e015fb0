/*!
dynamo-backups - create fresh DynamoDB backups and expire old ones.

One invocation is one pass: match tables, back each one up, delete its
backups older than the retention window, then exit. Meant to be run from a
scheduler (cron, EventBridge, a Kubernetes CronJob).

Exit status: 0 when every table succeeded, 1 when any table failed or the
table listing was partial, 2 when the configuration is unusable.
*/

use clap::{Parser, ValueEnum};
use dynamo_backups_core::{
    init_observability, BackupConfig, BackupContext, BackupError, BackupNameStyle,
    BackupOrchestrator, DynamoDbStore, LogSettings, RunReport, RunSettings, TableMatcher,
};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tabled::{Table, Tabled};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "dynamo-backups")]
#[command(about = "Back up DynamoDB tables matching a pattern and expire old backups")]
#[command(version)]
struct Cli {
    /// JSON configuration file; flags and environment variables override it
    #[arg(short, long, env = "BACKUP_CONFIG")]
    config: Option<PathBuf>,

    /// Regular expression selecting the tables to back up
    #[arg(long, env = "TABLE_REGEX")]
    table_regex: Option<String>,

    /// Delete backups older than this many days
    #[arg(long, env = "BACKUP_EXPIRE_DAYS")]
    expire_days: Option<u32>,

    /// Maximum number of DynamoDB calls in flight
    #[arg(long, env = "MAX_CONCURRENCY")]
    max_concurrency: Option<usize>,

    /// Timeout for each DynamoDB call, in seconds
    #[arg(long, env = "CALL_TIMEOUT_SECS")]
    call_timeout_secs: Option<u64>,

    /// Timestamp layout of backup names
    #[arg(long, env = "BACKUP_NAME_STYLE", value_enum)]
    name_style: Option<NameStyle>,

    /// Abort the run when the table listing fails part-way
    #[arg(long, env = "STRICT_LISTING")]
    strict_listing: bool,

    /// AWS region override
    #[arg(long, env = "AWS_REGION")]
    region: Option<String>,

    /// DynamoDB endpoint override (e.g. DynamoDB Local)
    #[arg(long, env = "DYNAMODB_ENDPOINT_URL")]
    endpoint_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log formatter (text or json)
    #[arg(long, env = "LOG_FORMATTER", default_value = "text")]
    log_formatter: String,

    /// Print a summary of the run to stdout
    #[arg(long, value_enum, default_value = "none")]
    summary: SummaryFormat,

    /// Write store call metrics in Prometheus text format to this file
    #[cfg(feature = "metrics")]
    #[arg(long, env = "METRICS_FILE")]
    metrics_file: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum NameStyle {
    /// No hour field, compatible with names from earlier releases
    Compat,
    /// Year through second
    Hourly,
}

impl From<NameStyle> for BackupNameStyle {
    fn from(style: NameStyle) -> Self {
        match style {
            NameStyle::Compat => BackupNameStyle::Compat,
            NameStyle::Hourly => BackupNameStyle::Hourly,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum SummaryFormat {
    None,
    Table,
    Json,
}

#[derive(Tabled, Serialize)]
struct TableSummary {
    #[tabled(rename = "Table")]
    table: String,
    #[tabled(rename = "Backup")]
    backup_name: String,
    #[tabled(rename = "Created")]
    created: bool,
    #[tabled(rename = "Processed")]
    processed: usize,
    #[tabled(rename = "Deleted")]
    deleted: usize,
    #[tabled(rename = "Failed")]
    failed: usize,
    #[tabled(rename = "Errors")]
    errors: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_settings = LogSettings::resolve(&cli.log_level, &cli.log_formatter);
    if let Err(e) = init_observability(&log_settings) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::from(2);
    }

    let config = match build_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return ExitCode::from(2);
        }
    };

    match run(&cli, &config).await {
        Ok(report) => {
            if let Err(e) = print_summary(&report, cli.summary) {
                warn!(error = %e, "Failed to print run summary");
            }
            #[cfg(feature = "metrics")]
            if let Some(path) = &cli.metrics_file {
                if let Err(e) = write_metrics(path) {
                    warn!(error = %e, path = %path.display(), "Failed to write metrics");
                }
            }

            if report.is_clean() {
                ExitCode::SUCCESS
            } else {
                warn!(
                    failed_creates = report.failed_creates().count(),
                    failed_expires = report.failed_expires().count(),
                    partial_listing = report.listing_error.is_some(),
                    "Run finished with errors"
                );
                ExitCode::from(1)
            }
        }
        Err(e @ BackupError::InvalidPattern { .. }) | Err(e @ BackupError::Validation(_)) => {
            error!(error = %e, "Invalid configuration");
            ExitCode::from(2)
        }
        Err(e) => {
            error!(error = %e, "Backup run failed");
            ExitCode::from(1)
        }
    }
}

/// File values first, then flags and environment on top
fn build_config(cli: &Cli) -> Result<BackupConfig, BackupError> {
    let mut config = match &cli.config {
        Some(path) => BackupConfig::from_json_file(path)?,
        None => BackupConfig::default(),
    };

    if let Some(pattern) = &cli.table_regex {
        config.table_pattern = pattern.clone();
    }
    if let Some(days) = cli.expire_days {
        config.expire_days = days;
    }
    if let Some(limit) = cli.max_concurrency {
        config.max_concurrency = limit;
    }
    if let Some(secs) = cli.call_timeout_secs {
        config.call_timeout_secs = secs;
    }
    if let Some(style) = cli.name_style {
        config.name_style = style.into();
    }
    if cli.strict_listing {
        config.strict_listing = true;
    }
    if cli.region.is_some() {
        config.region = cli.region.clone();
    }
    if cli.endpoint_url.is_some() {
        config.endpoint_url = cli.endpoint_url.clone();
    }

    config.validate()?;
    Ok(config)
}

async fn run(cli: &Cli, config: &BackupConfig) -> Result<RunReport, BackupError> {
    let matcher = TableMatcher::new(&config.table_pattern)?;
    if config.table_pattern.is_empty() {
        warn!("TABLE_REGEX is empty, every table will be backed up");
    }

    let store = DynamoDbStore::from_config(config).await?;

    let token = CancellationToken::new();
    let ctrl_c_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling in-flight calls");
            ctrl_c_token.cancel();
        }
    });

    let ctx = BackupContext::new(Arc::new(store), RunSettings::from(config)).with_cancellation(token);
    info!(
        expire_days = config.expire_days,
        max_concurrency = config.max_concurrency,
        call_timeout_secs = config.call_timeout_secs,
        name_style = ?config.name_style,
        config_file = ?cli.config,
        "Starting backup run"
    );

    BackupOrchestrator::new(Arc::new(ctx)).run(&matcher).await
}

fn summarize(report: &RunReport) -> Vec<TableSummary> {
    report
        .matched
        .iter()
        .map(|table| {
            let create = report.creates.iter().find(|r| &r.table == table);
            let expire = report.expires.iter().find(|r| &r.table == table);
            let errors: Vec<String> = create
                .and_then(|r| r.error.as_ref())
                .into_iter()
                .chain(expire.and_then(|r| r.error.as_ref()))
                .map(|e| e.to_string())
                .collect();

            TableSummary {
                table: table.clone(),
                backup_name: create.map(|r| r.backup_name.clone()).unwrap_or_default(),
                created: create.map(|r| r.is_ok()).unwrap_or(false),
                processed: expire.map(|r| r.processed).unwrap_or(0),
                deleted: expire.map(|r| r.deleted).unwrap_or(0),
                failed: expire.map(|r| r.failed).unwrap_or(0),
                errors: errors.join("; "),
            }
        })
        .collect()
}

fn print_summary(report: &RunReport, format: SummaryFormat) -> Result<(), anyhow::Error> {
    let rows = summarize(report);
    match format {
        SummaryFormat::None => {}
        SummaryFormat::Table => {
            if rows.is_empty() {
                println!("No tables matched '{}'", report.pattern);
            } else {
                println!("{}", Table::new(rows));
            }
            if let Some(e) = &report.listing_error {
                println!("Table listing incomplete: {e}");
            }
            println!(
                "{} table(s), {} backup(s) deleted, finished in {:.1?}",
                report.matched.len(),
                report.total_deleted(),
                report.elapsed
            );
        }
        SummaryFormat::Json => {
            let summary = serde_json::json!({
                "pattern": report.pattern,
                "clean": report.is_clean(),
                "listing_error": report.listing_error.as_ref().map(|e| e.to_string()),
                "elapsed_ms": report.elapsed.as_millis() as u64,
                "tables": rows,
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }
    Ok(())
}

#[cfg(feature = "metrics")]
fn write_metrics(path: &std::path::Path) -> Result<(), anyhow::Error> {
    let metrics = dynamo_backups_core::observability::BackupMetrics::global()
        .ok_or_else(|| anyhow::anyhow!("metrics are not available"))?;
    std::fs::write(path, metrics.gather_metrics()?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dynamo_backups_core::{CreateResult, ExpireResult};
    use std::time::Duration;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("dynamo-backups").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_flags_override_defaults() {
        let cli = parse(&[
            "--table-regex",
            "^orders_",
            "--expire-days",
            "7",
            "--name-style",
            "compat",
            "--strict-listing",
        ]);

        let config = build_config(&cli).unwrap();
        assert_eq!(config.table_pattern, "^orders_");
        assert_eq!(config.expire_days, 7);
        assert_eq!(config.name_style, BackupNameStyle::Compat);
        assert!(config.strict_listing);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let cli = parse(&["--table-regex", ".*", "--expire-days", "0"]);
        assert!(matches!(build_config(&cli), Err(BackupError::Validation(_))));
    }

    #[tokio::test]
    async fn test_invalid_pattern_fails_before_store_setup() {
        let cli = parse(&["--table-regex", "[unclosed"]);
        let config = build_config(&cli).unwrap();

        let result = run(&cli, &config).await;

        assert!(matches!(result, Err(BackupError::InvalidPattern { .. })));
    }

    #[test]
    fn test_summary_rows_follow_matched_order() {
        let report = RunReport {
            pattern: "^orders_".into(),
            matched: vec!["orders_2".into(), "orders_1".into()],
            listing_error: None,
            creates: vec![
                CreateResult::succeeded("orders_1".into(), "orders_1_20240310120000".into()),
                CreateResult::failed(
                    "orders_2".into(),
                    "orders_2_20240310120000".into(),
                    BackupError::store("create_backup", "LimitExceededException: too many"),
                ),
            ],
            expires: vec![
                ExpireResult::from_outcomes("orders_2".into(), &[]),
                ExpireResult::from_outcomes("orders_1".into(), &[]),
            ],
            elapsed: Duration::from_millis(12),
        };

        let rows = summarize(&report);
        assert_eq!(rows[0].table, "orders_2");
        assert!(!rows[0].created);
        assert!(rows[0].errors.contains("LimitExceededException"));
        assert_eq!(rows[1].table, "orders_1");
        assert!(rows[1].created);
        assert!(rows[1].errors.is_empty());
    }
}
