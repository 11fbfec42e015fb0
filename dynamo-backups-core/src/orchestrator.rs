/*!
Backup orchestration.

The orchestrator fans out one create task and one expire task per matched
table, then fans both result channels back in. Results are consumed in
completion order, so logs for different tables interleave freely; the only
guarantee is that `run_tables` returns exactly one create and one expire
result per table.
*/

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{error, info, info_span, Instrument};

use crate::context::BackupContext;
use crate::matcher::TableMatcher;
use crate::result::{CreateResult, ExpireResult};
use crate::task::{spawn_reporting, CreateTask, ExpireTask};
use crate::{BackupError, Result};

/// Everything a run produced
#[derive(Debug)]
pub struct RunReport {
    pub pattern: String,
    pub matched: Vec<String>,
    /// Set when the table listing stopped early and the run went ahead with a partial set
    pub listing_error: Option<BackupError>,
    pub creates: Vec<CreateResult>,
    pub expires: Vec<ExpireResult>,
    pub elapsed: Duration,
}

impl RunReport {
    /// True when the listing was complete and every create, listing and delete succeeded
    pub fn is_clean(&self) -> bool {
        self.listing_error.is_none()
            && self.creates.iter().all(CreateResult::is_ok)
            && self.expires.iter().all(ExpireResult::is_ok)
    }

    pub fn failed_creates(&self) -> impl Iterator<Item = &CreateResult> {
        self.creates.iter().filter(|r| !r.is_ok())
    }

    pub fn failed_expires(&self) -> impl Iterator<Item = &ExpireResult> {
        self.expires.iter().filter(|r| !r.is_ok())
    }

    pub fn total_processed(&self) -> usize {
        self.expires.iter().map(|r| r.processed).sum()
    }

    pub fn total_deleted(&self) -> usize {
        self.expires.iter().map(|r| r.deleted).sum()
    }
}

/// Runs create and expire work for a set of tables
#[derive(Debug, Clone)]
pub struct BackupOrchestrator {
    ctx: Arc<BackupContext>,
}

impl BackupOrchestrator {
    pub fn new(ctx: Arc<BackupContext>) -> Self {
        BackupOrchestrator { ctx }
    }

    pub fn context(&self) -> &BackupContext {
        &self.ctx
    }

    /// Match tables with `matcher`, then back up and expire every match
    ///
    /// Fails only when strict listing is enabled and the table listing was
    /// partial; every per-table failure ends up in the report instead.
    pub async fn run(&self, matcher: &TableMatcher) -> Result<RunReport> {
        let span = self.ctx.span().clone();
        self.run_inner(matcher).instrument(span).await
    }

    async fn run_inner(&self, matcher: &TableMatcher) -> Result<RunReport> {
        let start = Instant::now();

        let table_match = matcher.matching_tables(&self.ctx).await;
        let (matched, listing_error) = if self.ctx.settings().strict_listing {
            (table_match.into_complete()?, None)
        } else {
            (table_match.tables, table_match.listing_error)
        };

        info!(
            matched_tables = ?matched,
            count = matched.len(),
            regex = %matcher.pattern(),
            "Matched {} tables",
            matched.len()
        );

        let (creates, expires) = self.run_tables(&matched).await;

        let elapsed = start.elapsed();
        info!(elapsed = ?elapsed, "Run execution time: {:?}", elapsed);

        Ok(RunReport {
            pattern: matcher.pattern().to_string(),
            matched,
            listing_error,
            creates,
            expires,
            elapsed,
        })
    }

    /// Create and expire backups for `tables`, returning one result of each kind per table
    pub async fn run_tables(&self, tables: &[String]) -> (Vec<CreateResult>, Vec<ExpireResult>) {
        let expected = tables.len();
        if expected == 0 {
            return (Vec::new(), Vec::new());
        }

        let (create_tx, mut create_rx) = mpsc::channel::<CreateResult>(expected);
        let (expire_tx, mut expire_rx) = mpsc::channel::<ExpireResult>(expected);

        let mut names = HashMap::with_capacity(expected);
        for table in tables {
            let span = info_span!(parent: self.ctx.span(), "create", table = %table);
            let task = CreateTask::new(Arc::clone(&self.ctx), table.clone());
            names.insert(table.as_str(), task.backup_name().to_string());
            spawn_reporting(task.run(), create_tx.clone(), span);

            let span = info_span!(parent: self.ctx.span(), "expire", table = %table);
            let task = ExpireTask::new(Arc::clone(&self.ctx), table.clone());
            spawn_reporting(task.run(), expire_tx.clone(), span);
        }
        drop(create_tx);
        drop(expire_tx);

        let mut creates = Vec::with_capacity(expected);
        let mut expires = Vec::with_capacity(expected);

        while creates.len() < expected || expires.len() < expected {
            tokio::select! {
                Some(result) = create_rx.recv(), if creates.len() < expected => {
                    log_create(&result);
                    creates.push(result);
                }
                Some(result) = expire_rx.recv(), if expires.len() < expected => {
                    log_expire(&result);
                    expires.push(result);
                }
                else => break,
            }
        }

        fill_missing(tables, &mut creates, |r| &r.table, |table| {
            CreateResult::failed(
                table.to_string(),
                names.get(table).cloned().unwrap_or_default(),
                BackupError::TaskAborted(table.to_string()),
            )
        });
        fill_missing(tables, &mut expires, |r| &r.table, |table| {
            ExpireResult::listing_failed(
                table.to_string(),
                BackupError::TaskAborted(table.to_string()),
            )
        });

        (creates, expires)
    }
}

fn log_create(result: &CreateResult) {
    match &result.error {
        None => info!(
            table = %result.table,
            backup_name = %result.backup_name,
            "Created backup for table {}",
            result.table
        ),
        Some(e) => error!(
            table = %result.table,
            backup_name = %result.backup_name,
            error = %e,
            "Backup creation failed for table {}",
            result.table
        ),
    }
}

fn log_expire(result: &ExpireResult) {
    match &result.error {
        None => info!(
            table = %result.table,
            count = result.processed,
            deleted = result.deleted,
            failed = result.failed,
            "Deleted {} backups from table {}",
            result.processed,
            result.table
        ),
        Some(e) => error!(
            table = %result.table,
            error = %e,
            "Backup expiry failed for table {}",
            result.table
        ),
    }
}

/// Add a synthesized result for every table whose task ended without reporting
fn fill_missing<R>(
    tables: &[String],
    results: &mut Vec<R>,
    table_of: impl Fn(&R) -> &String,
    aborted: impl Fn(&str) -> R,
) {
    if results.len() >= tables.len() {
        return;
    }
    let reported: HashSet<String> = results.iter().map(|r| table_of(r).clone()).collect();
    for table in tables {
        if !reported.contains(table) {
            error!(table = %table, "Task ended without reporting a result");
            results.push(aborted(table));
        }
    }
}
