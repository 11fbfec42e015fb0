/*!
Expire the stale backups of one table.
*/

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info_span};

use super::{barrier, spawn_reporting, DeleteTask};
use crate::context::BackupContext;
use crate::result::{DeleteOutcome, ExpireResult};
use crate::store::{BackupRecord, OP_LIST_BACKUPS};
use crate::{BackupError, Result};

/// Finds the backups of a table older than the retention window and deletes them
///
/// Deletes run concurrently, one task per backup, and the result is only
/// emitted once every one of them has reported.
#[derive(Debug)]
pub struct ExpireTask {
    ctx: Arc<BackupContext>,
    table: String,
}

impl ExpireTask {
    pub fn new(ctx: Arc<BackupContext>, table: String) -> Self {
        ExpireTask { ctx, table }
    }

    pub async fn run(self) -> ExpireResult {
        let cutoff = self.ctx.expiry_cutoff();

        let stale = match self.list_stale(cutoff).await {
            Ok(stale) => stale,
            Err(e) => {
                error!(table = %self.table, error = %e, "Failed to list backups");
                return ExpireResult::listing_failed(self.table, e);
            }
        };

        debug!(table = %self.table, %cutoff, stale = stale.len(), "Listed stale backups");
        if stale.is_empty() {
            return ExpireResult::from_outcomes(self.table, &[]);
        }

        let expected = stale.len();
        let (tx, mut rx) = mpsc::channel::<DeleteOutcome>(expected);
        let mut issued = Vec::with_capacity(expected);
        for backup in stale {
            let span = info_span!(
                parent: self.ctx.span(),
                "delete",
                table = %backup.table,
                backup_name = %backup.name
            );
            issued.push((backup.reference.clone(), backup.name.clone()));
            let task = DeleteTask::new(Arc::clone(&self.ctx), backup);
            spawn_reporting(task.run(), tx.clone(), span);
        }
        drop(tx);

        let mut outcomes = barrier(&mut rx, expected).await;
        if outcomes.len() < expected {
            let reported: HashSet<String> =
                outcomes.iter().map(|o| o.reference.clone()).collect();
            for (reference, name) in issued {
                if !reported.contains(&reference) {
                    let error = BackupError::TaskAborted(name.clone());
                    error!(table = %self.table, backup_name = %name, "Delete task ended without reporting");
                    outcomes.push(DeleteOutcome::failed(reference, name, error));
                }
            }
        }

        ExpireResult::from_outcomes(self.table, &outcomes)
    }

    /// All backups of the table created strictly before `cutoff`, across every page
    async fn list_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<BackupRecord>> {
        let mut stale = Vec::new();
        let mut start: Option<String> = None;

        loop {
            let page = self
                .ctx
                .call(
                    OP_LIST_BACKUPS,
                    self.ctx
                        .store()
                        .list_backups(&self.table, cutoff, start.take()),
                )
                .await?;

            stale.extend(
                page.backups
                    .into_iter()
                    .filter(|b| b.table == self.table && b.created_at < cutoff),
            );

            match page.next {
                Some(next) => start = Some(next),
                None => break,
            }
        }

        Ok(stale)
    }
}
