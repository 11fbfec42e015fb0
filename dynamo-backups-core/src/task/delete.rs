/*!
Delete one stale backup.
*/

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::context::BackupContext;
use crate::result::DeleteOutcome;
use crate::store::{BackupRecord, OP_DELETE_BACKUP};
use crate::BackupError;

/// Deletes a single backup by its store reference
///
/// One call, no retry. A backup that is already gone counts as deleted: a
/// rerun after an interrupted pass re-lists stale backups and may race a
/// delete that already went through.
#[derive(Debug)]
pub struct DeleteTask {
    ctx: Arc<BackupContext>,
    backup: BackupRecord,
}

impl DeleteTask {
    pub fn new(ctx: Arc<BackupContext>, backup: BackupRecord) -> Self {
        DeleteTask { ctx, backup }
    }

    pub async fn run(self) -> DeleteOutcome {
        let DeleteTask { ctx, backup } = self;
        let BackupRecord {
            table,
            name,
            reference,
            ..
        } = backup;

        info!(
            table = %table,
            backup_name = %name,
            action = "deleteBackup",
            "Deleting backup for table {}",
            table
        );

        match ctx
            .call(OP_DELETE_BACKUP, ctx.store().delete_backup(&reference))
            .await
        {
            Ok(descriptor) => {
                debug!(response = ?descriptor, "deleteBackupOutput");
                DeleteOutcome::deleted(reference, name)
            }
            Err(BackupError::BackupNotFound(_)) => {
                warn!(
                    table = %table,
                    backup_name = %name,
                    reference = %reference,
                    "Backup was already deleted"
                );
                DeleteOutcome::already_deleted(reference, name)
            }
            Err(e) => {
                error!(table = %table, backup_name = %name, error = %e, "Failed to delete backup");
                DeleteOutcome::failed(reference, name, e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RunSettings;
    use crate::store::{BackupDescriptor, MockBackupStore};
    use chrono::Utc;

    fn record() -> BackupRecord {
        BackupRecord {
            table: "orders".to_string(),
            name: "orders_old".to_string(),
            created_at: Utc::now(),
            reference: "arn:aws:dynamodb:eu-west-1:1:table/orders/backup/01".to_string(),
        }
    }

    fn context(store: MockBackupStore) -> Arc<BackupContext> {
        Arc::new(BackupContext::new(Arc::new(store), RunSettings::default()))
    }

    #[tokio::test]
    async fn test_delete_uses_reference() {
        let mut store = MockBackupStore::new();
        store
            .expect_delete_backup()
            .withf(|reference| reference.ends_with("backup/01"))
            .times(1)
            .returning(|reference| {
                Ok(BackupDescriptor {
                    table: "orders".to_string(),
                    name: "orders_old".to_string(),
                    reference: reference.to_string(),
                    created_at: None,
                    status: Some("DELETED".to_string()),
                })
            });

        let outcome = DeleteTask::new(context(store), record()).run().await;

        assert!(outcome.error.is_none());
        assert!(!outcome.already_deleted);
        assert_eq!(outcome.backup_name, "orders_old");
    }

    #[tokio::test]
    async fn test_already_deleted_is_not_an_error() {
        let mut store = MockBackupStore::new();
        store
            .expect_delete_backup()
            .times(1)
            .returning(|reference| Err(BackupError::BackupNotFound(reference.to_string())));

        let outcome = DeleteTask::new(context(store), record()).run().await;

        assert!(outcome.error.is_none());
        assert!(outcome.already_deleted);
    }

    #[tokio::test]
    async fn test_store_failure_is_reported() {
        let mut store = MockBackupStore::new();
        store
            .expect_delete_backup()
            .times(1)
            .returning(|_| Err(BackupError::store(OP_DELETE_BACKUP, "LimitExceededException")));

        let outcome = DeleteTask::new(context(store), record()).run().await;

        assert!(matches!(outcome.error, Some(BackupError::Store { .. })));
        assert!(!outcome.already_deleted);
    }
}
