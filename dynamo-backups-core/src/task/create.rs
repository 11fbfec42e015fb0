/*!
Create one backup of one table.
*/

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::config::BackupNameStyle;
use crate::context::BackupContext;
use crate::result::CreateResult;
use crate::store::OP_CREATE_BACKUP;

/// Backup name for `table` at `at`: `<table>_<timestamp>` in UTC
///
/// With [`BackupNameStyle::Compat`] the timestamp has no hour field, so two
/// runs at the same minute and second of different hours produce the same
/// name.
pub fn backup_name(table: &str, at: DateTime<Utc>, style: BackupNameStyle) -> String {
    format!("{}_{}", table, at.format(style.timestamp_format()))
}

/// Creates a fresh backup of a single table
#[derive(Debug)]
pub struct CreateTask {
    ctx: Arc<BackupContext>,
    table: String,
    name: String,
}

impl CreateTask {
    /// The backup name is fixed here, from the context clock at construction time
    pub fn new(ctx: Arc<BackupContext>, table: String) -> Self {
        let name = backup_name(&table, ctx.now(), ctx.settings().name_style);
        CreateTask { ctx, table, name }
    }

    pub fn backup_name(&self) -> &str {
        &self.name
    }

    /// Issue one create call and report its outcome; never panics on store errors
    pub async fn run(self) -> CreateResult {
        let CreateTask { ctx, table, name } = self;

        match ctx
            .call(OP_CREATE_BACKUP, ctx.store().create_backup(&table, &name))
            .await
        {
            Ok(descriptor) => {
                info!(
                    table = %table,
                    action = "createBackup",
                    backup_name = %name,
                    "Creating backup for table {}",
                    table
                );
                debug!(response = ?descriptor, "Creating backup");
                CreateResult::succeeded(table, name)
            }
            Err(e) => {
                error!(table = %table, backup_name = %name, error = %e, "Failed to create backup");
                CreateResult::failed(table, name, e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{FixedClock, RunSettings};
    use crate::store::memory::InMemoryStore;
    use crate::BackupError;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, h, m, s).unwrap()
    }

    #[test]
    fn test_compat_names_omit_the_hour() {
        let first = backup_name("orders", at(9, 15, 30), BackupNameStyle::Compat);
        let second = backup_name("orders", at(17, 15, 30), BackupNameStyle::Compat);

        assert_eq!(first, "orders_202403101530");
        assert_eq!(first, second);
    }

    #[test]
    fn test_hourly_names_include_the_hour() {
        let first = backup_name("orders", at(9, 15, 30), BackupNameStyle::Hourly);
        let second = backup_name("orders", at(17, 15, 30), BackupNameStyle::Hourly);

        assert_eq!(first, "orders_20240310091530");
        assert_eq!(second, "orders_20240310171530");
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_create_task_creates_one_backup() {
        let store = Arc::new(InMemoryStore::new().with_table("orders"));
        let ctx = BackupContext::new(store.clone(), RunSettings::default())
            .with_clock(Arc::new(FixedClock(at(9, 15, 30))));

        let result = CreateTask::new(Arc::new(ctx), "orders".to_string())
            .run()
            .await;

        assert!(result.is_ok());
        assert_eq!(result.backup_name, "orders_20240310091530");
        let backups = store.backups_of("orders").await;
        assert_eq!(backups.len(), 1);
        assert_eq!(backups[0].name, "orders_20240310091530");
    }

    #[tokio::test]
    async fn test_create_task_reports_failure() {
        let store = Arc::new(InMemoryStore::new().with_table("orders").failing_create("orders"));
        let ctx = Arc::new(BackupContext::new(store.clone(), RunSettings::default()));

        let result = CreateTask::new(ctx, "orders".to_string()).run().await;

        assert!(matches!(result.error, Some(BackupError::Store { .. })));
        assert!(result.backup_name.starts_with("orders_"));
        assert!(store.backups_of("orders").await.is_empty());
    }
}
