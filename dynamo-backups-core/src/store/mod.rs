/*!
Backing store abstraction for table backups.

This module defines the store port consumed by the engine and its adapters:
DynamoDB for real runs and an in-memory store used to exercise the engine
without a network. The engine drives pagination itself, so every adapter
returns one page per call together with a continuation token.
*/

#[cfg(feature = "dynamodb")]
pub mod dynamodb;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;

pub const OP_LIST_TABLES: &str = "list_tables";
pub const OP_CREATE_BACKUP: &str = "create_backup";
pub const OP_LIST_BACKUPS: &str = "list_backups";
pub const OP_DELETE_BACKUP: &str = "delete_backup";

/// One page of table names
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TablePage {
    pub names: Vec<String>,
    /// Start key for the next page; `None` on the last page
    pub next: Option<String>,
}

/// One page of backups
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackupPage {
    pub backups: Vec<BackupRecord>,
    /// Start reference for the next page; `None` on the last page
    pub next: Option<String>,
}

/// An existing backup as observed through a listing
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackupRecord {
    pub table: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    /// Store-assigned handle (the backup ARN on DynamoDB)
    pub reference: String,
}

/// What the store reports back for a create or delete
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupDescriptor {
    pub table: String,
    pub name: String,
    pub reference: String,
    pub created_at: Option<DateTime<Utc>>,
    pub status: Option<String>,
}

/// Store abstraction for table enumeration and backup lifecycle calls
///
/// Implementations must be safe to call concurrently from many tasks; the
/// engine shares a single handle across every table and delete task and does
/// no locking of its own.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BackupStore: Send + Sync {
    /// List one page of table names, starting after `exclusive_start`
    async fn list_tables(&self, exclusive_start: Option<String>) -> Result<TablePage>;

    /// Create a backup named `backup_name` of `table`
    async fn create_backup(&self, table: &str, backup_name: &str) -> Result<BackupDescriptor>;

    /// List one page of backups of `table` created before `created_before`
    async fn list_backups(
        &self,
        table: &str,
        created_before: DateTime<Utc>,
        exclusive_start: Option<String>,
    ) -> Result<BackupPage>;

    /// Delete the backup identified by `reference`
    ///
    /// A backup that no longer exists must be reported as
    /// [`BackupError::BackupNotFound`](crate::BackupError::BackupNotFound).
    async fn delete_backup(&self, reference: &str) -> Result<BackupDescriptor>;
}
