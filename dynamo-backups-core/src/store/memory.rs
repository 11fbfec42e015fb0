/*!
In-memory store adapter.

Holds tables and backups in process memory and serves them with the same
paging contract as DynamoDB. Faults (failing calls, stalled calls, a table
listing that breaks mid-way) can be injected per table or backup, and call
counts plus peak concurrency are recorded so the engine's fan-out can be
observed from the outside.
*/

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use super::{
    BackupDescriptor, BackupPage, BackupRecord, BackupStore, TablePage, OP_CREATE_BACKUP,
    OP_DELETE_BACKUP, OP_LIST_BACKUPS, OP_LIST_TABLES,
};
use crate::{BackupError, Result};

#[derive(Debug, Default)]
struct MemoryState {
    tables: Vec<String>,
    backups: Vec<BackupRecord>,
    next_id: u64,
}

#[derive(Debug, Default)]
struct Faults {
    failing_creates: HashSet<String>,
    failing_backup_listings: HashSet<String>,
    failing_deletes: HashSet<String>,
    table_listing_fails_after: Option<usize>,
    stalled: HashSet<(&'static str, String)>,
}

/// Store adapter backed by process memory
///
/// # Example
/// ```rust
/// use chrono::{Duration, Utc};
/// use dynamo_backups_core::store::memory::InMemoryStore;
///
/// let store = InMemoryStore::new()
///     .with_table("orders")
///     .with_backup("orders", "orders_old", Utc::now() - Duration::days(3))
///     .failing_create("orders");
/// ```
#[derive(Debug)]
pub struct InMemoryStore {
    state: Mutex<MemoryState>,
    faults: Faults,
    table_page_size: usize,
    backup_page_size: usize,
    inclusive_upper_bound: bool,
    latency: Option<Duration>,
    calls: StdMutex<HashMap<&'static str, usize>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Create an empty store serving pages of 100 tables and 100 backups
    pub fn new() -> Self {
        InMemoryStore {
            state: Mutex::new(MemoryState::default()),
            faults: Faults::default(),
            table_page_size: 100,
            backup_page_size: 100,
            inclusive_upper_bound: false,
            latency: None,
            calls: StdMutex::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Add a table; tables are listed in insertion order
    pub fn with_table(mut self, name: impl Into<String>) -> Self {
        self.state.get_mut().tables.push(name.into());
        self
    }

    /// Add several tables at once
    pub fn with_tables<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state
            .get_mut()
            .tables
            .extend(names.into_iter().map(Into::into));
        self
    }

    /// Add an existing backup of `table` created at `created_at`
    pub fn with_backup(
        mut self,
        table: impl Into<String>,
        name: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let state = self.state.get_mut();
        let table = table.into();
        let reference = backup_reference(&table, state.next_id);
        state.next_id += 1;
        state.backups.push(BackupRecord {
            table,
            name: name.into(),
            created_at,
            reference,
        });
        self
    }

    pub fn with_table_page_size(mut self, size: usize) -> Self {
        self.table_page_size = size.max(1);
        self
    }

    pub fn with_backup_page_size(mut self, size: usize) -> Self {
        self.backup_page_size = size.max(1);
        self
    }

    /// Treat `created_before` as inclusive, as a sloppier store might
    pub fn with_inclusive_upper_bound(mut self) -> Self {
        self.inclusive_upper_bound = true;
        self
    }

    /// Delay every call by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make `create_backup` fail for `table`
    pub fn failing_create(mut self, table: impl Into<String>) -> Self {
        self.faults.failing_creates.insert(table.into());
        self
    }

    /// Make `list_backups` fail for `table`
    pub fn failing_backup_listing(mut self, table: impl Into<String>) -> Self {
        self.faults.failing_backup_listings.insert(table.into());
        self
    }

    /// Make `delete_backup` fail for the backup named `backup_name`
    pub fn failing_delete(mut self, backup_name: impl Into<String>) -> Self {
        self.faults.failing_deletes.insert(backup_name.into());
        self
    }

    /// Make `list_tables` fail once `pages` pages have been served
    pub fn failing_table_listing_after(mut self, pages: usize) -> Self {
        self.faults.table_listing_fails_after = Some(pages);
        self
    }

    /// Make `operation` never complete for `key` (a table name, or a backup name for deletes)
    pub fn stalling(mut self, operation: &'static str, key: impl Into<String>) -> Self {
        self.faults.stalled.insert((operation, key.into()));
        self
    }

    /// Number of calls made to `operation`
    pub fn calls(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .map(|calls| calls.get(operation).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Highest number of calls observed in flight at once
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Current backups of `table`, oldest first
    pub async fn backups_of(&self, table: &str) -> Vec<BackupRecord> {
        let state = self.state.lock().await;
        let mut backups: Vec<BackupRecord> = state
            .backups
            .iter()
            .filter(|b| b.table == table)
            .cloned()
            .collect();
        backups.sort_by_key(|b| b.created_at);
        backups
    }

    async fn enter(&self, operation: &'static str, key: &str) -> InFlight<'_> {
        if let Ok(mut calls) = self.calls.lock() {
            *calls.entry(operation).or_insert(0) += 1;
        }
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);
        let guard = InFlight {
            counter: &self.in_flight,
        };

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.faults.stalled.contains(&(operation, key.to_string())) {
            debug!(operation, key, "Stalling in-memory store call");
            std::future::pending::<()>().await;
        }
        guard
    }
}

struct InFlight<'a> {
    counter: &'a AtomicUsize,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

fn backup_reference(table: &str, id: u64) -> String {
    format!("arn:memory:table/{table}/backup/{id:020}")
}

fn parse_offset(token: Option<String>) -> Result<usize> {
    match token {
        None => Ok(0),
        Some(token) => token.parse::<usize>().map_err(|_| {
            BackupError::store(OP_LIST_TABLES, format!("invalid start table token '{token}'"))
        }),
    }
}

#[async_trait]
impl BackupStore for InMemoryStore {
    async fn list_tables(&self, exclusive_start: Option<String>) -> Result<TablePage> {
        let _guard = self.enter(OP_LIST_TABLES, "").await;
        let offset = parse_offset(exclusive_start)?;

        if let Some(pages) = self.faults.table_listing_fails_after {
            if offset >= pages * self.table_page_size {
                return Err(BackupError::store(
                    OP_LIST_TABLES,
                    "InternalServerError: injected listing failure",
                ));
            }
        }

        let state = self.state.lock().await;
        let end = (offset + self.table_page_size).min(state.tables.len());
        let names = state.tables.get(offset..end).unwrap_or_default().to_vec();
        let next = (end < state.tables.len()).then(|| end.to_string());
        Ok(TablePage { names, next })
    }

    async fn create_backup(&self, table: &str, backup_name: &str) -> Result<BackupDescriptor> {
        let _guard = self.enter(OP_CREATE_BACKUP, table).await;
        if self.faults.failing_creates.contains(table) {
            return Err(BackupError::store(
                OP_CREATE_BACKUP,
                format!("injected create failure for table '{table}'"),
            ));
        }

        let mut state = self.state.lock().await;
        if !state.tables.iter().any(|t| t == table) {
            return Err(BackupError::store(
                OP_CREATE_BACKUP,
                format!("TableNotFoundException: table '{table}' not found"),
            ));
        }

        let reference = backup_reference(table, state.next_id);
        state.next_id += 1;
        let record = BackupRecord {
            table: table.to_string(),
            name: backup_name.to_string(),
            created_at: Utc::now(),
            reference,
        };
        state.backups.push(record.clone());

        Ok(BackupDescriptor {
            table: record.table,
            name: record.name,
            reference: record.reference,
            created_at: Some(record.created_at),
            status: Some("CREATING".to_string()),
        })
    }

    async fn list_backups(
        &self,
        table: &str,
        created_before: DateTime<Utc>,
        exclusive_start: Option<String>,
    ) -> Result<BackupPage> {
        let _guard = self.enter(OP_LIST_BACKUPS, table).await;
        if self.faults.failing_backup_listings.contains(table) {
            return Err(BackupError::store(
                OP_LIST_BACKUPS,
                format!("injected listing failure for table '{table}'"),
            ));
        }

        let state = self.state.lock().await;
        let matching: Vec<&BackupRecord> = state
            .backups
            .iter()
            .filter(|b| b.table == table)
            .filter(|b| {
                if self.inclusive_upper_bound {
                    b.created_at <= created_before
                } else {
                    b.created_at < created_before
                }
            })
            .collect();

        let start = match exclusive_start {
            None => 0,
            Some(reference) => matching
                .iter()
                .position(|b| b.reference == reference)
                .map(|pos| pos + 1)
                .ok_or_else(|| {
                    BackupError::store(
                        OP_LIST_BACKUPS,
                        format!("unknown start backup '{reference}'"),
                    )
                })?,
        };

        let end = (start + self.backup_page_size).min(matching.len());
        let backups: Vec<BackupRecord> = matching[start..end].iter().map(|b| (*b).clone()).collect();
        let next = if end < matching.len() {
            backups.last().map(|b| b.reference.clone())
        } else {
            None
        };
        Ok(BackupPage { backups, next })
    }

    async fn delete_backup(&self, reference: &str) -> Result<BackupDescriptor> {
        let mut state = self.state.lock().await;
        let position = state.backups.iter().position(|b| b.reference == reference);
        let name = position
            .map(|pos| state.backups[pos].name.clone())
            .unwrap_or_default();
        drop(state);

        let _guard = self.enter(OP_DELETE_BACKUP, &name).await;
        if self.faults.failing_deletes.contains(&name) {
            return Err(BackupError::store(
                OP_DELETE_BACKUP,
                format!("injected delete failure for backup '{name}'"),
            ));
        }

        state = self.state.lock().await;
        let position = state
            .backups
            .iter()
            .position(|b| b.reference == reference)
            .ok_or_else(|| BackupError::BackupNotFound(reference.to_string()))?;
        let record = state.backups.remove(position);

        Ok(BackupDescriptor {
            table: record.table,
            name: record.name,
            reference: record.reference,
            created_at: Some(record.created_at),
            status: Some("DELETED".to_string()),
        })
    }
}
