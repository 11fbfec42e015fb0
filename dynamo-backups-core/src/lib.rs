/*!
# dynamo-backups core engine

Creates a fresh backup of every DynamoDB table matching a pattern and deletes
the backups of those tables that have outlived the retention window.

- A `TableMatcher` pages through the table listing and keeps the names that
  match the configured regular expression, in store order
- The `BackupOrchestrator` spawns one create task and one expire task per
  matched table and collects exactly one result of each per table
- Each expire task fans out once more, one delete task per stale backup, and
  waits for all of them before reporting

Every store call goes through the injected `BackupContext`, which bounds
concurrency, applies a per-call timeout and honours cancellation.

## Usage

```rust
use std::sync::Arc;
use dynamo_backups_core::{BackupConfig, BackupContext, BackupOrchestrator, RunSettings, TableMatcher};
use dynamo_backups_core::store::memory::InMemoryStore;

# #[tokio::main]
# async fn main() -> dynamo_backups_core::Result<()> {
let config = BackupConfig::with_pattern("^orders_");
config.validate()?;

let store = Arc::new(InMemoryStore::new().with_tables(["logs", "orders_2", "orders_1"]));
let ctx = Arc::new(BackupContext::new(store, RunSettings::from(&config)));
let matcher = TableMatcher::new(&config.table_pattern)?;

let report = BackupOrchestrator::new(ctx).run(&matcher).await?;
assert_eq!(report.matched, vec!["orders_2", "orders_1"]);
assert!(report.is_clean());
# Ok(())
# }
```
*/

pub mod config;
pub mod context;
pub mod error;
pub mod matcher;
pub mod observability;
pub mod orchestrator;
pub mod result;
pub mod store;
pub mod task;

/// Value of the `service` field on every log line of a run
pub const SERVICE_NAME: &str = "dynamodb-backups";

pub use config::{BackupConfig, BackupNameStyle};
pub use context::{BackupContext, Clock, FixedClock, RunSettings, SystemClock};
pub use error::{BackupError, Result};
pub use matcher::{TableMatch, TableMatcher};
pub use observability::{init_observability, LogFormat, LogSettings};
pub use orchestrator::{BackupOrchestrator, RunReport};
pub use result::{CreateResult, DeleteOutcome, ExpireResult};
pub use store::{BackupDescriptor, BackupRecord, BackupStore};
#[cfg(feature = "dynamodb")]
pub use store::dynamodb::DynamoDbStore;
