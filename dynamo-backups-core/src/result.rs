/*!
Per-table results and per-backup outcomes passed back through the task channels.
*/

use crate::BackupError;

/// Outcome of the create task for one table
#[derive(Debug)]
pub struct CreateResult {
    pub table: String,
    /// The generated name, set even when the create call failed
    pub backup_name: String,
    pub error: Option<BackupError>,
}

impl CreateResult {
    pub fn succeeded(table: String, backup_name: String) -> Self {
        CreateResult {
            table,
            backup_name,
            error: None,
        }
    }

    pub fn failed(table: String, backup_name: String, error: BackupError) -> Self {
        CreateResult {
            table,
            backup_name,
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Outcome of the expire task for one table
///
/// `processed` counts every delete attempt, failed or not; `deleted` and
/// `failed` split that number. `processed == deleted + failed` always holds.
#[derive(Debug)]
pub struct ExpireResult {
    pub table: String,
    pub processed: usize,
    pub deleted: usize,
    pub failed: usize,
    /// Set only when the stale backups could not be listed
    pub error: Option<BackupError>,
}

impl ExpireResult {
    /// Fold the delete outcomes of one table into its result
    pub fn from_outcomes(table: String, outcomes: &[DeleteOutcome]) -> Self {
        let failed = outcomes.iter().filter(|o| o.error.is_some()).count();
        ExpireResult {
            table,
            processed: outcomes.len(),
            deleted: outcomes.len() - failed,
            failed,
            error: None,
        }
    }

    /// The listing failed, so nothing was attempted
    pub fn listing_failed(table: String, error: BackupError) -> Self {
        ExpireResult {
            table,
            processed: 0,
            deleted: 0,
            failed: 0,
            error: Some(error),
        }
    }

    /// Clean means the listing worked and every delete succeeded
    pub fn is_ok(&self) -> bool {
        self.error.is_none() && self.failed == 0
    }
}

/// Outcome of a single delete
#[derive(Debug)]
pub struct DeleteOutcome {
    pub reference: String,
    pub backup_name: String,
    /// The store no longer had the backup; counted as a success
    pub already_deleted: bool,
    pub error: Option<BackupError>,
}

impl DeleteOutcome {
    pub fn deleted(reference: String, backup_name: String) -> Self {
        DeleteOutcome {
            reference,
            backup_name,
            already_deleted: false,
            error: None,
        }
    }

    pub fn already_deleted(reference: String, backup_name: String) -> Self {
        DeleteOutcome {
            reference,
            backup_name,
            already_deleted: true,
            error: None,
        }
    }

    pub fn failed(reference: String, backup_name: String, error: BackupError) -> Self {
        DeleteOutcome {
            reference,
            backup_name,
            already_deleted: false,
            error: Some(error),
        }
    }
}
