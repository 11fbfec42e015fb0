/*!
Amazon DynamoDB store adapter.

Backs the store port with the official AWS SDK: `ListTables`,
`CreateBackup`, `ListBackups` and `DeleteBackup`.
*/

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_dynamodb::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_dynamodb::operation::delete_backup::DeleteBackupError;
use aws_sdk_dynamodb::primitives::DateTime as AwsDateTime;
use aws_sdk_dynamodb::types::{BackupDetails, BackupSummary};
use aws_sdk_dynamodb::Client as DynamoClient;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::{
    BackupDescriptor, BackupPage, BackupRecord, BackupStore, TablePage, OP_CREATE_BACKUP,
    OP_DELETE_BACKUP, OP_LIST_BACKUPS, OP_LIST_TABLES,
};
use crate::{BackupConfig, BackupError, Result};

/// DynamoDB store adapter
///
/// Uses the standard AWS credential provider chain:
/// 1. Environment variables (AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY, AWS_SESSION_TOKEN)
/// 2. AWS credentials file (~/.aws/credentials)
/// 3. IAM roles for EC2 instances, ECS task roles and web identity tokens
///
/// The SDK client is cheap to clone and safe to share across tasks.
///
/// # Example
/// ```rust,no_run
/// use dynamo_backups_core::store::dynamodb::DynamoDbStore;
/// use dynamo_backups_core::BackupConfig;
///
/// # async fn example() -> dynamo_backups_core::Result<()> {
/// let store = DynamoDbStore::from_config(&BackupConfig::with_pattern("^orders_")).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct DynamoDbStore {
    client: DynamoClient,
}

impl DynamoDbStore {
    /// Load AWS configuration from the environment, honouring the region and
    /// endpoint overrides in `config`
    pub async fn from_config(config: &BackupConfig) -> Result<Self> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        if let Some(endpoint) = &config.endpoint_url {
            loader = loader.endpoint_url(endpoint.clone());
        }
        let sdk_config = loader.load().await;

        if sdk_config.credentials_provider().is_none() {
            return Err(BackupError::validation(
                "AWS credentials not found. Configure the AWS credential provider chain (e.g. AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY)",
            ));
        }

        info!(
            region = ?sdk_config.region(),
            endpoint = ?config.endpoint_url,
            "Initialized DynamoDB store"
        );
        Ok(Self::with_config(&sdk_config))
    }

    /// Create a store from an explicit AWS SDK configuration
    pub fn with_config(config: &SdkConfig) -> Self {
        DynamoDbStore {
            client: DynamoClient::new(config),
        }
    }

    /// Wrap an existing client
    pub fn from_client(client: DynamoClient) -> Self {
        DynamoDbStore { client }
    }
}

#[async_trait]
impl BackupStore for DynamoDbStore {
    async fn list_tables(&self, exclusive_start: Option<String>) -> Result<TablePage> {
        let output = self
            .client
            .list_tables()
            .set_exclusive_start_table_name(exclusive_start)
            .send()
            .await
            .map_err(|e| map_dynamodb_error(OP_LIST_TABLES, e))?;

        Ok(TablePage {
            names: output.table_names.unwrap_or_default(),
            next: output.last_evaluated_table_name,
        })
    }

    async fn create_backup(&self, table: &str, backup_name: &str) -> Result<BackupDescriptor> {
        let output = self
            .client
            .create_backup()
            .table_name(table)
            .backup_name(backup_name)
            .send()
            .await
            .map_err(|e| map_dynamodb_error(OP_CREATE_BACKUP, e))?;

        let descriptor = match output.backup_details {
            Some(details) => descriptor_from_details(table, &details),
            None => BackupDescriptor {
                table: table.to_string(),
                name: backup_name.to_string(),
                reference: String::new(),
                created_at: None,
                status: None,
            },
        };
        debug!(table, backup_name, reference = %descriptor.reference, "CreateBackup accepted");
        Ok(descriptor)
    }

    async fn list_backups(
        &self,
        table: &str,
        created_before: DateTime<Utc>,
        exclusive_start: Option<String>,
    ) -> Result<BackupPage> {
        let output = self
            .client
            .list_backups()
            .table_name(table)
            .time_range_upper_bound(to_aws(created_before))
            .set_exclusive_start_backup_arn(exclusive_start)
            .send()
            .await
            .map_err(|e| map_dynamodb_error(OP_LIST_BACKUPS, e))?;

        let backups = output
            .backup_summaries
            .unwrap_or_default()
            .into_iter()
            .filter_map(|summary| record_from_summary(table, summary))
            .collect();

        Ok(BackupPage {
            backups,
            next: output.last_evaluated_backup_arn,
        })
    }

    async fn delete_backup(&self, reference: &str) -> Result<BackupDescriptor> {
        let output = self
            .client
            .delete_backup()
            .backup_arn(reference)
            .send()
            .await
            .map_err(|e| map_delete_error(reference, e))?;

        let details = output
            .backup_description
            .and_then(|description| description.backup_details);
        Ok(match details {
            Some(details) => descriptor_from_details("", &details),
            None => BackupDescriptor {
                table: String::new(),
                name: String::new(),
                reference: reference.to_string(),
                created_at: None,
                status: None,
            },
        })
    }
}

fn to_chrono(value: &AwsDateTime) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(value.secs(), value.subsec_nanos())
}

/// Full precision; chrono reports leap seconds as nanos past 1e9, which the SDK rejects
fn to_aws(value: DateTime<Utc>) -> AwsDateTime {
    AwsDateTime::from_secs_and_nanos(value.timestamp(), value.timestamp_subsec_nanos().min(999_999_999))
}

fn descriptor_from_details(table: &str, details: &BackupDetails) -> BackupDescriptor {
    BackupDescriptor {
        table: table.to_string(),
        name: details.backup_name().to_string(),
        reference: details.backup_arn().to_string(),
        created_at: to_chrono(details.backup_creation_date_time()),
        status: Some(details.backup_status().as_str().to_string()),
    }
}

/// Summaries without an ARN or creation time cannot be expired safely and are skipped
fn record_from_summary(table: &str, summary: BackupSummary) -> Option<BackupRecord> {
    let created_at = summary.backup_creation_date_time.as_ref().and_then(to_chrono);
    match (summary.backup_arn, created_at) {
        (Some(reference), Some(created_at)) => Some(BackupRecord {
            table: summary.table_name.unwrap_or_else(|| table.to_string()),
            name: summary.backup_name.unwrap_or_default(),
            created_at,
            reference,
        }),
        (reference, _) => {
            debug!(table, reference = ?reference, "Skipping incomplete backup summary");
            None
        }
    }
}

/// Map AWS SDK errors to BackupError with the service error code up front
fn map_dynamodb_error<E, R>(operation: &'static str, error: SdkError<E, R>) -> BackupError
where
    E: ProvideErrorMetadata + std::fmt::Debug,
    R: std::fmt::Debug,
{
    match &error {
        SdkError::DispatchFailure(dispatch_err) => BackupError::store(
            operation,
            format!("request failed to dispatch: {dispatch_err:?}"),
        ),
        SdkError::TimeoutError(_) => BackupError::store(operation, "request timed out"),
        SdkError::ResponseError(response_err) => {
            BackupError::store(operation, format!("response error: {response_err:?}"))
        }
        SdkError::ServiceError(service_err) => {
            let err = service_err.err();
            match err.code() {
                Some(code) => BackupError::store(
                    operation,
                    format!("{}: {}", code, err.message().unwrap_or("Unknown error")),
                ),
                None => BackupError::store(operation, format!("service error: {err:?}")),
            }
        }
        _ => BackupError::store(operation, format!("{error:?}")),
    }
}

/// A backup that is already gone is reported as such, every other failure goes through the generic mapping
fn map_delete_error<R>(reference: &str, error: SdkError<DeleteBackupError, R>) -> BackupError
where
    R: std::fmt::Debug,
{
    if error
        .as_service_error()
        .is_some_and(DeleteBackupError::is_backup_not_found_exception)
    {
        return BackupError::BackupNotFound(reference.to_string());
    }
    map_dynamodb_error(OP_DELETE_BACKUP, error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_dynamodb::types::error::{BackupInUseException, BackupNotFoundException};
    use aws_smithy_runtime_api::client::orchestrator::HttpResponse;
    use aws_smithy_types::body::SdkBody;
    use chrono::TimeZone;

    const REFERENCE: &str = "arn:aws:dynamodb:eu-west-1:123:table/orders/backup/01";

    fn bad_request() -> HttpResponse {
        HttpResponse::new(400u16.try_into().unwrap(), SdkBody::empty())
    }

    #[test]
    fn test_timeout_error_mapping() {
        let error: SdkError<aws_sdk_dynamodb::operation::list_tables::ListTablesError> =
            SdkError::timeout_error("deadline elapsed");
        let mapped = map_dynamodb_error(OP_LIST_TABLES, error);

        match mapped {
            BackupError::Store { operation, message } => {
                assert_eq!(operation, OP_LIST_TABLES);
                assert!(message.contains("timed out"));
            }
            other => panic!("Expected store error, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_backup_maps_to_not_found() {
        let error = SdkError::service_error(
            DeleteBackupError::BackupNotFoundException(
                BackupNotFoundException::builder()
                    .message("Backup not found")
                    .build(),
            ),
            bad_request(),
        );

        match map_delete_error(REFERENCE, error) {
            BackupError::BackupNotFound(reference) => assert_eq!(reference, REFERENCE),
            other => panic!("Expected backup not found, got {other:?}"),
        }
    }

    #[test]
    fn test_other_delete_failures_stay_store_errors() {
        let error = SdkError::service_error(
            DeleteBackupError::BackupInUseException(
                BackupInUseException::builder().message("Backup in use").build(),
            ),
            bad_request(),
        );

        assert!(matches!(
            map_delete_error(REFERENCE, error),
            BackupError::Store { operation: OP_DELETE_BACKUP, .. }
        ));
    }

    #[test]
    fn test_cutoff_keeps_sub_millisecond_precision() {
        let cutoff = Utc.with_ymd_and_hms(2024, 3, 9, 12, 0, 0).unwrap()
            + chrono::Duration::nanoseconds(123_456_789);

        let upper_bound = to_aws(cutoff);

        assert_eq!(upper_bound.subsec_nanos(), 123_456_789);
        assert_eq!(to_chrono(&upper_bound), Some(cutoff));
    }

    #[test]
    fn test_summary_conversion() {
        let created = Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap();
        let summary = BackupSummary::builder()
            .backup_arn("arn:aws:dynamodb:eu-west-1:123:table/orders/backup/01")
            .backup_name("orders_20240301083000")
            .backup_creation_date_time(AwsDateTime::from_secs(created.timestamp()))
            .build();

        let record = record_from_summary("orders", summary).unwrap();
        assert_eq!(record.table, "orders");
        assert_eq!(record.name, "orders_20240301083000");
        assert_eq!(record.created_at, created);
    }

    #[test]
    fn test_summary_without_arn_is_skipped() {
        let summary = BackupSummary::builder()
            .backup_name("orders_20240301083000")
            .backup_creation_date_time(AwsDateTime::from_secs(1_700_000_000))
            .build();

        assert!(record_from_summary("orders", summary).is_none());
    }
}
