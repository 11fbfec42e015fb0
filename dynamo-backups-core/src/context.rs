/*!
Run context shared by every task of a backup run.

A single `BackupContext` carries the store handle, the run settings, the
tracing span all task logs hang off, the concurrency limiter, the
cancellation token and the clock. Tasks receive it as an `Arc` and make every
store call through [`BackupContext::call`], which is where the concurrency
bound, the per-call timeout and cancellation are enforced.
*/

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::Span;

use crate::config::{BackupConfig, BackupNameStyle};
use crate::store::BackupStore;
use crate::{BackupError, Result};

/// Source of "now" for cutoffs and backup names
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock in UTC
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock frozen at a given instant
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// The subset of configuration the tasks read
#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    pub expire_days: u32,
    pub name_style: BackupNameStyle,
    pub max_concurrency: usize,
    pub call_timeout: Duration,
    pub strict_listing: bool,
}

impl From<&BackupConfig> for RunSettings {
    fn from(config: &BackupConfig) -> Self {
        RunSettings {
            expire_days: config.expire_days,
            name_style: config.name_style,
            max_concurrency: config.max_concurrency.max(1),
            call_timeout: config.call_timeout(),
            strict_listing: config.strict_listing,
        }
    }
}

impl Default for RunSettings {
    fn default() -> Self {
        RunSettings::from(&BackupConfig::default())
    }
}

/// Everything a task needs, injected explicitly
pub struct BackupContext {
    store: Arc<dyn BackupStore>,
    settings: RunSettings,
    span: Span,
    limiter: Arc<Semaphore>,
    cancel: CancellationToken,
    clock: Arc<dyn Clock>,
}

impl BackupContext {
    /// Create a context over `store` with a fresh limiter and cancellation token
    pub fn new(store: Arc<dyn BackupStore>, settings: RunSettings) -> Self {
        let limiter = Arc::new(Semaphore::new(settings.max_concurrency.max(1)));
        BackupContext {
            store,
            settings,
            span: tracing::info_span!("backup_run", service = crate::SERVICE_NAME),
            limiter,
            cancel: CancellationToken::new(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Use `token` to cancel the run from outside
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Parent span for all task logs
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn store(&self) -> &dyn BackupStore {
        self.store.as_ref()
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Backups created strictly before this instant are stale
    pub fn expiry_cutoff(&self) -> DateTime<Utc> {
        self.now() - ChronoDuration::days(i64::from(self.settings.expire_days))
    }

    /// Run one store call under the concurrency bound, the call timeout and cancellation
    ///
    /// The permit is held only while `call` runs, so a task waiting on its
    /// own children never occupies a slot.
    pub async fn call<T, F>(&self, operation: &'static str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let _permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(BackupError::Cancelled { operation }),
            permit = self.limiter.acquire() => {
                permit.map_err(|_| BackupError::Cancelled { operation })?
            }
        };

        #[cfg(feature = "metrics")]
        let timer = crate::observability::MetricsTimer::start(operation);

        let timeout = self.settings.call_timeout;
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(BackupError::Cancelled { operation }),
            outcome = tokio::time::timeout(timeout, call) => match outcome {
                Ok(result) => result,
                Err(_) => Err(BackupError::Timeout { operation, after: timeout }),
            },
        };

        #[cfg(feature = "metrics")]
        timer.finish_with(result.is_ok());

        result
    }
}

impl std::fmt::Debug for BackupContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupContext")
            .field("settings", &self.settings)
            .field("available_permits", &self.limiter.available_permits())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}
