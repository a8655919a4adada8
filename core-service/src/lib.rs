//! Reconciliation service façade and bootstrap helpers.
//!
//! This crate wires host-provided pieces (the record loader, the adapters
//! for each accounting system, optional extra metric sinks) into the
//! reconciliation engine. Hosts build an [`EngineConfig`], register their
//! adapters on the writer factory builder and hand changed records to the
//! service.
//!
//! ```ignore
//! use core_service::{ReconciliationService, RecordChange, ServiceDependencies};
//!
//! let config = EngineConfig::builder()
//!     .database_url("sqlite:ledger-sync.db")
//!     .build()?;
//! core_runtime::logging::init_logging(config.logging.clone())?;
//!
//! let service = ReconciliationService::bootstrap(
//!     config,
//!     ServiceDependencies::new(loader),
//!     |factory| factory.integration(IntegrationType::Xero, xero_adapter),
//! )
//! .await?;
//!
//! let outcome = service
//!     .handle_change(&RecordChange::updated(invoice), &account, Some(IntegrationType::Xero))
//!     .await?;
//! ```

pub mod error;

pub use error::{Result, ServiceError};

use core_ledger::{
    create_pool, Account, DatabaseConfig, IntegrationType, LedgerRecord, TenantId, WritableRecord,
};
use core_runtime::events::{EventBus, ReconciliationEvent, Receiver};
use core_runtime::{Clock, EngineConfig, SystemClock};
use core_sync::{
    CounterMetrics, ErrorLog, EventBusMetrics, FanoutMetrics, MappingStore, ProfileStore,
    ReconciliationError, RecordLoader, Retrier, RetryOutcome, SkipReason, SqliteErrorLog,
    SqliteMappingStore, SqliteProfileStore, SyncMetrics, SyncProfile, WriteOutcome,
    WriterContext, WriterFactory, WriterFactoryBuilder,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Host-provided collaborators.
pub struct ServiceDependencies {
    pub loader: Arc<dyn RecordLoader>,
    pub clock: Arc<dyn Clock>,
    /// Sinks added next to the built-in event bus and counters
    pub metrics: Vec<Arc<dyn SyncMetrics>>,
}

impl ServiceDependencies {
    pub fn new(loader: Arc<dyn RecordLoader>) -> Self {
        Self {
            loader,
            clock: Arc::new(SystemClock),
            metrics: Vec::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_metrics(mut self, sink: Arc<dyn SyncMetrics>) -> Self {
        self.metrics.push(sink);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

/// A record change as emitted by the invoicing platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordChange {
    pub kind: ChangeKind,
    pub record: LedgerRecord,
}

impl RecordChange {
    pub fn created(record: impl Into<LedgerRecord>) -> Self {
        Self {
            kind: ChangeKind::Created,
            record: record.into(),
        }
    }

    pub fn updated(record: impl Into<LedgerRecord>) -> Self {
        Self {
            kind: ChangeKind::Updated,
            record: record.into(),
        }
    }

    pub fn deleted(record: impl Into<LedgerRecord>) -> Self {
        Self {
            kind: ChangeKind::Deleted,
            record: record.into(),
        }
    }
}

/// Tally of one batch. Failed writes are counted, not raised.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub written: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl BatchReport {
    fn record(&mut self, outcome: &WriteOutcome) {
        match outcome {
            WriteOutcome::Created { .. } | WriteOutcome::Updated | WriteOutcome::Voided => {
                self.written += 1
            }
            WriteOutcome::Skipped(_) => self.skipped += 1,
            WriteOutcome::Failed(_) => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.written + self.skipped + self.failed
    }
}

struct ServiceInner {
    pool: SqlitePool,
    ctx: WriterContext,
    factory: Arc<WriterFactory>,
    retrier: Retrier,
    events: EventBus,
}

/// Primary façade exposed to job workers.
#[derive(Clone)]
pub struct ReconciliationService {
    inner: Arc<ServiceInner>,
}

impl ReconciliationService {
    /// Open the database, build the stores and metric sinks, and assemble
    /// the writer factory from the adapters `register` adds.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the database
    /// cannot be opened and migrated
    pub async fn bootstrap<F>(
        config: EngineConfig,
        deps: ServiceDependencies,
        register: F,
    ) -> Result<Self>
    where
        F: FnOnce(WriterFactoryBuilder) -> WriterFactoryBuilder,
    {
        config.validate()?;
        info!(
            database_url = %config.database_url,
            metrics_enabled = config.metrics_enabled,
            "Bootstrapping reconciliation service"
        );

        let pool = create_pool(
            DatabaseConfig::from_url(config.database_url.clone())
                .max_connections(config.max_connections),
        )
        .await?;

        let events = EventBus::new(config.event_buffer_size);
        let mut metrics =
            FanoutMetrics::new().with(Arc::new(EventBusMetrics::new(events.clone())));
        if config.metrics_enabled {
            metrics = metrics.with(Arc::new(CounterMetrics));
        }
        for sink in deps.metrics {
            metrics = metrics.with(sink);
        }

        let ctx = WriterContext {
            mappings: Arc::new(SqliteMappingStore::new(pool.clone())),
            errors: Arc::new(SqliteErrorLog::new(pool.clone())),
            profiles: Arc::new(SqliteProfileStore::new(
                pool.clone(),
                deps.clock.clone(),
                config.profile_defaults,
            )),
            metrics: Arc::new(metrics),
            clock: deps.clock,
        };

        let factory = Arc::new(register(WriterFactory::builder(ctx.clone())).build());
        let retrier = Retrier::new(factory.clone(), &ctx, deps.loader);

        info!(
            integrations = ?factory.integrations(),
            "Reconciliation service ready"
        );

        Ok(Self {
            inner: Arc::new(ServiceInner {
                pool,
                ctx,
                factory,
                retrier,
                events,
            }),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.inner.pool
    }

    pub fn factory(&self) -> Arc<WriterFactory> {
        Arc::clone(&self.inner.factory)
    }

    pub fn mappings(&self) -> Arc<dyn MappingStore> {
        Arc::clone(&self.inner.ctx.mappings)
    }

    pub fn errors(&self) -> Arc<dyn ErrorLog> {
        Arc::clone(&self.inner.ctx.errors)
    }

    pub fn profiles(&self) -> Arc<dyn ProfileStore> {
        Arc::clone(&self.inner.ctx.profiles)
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn subscribe(&self) -> Receiver<ReconciliationEvent> {
        self.inner.events.subscribe()
    }

    /// Load or create the tenant's profile for an integration.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub async fn connect(
        &self,
        tenant_id: TenantId,
        integration: IntegrationType,
    ) -> Result<SyncProfile> {
        Ok(self
            .inner
            .ctx
            .profiles
            .get_or_create(tenant_id, integration)
            .await?)
    }

    /// Drop the profile; mappings and error rows stay.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub async fn disconnect(&self, tenant_id: TenantId, integration: IntegrationType) -> Result<bool> {
        Ok(self
            .inner
            .ctx
            .profiles
            .disconnect(tenant_id, integration)
            .await?)
    }

    /// Push one change to the tenant's integration, if it has one.
    ///
    /// # Errors
    ///
    /// Returns an error for unrecoverable failures only; adapter failures
    /// come back as [`WriteOutcome::Failed`]
    pub async fn handle_change(
        &self,
        change: &RecordChange,
        account: &Account,
        integration: Option<IntegrationType>,
    ) -> Result<WriteOutcome> {
        let Some(integration) = integration else {
            return Ok(WriteOutcome::Skipped(SkipReason::NotConfigured));
        };
        if !self.is_configured(change, integration) {
            return Ok(WriteOutcome::Skipped(SkipReason::NotConfigured));
        }
        let mut profile = self.connect(account.tenant_id, integration).await?;
        self.dispatch(change, account, &mut profile).await
    }

    /// Push a batch of changes, continuing past failed writes.
    ///
    /// # Errors
    ///
    /// Stops at the first unrecoverable error
    #[instrument(skip(self, account, changes), fields(tenant_id = %account.tenant_id, changes = changes.len()))]
    pub async fn sync_batch(
        &self,
        account: &Account,
        integration: IntegrationType,
        changes: &[RecordChange],
    ) -> Result<BatchReport> {
        // Loaded on the first change that has a writer
        let mut profile: Option<SyncProfile> = None;
        let mut report = BatchReport::default();

        for change in changes {
            let outcome = if self.is_configured(change, integration) {
                let loaded = match profile.take() {
                    Some(loaded) => loaded,
                    None => self.connect(account.tenant_id, integration).await?,
                };
                let profile = profile.insert(loaded);
                self.dispatch(change, account, profile).await?
            } else {
                WriteOutcome::Skipped(SkipReason::NotConfigured)
            };
            report.record(&outcome);
        }

        info!(
            written = report.written,
            skipped = report.skipped,
            failed = report.failed,
            "Batch finished"
        );
        Ok(report)
    }

    fn is_configured(&self, change: &RecordChange, integration: IntegrationType) -> bool {
        self.inner
            .factory
            .is_configured(change.record.kind(), integration)
    }

    async fn dispatch(
        &self,
        change: &RecordChange,
        account: &Account,
        profile: &mut SyncProfile,
    ) -> Result<WriteOutcome> {
        let writer = self
            .inner
            .factory
            .get(change.record.kind(), Some(profile.integration));

        if !writer.is_enabled(profile) {
            debug!(
                kind = change.record.kind().as_str(),
                local_id = change.record.local_id(),
                "Record kind disabled for integration"
            );
            return Ok(WriteOutcome::Skipped(SkipReason::Disabled));
        }

        let outcome = match change.kind {
            ChangeKind::Created => writer.create(&change.record, account, profile).await?,
            ChangeKind::Updated => writer.update(&change.record, account, profile).await?,
            ChangeKind::Deleted => writer.delete(&change.record, account, profile).await?,
        };
        Ok(outcome)
    }

    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub async fn errors_for_tenant(&self, tenant_id: TenantId) -> Result<Vec<ReconciliationError>> {
        Ok(self.inner.ctx.errors.list_for_tenant(tenant_id).await?)
    }

    /// Opt a row into the scheduled retry sweep.
    ///
    /// # Errors
    ///
    /// Returns an error if the row does not exist
    pub async fn mark_for_retry(&self, id: Uuid) -> Result<()> {
        Ok(self.inner.ctx.errors.mark_for_retry(id, true).await?)
    }

    /// Retry one row now.
    ///
    /// # Errors
    ///
    /// Returns an error if the row does not exist or the retry hits an
    /// unrecoverable failure
    pub async fn retry(&self, id: Uuid) -> Result<RetryOutcome> {
        Ok(self.inner.retrier.retry_by_id(id).await?)
    }

    /// Scheduled sweep over the tenant's marked rows.
    ///
    /// # Errors
    ///
    /// Stops at the first unrecoverable error
    pub async fn retry_marked(&self, tenant_id: TenantId) -> Result<Vec<(Uuid, RetryOutcome)>> {
        Ok(self.inner.retrier.retry_marked(tenant_id).await?)
    }
}
