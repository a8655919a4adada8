//! # Object Writers
//!
//! A writer pushes one local record to one accounting system. Every kind
//! runs the same state machine:
//!
//! ```text
//! Unsynced --create--> Synced --update--> Synced --void--> Voided
//! ```
//!
//! `create` is idempotent: the mapping store is consulted first and a
//! mapped record is never created twice. `update` heals missing mappings by
//! falling back to `create`, leaves externally owned records alone and
//! routes voided records to the void path. `delete` is never propagated.
//!
//! Adapter failures ([`SyncError`]) are recorded in the reconciliation error
//! log and reported as [`WriteOutcome::Failed`]; the call itself succeeds so
//! the surrounding batch carries on. Anything else is an [`EngineError`] and
//! propagates.

use crate::error_log::{ObjectRef, RetryContext, Severity, WriteFailure, WriteOperation};
use crate::instrumentation::{SyncMetrics, WriteEvent};
use crate::policy::RecordPolicy;
use crate::{
    EngineError, ErrorLog, LedgerAdapter, MappingStore, ProfileStore, Result, Source, SyncError,
    SyncMapping, SyncProfile,
};
use async_trait::async_trait;
use core_ledger::{Account, IntegrationType, LedgerRecord, RecordKind, WritableRecord};
use core_runtime::Clock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

// ============================================================================
// Outcomes
// ============================================================================

/// Why a writer call did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Voided records are never created
    Voided,
    /// Dated before the profile's start date
    BeforeStartDate,
    /// A mapping already exists
    AlreadyMapped,
    /// The accounting system owns the record
    ExternallyOwned,
    /// Drafts and other records not ready for the ledger
    Ineligible,
    /// No integration is configured for this kind
    NotConfigured,
    /// The profile has this kind switched off
    Disabled,
    /// Deletes stay local
    DeleteNotPropagated,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Voided => "voided",
            SkipReason::BeforeStartDate => "before_start_date",
            SkipReason::AlreadyMapped => "already_mapped",
            SkipReason::ExternallyOwned => "externally_owned",
            SkipReason::Ineligible => "ineligible",
            SkipReason::NotConfigured => "not_configured",
            SkipReason::Disabled => "disabled",
            SkipReason::DeleteNotPropagated => "delete_not_propagated",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Created { external_id: String },
    Updated,
    Voided,
    Skipped(SkipReason),
    /// The adapter failed; the error was recorded.
    Failed(SyncError),
}

impl WriteOutcome {
    /// Whether the accounting system accepted a write.
    pub fn is_written(&self) -> bool {
        matches!(
            self,
            WriteOutcome::Created { .. } | WriteOutcome::Updated | WriteOutcome::Voided
        )
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, WriteOutcome::Failed(_))
    }

    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            WriteOutcome::Skipped(reason) => Some(*reason),
            _ => None,
        }
    }
}

// ============================================================================
// Writer Trait
// ============================================================================

/// The orchestrator-facing writer for one (record kind, integration) pair.
///
/// The profile is passed in explicitly and updated in place when a write
/// advances `last_synced_at`.
#[async_trait]
pub trait ObjectWriter: Send + Sync {
    fn kind(&self) -> RecordKind;

    /// `None` for the no-op writer.
    fn integration(&self) -> Option<IntegrationType>;

    /// Callers check this before `create`/`update`.
    fn is_enabled(&self, profile: &SyncProfile) -> bool;

    async fn create(
        &self,
        record: &LedgerRecord,
        account: &Account,
        profile: &mut SyncProfile,
    ) -> Result<WriteOutcome>;

    async fn update(
        &self,
        record: &LedgerRecord,
        account: &Account,
        profile: &mut SyncProfile,
    ) -> Result<WriteOutcome>;

    async fn delete(
        &self,
        record: &LedgerRecord,
        account: &Account,
        profile: &mut SyncProfile,
    ) -> Result<WriteOutcome>;
}

/// Stores and sinks shared by every writer.
#[derive(Clone)]
pub struct WriterContext {
    pub mappings: Arc<dyn MappingStore>,
    pub errors: Arc<dyn ErrorLog>,
    pub profiles: Arc<dyn ProfileStore>,
    pub metrics: Arc<dyn SyncMetrics>,
    pub clock: Arc<dyn Clock>,
}

// ============================================================================
// Record Writer
// ============================================================================

pub struct RecordWriter<P: RecordPolicy> {
    integration: IntegrationType,
    adapter: Arc<dyn LedgerAdapter<P::Record>>,
    ctx: WriterContext,
    _policy: PhantomData<fn() -> P>,
}

impl<P: RecordPolicy> RecordWriter<P> {
    pub fn new(
        integration: IntegrationType,
        adapter: Arc<dyn LedgerAdapter<P::Record>>,
        ctx: WriterContext,
    ) -> Self {
        Self {
            integration,
            adapter,
            ctx,
            _policy: PhantomData,
        }
    }

    fn select<'a>(&self, record: &'a LedgerRecord) -> Result<&'a P::Record> {
        P::select(record).ok_or(EngineError::KindMismatch {
            expected: P::KIND,
            actual: record.kind(),
        })
    }

    /// The account, record and profile must all belong to the same tenant
    /// and the profile to this writer's integration.
    fn check_scope(
        &self,
        record: &P::Record,
        account: &Account,
        profile: &SyncProfile,
    ) -> Result<()> {
        if profile.integration != self.integration {
            return Err(EngineError::IntegrationMismatch {
                writer: self.integration.to_string(),
                profile: profile.integration.to_string(),
            });
        }
        for tenant in [record.tenant_id(), profile.tenant_id] {
            if tenant != account.tenant_id {
                return Err(EngineError::TenantMismatch {
                    scope: account.tenant_id,
                    record: tenant,
                });
            }
        }
        Ok(())
    }

    async fn create_record(
        &self,
        record: &P::Record,
        account: &Account,
        profile: &mut SyncProfile,
    ) -> Result<WriteOutcome> {
        if record.is_voided() {
            return Ok(self.skip(record, SkipReason::Voided));
        }
        if !profile.in_window(record.record_date()) {
            return Ok(self.skip(record, SkipReason::BeforeStartDate));
        }
        if !P::is_eligible(record) {
            return Ok(self.skip(record, SkipReason::Ineligible));
        }

        let existing = self
            .ctx
            .mappings
            .find_by_local(account.tenant_id, self.integration, P::KIND, record.local_id())
            .await?;
        if existing.is_some() {
            return Ok(self.skip(record, SkipReason::AlreadyMapped));
        }

        let attempt = match P::preflight(record, profile) {
            Ok(()) => self.adapter.perform_create(record, account, profile).await,
            Err(error) => Err(error),
        };

        match attempt {
            Ok(external_id) => {
                let mapping = SyncMapping::new(
                    account.tenant_id,
                    self.integration,
                    P::KIND,
                    record.local_id(),
                    external_id.clone(),
                    Source::Local,
                    self.ctx.clock.now(),
                );
                self.ctx.mappings.save(&mapping).await?;
                self.record_success(record, profile, WriteOperation::Create)
                    .await?;

                info!(external_id = %external_id, "Record created in accounting system");
                Ok(WriteOutcome::Created { external_id })
            }
            Err(error) => {
                self.record_failure(record, None, WriteOperation::Create, error)
                    .await
            }
        }
    }

    async fn update_record(
        &self,
        record: &P::Record,
        account: &Account,
        profile: &mut SyncProfile,
    ) -> Result<WriteOutcome> {
        if !profile.in_window(record.record_date()) {
            return Ok(self.skip(record, SkipReason::BeforeStartDate));
        }
        if !P::is_eligible(record) {
            return Ok(self.skip(record, SkipReason::Ineligible));
        }

        let mapping = self
            .ctx
            .mappings
            .find_by_local(account.tenant_id, self.integration, P::KIND, record.local_id())
            .await?;
        let Some(mut mapping) = mapping else {
            debug!("No mapping yet; falling back to create");
            return self.create_record(record, account, profile).await;
        };

        // Writing back would echo the external system's own change
        if mapping.is_externally_owned() {
            return Ok(self.skip(record, SkipReason::ExternallyOwned));
        }

        let (attempt, outcome) = if record.is_voided() {
            let attempt = self
                .adapter
                .perform_void(record, account, profile, &mapping)
                .await;
            (attempt, WriteOutcome::Voided)
        } else {
            let attempt = match P::preflight(record, profile) {
                Ok(()) => {
                    self.adapter
                        .perform_update(record, account, profile, &mapping)
                        .await
                }
                Err(error) => Err(error),
            };
            (attempt, WriteOutcome::Updated)
        };

        match attempt {
            Ok(()) => {
                mapping.updated_at = self.ctx.clock.now();
                self.ctx.mappings.save(&mapping).await?;
                self.record_success(record, profile, WriteOperation::Update)
                    .await?;

                info!(external_id = %mapping.external_id, outcome = ?outcome, "Record updated in accounting system");
                Ok(outcome)
            }
            Err(error) => {
                self.record_failure(
                    record,
                    Some(&mapping.external_id),
                    WriteOperation::Update,
                    error,
                )
                .await
            }
        }
    }

    fn skip(&self, record: &P::Record, reason: SkipReason) -> WriteOutcome {
        debug!(local_id = record.local_id(), reason = %reason, "Write skipped");
        WriteOutcome::Skipped(reason)
    }

    async fn record_success(
        &self,
        record: &P::Record,
        profile: &mut SyncProfile,
        operation: WriteOperation,
    ) -> Result<()> {
        let tenant_id = record.tenant_id();
        self.ctx
            .errors
            .record_success(tenant_id, P::KIND, record.local_id())
            .await?;

        let now = self.ctx.clock.now();
        if profile.touch_last_synced(now) {
            self.ctx
                .profiles
                .touch_last_synced(tenant_id, self.integration, now)
                .await?;
        }

        self.ctx
            .metrics
            .write_succeeded(&self.event(record, operation));
        Ok(())
    }

    async fn record_failure(
        &self,
        record: &P::Record,
        external_id: Option<&str>,
        operation: WriteOperation,
        error: SyncError,
    ) -> Result<WriteOutcome> {
        let message = error.to_string();
        let mut object = ObjectRef::local(P::KIND, record.local_id());
        if let Some(external_id) = external_id {
            object = object.with_external_id(external_id);
        }

        self.ctx
            .errors
            .record_write_error(WriteFailure {
                tenant_id: record.tenant_id(),
                integration: self.integration,
                object,
                description: format!("{}.{}", P::KIND, operation),
                level: Severity::Error,
                message: message.clone(),
                retry_context: Some(RetryContext {
                    operation,
                    record_kind: P::KIND,
                    local_id: record.local_id().to_string(),
                }),
                occurred_at: self.ctx.clock.now(),
            })
            .await?;

        self.ctx
            .metrics
            .write_failed(&self.event(record, operation), &message);
        warn!(operation = %operation, error = %message, "Accounting system write failed");

        Ok(WriteOutcome::Failed(error))
    }

    fn event(&self, record: &P::Record, operation: WriteOperation) -> WriteEvent {
        WriteEvent {
            tenant_id: record.tenant_id(),
            integration: self.integration,
            record_kind: P::KIND,
            local_id: record.local_id().to_string(),
            operation,
        }
    }
}

#[async_trait]
impl<P: RecordPolicy> ObjectWriter for RecordWriter<P> {
    fn kind(&self) -> RecordKind {
        P::KIND
    }

    fn integration(&self) -> Option<IntegrationType> {
        Some(self.integration)
    }

    fn is_enabled(&self, profile: &SyncProfile) -> bool {
        profile.is_enabled_for(P::KIND)
    }

    #[instrument(
        skip_all,
        fields(
            tenant_id = %account.tenant_id,
            integration = %self.integration,
            kind = P::KIND.as_str(),
            local_id = record.local_id()
        )
    )]
    async fn create(
        &self,
        record: &LedgerRecord,
        account: &Account,
        profile: &mut SyncProfile,
    ) -> Result<WriteOutcome> {
        let record = self.select(record)?;
        self.check_scope(record, account, profile)?;
        self.create_record(record, account, profile).await
    }

    #[instrument(
        skip_all,
        fields(
            tenant_id = %account.tenant_id,
            integration = %self.integration,
            kind = P::KIND.as_str(),
            local_id = record.local_id()
        )
    )]
    async fn update(
        &self,
        record: &LedgerRecord,
        account: &Account,
        profile: &mut SyncProfile,
    ) -> Result<WriteOutcome> {
        let record = self.select(record)?;
        self.check_scope(record, account, profile)?;
        self.update_record(record, account, profile).await
    }

    async fn delete(
        &self,
        record: &LedgerRecord,
        _account: &Account,
        _profile: &mut SyncProfile,
    ) -> Result<WriteOutcome> {
        debug!(
            kind = P::KIND.as_str(),
            local_id = record.local_id(),
            "Deletes are not propagated"
        );
        Ok(WriteOutcome::Skipped(SkipReason::DeleteNotPropagated))
    }
}

// ============================================================================
// No-op Writer
// ============================================================================

/// Stand-in for kinds without a configured integration. Never has side
/// effects.
#[derive(Debug, Clone, Copy)]
pub struct NoopWriter {
    kind: RecordKind,
}

impl NoopWriter {
    pub fn new(kind: RecordKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl ObjectWriter for NoopWriter {
    fn kind(&self) -> RecordKind {
        self.kind
    }

    fn integration(&self) -> Option<IntegrationType> {
        None
    }

    fn is_enabled(&self, _profile: &SyncProfile) -> bool {
        false
    }

    async fn create(
        &self,
        _record: &LedgerRecord,
        _account: &Account,
        _profile: &mut SyncProfile,
    ) -> Result<WriteOutcome> {
        Ok(WriteOutcome::Skipped(SkipReason::NotConfigured))
    }

    async fn update(
        &self,
        _record: &LedgerRecord,
        _account: &Account,
        _profile: &mut SyncProfile,
    ) -> Result<WriteOutcome> {
        Ok(WriteOutcome::Skipped(SkipReason::NotConfigured))
    }

    async fn delete(
        &self,
        _record: &LedgerRecord,
        _account: &Account,
        _profile: &mut SyncProfile,
    ) -> Result<WriteOutcome> {
        Ok(WriteOutcome::Skipped(SkipReason::NotConfigured))
    }
}
