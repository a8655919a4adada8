//! # Retry
//!
//! Replays the write behind a reconciliation error using its stored
//! [`RetryContext`]. The writer's own bookkeeping does the rest: a success
//! clears the row, a failure refreshes it.

use crate::error_log::{ReconciliationError, RetryContext, WriteOperation};
use crate::instrumentation::SyncMetrics;
use crate::{
    EngineError, ErrorLog, ProfileStore, Result, SkipReason, SyncError, WriteOutcome,
    WriterContext, WriterFactory,
};
use async_trait::async_trait;
use core_ledger::{Account, LedgerRecord, RecordKind, TenantId};
use core_runtime::Clock;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Loads current record state from the invoicing platform.
#[async_trait]
pub trait RecordLoader: Send + Sync {
    async fn load_record(
        &self,
        tenant_id: TenantId,
        kind: RecordKind,
        local_id: &str,
    ) -> Result<Option<LedgerRecord>>;

    async fn load_account(&self, tenant_id: TenantId) -> Result<Option<Account>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome {
    /// The error row is gone; carries what the writer did
    Resolved(WriteOutcome),
    /// The writer failed again and refreshed the row
    StillFailing(SyncError),
    /// The record, account or profile no longer exists; the row was dropped
    Discarded,
    /// The writer is unregistered or its kind is switched off; the row stays
    Skipped(SkipReason),
}

impl RetryOutcome {
    pub fn is_resolved(&self) -> bool {
        matches!(self, RetryOutcome::Resolved(_) | RetryOutcome::Discarded)
    }
}

pub struct Retrier {
    factory: Arc<WriterFactory>,
    errors: Arc<dyn ErrorLog>,
    profiles: Arc<dyn ProfileStore>,
    metrics: Arc<dyn SyncMetrics>,
    clock: Arc<dyn Clock>,
    loader: Arc<dyn RecordLoader>,
}

impl Retrier {
    pub fn new(
        factory: Arc<WriterFactory>,
        ctx: &WriterContext,
        loader: Arc<dyn RecordLoader>,
    ) -> Self {
        Self {
            factory,
            errors: ctx.errors.clone(),
            profiles: ctx.profiles.clone(),
            metrics: ctx.metrics.clone(),
            clock: ctx.clock.clone(),
            loader,
        }
    }

    /// Replay one failed write.
    ///
    /// Rows without a stored context are replayed as an update, which falls
    /// back to create when the record was never mapped. Nothing is replayed
    /// while the integration has no writer or the kind is disabled in the
    /// profile.
    ///
    /// # Errors
    ///
    /// Returns an error if a store or the loader fails, or the writer raises
    /// an unrecoverable error
    #[instrument(
        skip_all,
        fields(
            error_id = %error.id,
            tenant_id = %error.tenant_id,
            kind = error.object.record_kind.as_str(),
            local_id = %error.object.local_id
        )
    )]
    pub async fn retry(&self, error: &ReconciliationError) -> Result<RetryOutcome> {
        let context = error.retry_context.clone().unwrap_or_else(|| RetryContext {
            operation: WriteOperation::Update,
            record_kind: error.object.record_kind,
            local_id: error.object.local_id.clone(),
        });
        let tenant_id = error.tenant_id;

        let record = self
            .loader
            .load_record(tenant_id, context.record_kind, &context.local_id)
            .await?;
        let account = self.loader.load_account(tenant_id).await?;
        let profile = self.profiles.find(tenant_id, error.integration).await?;

        let (Some(record), Some(account), Some(mut profile)) = (record, account, profile) else {
            info!("Nothing left to retry; discarding reconciliation error");
            self.errors
                .record_success(tenant_id, context.record_kind, &context.local_id)
                .await?;
            self.metrics.retry_attempted(error, true);
            return Ok(RetryOutcome::Discarded);
        };

        let writer = self
            .factory
            .get(context.record_kind, Some(error.integration));
        if writer.integration().is_none() {
            debug!("No writer registered; leaving reconciliation error in place");
            return Ok(RetryOutcome::Skipped(SkipReason::NotConfigured));
        }
        if !writer.is_enabled(&profile) {
            debug!("Record kind disabled; leaving reconciliation error in place");
            return Ok(RetryOutcome::Skipped(SkipReason::Disabled));
        }

        let outcome = match context.operation {
            WriteOperation::Create => writer.create(&record, &account, &mut profile).await?,
            WriteOperation::Update => writer.update(&record, &account, &mut profile).await?,
        };

        self.errors.mark_retried(error.id, self.clock.now()).await?;

        let result = match outcome {
            WriteOutcome::Failed(sync_error) => RetryOutcome::StillFailing(sync_error),
            WriteOutcome::Skipped(reason) => {
                // Nothing left for the accounting system to do
                self.errors
                    .record_success(tenant_id, context.record_kind, &context.local_id)
                    .await?;
                RetryOutcome::Resolved(WriteOutcome::Skipped(reason))
            }
            written => RetryOutcome::Resolved(written),
        };

        info!(resolved = result.is_resolved(), "Retry finished");
        self.metrics.retry_attempted(error, result.is_resolved());
        Ok(result)
    }

    /// Replay a row by id.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] if the row no longer exists
    pub async fn retry_by_id(&self, id: Uuid) -> Result<RetryOutcome> {
        let error = self
            .errors
            .find_by_id(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        self.retry(&error).await
    }

    /// Replay every row the tenant marked for retry, oldest first.
    ///
    /// # Errors
    ///
    /// Stops at the first unrecoverable error
    pub async fn retry_marked(&self, tenant_id: TenantId) -> Result<Vec<(Uuid, RetryOutcome)>> {
        let marked = self.errors.list_marked_for_retry(tenant_id).await?;
        let mut outcomes = Vec::with_capacity(marked.len());
        for error in &marked {
            outcomes.push((error.id, self.retry(error).await?));
        }
        Ok(outcomes)
    }
}
