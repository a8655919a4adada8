//! # Reconciliation Error Log
//!
//! Keeps at most one open row per (tenant, record kind, object). A failed
//! write upserts the row; the next successful write for the same object
//! deletes it. Rows carry enough context for an operator, or the
//! [`Retrier`](crate::Retrier), to replay the failed operation.

use crate::codec::{from_millis, to_millis};
use crate::{EngineError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_ledger::{IntegrationType, RecordKind, TenantId};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, instrument};
use uuid::Uuid;

// ============================================================================
// Domain Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

impl FromStr for Severity {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "warning" => Ok(Severity::Warning),
            "error" => Ok(Severity::Error),
            _ => Err(EngineError::invalid("level", s)),
        }
    }
}

/// The writer operation that failed.
///
/// Voids travel through `Update`; replaying an update with a voided record
/// takes the void path again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteOperation {
    Create,
    Update,
}

impl WriteOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteOperation::Create => "create",
            WriteOperation::Update => "update",
        }
    }
}

impl fmt::Display for WriteOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Everything needed to replay a failed write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryContext {
    pub operation: WriteOperation,
    pub record_kind: RecordKind,
    pub local_id: String,
}

/// The object a row is about. The external id is known only when the
/// failure happened after a mapping existed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRef {
    pub record_kind: RecordKind,
    pub local_id: String,
    pub external_id: Option<String>,
}

impl ObjectRef {
    pub fn local(record_kind: RecordKind, local_id: impl Into<String>) -> Self {
        Self {
            record_kind,
            local_id: local_id.into(),
            external_id: None,
        }
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }
}

/// A failed write as reported by a writer.
#[derive(Debug, Clone)]
pub struct WriteFailure {
    pub tenant_id: TenantId,
    pub integration: IntegrationType,
    pub object: ObjectRef,
    /// Event name, e.g. `invoice.create`
    pub description: String,
    pub level: Severity,
    pub message: String,
    pub retry_context: Option<RetryContext>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationError {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub integration: IntegrationType,
    pub object: ObjectRef,
    pub description: String,
    pub level: Severity,
    pub message: String,
    /// Opt-in flag for the scheduled retry sweep
    pub retry: bool,
    pub retry_context: Option<RetryContext>,
    pub retried_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Log Trait
// ============================================================================

#[async_trait]
pub trait ErrorLog: Send + Sync {
    /// Upsert the open row for the failure's object.
    ///
    /// An existing row keeps its id and creation time; everything else is
    /// overwritten by the newer failure and the retry flag is cleared.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn record_write_error(&self, failure: WriteFailure) -> Result<ReconciliationError>;

    /// Delete the open row for an object, returning whether one existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn record_success(
        &self,
        tenant_id: TenantId,
        kind: RecordKind,
        local_id: &str,
    ) -> Result<bool>;

    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn find_for_object(
        &self,
        tenant_id: TenantId,
        kind: RecordKind,
        local_id: &str,
    ) -> Result<Option<ReconciliationError>>;

    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn find_by_id(&self, id: Uuid) -> Result<Option<ReconciliationError>>;

    /// Open rows for a tenant, most recently updated first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn list_for_tenant(&self, tenant_id: TenantId) -> Result<Vec<ReconciliationError>>;

    /// Open rows the tenant has opted into retrying, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn list_marked_for_retry(&self, tenant_id: TenantId)
        -> Result<Vec<ReconciliationError>>;

    /// Set or clear the retry flag.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] if the row no longer exists
    async fn mark_for_retry(&self, id: Uuid, retry: bool) -> Result<()>;

    /// Stamp the row after a retry attempt. A row already cleared by a
    /// successful retry is ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn mark_retried(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;
}

// ============================================================================
// SQLite Implementation
// ============================================================================

pub struct SqliteErrorLog {
    pool: SqlitePool,
}

impl SqliteErrorLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct ErrorRow {
    id: String,
    tenant_id: String,
    integration: String,
    record_kind: String,
    object_id: String,
    external_id: Option<String>,
    description: String,
    level: String,
    message: String,
    retry: bool,
    retry_context: Option<String>,
    retried_at: Option<i64>,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<ErrorRow> for ReconciliationError {
    type Error = EngineError;

    fn try_from(row: ErrorRow) -> Result<Self> {
        let retry_context = row
            .retry_context
            .as_deref()
            .map(serde_json::from_str::<RetryContext>)
            .transpose()?;

        Ok(ReconciliationError {
            id: Uuid::parse_str(&row.id).map_err(|_| EngineError::invalid("error id", &row.id))?,
            tenant_id: TenantId::from_string(&row.tenant_id)?,
            integration: row.integration.parse()?,
            object: ObjectRef {
                record_kind: row.record_kind.parse()?,
                local_id: row.object_id,
                external_id: row.external_id,
            },
            description: row.description,
            level: row.level.parse()?,
            message: row.message,
            retry: row.retry,
            retry_context,
            retried_at: row
                .retried_at
                .map(|ms| from_millis("retried_at", ms))
                .transpose()?,
            created_at: from_millis("created_at", row.created_at)?,
            updated_at: from_millis("updated_at", row.updated_at)?,
        })
    }
}

const SELECT_ERROR: &str = r#"
    SELECT id, tenant_id, integration, record_kind, object_id, external_id,
           description, level, message, retry, retry_context, retried_at,
           created_at, updated_at
    FROM reconciliation_errors
"#;

#[async_trait]
impl ErrorLog for SqliteErrorLog {
    #[instrument(skip(self, failure), fields(kind = %failure.object.record_kind, local_id = %failure.object.local_id))]
    async fn record_write_error(&self, failure: WriteFailure) -> Result<ReconciliationError> {
        let retry_context = failure
            .retry_context
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let at = to_millis(failure.occurred_at);

        sqlx::query(
            r#"
            INSERT INTO reconciliation_errors (
                id, tenant_id, integration, record_kind, object_id, external_id,
                description, level, message, retry, retry_context, retried_at,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, NULL, ?, ?)
            ON CONFLICT (tenant_id, record_kind, object_id) DO UPDATE SET
                integration = excluded.integration,
                external_id = COALESCE(excluded.external_id, reconciliation_errors.external_id),
                description = excluded.description,
                level = excluded.level,
                message = excluded.message,
                retry = 0,
                retry_context = excluded.retry_context,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(failure.tenant_id.as_str())
        .bind(failure.integration.as_str())
        .bind(failure.object.record_kind.as_str())
        .bind(&failure.object.local_id)
        .bind(&failure.object.external_id)
        .bind(&failure.description)
        .bind(failure.level.as_str())
        .bind(&failure.message)
        .bind(retry_context)
        .bind(at)
        .bind(at)
        .execute(&self.pool)
        .await?;

        debug!(message = %failure.message, "Reconciliation error recorded");

        self.find_for_object(
            failure.tenant_id,
            failure.object.record_kind,
            &failure.object.local_id,
        )
        .await?
        .ok_or_else(|| EngineError::NotFound(failure.object.local_id.clone()))
    }

    async fn record_success(
        &self,
        tenant_id: TenantId,
        kind: RecordKind,
        local_id: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM reconciliation_errors WHERE tenant_id = ? AND record_kind = ? AND object_id = ?",
        )
        .bind(tenant_id.as_str())
        .bind(kind.as_str())
        .bind(local_id)
        .execute(&self.pool)
        .await?;

        let cleared = result.rows_affected() > 0;
        if cleared {
            debug!(%kind, local_id, "Reconciliation error cleared");
        }
        Ok(cleared)
    }

    async fn find_for_object(
        &self,
        tenant_id: TenantId,
        kind: RecordKind,
        local_id: &str,
    ) -> Result<Option<ReconciliationError>> {
        let row: Option<ErrorRow> = sqlx::query_as(&format!(
            "{SELECT_ERROR} WHERE tenant_id = ? AND record_kind = ? AND object_id = ?"
        ))
        .bind(tenant_id.as_str())
        .bind(kind.as_str())
        .bind(local_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ReconciliationError::try_from).transpose()
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<ReconciliationError>> {
        let row: Option<ErrorRow> = sqlx::query_as(&format!("{SELECT_ERROR} WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(ReconciliationError::try_from).transpose()
    }

    async fn list_for_tenant(&self, tenant_id: TenantId) -> Result<Vec<ReconciliationError>> {
        let rows: Vec<ErrorRow> = sqlx::query_as(&format!(
            "{SELECT_ERROR} WHERE tenant_id = ? ORDER BY updated_at DESC, object_id"
        ))
        .bind(tenant_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ReconciliationError::try_from).collect()
    }

    async fn list_marked_for_retry(
        &self,
        tenant_id: TenantId,
    ) -> Result<Vec<ReconciliationError>> {
        let rows: Vec<ErrorRow> = sqlx::query_as(&format!(
            "{SELECT_ERROR} WHERE tenant_id = ? AND retry = 1 ORDER BY updated_at, object_id"
        ))
        .bind(tenant_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ReconciliationError::try_from).collect()
    }

    async fn mark_for_retry(&self, id: Uuid, retry: bool) -> Result<()> {
        let result = sqlx::query("UPDATE reconciliation_errors SET retry = ? WHERE id = ?")
            .bind(retry)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(EngineError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn mark_retried(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE reconciliation_errors SET retried_at = ? WHERE id = ?")
            .bind(to_millis(at))
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
