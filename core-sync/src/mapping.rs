//! # Mapping Store
//!
//! Persists the link between a local record and its counterpart in the
//! connected accounting system. A mapping's presence is what makes writers
//! idempotent: a record that already has one is never created twice.
//!
//! Mappings are never deleted, not even when the integration is
//! disconnected.

use crate::codec::{from_millis, to_millis};
use crate::{EngineError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_ledger::{IntegrationType, RecordKind, TenantId};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

// ============================================================================
// Domain Types
// ============================================================================

/// Which side originally produced the pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// Created by a writer pushing a local record out
    Local,
    /// Imported from the accounting system; writers never push these
    External,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Local => "local",
            Source::External => "external",
        }
    }
}

impl FromStr for Source {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "local" => Ok(Source::Local),
            "external" => Ok(Source::External),
            _ => Err(EngineError::invalid("source", s)),
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMapping {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub integration: IntegrationType,
    pub record_kind: RecordKind,
    pub local_id: String,
    pub external_id: String,
    pub source: Source,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SyncMapping {
    pub fn new(
        tenant_id: TenantId,
        integration: IntegrationType,
        record_kind: RecordKind,
        local_id: impl Into<String>,
        external_id: impl Into<String>,
        source: Source,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            integration,
            record_kind,
            local_id: local_id.into(),
            external_id: external_id.into(),
            source,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the accounting system owns this record.
    pub fn is_externally_owned(&self) -> bool {
        self.source == Source::External
    }
}

// ============================================================================
// Store Trait
// ============================================================================

/// Lookup and persistence of local/external pairs, always tenant scoped.
#[async_trait]
pub trait MappingStore: Send + Sync {
    /// Find the mapping for a local record
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn find_by_local(
        &self,
        tenant_id: TenantId,
        integration: IntegrationType,
        kind: RecordKind,
        local_id: &str,
    ) -> Result<Option<SyncMapping>>;

    /// Find the mapping for an external record
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn find_by_external(
        &self,
        tenant_id: TenantId,
        integration: IntegrationType,
        kind: RecordKind,
        external_id: &str,
    ) -> Result<Option<SyncMapping>>;

    /// Insert a mapping, or refresh the existing row for the same local record.
    ///
    /// A concurrent insert that loses the uniqueness race is not an error;
    /// the row already written by the winner is kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails for any other reason
    async fn save(&self, mapping: &SyncMapping) -> Result<()>;

    /// Every mapping a tenant holds for one integration, oldest first
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn list_for_tenant(
        &self,
        tenant_id: TenantId,
        integration: IntegrationType,
    ) -> Result<Vec<SyncMapping>>;
}

// ============================================================================
// SQLite Implementation
// ============================================================================

pub struct SqliteMappingStore {
    pool: SqlitePool,
}

impl SqliteMappingStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct MappingRow {
    id: String,
    tenant_id: String,
    integration: String,
    record_kind: String,
    local_id: String,
    external_id: String,
    source: String,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<MappingRow> for SyncMapping {
    type Error = EngineError;

    fn try_from(row: MappingRow) -> Result<Self> {
        Ok(SyncMapping {
            id: Uuid::parse_str(&row.id).map_err(|_| EngineError::invalid("mapping id", &row.id))?,
            tenant_id: TenantId::from_string(&row.tenant_id)?,
            integration: row.integration.parse()?,
            record_kind: row.record_kind.parse()?,
            local_id: row.local_id,
            external_id: row.external_id,
            source: row.source.parse()?,
            created_at: from_millis("created_at", row.created_at)?,
            updated_at: from_millis("updated_at", row.updated_at)?,
        })
    }
}

const SELECT_MAPPING: &str = r#"
    SELECT id, tenant_id, integration, record_kind, local_id, external_id,
           source, created_at, updated_at
    FROM sync_mappings
"#;

#[async_trait]
impl MappingStore for SqliteMappingStore {
    async fn find_by_local(
        &self,
        tenant_id: TenantId,
        integration: IntegrationType,
        kind: RecordKind,
        local_id: &str,
    ) -> Result<Option<SyncMapping>> {
        let row: Option<MappingRow> = sqlx::query_as(&format!(
            "{SELECT_MAPPING} WHERE tenant_id = ? AND integration = ? AND record_kind = ? AND local_id = ?"
        ))
        .bind(tenant_id.as_str())
        .bind(integration.as_str())
        .bind(kind.as_str())
        .bind(local_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(SyncMapping::try_from).transpose()
    }

    async fn find_by_external(
        &self,
        tenant_id: TenantId,
        integration: IntegrationType,
        kind: RecordKind,
        external_id: &str,
    ) -> Result<Option<SyncMapping>> {
        let row: Option<MappingRow> = sqlx::query_as(&format!(
            "{SELECT_MAPPING} WHERE tenant_id = ? AND integration = ? AND record_kind = ? AND external_id = ?"
        ))
        .bind(tenant_id.as_str())
        .bind(integration.as_str())
        .bind(kind.as_str())
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(SyncMapping::try_from).transpose()
    }

    #[instrument(skip(self, mapping), fields(kind = %mapping.record_kind, local_id = %mapping.local_id))]
    async fn save(&self, mapping: &SyncMapping) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO sync_mappings (
                id, tenant_id, integration, record_kind, local_id,
                external_id, source, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (tenant_id, integration, record_kind, local_id) DO UPDATE SET
                external_id = excluded.external_id,
                source = excluded.source,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(mapping.id.to_string())
        .bind(mapping.tenant_id.as_str())
        .bind(mapping.integration.as_str())
        .bind(mapping.record_kind.as_str())
        .bind(&mapping.local_id)
        .bind(&mapping.external_id)
        .bind(mapping.source.as_str())
        .bind(to_millis(mapping.created_at))
        .bind(to_millis(mapping.updated_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                debug!(external_id = %mapping.external_id, "Mapping saved");
                Ok(())
            }
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                warn!(
                    external_id = %mapping.external_id,
                    "External record already mapped to another local record; keeping existing mapping"
                );
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_for_tenant(
        &self,
        tenant_id: TenantId,
        integration: IntegrationType,
    ) -> Result<Vec<SyncMapping>> {
        let rows: Vec<MappingRow> = sqlx::query_as(&format!(
            "{SELECT_MAPPING} WHERE tenant_id = ? AND integration = ? ORDER BY created_at, local_id"
        ))
        .bind(tenant_id.as_str())
        .bind(integration.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SyncMapping::try_from).collect()
    }
}
