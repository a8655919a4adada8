//! # Sync Profile
//!
//! Per-tenant, per-integration configuration: which record kinds are pushed,
//! the reconciliation window start date, routing rules for payments and the
//! last-synced marker. Created lazily on first use; deleted on disconnect
//! (mappings and error rows are left alone).

use crate::codec::{format_date, from_millis, parse_date, to_millis};
use crate::{EngineError, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use core_ledger::{IntegrationType, Payment, RecordKind, TenantId};
use core_runtime::{Clock, ProfileDefaults};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use std::sync::Arc;
use tracing::{debug, info, instrument};

// ============================================================================
// Routing Rules
// ============================================================================

/// Routes a payment to the bank/deposit account it lands in.
///
/// `None` filters match anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositAccountRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    pub account_code: String,
}

impl DepositAccountRule {
    pub fn new(account_code: impl Into<String>) -> Self {
        Self {
            payment_method: None,
            currency: None,
            account_code: account_code.into(),
        }
    }

    pub fn for_method(mut self, method: impl Into<String>) -> Self {
        self.payment_method = Some(method.into());
        self
    }

    pub fn for_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = Some(currency.into());
        self
    }

    fn matches(&self, payment: &Payment) -> bool {
        let method_ok = self
            .payment_method
            .as_deref()
            .map_or(true, |m| m.eq_ignore_ascii_case(&payment.method));
        let currency_ok = self
            .currency
            .as_deref()
            .map_or(true, |c| c.eq_ignore_ascii_case(&payment.currency));
        method_ok && currency_ok
    }
}

/// Integration-specific routing configuration, stored as JSON on the profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingRules {
    /// Evaluated in order; the first match wins
    #[serde(default)]
    pub deposit_accounts: Vec<DepositAccountRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_deposit_account: Option<String>,
}

impl RoutingRules {
    /// Resolve the deposit account for a payment.
    pub fn deposit_account_for(&self, payment: &Payment) -> Option<&str> {
        self.deposit_accounts
            .iter()
            .find(|rule| rule.matches(payment))
            .map(|rule| rule.account_code.as_str())
            .or(self.default_deposit_account.as_deref())
    }

    pub fn is_empty(&self) -> bool {
        self.deposit_accounts.is_empty() && self.default_deposit_account.is_none()
    }
}

// ============================================================================
// Sync Profile
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncProfile {
    pub tenant_id: TenantId,
    pub integration: IntegrationType,
    pub customers_enabled: bool,
    pub invoices_enabled: bool,
    pub credit_notes_enabled: bool,
    pub payments_enabled: bool,
    /// Records dated before this are never pushed
    pub start_date: NaiveDate,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub routing_rules: RoutingRules,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SyncProfile {
    pub fn new(
        tenant_id: TenantId,
        integration: IntegrationType,
        defaults: ProfileDefaults,
        start_date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            tenant_id,
            integration,
            customers_enabled: defaults.customers,
            invoices_enabled: defaults.invoices,
            credit_notes_enabled: defaults.credit_notes,
            payments_enabled: defaults.payments,
            start_date,
            last_synced_at: None,
            routing_rules: RoutingRules::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_enabled_for(&self, kind: RecordKind) -> bool {
        match kind {
            RecordKind::Customer => self.customers_enabled,
            RecordKind::Invoice => self.invoices_enabled,
            RecordKind::CreditNote => self.credit_notes_enabled,
            RecordKind::Payment => self.payments_enabled,
        }
    }

    pub fn set_enabled(&mut self, kind: RecordKind, enabled: bool) {
        match kind {
            RecordKind::Customer => self.customers_enabled = enabled,
            RecordKind::Invoice => self.invoices_enabled = enabled,
            RecordKind::CreditNote => self.credit_notes_enabled = enabled,
            RecordKind::Payment => self.payments_enabled = enabled,
        }
    }

    /// Whether a record dated `date` falls inside the reconciliation window.
    pub fn in_window(&self, date: NaiveDate) -> bool {
        date >= self.start_date
    }

    /// Advance the last-synced marker. Returns `false` when `at` is not
    /// newer than the current value.
    pub fn touch_last_synced(&mut self, at: DateTime<Utc>) -> bool {
        match self.last_synced_at {
            Some(current) if current >= at => false,
            _ => {
                self.last_synced_at = Some(at);
                true
            }
        }
    }
}

// ============================================================================
// Store Trait
// ============================================================================

#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Load the profile, creating it with the configured defaults on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn get_or_create(
        &self,
        tenant_id: TenantId,
        integration: IntegrationType,
    ) -> Result<SyncProfile>;

    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn find(
        &self,
        tenant_id: TenantId,
        integration: IntegrationType,
    ) -> Result<Option<SyncProfile>>;

    /// Persist user-editable settings (enable flags, start date, routing).
    ///
    /// `last_synced_at` is not written; it only moves through
    /// [`touch_last_synced`](ProfileStore::touch_last_synced).
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn save(&self, profile: &SyncProfile) -> Result<()>;

    /// Advance `last_synced_at` if `at` is newer than the stored value.
    /// Returns whether the row changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn touch_last_synced(
        &self,
        tenant_id: TenantId,
        integration: IntegrationType,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Delete the profile. Returns whether one existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn disconnect(&self, tenant_id: TenantId, integration: IntegrationType) -> Result<bool>;

    /// Turn a record kind on or off for the integration.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn set_enabled(
        &self,
        tenant_id: TenantId,
        integration: IntegrationType,
        kind: RecordKind,
        enabled: bool,
    ) -> Result<SyncProfile> {
        let mut profile = self.get_or_create(tenant_id, integration).await?;
        profile.set_enabled(kind, enabled);
        self.save(&profile).await?;
        Ok(profile)
    }

    /// Move the reconciliation window start.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn set_start_date(
        &self,
        tenant_id: TenantId,
        integration: IntegrationType,
        start_date: NaiveDate,
    ) -> Result<SyncProfile> {
        let mut profile = self.get_or_create(tenant_id, integration).await?;
        profile.start_date = start_date;
        self.save(&profile).await?;
        Ok(profile)
    }

    /// Replace the routing rules.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn set_routing_rules(
        &self,
        tenant_id: TenantId,
        integration: IntegrationType,
        rules: RoutingRules,
    ) -> Result<SyncProfile> {
        let mut profile = self.get_or_create(tenant_id, integration).await?;
        profile.routing_rules = rules;
        self.save(&profile).await?;
        Ok(profile)
    }
}

// ============================================================================
// SQLite Implementation
// ============================================================================

pub struct SqliteProfileStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    defaults: ProfileDefaults,
}

impl SqliteProfileStore {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>, defaults: ProfileDefaults) -> Self {
        Self {
            pool,
            clock,
            defaults,
        }
    }
}

#[derive(Debug, FromRow)]
struct ProfileRow {
    tenant_id: String,
    integration: String,
    customers_enabled: bool,
    invoices_enabled: bool,
    credit_notes_enabled: bool,
    payments_enabled: bool,
    start_date: String,
    last_synced_at: Option<i64>,
    routing_rules: String,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<ProfileRow> for SyncProfile {
    type Error = EngineError;

    fn try_from(row: ProfileRow) -> Result<Self> {
        Ok(SyncProfile {
            tenant_id: TenantId::from_string(&row.tenant_id)?,
            integration: row.integration.parse()?,
            customers_enabled: row.customers_enabled,
            invoices_enabled: row.invoices_enabled,
            credit_notes_enabled: row.credit_notes_enabled,
            payments_enabled: row.payments_enabled,
            start_date: parse_date("start_date", &row.start_date)?,
            last_synced_at: row
                .last_synced_at
                .map(|ms| from_millis("last_synced_at", ms))
                .transpose()?,
            routing_rules: serde_json::from_str(&row.routing_rules)?,
            created_at: from_millis("created_at", row.created_at)?,
            updated_at: from_millis("updated_at", row.updated_at)?,
        })
    }
}

#[async_trait]
impl ProfileStore for SqliteProfileStore {
    #[instrument(skip(self), fields(tenant_id = %tenant_id, integration = %integration))]
    async fn get_or_create(
        &self,
        tenant_id: TenantId,
        integration: IntegrationType,
    ) -> Result<SyncProfile> {
        if let Some(profile) = self.find(tenant_id, integration).await? {
            return Ok(profile);
        }

        let profile = SyncProfile::new(
            tenant_id,
            integration,
            self.defaults,
            self.clock.today(),
            self.clock.now(),
        );
        let now = to_millis(profile.created_at);

        // Another worker may have created the row in the meantime
        let result = sqlx::query(
            r#"
            INSERT INTO sync_profiles (
                tenant_id, integration, customers_enabled, invoices_enabled,
                credit_notes_enabled, payments_enabled, start_date,
                last_synced_at, routing_rules, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, NULL, ?, ?, ?)
            ON CONFLICT (tenant_id, integration) DO NOTHING
            "#,
        )
        .bind(tenant_id.as_str())
        .bind(integration.as_str())
        .bind(profile.customers_enabled)
        .bind(profile.invoices_enabled)
        .bind(profile.credit_notes_enabled)
        .bind(profile.payments_enabled)
        .bind(format_date(profile.start_date))
        .bind(serde_json::to_string(&profile.routing_rules)?)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            info!(start_date = %profile.start_date, "Sync profile created");
            return Ok(profile);
        }

        self.find(tenant_id, integration)
            .await?
            .ok_or_else(|| EngineError::invalid("sync profile", format!("{tenant_id}/{integration}")))
    }

    async fn find(
        &self,
        tenant_id: TenantId,
        integration: IntegrationType,
    ) -> Result<Option<SyncProfile>> {
        let row: Option<ProfileRow> = sqlx::query_as(
            r#"
            SELECT tenant_id, integration, customers_enabled, invoices_enabled,
                   credit_notes_enabled, payments_enabled, start_date,
                   last_synced_at, routing_rules, created_at, updated_at
            FROM sync_profiles
            WHERE tenant_id = ? AND integration = ?
            "#,
        )
        .bind(tenant_id.as_str())
        .bind(integration.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(SyncProfile::try_from).transpose()
    }

    #[instrument(skip(self, profile), fields(tenant_id = %profile.tenant_id, integration = %profile.integration))]
    async fn save(&self, profile: &SyncProfile) -> Result<()> {
        let now = to_millis(self.clock.now());

        sqlx::query(
            r#"
            INSERT INTO sync_profiles (
                tenant_id, integration, customers_enabled, invoices_enabled,
                credit_notes_enabled, payments_enabled, start_date,
                last_synced_at, routing_rules, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, NULL, ?, ?, ?)
            ON CONFLICT (tenant_id, integration) DO UPDATE SET
                customers_enabled = excluded.customers_enabled,
                invoices_enabled = excluded.invoices_enabled,
                credit_notes_enabled = excluded.credit_notes_enabled,
                payments_enabled = excluded.payments_enabled,
                start_date = excluded.start_date,
                routing_rules = excluded.routing_rules,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(profile.tenant_id.as_str())
        .bind(profile.integration.as_str())
        .bind(profile.customers_enabled)
        .bind(profile.invoices_enabled)
        .bind(profile.credit_notes_enabled)
        .bind(profile.payments_enabled)
        .bind(format_date(profile.start_date))
        .bind(serde_json::to_string(&profile.routing_rules)?)
        .bind(to_millis(profile.created_at))
        .bind(now)
        .execute(&self.pool)
        .await?;

        debug!("Sync profile saved");
        Ok(())
    }

    async fn touch_last_synced(
        &self,
        tenant_id: TenantId,
        integration: IntegrationType,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sync_profiles
            SET last_synced_at = ?
            WHERE tenant_id = ? AND integration = ?
              AND (last_synced_at IS NULL OR last_synced_at < ?)
            "#,
        )
        .bind(to_millis(at))
        .bind(tenant_id.as_str())
        .bind(integration.as_str())
        .bind(to_millis(at))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, integration = %integration))]
    async fn disconnect(&self, tenant_id: TenantId, integration: IntegrationType) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sync_profiles WHERE tenant_id = ? AND integration = ?")
            .bind(tenant_id.as_str())
            .bind(integration.as_str())
            .execute(&self.pool)
            .await?;

        let removed = result.rows_affected() > 0;
        if removed {
            info!("Integration disconnected; sync profile removed");
        }
        Ok(removed)
    }
}
