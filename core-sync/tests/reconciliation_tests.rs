//! Integration tests for the reconciliation engine
//!
//! These tests drive the writers end to end against an in-memory database:
//! - Window gating, voids and drafts
//! - Idempotent create and update-to-create fallback
//! - Source ownership (externally owned records are never written back)
//! - Error recording, convergence and clearing
//! - Factory routing and retry

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use core_ledger::{
    create_test_pool, Account, CreditNote, CreditNoteStatus, Customer, IntegrationType, Invoice,
    InvoiceStatus, LedgerRecord, Payment, RecordKind, TenantId, WritableRecord,
};
use core_runtime::events::{EventBus, ReconciliationEvent};
use core_runtime::{FixedClock, ProfileDefaults};
use core_sync::{
    DepositAccountRule, EngineError, ErrorLog, EventBusMetrics, LedgerAdapter, MappingStore,
    NoopMetrics, ObjectWriter, ProfileStore, ReconciliationError, RecordLoader, Retrier,
    RetryOutcome, RoutingRules, Severity, SkipReason, Source, SqliteErrorLog, SqliteMappingStore,
    SqliteProfileStore, SyncError, SyncMapping, SyncMetrics, SyncProfile, WriteEvent,
    WriteOutcome, WriterContext, WriterFactory,
};
use mockall::mock;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

// ============================================================================
// Test Doubles
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Create(RecordKind, String),
    Update(RecordKind, String),
    Void(RecordKind, String),
}

/// Adapter that records every call and fails on demand.
#[derive(Default)]
struct RecordingAdapter {
    calls: Mutex<Vec<Call>>,
    failures: Mutex<VecDeque<SyncError>>,
    external_ids: Mutex<HashMap<String, String>>,
}

impl RecordingAdapter {
    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn fail_next(&self, error: SyncError) {
        self.failures.lock().unwrap().push_back(error);
    }

    fn assign_external_id(&self, local_id: &str, external_id: &str) {
        self.external_ids
            .lock()
            .unwrap()
            .insert(local_id.to_string(), external_id.to_string());
    }

    fn respond(&self, call: Call) -> Result<(), SyncError> {
        self.calls.lock().unwrap().push(call);
        match self.failures.lock().unwrap().pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn external_id_for(&self, local_id: &str) -> String {
        self.external_ids
            .lock()
            .unwrap()
            .get(local_id)
            .cloned()
            .unwrap_or_else(|| format!("EXT-{local_id}"))
    }
}

#[async_trait]
impl<R: WritableRecord + 'static> LedgerAdapter<R> for RecordingAdapter {
    async fn perform_create(
        &self,
        record: &R,
        _account: &Account,
        _profile: &SyncProfile,
    ) -> Result<String, SyncError> {
        self.respond(Call::Create(record.kind(), record.local_id().to_string()))?;
        Ok(self.external_id_for(record.local_id()))
    }

    async fn perform_update(
        &self,
        record: &R,
        _account: &Account,
        _profile: &SyncProfile,
        _mapping: &SyncMapping,
    ) -> Result<(), SyncError> {
        self.respond(Call::Update(record.kind(), record.local_id().to_string()))
    }

    async fn perform_void(
        &self,
        record: &R,
        _account: &Account,
        _profile: &SyncProfile,
        _mapping: &SyncMapping,
    ) -> Result<(), SyncError> {
        self.respond(Call::Void(record.kind(), record.local_id().to_string()))
    }
}

mock! {
    Metrics {}

    impl SyncMetrics for Metrics {
        fn write_succeeded(&self, event: &WriteEvent);
        fn write_failed(&self, event: &WriteEvent, message: &str);
        fn retry_attempted(&self, error: &ReconciliationError, resolved: bool);
    }
}

/// Serves records out of a map, as the invoicing platform would.
#[derive(Default)]
struct MapLoader {
    records: Mutex<HashMap<(RecordKind, String), LedgerRecord>>,
    accounts: Mutex<HashMap<TenantId, Account>>,
}

impl MapLoader {
    fn put(&self, record: LedgerRecord) {
        self.records
            .lock()
            .unwrap()
            .insert((record.kind(), record.local_id().to_string()), record);
    }

    fn remove(&self, kind: RecordKind, local_id: &str) {
        self.records
            .lock()
            .unwrap()
            .remove(&(kind, local_id.to_string()));
    }

    fn put_account(&self, account: Account) {
        self.accounts
            .lock()
            .unwrap()
            .insert(account.tenant_id, account);
    }
}

#[async_trait]
impl RecordLoader for MapLoader {
    async fn load_record(
        &self,
        _tenant_id: TenantId,
        kind: RecordKind,
        local_id: &str,
    ) -> core_sync::Result<Option<LedgerRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(&(kind, local_id.to_string()))
            .cloned())
    }

    async fn load_account(&self, tenant_id: TenantId) -> core_sync::Result<Option<Account>> {
        Ok(self.accounts.lock().unwrap().get(&tenant_id).cloned())
    }
}

// ============================================================================
// Harness
// ============================================================================

const XERO: IntegrationType = IntegrationType::Xero;

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

struct Harness {
    clock: Arc<FixedClock>,
    ctx: WriterContext,
    mappings: Arc<SqliteMappingStore>,
    errors: Arc<SqliteErrorLog>,
    profiles: Arc<SqliteProfileStore>,
    adapter: Arc<RecordingAdapter>,
    factory: Arc<WriterFactory>,
    tenant: TenantId,
    account: Account,
}

impl Harness {
    async fn new() -> Self {
        Self::with_metrics(Arc::new(NoopMetrics)).await
    }

    async fn with_metrics(metrics: Arc<dyn SyncMetrics>) -> Self {
        let pool = create_test_pool().await.unwrap();
        let clock = Arc::new(FixedClock::new(start()));
        let mappings = Arc::new(SqliteMappingStore::new(pool.clone()));
        let errors = Arc::new(SqliteErrorLog::new(pool.clone()));
        let profiles = Arc::new(SqliteProfileStore::new(
            pool,
            clock.clone(),
            ProfileDefaults::all_enabled(),
        ));
        let ctx = WriterContext {
            mappings: mappings.clone(),
            errors: errors.clone(),
            profiles: profiles.clone(),
            metrics,
            clock: clock.clone(),
        };
        let adapter = Arc::new(RecordingAdapter::default());
        let factory = Arc::new(
            WriterFactory::builder(ctx.clone())
                .integration(XERO, adapter.clone())
                .build(),
        );
        let tenant = TenantId::new();

        Self {
            clock,
            ctx,
            mappings,
            errors,
            profiles,
            adapter,
            factory,
            tenant,
            account: Account::new(tenant, "Acme Trading", "GBP"),
        }
    }

    async fn profile(&self) -> SyncProfile {
        self.profiles.get_or_create(self.tenant, XERO).await.unwrap()
    }

    fn writer(&self, kind: RecordKind) -> Arc<dyn ObjectWriter> {
        self.factory.get(kind, Some(XERO))
    }

    async fn create(&self, record: &LedgerRecord, profile: &mut SyncProfile) -> WriteOutcome {
        self.writer(record.kind())
            .create(record, &self.account, profile)
            .await
            .unwrap()
    }

    async fn update(&self, record: &LedgerRecord, profile: &mut SyncProfile) -> WriteOutcome {
        self.writer(record.kind())
            .update(record, &self.account, profile)
            .await
            .unwrap()
    }

    async fn mapping(&self, kind: RecordKind, local_id: &str) -> Option<SyncMapping> {
        self.mappings
            .find_by_local(self.tenant, XERO, kind, local_id)
            .await
            .unwrap()
    }

    async fn error_for(&self, kind: RecordKind, local_id: &str) -> Option<ReconciliationError> {
        self.errors
            .find_for_object(self.tenant, kind, local_id)
            .await
            .unwrap()
    }

    fn customer(&self, id: &str) -> LedgerRecord {
        LedgerRecord::Customer(Customer {
            id: id.to_string(),
            tenant_id: self.tenant,
            name: "Globex Corporation".to_string(),
            email: Some("ap@globex.example".to_string()),
            archived: false,
            created_on: date(2024, 3, 2),
        })
    }

    fn invoice(&self, id: &str, issue_date: NaiveDate) -> LedgerRecord {
        LedgerRecord::Invoice(Invoice {
            id: id.to_string(),
            tenant_id: self.tenant,
            number: Some(format!("INV-{id}")),
            customer_id: "cus-1".to_string(),
            status: InvoiceStatus::Open,
            issue_date,
            currency: "GBP".to_string(),
            total_minor: 42_000,
        })
    }

    fn voided(record: LedgerRecord) -> LedgerRecord {
        match record {
            LedgerRecord::Customer(mut c) => {
                c.archived = true;
                LedgerRecord::Customer(c)
            }
            LedgerRecord::Invoice(mut i) => {
                i.status = InvoiceStatus::Void;
                LedgerRecord::Invoice(i)
            }
            LedgerRecord::CreditNote(mut n) => {
                n.status = CreditNoteStatus::Void;
                LedgerRecord::CreditNote(n)
            }
            LedgerRecord::Payment(mut p) => {
                p.voided = true;
                LedgerRecord::Payment(p)
            }
        }
    }

    fn payment(&self, id: &str) -> LedgerRecord {
        LedgerRecord::Payment(Payment {
            id: id.to_string(),
            tenant_id: self.tenant,
            customer_id: "cus-1".to_string(),
            invoice_id: Some("inv-1".to_string()),
            method: "card".to_string(),
            currency: "GBP".to_string(),
            amount_minor: 42_000,
            paid_on: date(2024, 3, 4),
            reference: Some("ch_123".to_string()),
            voided: false,
        })
    }
}

fn card_routing() -> RoutingRules {
    RoutingRules {
        deposit_accounts: vec![DepositAccountRule::new("090").for_method("card")],
        default_deposit_account: None,
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_invoice_before_start_date_is_not_created() {
    let h = Harness::new().await;
    let mut profile = h
        .profiles
        .set_start_date(h.tenant, XERO, date(2023, 1, 1))
        .await
        .unwrap();

    let invoice = h.invoice("inv-1", date(2022, 6, 1));
    let outcome = h.create(&invoice, &mut profile).await;

    assert_eq!(outcome, WriteOutcome::Skipped(SkipReason::BeforeStartDate));
    assert!(h.adapter.calls().is_empty());
    assert!(h.mapping(RecordKind::Invoice, "inv-1").await.is_none());
    assert!(h.error_for(RecordKind::Invoice, "inv-1").await.is_none());
}

#[tokio::test]
async fn test_customer_create_is_idempotent() {
    let h = Harness::new().await;
    let mut profile = h.profile().await;
    h.adapter.assign_external_id("cus-1", "C-100");
    let customer = h.customer("cus-1");

    let first = h.create(&customer, &mut profile).await;
    assert_eq!(
        first,
        WriteOutcome::Created {
            external_id: "C-100".to_string()
        }
    );

    let mapping = h.mapping(RecordKind::Customer, "cus-1").await.unwrap();
    assert_eq!(mapping.external_id, "C-100");
    assert_eq!(mapping.source, Source::Local);

    let second = h.create(&customer, &mut profile).await;
    assert_eq!(second, WriteOutcome::Skipped(SkipReason::AlreadyMapped));
    assert_eq!(
        h.adapter.calls(),
        vec![Call::Create(RecordKind::Customer, "cus-1".to_string())]
    );
    assert_eq!(
        h.mappings
            .list_for_tenant(h.tenant, XERO)
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn test_externally_owned_payment_is_not_written_back() {
    let h = Harness::new().await;
    let mut profile = h
        .profiles
        .set_routing_rules(h.tenant, XERO, card_routing())
        .await
        .unwrap();
    h.mappings
        .save(&SyncMapping::new(
            h.tenant,
            XERO,
            RecordKind::Payment,
            "pay-1",
            "P-77",
            Source::External,
            start(),
        ))
        .await
        .unwrap();

    let payment = h.payment("pay-1");
    assert_eq!(
        h.update(&payment, &mut profile).await,
        WriteOutcome::Skipped(SkipReason::ExternallyOwned)
    );
    assert_eq!(
        h.update(&Harness::voided(payment), &mut profile).await,
        WriteOutcome::Skipped(SkipReason::ExternallyOwned)
    );

    assert!(h.adapter.calls().is_empty());
    assert!(h.errors.list_for_tenant(h.tenant).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_rejected_invoice_records_one_error() {
    let mut metrics = MockMetrics::new();
    metrics
        .expect_write_failed()
        .withf(|event, message| {
            event.integration == IntegrationType::Xero
                && event.record_kind == RecordKind::Invoice
                && message.contains("duplicate number")
        })
        .times(1)
        .return_const(());
    metrics.expect_write_succeeded().times(0);

    let h = Harness::with_metrics(Arc::new(metrics)).await;
    let mut profile = h.profile().await;
    h.adapter.fail_next(SyncError::rejected("duplicate number"));

    let invoice = h.invoice("inv-1", date(2024, 3, 5));
    let outcome = h.create(&invoice, &mut profile).await;

    assert_eq!(
        outcome,
        WriteOutcome::Failed(SyncError::rejected("duplicate number"))
    );
    let errors = h.errors.list_for_tenant(h.tenant).await.unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].level, Severity::Error);
    assert!(!errors[0].retry);
    assert_eq!(errors[0].message, "duplicate number");
    assert_eq!(errors[0].description, "invoice.create");

    assert!(h.mapping(RecordKind::Invoice, "inv-1").await.is_none());
    assert_eq!(profile.last_synced_at, None);
    assert_eq!(h.profile().await.last_synced_at, None);
}

// ============================================================================
// Writer Properties
// ============================================================================

#[tokio::test]
async fn test_update_without_mapping_falls_back_to_create() {
    let h = Harness::new().await;
    let mut profile = h.profile().await;
    let invoice = h.invoice("inv-1", date(2024, 3, 5));

    let outcome = h.update(&invoice, &mut profile).await;

    assert_eq!(
        outcome,
        WriteOutcome::Created {
            external_id: "EXT-inv-1".to_string()
        }
    );
    assert!(h.mapping(RecordKind::Invoice, "inv-1").await.is_some());
}

#[tokio::test]
async fn test_update_refreshes_mapping_timestamp() {
    let h = Harness::new().await;
    let mut profile = h.profile().await;
    let invoice = h.invoice("inv-1", date(2024, 3, 5));
    h.create(&invoice, &mut profile).await;

    h.clock.advance(chrono::Duration::minutes(10));
    assert_eq!(h.update(&invoice, &mut profile).await, WriteOutcome::Updated);

    let mapping = h.mapping(RecordKind::Invoice, "inv-1").await.unwrap();
    assert_eq!(mapping.created_at, start());
    assert_eq!(mapping.updated_at, start() + chrono::Duration::minutes(10));
    assert_eq!(
        h.adapter.calls(),
        vec![
            Call::Create(RecordKind::Invoice, "inv-1".to_string()),
            Call::Update(RecordKind::Invoice, "inv-1".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_voided_record_takes_void_path() {
    let h = Harness::new().await;
    let mut profile = h.profile().await;
    let invoice = h.invoice("inv-1", date(2024, 3, 5));
    h.create(&invoice, &mut profile).await;

    let outcome = h.update(&Harness::voided(invoice), &mut profile).await;

    assert_eq!(outcome, WriteOutcome::Voided);
    let calls = h.adapter.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1], Call::Void(RecordKind::Invoice, "inv-1".to_string()));
    assert!(!calls
        .iter()
        .any(|call| matches!(call, Call::Update(_, _))));
}

#[tokio::test]
async fn test_voided_record_is_never_created() {
    let h = Harness::new().await;
    let mut profile = h.profile().await;
    let customer = Harness::voided(h.customer("cus-1"));

    assert_eq!(
        h.create(&customer, &mut profile).await,
        WriteOutcome::Skipped(SkipReason::Voided)
    );
    // Update with no mapping delegates to create, which skips too
    assert_eq!(
        h.update(&customer, &mut profile).await,
        WriteOutcome::Skipped(SkipReason::Voided)
    );
    assert!(h.adapter.calls().is_empty());
}

#[tokio::test]
async fn test_window_gates_update() {
    let h = Harness::new().await;
    let mut profile = h.profile().await;
    let invoice = h.invoice("inv-old", date(2024, 2, 28));

    assert_eq!(
        h.update(&invoice, &mut profile).await,
        WriteOutcome::Skipped(SkipReason::BeforeStartDate)
    );
    assert!(h.adapter.calls().is_empty());
    assert!(h.mapping(RecordKind::Invoice, "inv-old").await.is_none());
    assert!(h.error_for(RecordKind::Invoice, "inv-old").await.is_none());
}

#[tokio::test]
async fn test_draft_credit_note_is_skipped() {
    let h = Harness::new().await;
    let mut profile = h.profile().await;
    let mut note = CreditNote {
        id: "cn-1".to_string(),
        tenant_id: h.tenant,
        number: None,
        customer_id: "cus-1".to_string(),
        invoice_id: Some("inv-1".to_string()),
        status: CreditNoteStatus::Draft,
        issue_date: date(2024, 3, 6),
        currency: "GBP".to_string(),
        total_minor: 1_000,
    };

    assert_eq!(
        h.create(&LedgerRecord::CreditNote(note.clone()), &mut profile)
            .await,
        WriteOutcome::Skipped(SkipReason::Ineligible)
    );

    note.status = CreditNoteStatus::Open;
    let outcome = h
        .create(&LedgerRecord::CreditNote(note), &mut profile)
        .await;
    assert!(outcome.is_written());
    assert_eq!(h.adapter.calls().len(), 1);
}

#[tokio::test]
async fn test_repeated_failures_converge_to_one_row() {
    let h = Harness::new().await;
    let mut profile = h.profile().await;
    let invoice = h.invoice("inv-1", date(2024, 3, 5));
    h.create(&invoice, &mut profile).await;

    for attempt in 1..=3 {
        h.clock.advance(chrono::Duration::minutes(1));
        h.adapter
            .fail_next(SyncError::transient(format!("Rate limited ({attempt})")));
        assert!(h.update(&invoice, &mut profile).await.is_failed());
    }

    let errors = h.errors.list_for_tenant(h.tenant).await.unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].message, "Rate limited (3)");
    assert_eq!(errors[0].description, "invoice.update");
    assert_eq!(errors[0].object.external_id.as_deref(), Some("EXT-inv-1"));
}

#[tokio::test]
async fn test_success_after_failure_clears_error() {
    let h = Harness::new().await;
    let mut profile = h.profile().await;
    let invoice = h.invoice("inv-1", date(2024, 3, 5));
    h.create(&invoice, &mut profile).await;

    h.adapter.fail_next(SyncError::transient("Gateway timeout"));
    assert!(h.update(&invoice, &mut profile).await.is_failed());
    assert!(h.error_for(RecordKind::Invoice, "inv-1").await.is_some());

    assert_eq!(h.update(&invoice, &mut profile).await, WriteOutcome::Updated);
    assert!(h.error_for(RecordKind::Invoice, "inv-1").await.is_none());
}

#[tokio::test]
async fn test_successful_write_touches_last_synced() {
    let h = Harness::new().await;
    let mut profile = h.profile().await;
    h.clock.advance(chrono::Duration::minutes(3));

    h.create(&h.customer("cus-1"), &mut profile).await;

    let expected = Some(start() + chrono::Duration::minutes(3));
    assert_eq!(profile.last_synced_at, expected);
    assert_eq!(h.profile().await.last_synced_at, expected);
}

#[tokio::test]
async fn test_delete_is_never_propagated() {
    let h = Harness::new().await;
    let mut profile = h.profile().await;
    let customer = h.customer("cus-1");
    h.create(&customer, &mut profile).await;

    let outcome = h
        .writer(RecordKind::Customer)
        .delete(&customer, &h.account, &mut profile)
        .await
        .unwrap();

    assert_eq!(outcome, WriteOutcome::Skipped(SkipReason::DeleteNotPropagated));
    assert_eq!(h.adapter.calls().len(), 1);
    assert!(h.mapping(RecordKind::Customer, "cus-1").await.is_some());
}

// ============================================================================
// Payments
// ============================================================================

#[tokio::test]
async fn test_payment_without_deposit_account_is_recorded() {
    let h = Harness::new().await;
    let mut profile = h.profile().await;

    let outcome = h.create(&h.payment("pay-1"), &mut profile).await;

    assert!(matches!(
        outcome,
        WriteOutcome::Failed(SyncError::MissingRouting(_))
    ));
    assert!(h.adapter.calls().is_empty());
    let error = h.error_for(RecordKind::Payment, "pay-1").await.unwrap();
    assert_eq!(
        error.message,
        "No deposit account configured for card payments in GBP"
    );
}

#[tokio::test]
async fn test_payment_void_skips_routing_check() {
    let h = Harness::new().await;
    let mut profile = h
        .profiles
        .set_routing_rules(h.tenant, XERO, card_routing())
        .await
        .unwrap();
    let payment = h.payment("pay-1");
    h.create(&payment, &mut profile).await;

    // Routing removed after the payment was synced
    profile.routing_rules = RoutingRules::default();
    let outcome = h.update(&Harness::voided(payment), &mut profile).await;

    assert_eq!(outcome, WriteOutcome::Voided);
}

// ============================================================================
// Programmer Errors
// ============================================================================

#[tokio::test]
async fn test_kind_mismatch_propagates_and_is_not_logged() {
    let h = Harness::new().await;
    let mut profile = h.profile().await;

    let result = h
        .writer(RecordKind::Invoice)
        .create(&h.customer("cus-1"), &h.account, &mut profile)
        .await;

    assert!(matches!(
        result,
        Err(EngineError::KindMismatch {
            expected: RecordKind::Invoice,
            actual: RecordKind::Customer
        })
    ));
    assert!(h.errors.list_for_tenant(h.tenant).await.unwrap().is_empty());
    assert!(h.adapter.calls().is_empty());
}

#[tokio::test]
async fn test_foreign_tenant_record_is_rejected() {
    let h = Harness::new().await;
    let mut profile = h.profile().await;
    let mut customer = h.customer("cus-1");
    if let LedgerRecord::Customer(c) = &mut customer {
        c.tenant_id = TenantId::new();
    }

    let result = h
        .writer(RecordKind::Customer)
        .create(&customer, &h.account, &mut profile)
        .await;

    assert!(matches!(result, Err(EngineError::TenantMismatch { .. })));
    assert!(h.adapter.calls().is_empty());
}

// ============================================================================
// Factory & Profile
// ============================================================================

#[tokio::test]
async fn test_factory_falls_back_to_noop_writer() {
    let h = Harness::new().await;
    let mut profile = h.profile().await;

    assert!(h.factory.is_configured(RecordKind::Invoice, XERO));
    assert!(!h
        .factory
        .is_configured(RecordKind::Invoice, IntegrationType::QuickBooks));
    assert_eq!(h.factory.integrations(), vec![XERO]);
    assert_eq!(h.factory.len(), 4);

    let writer = h.factory.get(RecordKind::Invoice, None);
    assert_eq!(writer.integration(), None);
    let outcome = writer
        .create(&h.invoice("inv-1", date(2024, 3, 5)), &h.account, &mut profile)
        .await
        .unwrap();
    assert_eq!(outcome, WriteOutcome::Skipped(SkipReason::NotConfigured));
    assert!(h.adapter.calls().is_empty());

    let writer = h
        .factory
        .get(RecordKind::Payment, Some(IntegrationType::NetSuite));
    assert!(!writer.is_enabled(&profile));
}

#[tokio::test]
async fn test_writer_reports_profile_enablement() {
    let h = Harness::new().await;
    let profile = h
        .profiles
        .set_enabled(h.tenant, XERO, RecordKind::CreditNote, false)
        .await
        .unwrap();

    assert!(!h.writer(RecordKind::CreditNote).is_enabled(&profile));
    assert!(h.writer(RecordKind::Invoice).is_enabled(&profile));
}

#[tokio::test]
async fn test_disconnect_keeps_mappings_and_errors() {
    let h = Harness::new().await;
    let mut profile = h.profile().await;
    h.create(&h.customer("cus-1"), &mut profile).await;
    h.adapter.fail_next(SyncError::rejected("Missing tax code"));
    h.create(&h.invoice("inv-1", date(2024, 3, 5)), &mut profile)
        .await;

    assert!(h.profiles.disconnect(h.tenant, XERO).await.unwrap());

    assert!(h.mapping(RecordKind::Customer, "cus-1").await.is_some());
    assert!(h.error_for(RecordKind::Invoice, "inv-1").await.is_some());
    assert!(h.profiles.find(h.tenant, XERO).await.unwrap().is_none());
}

#[tokio::test]
async fn test_event_bus_metrics_reports_writes() {
    let bus = EventBus::new(16);
    let mut subscriber = bus.subscribe();
    let h = Harness::with_metrics(Arc::new(EventBusMetrics::new(bus))).await;
    let mut profile = h.profile().await;

    h.create(&h.customer("cus-1"), &mut profile).await;

    let event = subscriber.recv().await.unwrap();
    assert_eq!(
        event,
        ReconciliationEvent::WriteSucceeded {
            tenant_id: h.tenant.as_str(),
            integration: "xero".to_string(),
            record_kind: "customer".to_string(),
            local_id: "cus-1".to_string(),
            operation: "create".to_string(),
        }
    );
}

// ============================================================================
// Retry
// ============================================================================

fn retrier(h: &Harness, loader: Arc<MapLoader>) -> Retrier {
    loader.put_account(h.account.clone());
    Retrier::new(h.factory.clone(), &h.ctx, loader)
}

#[tokio::test]
async fn test_retry_resolves_failed_create() {
    let h = Harness::new().await;
    let mut profile = h.profile().await;
    let loader = Arc::new(MapLoader::default());
    let invoice = h.invoice("inv-1", date(2024, 3, 5));
    loader.put(invoice.clone());
    let retrier = retrier(&h, loader);

    h.adapter.fail_next(SyncError::transient("Rate limited"));
    h.create(&invoice, &mut profile).await;
    let error = h.error_for(RecordKind::Invoice, "inv-1").await.unwrap();

    let outcome = retrier.retry(&error).await.unwrap();

    assert_eq!(
        outcome,
        RetryOutcome::Resolved(WriteOutcome::Created {
            external_id: "EXT-inv-1".to_string()
        })
    );
    assert!(h.error_for(RecordKind::Invoice, "inv-1").await.is_none());
    assert!(h.mapping(RecordKind::Invoice, "inv-1").await.is_some());
}

#[tokio::test]
async fn test_retry_still_failing_refreshes_row() {
    let h = Harness::new().await;
    let mut profile = h.profile().await;
    let loader = Arc::new(MapLoader::default());
    let invoice = h.invoice("inv-1", date(2024, 3, 5));
    loader.put(invoice.clone());
    let retrier = retrier(&h, loader);

    h.adapter.fail_next(SyncError::transient("Rate limited"));
    h.create(&invoice, &mut profile).await;
    let error = h.error_for(RecordKind::Invoice, "inv-1").await.unwrap();
    h.errors.mark_for_retry(error.id, true).await.unwrap();

    h.clock.advance(chrono::Duration::minutes(5));
    h.adapter.fail_next(SyncError::rejected("Contact is archived"));
    let outcome = retrier.retry_by_id(error.id).await.unwrap();

    assert_eq!(
        outcome,
        RetryOutcome::StillFailing(SyncError::rejected("Contact is archived"))
    );
    let refreshed = h.error_for(RecordKind::Invoice, "inv-1").await.unwrap();
    assert_eq!(refreshed.id, error.id);
    assert_eq!(refreshed.message, "Contact is archived");
    assert_eq!(
        refreshed.retried_at,
        Some(start() + chrono::Duration::minutes(5))
    );
    assert!(!refreshed.retry);
}

#[tokio::test]
async fn test_retry_marked_sweeps_only_marked_rows() {
    let h = Harness::new().await;
    let mut profile = h.profile().await;
    let loader = Arc::new(MapLoader::default());
    let first = h.invoice("inv-1", date(2024, 3, 5));
    let second = h.invoice("inv-2", date(2024, 3, 5));
    loader.put(first.clone());
    loader.put(second.clone());
    let retrier = retrier(&h, loader);

    h.adapter.fail_next(SyncError::transient("Rate limited"));
    h.create(&first, &mut profile).await;
    h.adapter.fail_next(SyncError::transient("Rate limited"));
    h.create(&second, &mut profile).await;

    let marked = h.error_for(RecordKind::Invoice, "inv-1").await.unwrap();
    h.errors.mark_for_retry(marked.id, true).await.unwrap();

    let outcomes = retrier.retry_marked(h.tenant).await.unwrap();

    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].0, marked.id);
    assert!(outcomes[0].1.is_resolved());
    assert!(h.error_for(RecordKind::Invoice, "inv-1").await.is_none());
    assert!(h.error_for(RecordKind::Invoice, "inv-2").await.is_some());
}

#[tokio::test]
async fn test_retry_discards_missing_record() {
    let h = Harness::new().await;
    let mut profile = h.profile().await;
    let loader = Arc::new(MapLoader::default());
    let invoice = h.invoice("inv-1", date(2024, 3, 5));
    loader.put(invoice.clone());
    let retrier = retrier(&h, loader.clone());

    h.adapter.fail_next(SyncError::transient("Rate limited"));
    h.create(&invoice, &mut profile).await;
    loader.remove(RecordKind::Invoice, "inv-1");
    let error = h.error_for(RecordKind::Invoice, "inv-1").await.unwrap();

    assert_eq!(retrier.retry(&error).await.unwrap(), RetryOutcome::Discarded);
    assert!(h.error_for(RecordKind::Invoice, "inv-1").await.is_none());
    assert_eq!(h.adapter.calls().len(), 1);
}

#[tokio::test]
async fn test_retry_by_unknown_id() {
    let h = Harness::new().await;
    let retrier = retrier(&h, Arc::new(MapLoader::default()));

    let result = retrier.retry_by_id(uuid::Uuid::new_v4()).await;
    assert!(matches!(result, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn test_retry_leaves_row_when_kind_disabled() {
    let h = Harness::new().await;
    let mut profile = h.profile().await;
    let loader = Arc::new(MapLoader::default());
    let invoice = h.invoice("inv-1", date(2024, 3, 5));
    loader.put(invoice.clone());
    let retrier = retrier(&h, loader);

    h.adapter.fail_next(SyncError::transient("Rate limited"));
    h.create(&invoice, &mut profile).await;
    let error = h.error_for(RecordKind::Invoice, "inv-1").await.unwrap();
    h.errors.mark_for_retry(error.id, true).await.unwrap();
    h.profiles
        .set_enabled(h.tenant, XERO, RecordKind::Invoice, false)
        .await
        .unwrap();

    let outcome = retrier.retry(&error).await.unwrap();

    assert_eq!(outcome, RetryOutcome::Skipped(SkipReason::Disabled));
    assert!(!outcome.is_resolved());
    assert_eq!(h.adapter.calls().len(), 1);
    assert!(h.mapping(RecordKind::Invoice, "inv-1").await.is_none());
    let kept = h.error_for(RecordKind::Invoice, "inv-1").await.unwrap();
    assert_eq!(kept.id, error.id);
    assert!(kept.retry);
    assert_eq!(kept.retried_at, None);

    let swept = retrier.retry_marked(h.tenant).await.unwrap();
    assert_eq!(
        swept,
        vec![(error.id, RetryOutcome::Skipped(SkipReason::Disabled))]
    );
    assert_eq!(h.adapter.calls().len(), 1);
}

#[tokio::test]
async fn test_retry_leaves_row_when_integration_unregistered() {
    let h = Harness::new().await;
    let mut profile = h.profile().await;
    let loader = Arc::new(MapLoader::default());
    let invoice = h.invoice("inv-1", date(2024, 3, 5));
    loader.put(invoice.clone());
    loader.put_account(h.account.clone());

    h.adapter.fail_next(SyncError::transient("Rate limited"));
    h.create(&invoice, &mut profile).await;
    let error = h.error_for(RecordKind::Invoice, "inv-1").await.unwrap();

    let unregistered = Retrier::new(Arc::new(WriterFactory::empty()), &h.ctx, loader);
    let outcome = unregistered.retry(&error).await.unwrap();

    assert_eq!(outcome, RetryOutcome::Skipped(SkipReason::NotConfigured));
    assert_eq!(h.adapter.calls().len(), 1);
    let kept = h.error_for(RecordKind::Invoice, "inv-1").await.unwrap();
    assert_eq!(kept.id, error.id);
    assert_eq!(kept.message, "Rate limited");
}
