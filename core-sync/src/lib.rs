//! # Reconciliation Engine
//!
//! Pushes invoicing records (customers, invoices, credit notes, payments)
//! into a tenant's connected accounting system and keeps the bookkeeping
//! that makes those writes safe to repeat.
//!
//! ## Overview
//!
//! - Every write is gated by the tenant's [`SyncProfile`]: per-kind enable
//!   flags and a reconciliation window start date
//! - The [`MappingStore`] links local records to external ones and makes
//!   `create` idempotent
//! - Adapter failures become rows in the [`ErrorLog`] instead of aborting
//!   the batch; the next successful write clears them
//!
//! ## Components
//!
//! - **Mapping Store** (`mapping`): local/external id pairs with provenance
//! - **Error Log** (`error_log`): one open error per object, retry context
//! - **Sync Profile** (`profile`): per-tenant, per-integration settings
//! - **Adapter** (`adapter`): the integration-specific API calls
//! - **Writers** (`writer`, `policy`): the shared write state machine and
//!   the per-kind rules
//! - **Writer Factory** (`factory`): (kind, integration) routing with a
//!   no-op fallback
//! - **Instrumentation** (`instrumentation`): counters and bus events per
//!   write outcome
//! - **Retry** (`retry`): replays failed writes from their stored context

pub mod adapter;
mod codec;
pub mod error;
pub mod error_log;
pub mod factory;
pub mod instrumentation;
pub mod mapping;
pub mod policy;
pub mod profile;
pub mod retry;
pub mod writer;

pub use adapter::LedgerAdapter;
pub use error::{EngineError, Result, SyncError};
pub use error_log::{
    ErrorLog, ObjectRef, ReconciliationError, RetryContext, Severity, SqliteErrorLog,
    WriteFailure, WriteOperation,
};
pub use factory::{WriterFactory, WriterFactoryBuilder};
pub use instrumentation::{
    CounterMetrics, EventBusMetrics, FanoutMetrics, NoopMetrics, SyncMetrics, WriteEvent,
};
pub use mapping::{MappingStore, Source, SqliteMappingStore, SyncMapping};
pub use policy::{
    CreditNotePolicy, CreditNoteWriter, CustomerPolicy, CustomerWriter, InvoicePolicy,
    InvoiceWriter, PaymentPolicy, PaymentWriter, RecordPolicy,
};
pub use profile::{DepositAccountRule, ProfileStore, RoutingRules, SqliteProfileStore, SyncProfile};
pub use retry::{RecordLoader, Retrier, RetryOutcome};
pub use writer::{NoopWriter, ObjectWriter, RecordWriter, SkipReason, WriteOutcome, WriterContext};
