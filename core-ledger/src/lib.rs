//! # Ledger Domain
//!
//! The accounts-receivable records the reconciliation engine mirrors into a
//! tenant's connected accounting system, plus the SQLite pool that holds the
//! engine's own bookkeeping tables.
//!
//! ## Components
//!
//! - **Models** (`models`): tenant and account identity, record kinds,
//!   integration types
//! - **Records** (`records`): `Customer`, `Invoice`, `CreditNote`, `Payment`
//!   behind the `WritableRecord` capability
//! - **Database** (`db`): connection pool with embedded migrations

pub mod db;
pub mod error;
pub mod models;
pub mod records;

pub use db::{create_pool, create_test_pool, DatabaseConfig};
pub use error::{LedgerError, Result};
pub use models::{Account, IntegrationType, RecordKind, TenantId};
pub use records::{
    CreditNote, CreditNoteStatus, Customer, Invoice, InvoiceStatus, LedgerRecord, Payment,
    WritableRecord,
};
