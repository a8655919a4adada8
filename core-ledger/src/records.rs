//! Ledger records
//!
//! The four record kinds that can be written to an accounting system. Each
//! one is a distinct struct; the reconciliation engine only ever sees them
//! through the [`WritableRecord`] capability or the [`LedgerRecord`] enum the
//! scheduler hands over.

use crate::models::{RecordKind, TenantId};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// The minimal surface the reconciliation engine needs from a record.
pub trait WritableRecord: Send + Sync {
    /// Which record kind this is
    fn kind(&self) -> RecordKind;

    /// Owning tenant
    fn tenant_id(&self) -> TenantId;

    /// Identifier in the invoicing platform
    fn local_id(&self) -> &str;

    /// Whether the record has been retracted locally
    fn is_voided(&self) -> bool;

    /// Business date compared against the reconciliation window
    fn record_date(&self) -> NaiveDate;

    /// Human-facing reference (document number, customer name)
    fn external_reference(&self) -> Option<&str>;
}

// =============================================================================
// Customer
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub tenant_id: TenantId,
    pub name: String,
    pub email: Option<String>,
    /// Archived customers are retracted from the ledger the same way a
    /// voided document is.
    pub archived: bool,
    pub created_on: NaiveDate,
}

impl WritableRecord for Customer {
    fn kind(&self) -> RecordKind {
        RecordKind::Customer
    }

    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    fn local_id(&self) -> &str {
        &self.id
    }

    fn is_voided(&self) -> bool {
        self.archived
    }

    fn record_date(&self) -> NaiveDate {
        self.created_on
    }

    fn external_reference(&self) -> Option<&str> {
        Some(&self.name)
    }
}

// =============================================================================
// Invoice
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Draft,
    Open,
    Paid,
    Void,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: String,
    pub tenant_id: TenantId,
    pub number: Option<String>,
    pub customer_id: String,
    pub status: InvoiceStatus,
    pub issue_date: NaiveDate,
    pub currency: String,
    /// Total in the currency's minor unit
    pub total_minor: i64,
}

impl Invoice {
    pub fn is_draft(&self) -> bool {
        self.status == InvoiceStatus::Draft
    }
}

impl WritableRecord for Invoice {
    fn kind(&self) -> RecordKind {
        RecordKind::Invoice
    }

    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    fn local_id(&self) -> &str {
        &self.id
    }

    fn is_voided(&self) -> bool {
        self.status == InvoiceStatus::Void
    }

    fn record_date(&self) -> NaiveDate {
        self.issue_date
    }

    fn external_reference(&self) -> Option<&str> {
        self.number.as_deref()
    }
}

// =============================================================================
// Credit Note
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreditNoteStatus {
    Draft,
    Open,
    Applied,
    Void,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditNote {
    pub id: String,
    pub tenant_id: TenantId,
    pub number: Option<String>,
    pub customer_id: String,
    /// Invoice the credit was issued against, if any
    pub invoice_id: Option<String>,
    pub status: CreditNoteStatus,
    pub issue_date: NaiveDate,
    pub currency: String,
    pub total_minor: i64,
}

impl CreditNote {
    pub fn is_draft(&self) -> bool {
        self.status == CreditNoteStatus::Draft
    }
}

impl WritableRecord for CreditNote {
    fn kind(&self) -> RecordKind {
        RecordKind::CreditNote
    }

    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    fn local_id(&self) -> &str {
        &self.id
    }

    fn is_voided(&self) -> bool {
        self.status == CreditNoteStatus::Void
    }

    fn record_date(&self) -> NaiveDate {
        self.issue_date
    }

    fn external_reference(&self) -> Option<&str> {
        self.number.as_deref()
    }
}

// =============================================================================
// Payment
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: String,
    pub tenant_id: TenantId,
    pub customer_id: String,
    pub invoice_id: Option<String>,
    /// Payment method tag, e.g. `card` or `bank_transfer`
    pub method: String,
    pub currency: String,
    pub amount_minor: i64,
    pub paid_on: NaiveDate,
    pub reference: Option<String>,
    pub voided: bool,
}

impl WritableRecord for Payment {
    fn kind(&self) -> RecordKind {
        RecordKind::Payment
    }

    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    fn local_id(&self) -> &str {
        &self.id
    }

    fn is_voided(&self) -> bool {
        self.voided
    }

    fn record_date(&self) -> NaiveDate {
        self.paid_on
    }

    fn external_reference(&self) -> Option<&str> {
        self.reference.as_deref()
    }
}

// =============================================================================
// LedgerRecord
// =============================================================================

/// A changed record as handed over by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LedgerRecord {
    Customer(Customer),
    Invoice(Invoice),
    CreditNote(CreditNote),
    Payment(Payment),
}

impl LedgerRecord {
    /// Borrow the record through its capability interface.
    pub fn as_writable(&self) -> &dyn WritableRecord {
        match self {
            LedgerRecord::Customer(r) => r,
            LedgerRecord::Invoice(r) => r,
            LedgerRecord::CreditNote(r) => r,
            LedgerRecord::Payment(r) => r,
        }
    }
}

impl WritableRecord for LedgerRecord {
    fn kind(&self) -> RecordKind {
        self.as_writable().kind()
    }

    fn tenant_id(&self) -> TenantId {
        self.as_writable().tenant_id()
    }

    fn local_id(&self) -> &str {
        self.as_writable().local_id()
    }

    fn is_voided(&self) -> bool {
        self.as_writable().is_voided()
    }

    fn record_date(&self) -> NaiveDate {
        self.as_writable().record_date()
    }

    fn external_reference(&self) -> Option<&str> {
        self.as_writable().external_reference()
    }
}

impl From<Customer> for LedgerRecord {
    fn from(record: Customer) -> Self {
        LedgerRecord::Customer(record)
    }
}

impl From<Invoice> for LedgerRecord {
    fn from(record: Invoice) -> Self {
        LedgerRecord::Invoice(record)
    }
}

impl From<CreditNote> for LedgerRecord {
    fn from(record: CreditNote) -> Self {
        LedgerRecord::CreditNote(record)
    }
}

impl From<Payment> for LedgerRecord {
    fn from(record: Payment) -> Self {
        LedgerRecord::Payment(record)
    }
}
