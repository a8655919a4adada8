//! Per-kind writer policies.
//!
//! The generic [`RecordWriter`](crate::RecordWriter) handles the write state
//! machine; a policy supplies the few things that differ between record
//! kinds.

use crate::{RecordWriter, SyncError, SyncProfile};
use core_ledger::{CreditNote, Customer, Invoice, LedgerRecord, Payment, RecordKind, WritableRecord};

pub trait RecordPolicy: Send + Sync + 'static {
    type Record: WritableRecord + 'static;

    const KIND: RecordKind;

    /// Pick this policy's variant out of the scheduler's record.
    fn select(record: &LedgerRecord) -> Option<&Self::Record>;

    /// Records that exist locally but are not ready for the ledger.
    fn is_eligible(_record: &Self::Record) -> bool {
        true
    }

    /// Checks run before a create or update reaches the adapter. A failure
    /// is recorded like an adapter failure.
    fn preflight(_record: &Self::Record, _profile: &SyncProfile) -> Result<(), SyncError> {
        Ok(())
    }
}

pub struct CustomerPolicy;

impl RecordPolicy for CustomerPolicy {
    type Record = Customer;

    const KIND: RecordKind = RecordKind::Customer;

    fn select(record: &LedgerRecord) -> Option<&Customer> {
        match record {
            LedgerRecord::Customer(customer) => Some(customer),
            _ => None,
        }
    }
}

pub struct InvoicePolicy;

impl RecordPolicy for InvoicePolicy {
    type Record = Invoice;

    const KIND: RecordKind = RecordKind::Invoice;

    fn select(record: &LedgerRecord) -> Option<&Invoice> {
        match record {
            LedgerRecord::Invoice(invoice) => Some(invoice),
            _ => None,
        }
    }

    fn is_eligible(invoice: &Invoice) -> bool {
        !invoice.is_draft()
    }
}

pub struct CreditNotePolicy;

impl RecordPolicy for CreditNotePolicy {
    type Record = CreditNote;

    const KIND: RecordKind = RecordKind::CreditNote;

    fn select(record: &LedgerRecord) -> Option<&CreditNote> {
        match record {
            LedgerRecord::CreditNote(credit_note) => Some(credit_note),
            _ => None,
        }
    }

    fn is_eligible(credit_note: &CreditNote) -> bool {
        !credit_note.is_draft()
    }
}

pub struct PaymentPolicy;

impl RecordPolicy for PaymentPolicy {
    type Record = Payment;

    const KIND: RecordKind = RecordKind::Payment;

    fn select(record: &LedgerRecord) -> Option<&Payment> {
        match record {
            LedgerRecord::Payment(payment) => Some(payment),
            _ => None,
        }
    }

    /// A payment has to land in a deposit account.
    fn preflight(payment: &Payment, profile: &SyncProfile) -> Result<(), SyncError> {
        match profile.routing_rules.deposit_account_for(payment) {
            Some(_) => Ok(()),
            None => Err(SyncError::MissingRouting(format!(
                "No deposit account configured for {} payments in {}",
                payment.method, payment.currency
            ))),
        }
    }
}

pub type CustomerWriter = RecordWriter<CustomerPolicy>;
pub type InvoiceWriter = RecordWriter<InvoicePolicy>;
pub type CreditNoteWriter = RecordWriter<CreditNotePolicy>;
pub type PaymentWriter = RecordWriter<PaymentPolicy>;
