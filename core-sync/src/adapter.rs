//! # Ledger Adapter Contract
//!
//! The integration-specific half of a writer. An adapter knows how to turn
//! one record kind into the accounting system's API calls; the engine-side
//! [`RecordWriter`](crate::RecordWriter) owns everything else (eligibility,
//! idempotency, error bookkeeping, instrumentation).
//!
//! Adapters report recoverable failures as [`SyncError`]. They never touch
//! the mapping store or error log themselves.

use crate::{SyncError, SyncMapping, SyncProfile};
use async_trait::async_trait;
use core_ledger::{Account, WritableRecord};

#[async_trait]
pub trait LedgerAdapter<R>: Send + Sync
where
    R: WritableRecord + 'static,
{
    /// Create the record in the accounting system and return its external id.
    async fn perform_create(
        &self,
        record: &R,
        account: &Account,
        profile: &SyncProfile,
    ) -> Result<String, SyncError>;

    /// Push changes to an already mapped record.
    async fn perform_update(
        &self,
        record: &R,
        account: &Account,
        profile: &SyncProfile,
        mapping: &SyncMapping,
    ) -> Result<(), SyncError>;

    /// Retract a mapped record that was voided locally.
    async fn perform_void(
        &self,
        record: &R,
        account: &Account,
        profile: &SyncProfile,
        mapping: &SyncMapping,
    ) -> Result<(), SyncError>;
}
