//! Workspace entry crate.
//!
//! Re-exports the reconciliation service façade so hosts can depend on
//! `ledger-sync-workspace` alone and enable the documented features without
//! wiring each `core-*` crate individually.

#[cfg(feature = "service")]
pub use core_service::*;
