use core_ledger::{LedgerError, RecordKind, TenantId};
use thiserror::Error;

/// Recoverable failure raised by an adapter.
///
/// Writers catch these, record a reconciliation error for the object and
/// carry on; they never abort the surrounding batch. The display text is the
/// message stored on the error row.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// The accounting system refused the payload (validation, duplicates).
    #[error("{0}")]
    Rejected(String),

    /// Timeouts, rate limits, 5xx responses.
    #[error("{0}")]
    Transient(String),

    /// Credentials expired or were revoked.
    #[error("{0}")]
    Unauthorized(String),

    /// A related record the payload depends on has not been synced yet.
    #[error("{kind} {local_id} has not been synced yet")]
    MissingMapping { kind: RecordKind, local_id: String },

    /// The sync profile has no routing rule for this record.
    #[error("{0}")]
    MissingRouting(String),
}

impl SyncError {
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }
}

/// Unrecoverable failure inside the engine itself.
///
/// These are never written to the reconciliation error log; they propagate
/// to the job that invoked the writer.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Writer for {expected} records received a {actual} record")]
    KindMismatch {
        expected: RecordKind,
        actual: RecordKind,
    },

    #[error("Record belongs to tenant {record} but was submitted for tenant {scope}")]
    TenantMismatch { scope: TenantId, record: TenantId },

    #[error("Profile for {profile} handed to a {writer} writer")]
    IntegrationMismatch { writer: String, profile: String },

    #[error("Invalid {field}: {value}")]
    InvalidValue { field: String, value: String },

    #[error("Not found: {0}")]
    NotFound(String),
}

impl EngineError {
    pub(crate) fn invalid(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
