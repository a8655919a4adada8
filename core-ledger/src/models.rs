//! Identity and classification types shared by every ledger record.

use crate::{LedgerError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// =============================================================================
// ID Types
// =============================================================================

/// Unique identifier for a tenant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantId(pub Uuid);

impl TenantId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| LedgerError::invalid("tenant_id", s))
    }

    /// Get the string representation used in storage
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for TenantId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

// =============================================================================
// Record Kind
// =============================================================================

/// The kinds of records that can be mirrored into an accounting system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Customer,
    Invoice,
    CreditNote,
    Payment,
}

impl RecordKind {
    pub const ALL: [RecordKind; 4] = [
        RecordKind::Customer,
        RecordKind::Invoice,
        RecordKind::CreditNote,
        RecordKind::Payment,
    ];

    /// Get the string representation for database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Customer => "customer",
            RecordKind::Invoice => "invoice",
            RecordKind::CreditNote => "credit_note",
            RecordKind::Payment => "payment",
        }
    }
}

impl FromStr for RecordKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "customer" => Ok(RecordKind::Customer),
            "invoice" => Ok(RecordKind::Invoice),
            "credit_note" => Ok(RecordKind::CreditNote),
            "payment" => Ok(RecordKind::Payment),
            _ => Err(LedgerError::invalid("record_kind", s)),
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Integration Type
// =============================================================================

/// External accounting systems a tenant can connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationType {
    Xero,
    #[serde(rename = "quickbooks")]
    QuickBooks,
    #[serde(rename = "netsuite")]
    NetSuite,
    SageIntacct,
}

impl IntegrationType {
    /// Get the string representation for database storage and metric labels
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrationType::Xero => "xero",
            IntegrationType::QuickBooks => "quickbooks",
            IntegrationType::NetSuite => "netsuite",
            IntegrationType::SageIntacct => "sage_intacct",
        }
    }
}

impl FromStr for IntegrationType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "xero" => Ok(IntegrationType::Xero),
            "quickbooks" => Ok(IntegrationType::QuickBooks),
            "netsuite" => Ok(IntegrationType::NetSuite),
            "sage_intacct" => Ok(IntegrationType::SageIntacct),
            _ => Err(LedgerError::invalid("integration", s)),
        }
    }
}

impl fmt::Display for IntegrationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Account
// =============================================================================

/// The invoicing account (tenant) whose records are being mirrored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub tenant_id: TenantId,
    pub name: String,
    /// ISO 4217 code the tenant reports in
    pub base_currency: String,
}

impl Account {
    pub fn new(tenant_id: TenantId, name: impl Into<String>, base_currency: impl Into<String>) -> Self {
        Self {
            tenant_id,
            name: name.into(),
            base_currency: base_currency.into(),
        }
    }
}
