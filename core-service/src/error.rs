use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {0}")]
    Config(#[from] core_runtime::Error),

    #[error("Ledger error: {0}")]
    Ledger(#[from] core_ledger::LedgerError),

    #[error("Engine error: {0}")]
    Engine(#[from] core_sync::EngineError),
}

pub type Result<T> = std::result::Result<T, ServiceError>;
