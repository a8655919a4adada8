//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the reconciliation engine:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Reconciliation event bus
//! - Injectable clock
//!
//! ## Overview
//!
//! This crate contains the runtime utilities that the ledger and sync crates
//! depend on. It establishes the logging conventions, configuration builder and
//! event broadcasting used throughout the workspace.

pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{EngineConfig, EngineConfigBuilder, ProfileDefaults};
pub use error::{Error, Result};
