//! # Write Instrumentation
//!
//! Writers report every adapter outcome through [`SyncMetrics`]. The
//! production sink increments `metrics` counters labelled by integration and
//! record kind; [`EventBusMetrics`] republishes outcomes on the
//! reconciliation event bus.

use crate::{ReconciliationError, WriteOperation};
use core_ledger::{IntegrationType, RecordKind, TenantId};
use core_runtime::events::{EventBus, ReconciliationEvent};
use std::sync::Arc;

pub const WRITE_SUCCEEDED: &str = "accounting_sync.write_succeeded";
pub const WRITE_FAILED: &str = "accounting_sync.write_failed";
pub const RETRY_ATTEMPTED: &str = "accounting_sync.retry_attempted";

/// One adapter invocation that reached the accounting system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteEvent {
    pub tenant_id: TenantId,
    pub integration: IntegrationType,
    pub record_kind: RecordKind,
    pub local_id: String,
    pub operation: WriteOperation,
}

pub trait SyncMetrics: Send + Sync {
    fn write_succeeded(&self, event: &WriteEvent);

    fn write_failed(&self, event: &WriteEvent, message: &str);

    fn retry_attempted(&self, error: &ReconciliationError, resolved: bool);
}

/// `metrics` counters; a no-op until the host installs a recorder.
#[derive(Debug, Clone, Copy, Default)]
pub struct CounterMetrics;

impl SyncMetrics for CounterMetrics {
    fn write_succeeded(&self, event: &WriteEvent) {
        metrics::counter!(
            WRITE_SUCCEEDED,
            "integration" => event.integration.as_str(),
            "kind" => event.record_kind.as_str()
        )
        .increment(1);
    }

    fn write_failed(&self, event: &WriteEvent, _message: &str) {
        metrics::counter!(
            WRITE_FAILED,
            "integration" => event.integration.as_str(),
            "kind" => event.record_kind.as_str()
        )
        .increment(1);
    }

    fn retry_attempted(&self, error: &ReconciliationError, resolved: bool) {
        metrics::counter!(
            RETRY_ATTEMPTED,
            "integration" => error.integration.as_str(),
            "resolved" => if resolved { "true" } else { "false" }
        )
        .increment(1);
    }
}

/// Publishes outcomes on the event bus.
#[derive(Debug, Clone)]
pub struct EventBusMetrics {
    bus: EventBus,
}

impl EventBusMetrics {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }
}

impl SyncMetrics for EventBusMetrics {
    fn write_succeeded(&self, event: &WriteEvent) {
        // No subscribers is fine
        let _ = self.bus.emit(ReconciliationEvent::WriteSucceeded {
            tenant_id: event.tenant_id.as_str(),
            integration: event.integration.as_str().to_string(),
            record_kind: event.record_kind.as_str().to_string(),
            local_id: event.local_id.clone(),
            operation: event.operation.as_str().to_string(),
        });
    }

    fn write_failed(&self, event: &WriteEvent, message: &str) {
        let _ = self.bus.emit(ReconciliationEvent::WriteFailed {
            tenant_id: event.tenant_id.as_str(),
            integration: event.integration.as_str().to_string(),
            record_kind: event.record_kind.as_str().to_string(),
            local_id: event.local_id.clone(),
            operation: event.operation.as_str().to_string(),
            message: message.to_string(),
        });
    }

    fn retry_attempted(&self, error: &ReconciliationError, resolved: bool) {
        let _ = self.bus.emit(ReconciliationEvent::RetryAttempted {
            tenant_id: error.tenant_id.as_str(),
            record_kind: error.object.record_kind.as_str().to_string(),
            local_id: error.object.local_id.clone(),
            resolved,
        });
    }
}

/// Forwards every call to each inner sink.
#[derive(Clone, Default)]
pub struct FanoutMetrics {
    sinks: Vec<Arc<dyn SyncMetrics>>,
}

impl FanoutMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn SyncMetrics>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl SyncMetrics for FanoutMetrics {
    fn write_succeeded(&self, event: &WriteEvent) {
        for sink in &self.sinks {
            sink.write_succeeded(event);
        }
    }

    fn write_failed(&self, event: &WriteEvent, message: &str) {
        for sink in &self.sinks {
            sink.write_failed(event, message);
        }
    }

    fn retry_attempted(&self, error: &ReconciliationError, resolved: bool) {
        for sink in &self.sinks {
            sink.retry_attempted(error, resolved);
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl SyncMetrics for NoopMetrics {
    fn write_succeeded(&self, _event: &WriteEvent) {}

    fn write_failed(&self, _event: &WriteEvent, _message: &str) {}

    fn retry_attempted(&self, _error: &ReconciliationError, _resolved: bool) {}
}
