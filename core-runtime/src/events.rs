//! # Reconciliation Event Bus
//!
//! Broadcasts reconciliation outcomes using `tokio::sync::broadcast` so that
//! dashboards, audit trails and tests can observe writer activity without the
//! writers knowing who is listening.
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{EventBus, ReconciliationEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(100);
//! let mut subscriber = bus.subscribe();
//!
//! bus.emit(ReconciliationEvent::WriteSucceeded {
//!     tenant_id: "tenant-1".to_string(),
//!     integration: "xero".to_string(),
//!     record_kind: "invoice".to_string(),
//!     local_id: "inv-42".to_string(),
//!     operation: "create".to_string(),
//! })
//! .ok();
//!
//! let event = subscriber.recv().await.unwrap();
//! assert!(!event.is_failure());
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber missed `n` events; non-fatal.
//! - **`RecvError::Closed`**: every sender was dropped; treat as shutdown.
//!
//! Emitting with no subscribers returns `Err`, which publishers ignore.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

/// Outcome of a single writer invocation or error-log transition.
///
/// Identifiers are carried as strings so that this crate stays independent
/// of the ledger domain types.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum ReconciliationEvent {
    /// The external system accepted a create, update or void.
    WriteSucceeded {
        tenant_id: String,
        integration: String,
        record_kind: String,
        local_id: String,
        operation: String,
    },
    /// The adapter raised a recoverable error; an error row was upserted.
    WriteFailed {
        tenant_id: String,
        integration: String,
        record_kind: String,
        local_id: String,
        operation: String,
        message: String,
    },
    /// A retry attempt finished.
    RetryAttempted {
        tenant_id: String,
        record_kind: String,
        local_id: String,
        resolved: bool,
    },
}

impl ReconciliationEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            ReconciliationEvent::WriteSucceeded { .. } => "External write succeeded",
            ReconciliationEvent::WriteFailed { .. } => "External write failed",
            ReconciliationEvent::RetryAttempted { .. } => "Reconciliation retry attempted",
        }
    }

    /// Whether the event reports a failed write.
    pub fn is_failure(&self) -> bool {
        matches!(self, ReconciliationEvent::WriteFailed { .. })
    }

    /// Tenant the event belongs to.
    pub fn tenant_id(&self) -> &str {
        match self {
            ReconciliationEvent::WriteSucceeded { tenant_id, .. }
            | ReconciliationEvent::WriteFailed { tenant_id, .. }
            | ReconciliationEvent::RetryAttempted { tenant_id, .. } => tenant_id,
        }
    }
}

/// Central event bus for publishing and subscribing to reconciliation events.
///
/// Cloning the bus clones the sender; every `subscribe()` creates an
/// independent receiver that sees all future events.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ReconciliationEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified per-subscriber buffer.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an
    /// error if there are none.
    pub fn emit(
        &self,
        event: ReconciliationEvent,
    ) -> Result<usize, SendError<ReconciliationEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<ReconciliationEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

type EventFilter = Box<dyn Fn(&ReconciliationEvent) -> bool + Send + Sync>;

/// A `broadcast::Receiver` wrapper with optional filtering.
pub struct EventStream {
    receiver: Receiver<ReconciliationEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<ReconciliationEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` will be returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ReconciliationEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    /// Receives the next event that passes the filter.
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events
    /// and `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<ReconciliationEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.matches(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive a matching event without waiting.
    pub fn try_recv(&mut self) -> Option<Result<ReconciliationEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.matches(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }

    fn matches(&self, event: &ReconciliationEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}
