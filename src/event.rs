//! Event handling for registry and dispatch notifications.
//!
//! Components report state changes through an [`EventBus`] instead of
//! depending on a particular notification mechanism. The daemon forwards
//! these events as D-Bus signals.

use std::sync::Arc;

use crate::dispatch::DispatchReport;

/// Events that can be emitted by the noise control service.
#[derive(Debug, Clone)]
pub enum ServiceEvent {
   /// The registered device set was mutated or reloaded.
   RegistryChanged { devices: usize },
   /// A persisted record could not be parsed and was ignored.
   RecordSkipped { record: String, reason: String },
   /// A queued mode request has been delivered (or attempted).
   DispatchCompleted(DispatchReport),
}

/// Trait for implementing event emission.
pub trait EventBus: Send + Sync {
   /// Emits an event to all registered listeners.
   fn emit(&self, event: ServiceEvent);
}

/// Type alias for a thread-safe event sender.
pub type EventSender = Arc<dyn EventBus>;

/// Event bus that drops everything.
pub struct NullBus;

impl EventBus for NullBus {
   fn emit(&self, _event: ServiceEvent) {}
}
