//! Typed event bus for data-layer notifications.
//!
//! Backed by a tokio broadcast channel: emitters do not know who listens,
//! and every subscriber sees every event. Events carry ids only, never
//! loaded objects, since subscribers may live on any context.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use pl_core::ContextKind;
use pl_models::DestructionType;

/// Application-level state changes produced by the data layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    /// An obfuscation timer fired and the message content was scrubbed.
    MessageObfuscated { message_id: i64 },
    /// A deletion timer fired and the message became a tombstone.
    MessageDeletedForEveryone {
        message_id: i64,
        conversation_id: i64,
    },
    /// A timer fired for a message that no longer exists; nothing was done.
    DestructionTimerDropped {
        message_id: i64,
        kind: DestructionType,
    },
    /// Owed timers were re-armed on a context.
    TimersRestored { context: ContextKind, count: usize },
    /// Messages belonging to no conversation were erased.
    OrphansPurged { count: usize },
}

/// Application-wide event bus backed by a tokio broadcast channel.
///
/// Slow subscribers that fall behind receive `Lagged` and miss events.
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<AppEvent>>,
}

impl EventBus {
    /// Create a new EventBus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.sender.subscribe()
    }

    /// Emit an event to all subscribers. Having none is fine.
    pub fn emit(&self, event: AppEvent) {
        let label = event_label(&event);
        match self.sender.send(event) {
            Ok(count) => debug!("event_bus: emitted {label} to {count} subscriber(s)"),
            Err(_) => debug!("event_bus: no subscribers for {label}"),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(pl_core::constants::EVENT_BUS_CAPACITY)
    }
}

/// Label for an event (for logging).
fn event_label(event: &AppEvent) -> &'static str {
    match event {
        AppEvent::MessageObfuscated { .. } => "MessageObfuscated",
        AppEvent::MessageDeletedForEveryone { .. } => "MessageDeletedForEveryone",
        AppEvent::DestructionTimerDropped { .. } => "DestructionTimerDropped",
        AppEvent::TimersRestored { .. } => "TimersRestored",
        AppEvent::OrphansPurged { .. } => "OrphansPurged",
    }
}
