//! The side channel that carries errors, warnings, and flush notifications
//! out of calls that never return a `Result` (`trace`, `span`, `generation`,
//! `event`, `score`, and the `*_update` variants).

use crate::event::Event;
use std::sync::Arc;
use tokio::sync::broadcast;

/// One notification delivered on the event bus.
#[derive(Debug, Clone)]
pub enum EmittedEvent {
    /// A fallible operation failed; the caller's flow was not interrupted.
    Error { message: String },
    /// A non-fatal condition worth surfacing (e.g. a dropped oversized field).
    Warning { message: String },
    /// A batch was handed off to the transport for flushing.
    Flush { batch: Vec<Event> },
}

const CHANNEL_CAPACITY: usize = 1024;

/// A multi-subscriber broadcast of [`EmittedEvent`]s.
///
/// Subscribers that fall behind lose the oldest unread events rather than
/// blocking publishers; this mirrors the fire-and-forget nature of the calls
/// that publish to it.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Arc<EmittedEvent>>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _receiver) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Subscribe to future events. Events published before this call are not
    /// replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<EmittedEvent>> {
        self.sender.subscribe()
    }

    /// Publish an event to all current subscribers. A send with no
    /// subscribers is a no-op, not an error.
    pub fn publish(&self, event: EmittedEvent) {
        let _ = self.sender.send(Arc::new(event));
    }

    pub fn error(&self, message: impl Into<String>) {
        self.publish(EmittedEvent::Error { message: message.into() });
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.publish(EmittedEvent::Warning { message: message.into() });
    }

    pub fn flush(&self, batch: Vec<Event>) {
        self.publish(EmittedEvent::Flush { batch });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
