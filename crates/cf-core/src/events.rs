//! Single-consumer event delivery.
//!
//! Every component reports through an [`EventSink`]: an unbounded mpsc sender
//! with one receiver on the other end. Events arrive in send order. A sink
//! whose receiver has gone away silently drops events, so reporting never
//! fails the work being reported on.

use tokio::sync::mpsc;

/// Sending half of a component's event channel.
#[derive(Debug)]
pub struct EventSink<T> {
    tx: Option<mpsc::UnboundedSender<T>>,
}

impl<T> EventSink<T> {
    /// Create a sink and the receiver that consumes it.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Wrap an existing sender.
    pub fn new(tx: mpsc::UnboundedSender<T>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A sink that discards every event.
    pub fn noop() -> Self {
        Self { tx: None }
    }

    /// Deliver an event. Returns `false` when nobody is listening.
    pub fn send(&self, event: T) -> bool {
        match &self.tx {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }
}

impl<T> Clone for EventSink<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> Default for EventSink<T> {
    fn default() -> Self {
        Self::noop()
    }
}
