//! Election events and the notification sink

use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::error::Error;

/// Notification emitted by a [`LeaderElection`](super::LeaderElection)
#[derive(Debug, Clone)]
pub enum ElectionEvent {
    /// This candidate became leader
    Elected,
    /// This candidate stopped being leader
    Unelected,
    /// The observed leader changed to this candidate id
    Leader(String),
    /// A fault. The session has been stopped, except after a failed refresh,
    /// where it restarts from registration.
    Error(Arc<Error>),
}

impl ElectionEvent {
    /// Short name for logging
    pub fn type_name(&self) -> &'static str {
        match self {
            ElectionEvent::Elected => "elected",
            ElectionEvent::Unelected => "unelected",
            ElectionEvent::Leader(_) => "leader",
            ElectionEvent::Error(_) => "error",
        }
    }
}

impl PartialEq for ElectionEvent {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ElectionEvent::Elected, ElectionEvent::Elected) => true,
            (ElectionEvent::Unelected, ElectionEvent::Unelected) => true,
            (ElectionEvent::Leader(a), ElectionEvent::Leader(b)) => a == b,
            (ElectionEvent::Error(a), ElectionEvent::Error(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Fan-out of events to every subscriber, in emission order
#[derive(Default)]
pub(crate) struct EventSink {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<ElectionEvent>>>,
}

impl EventSink {
    pub(crate) fn subscribe(&self) -> mpsc::UnboundedReceiver<ElectionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push(tx);
        rx
    }

    pub(crate) fn emit(&self, event: ElectionEvent) {
        tracing::trace!("Emitting {} event", event.type_name());
        self.lock().retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::UnboundedSender<ElectionEvent>>> {
        // A panic while holding this lock cannot leave the Vec inconsistent
        self.subscribers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_reach_every_subscriber_in_order() {
        let sink = EventSink::default();
        let mut first = sink.subscribe();
        let mut second = sink.subscribe();

        sink.emit(ElectionEvent::Leader("n1".into()));
        sink.emit(ElectionEvent::Elected);

        for rx in [&mut first, &mut second] {
            assert_eq!(rx.try_recv().unwrap(), ElectionEvent::Leader("n1".into()));
            assert_eq!(rx.try_recv().unwrap(), ElectionEvent::Elected);
            assert!(rx.try_recv().is_err());
        }
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let sink = EventSink::default();
        let rx = sink.subscribe();
        drop(rx);

        sink.emit(ElectionEvent::Unelected);
        assert!(sink.lock().is_empty());
    }
}
