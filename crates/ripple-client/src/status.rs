//! Connection status notifications.
//!
//! Status changes reach application code two ways: callbacks registered
//! with [`StatusObservers::on_status`] and a broadcast stream from
//! [`StatusObservers::subscribe`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, error};

/// User-visible connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// The link opened.
    Connected,
    /// An open link went away.
    Disconnected,
    /// Reconnection gave up. Terminal until the next `connect`.
    ConnectionFailed,
}

impl ConnectionStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::ConnectionFailed => "connection_failed",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status callback.
pub type StatusHandler = Arc<dyn Fn(ConnectionStatus) + Send + Sync>;

/// Identifies a registered status callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusObserverId(u64);

const STATUS_CHANNEL_CAPACITY: usize = 64;

/// Fan-out point for status changes. Clones share observers.
#[derive(Clone)]
pub struct StatusObservers {
    handlers: Arc<Mutex<Vec<(StatusObserverId, StatusHandler)>>>,
    next_id: Arc<AtomicU64>,
    events: broadcast::Sender<ConnectionStatus>,
}

impl StatusObservers {
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        Self {
            handlers: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(StatusObserverId, StatusHandler)>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a callback invoked on every status change.
    pub fn on_status<F>(&self, handler: F) -> StatusObserverId
    where
        F: Fn(ConnectionStatus) + Send + Sync + 'static,
    {
        let id = StatusObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push((id, Arc::new(handler)));
        id
    }

    /// Remove a callback. Returns `false` if it was not registered.
    pub fn remove(&self, id: StatusObserverId) -> bool {
        let mut handlers = self.lock();
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        handlers.len() != before
    }

    /// A stream of status changes from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionStatus> {
        self.events.subscribe()
    }

    /// Deliver a status change. A panicking callback is logged and skipped.
    pub fn emit(&self, status: ConnectionStatus) {
        debug!(status = %status, "Connection status changed");

        let handlers: Vec<StatusHandler> = self.lock().iter().map(|(_, h)| Arc::clone(h)).collect();
        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(status))).is_err() {
                error!(status = %status, "Status observer panicked");
            }
        }

        // No receivers is fine.
        let _ = self.events.send(status);
    }
}

impl Default for StatusObservers {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_names() {
        assert_eq!(ConnectionStatus::ConnectionFailed.as_str(), "connection_failed");
        assert_eq!(
            serde_json::to_string(&ConnectionStatus::Disconnected).unwrap(),
            "\"disconnected\""
        );
    }

    #[tokio::test]
    async fn test_emit_reaches_callbacks_and_stream() {
        let observers = StatusObservers::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut stream = observers.subscribe();

        let sink = Arc::clone(&seen);
        observers.on_status(move |status| sink.lock().unwrap().push(status));

        observers.emit(ConnectionStatus::Connected);

        assert_eq!(*seen.lock().unwrap(), vec![ConnectionStatus::Connected]);
        assert_eq!(stream.recv().await.unwrap(), ConnectionStatus::Connected);
    }

    #[test]
    fn test_panicking_observer_is_isolated() {
        let observers = StatusObservers::new();
        let calls = Arc::new(AtomicU64::new(0));

        observers.on_status(|_| panic!("observer failure"));
        let counter = Arc::clone(&calls);
        observers.on_status(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        observers.emit(ConnectionStatus::ConnectionFailed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remove_observer() {
        let observers = StatusObservers::new();
        let id = observers.on_status(|_| {});
        assert!(observers.remove(id));
        assert!(!observers.remove(id));
    }
}
