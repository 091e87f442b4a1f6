//! Per-user outbound event channels.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::domain::SessionEvent;

const DEFAULT_BUFFER: usize = 64;

struct Connection {
    id: u64,
    sender: mpsc::Sender<SessionEvent>,
}

/// Routes session events to whichever socket a user currently has open.
///
/// At most one connection per user is registered; a newer `connect` replaces
/// the older one, whose receiver then closes.
pub struct NotificationHub {
    connections: DashMap<String, Connection>,
    next_id: AtomicU64,
    buffer: usize,
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::with_buffer(DEFAULT_BUFFER)
    }

    pub fn with_buffer(buffer: usize) -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    /// Register a live connection for `user_id`
    pub fn connect(&self, user_id: &str) -> (u64, mpsc::Receiver<SessionEvent>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.buffer);
        if self
            .connections
            .insert(user_id.to_string(), Connection { id, sender })
            .is_some()
        {
            debug!(user_id = %user_id, connection_id = id, "Replaced previous connection");
        }
        (id, receiver)
    }

    /// Unregister `connection_id`. A newer connection for the same user is left alone.
    pub fn disconnect(&self, user_id: &str, connection_id: u64) -> bool {
        self.connections
            .remove_if(user_id, |_, conn| conn.id == connection_id)
            .is_some()
    }

    /// Deliver an event if the user is connected. Returns whether it was queued.
    pub fn send(&self, user_id: &str, event: SessionEvent) -> bool {
        let Some(conn) = self.connections.get(user_id) else {
            debug!(user_id = %user_id, "No live connection, event dropped");
            return false;
        };
        match conn.sender.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(user_id = %user_id, "Session outbound buffer full, event dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn is_connected(&self, user_id: &str) -> bool {
        self.connections.contains_key(user_id)
    }

    pub fn connected_users(&self) -> usize {
        self.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error_event(message: &str) -> SessionEvent {
        SessionEvent::Error {
            message: message.to_string(),
        }
    }

    #[tokio::test]
    async fn test_send_reaches_connected_user() {
        let hub = NotificationHub::new();
        let (_, mut rx) = hub.connect("alice");

        assert!(hub.send("alice", error_event("hello")));
        assert_eq!(rx.recv().await, Some(error_event("hello")));
        assert!(!hub.send("bob", error_event("nobody home")));
    }

    #[tokio::test]
    async fn test_stale_disconnect_does_not_clobber_reconnect() {
        let hub = NotificationHub::new();
        let (old_id, mut old_rx) = hub.connect("alice");
        let (new_id, mut new_rx) = hub.connect("alice");

        // The replaced receiver is closed
        assert_eq!(old_rx.recv().await, None);

        assert!(!hub.disconnect("alice", old_id));
        assert!(hub.is_connected("alice"));
        assert!(hub.send("alice", error_event("still here")));
        assert!(new_rx.recv().await.is_some());

        assert!(hub.disconnect("alice", new_id));
        assert_eq!(hub.connected_users(), 0);
    }
}
