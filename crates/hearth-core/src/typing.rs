use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use hearth_models::ServerMessage;
use tokio::task::JoinHandle;

use crate::registry::{ConnectionId, ConnectionRegistry};

/// How long a typing flag stays visible without a refresh. The server is the
/// sole authority on typing visibility; clients cannot hold the flag open.
pub const TYPING_EXPIRY: Duration = Duration::from_millis(2500);

struct TypingEntry {
    owner: ConnectionId,
    /// Generation token; an expiry task only clears the entry it was
    /// scheduled for, never a rescheduled successor.
    token: u64,
    expiry: JoinHandle<()>,
}

/// Ephemeral per-room, per-user typing flags with self-expiring entries.
pub struct TypingTracker {
    registry: Arc<ConnectionRegistry>,
    entries: DashMap<(i64, i64), TypingEntry>,
    next_token: AtomicU64,
}

impl TypingTracker {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            entries: DashMap::new(),
            next_token: AtomicU64::new(1),
        }
    }

    /// Record a typing signal from `conn`. A `true` on a fresh entry
    /// broadcasts typing-started to the room (excluding the sender) and arms
    /// the expiry timer; a repeated `true` only re-arms it. A `false` cancels
    /// the timer and broadcasts typing-stopped if an entry existed.
    pub fn set_typing(
        self: &Arc<Self>,
        conn: ConnectionId,
        room_id: i64,
        user_id: i64,
        user_email: &str,
        is_typing: bool,
    ) {
        let key = (room_id, user_id);
        if is_typing {
            let token = self.next_token.fetch_add(1, Ordering::Relaxed);
            let expiry = self.spawn_expiry(conn, room_id, user_id, user_email, token);
            let started = match self.entries.entry(key) {
                Entry::Occupied(mut occupied) => {
                    let prior = occupied.insert(TypingEntry {
                        owner: conn,
                        token,
                        expiry,
                    });
                    prior.expiry.abort();
                    false
                }
                Entry::Vacant(vacant) => {
                    vacant.insert(TypingEntry {
                        owner: conn,
                        token,
                        expiry,
                    });
                    true
                }
            };
            if started {
                self.registry.broadcast(
                    room_id,
                    &ServerMessage::TypingUpdate {
                        room_id,
                        user_id,
                        user_email: user_email.to_string(),
                        is_typing: true,
                    },
                    Some(conn),
                );
            }
        } else if let Some((_, entry)) = self.entries.remove(&key) {
            entry.expiry.abort();
            self.registry.broadcast(
                room_id,
                &ServerMessage::TypingUpdate {
                    room_id,
                    user_id,
                    user_email: user_email.to_string(),
                    is_typing: false,
                },
                Some(conn),
            );
        }
    }

    /// Cancel every timer owned by a closing connection, without broadcasting.
    pub fn connection_closed(&self, conn: ConnectionId) {
        self.entries.retain(|_, entry| {
            if entry.owner == conn {
                entry.expiry.abort();
                false
            } else {
                true
            }
        });
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    fn spawn_expiry(
        self: &Arc<Self>,
        conn: ConnectionId,
        room_id: i64,
        user_id: i64,
        user_email: &str,
        token: u64,
    ) -> JoinHandle<()> {
        let tracker = Arc::clone(self);
        let user_email = user_email.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(TYPING_EXPIRY).await;
            let removed = tracker
                .entries
                .remove_if(&(room_id, user_id), |_, entry| entry.token == token);
            if removed.is_some() {
                tracing::debug!(room_id, user_id, "typing entry expired");
                tracker.registry.broadcast(
                    room_id,
                    &ServerMessage::TypingUpdate {
                        room_id,
                        user_id,
                        user_email,
                        is_typing: false,
                    },
                    Some(conn),
                );
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    struct Harness {
        registry: Arc<ConnectionRegistry>,
        tracker: Arc<TypingTracker>,
    }

    impl Harness {
        fn new() -> Self {
            let registry = Arc::new(ConnectionRegistry::new());
            let tracker = Arc::new(TypingTracker::new(registry.clone()));
            Self { registry, tracker }
        }

        fn attach(&self, user_id: i64, room_id: i64) -> (ConnectionId, UnboundedReceiver<ServerMessage>) {
            let conn = self.registry.next_connection_id();
            let (tx, rx) = mpsc::unbounded_channel();
            self.registry
                .register(conn, user_id, &format!("user{user_id}@example.com"), tx);
            self.registry.subscribe(conn, room_id);
            (conn, rx)
        }
    }

    fn drain(rx: &mut UnboundedReceiver<ServerMessage>) -> Vec<bool> {
        let mut flags = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            if let ServerMessage::TypingUpdate { is_typing, .. } = msg {
                flags.push(is_typing);
            }
        }
        flags
    }

    #[tokio::test(start_paused = true)]
    async fn unrefreshed_typing_expires_exactly_once() {
        let h = Harness::new();
        let (a, mut rx_a) = h.attach(1, 7);
        let (_b, mut rx_b) = h.attach(2, 7);

        h.tracker.set_typing(a, 7, 1, "user1@example.com", true);
        tokio::time::sleep(Duration::from_secs(3)).await;
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(drain(&mut rx_b), vec![true, false]);
        // The typing user never hears about their own flag.
        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(h.tracker.entry_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_reschedules_instead_of_stacking() {
        let h = Harness::new();
        let (a, _rx_a) = h.attach(1, 7);
        let (_b, mut rx_b) = h.attach(2, 7);

        h.tracker.set_typing(a, 7, 1, "user1@example.com", true);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        h.tracker.set_typing(a, 7, 1, "user1@example.com", true);
        tokio::time::sleep(Duration::from_millis(1500)).await;

        // 3s after the first signal but only 1.5s after the refresh.
        assert_eq!(drain(&mut rx_b), vec![true]);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(drain(&mut rx_b), vec![false]);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_stop_cancels_the_timer() {
        let h = Harness::new();
        let (a, _rx_a) = h.attach(1, 7);
        let (_b, mut rx_b) = h.attach(2, 7);

        h.tracker.set_typing(a, 7, 1, "user1@example.com", true);
        h.tracker.set_typing(a, 7, 1, "user1@example.com", false);
        tokio::time::sleep(Duration::from_secs(4)).await;

        assert_eq!(drain(&mut rx_b), vec![true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_without_start_is_silent() {
        let h = Harness::new();
        let (a, _rx_a) = h.attach(1, 7);
        let (_b, mut rx_b) = h.attach(2, 7);

        h.tracker.set_typing(a, 7, 1, "user1@example.com", false);
        tokio::time::sleep(Duration::from_secs(4)).await;

        assert!(drain(&mut rx_b).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn closing_the_owner_cancels_without_broadcast() {
        let h = Harness::new();
        let (a, _rx_a) = h.attach(1, 7);
        let (_b, mut rx_b) = h.attach(2, 7);

        h.tracker.set_typing(a, 7, 1, "user1@example.com", true);
        h.tracker.connection_closed(a);
        h.registry.close(a);
        tokio::time::sleep(Duration::from_secs(4)).await;

        assert_eq!(drain(&mut rx_b), vec![true]);
        assert_eq!(h.tracker.entry_count(), 0);
    }
}
