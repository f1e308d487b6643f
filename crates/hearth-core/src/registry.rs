use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use hearth_models::ServerMessage;
use tokio::sync::mpsc;

/// Process-local identity of a live connection. Never serialized; only used
/// as a map key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Registry-side state for one authenticated connection.
struct Peer {
    user_id: i64,
    user_email: String,
    /// FIFO outbound channel; the connection task drains it into the socket.
    sender: mpsc::UnboundedSender<ServerMessage>,
    /// Rooms this connection is in the fanout set of.
    rooms: HashSet<i64>,
    /// The room the client is foregrounding, used to gate notifications.
    /// Invariant: always a member of `rooms`.
    active_room: Option<i64>,
}

/// Maps live connections to peers and room ids to fanout sets.
///
/// This is the only mutable shared state in the core. All mutation goes
/// through methods here; fanout entries are created lazily on first
/// subscription and removed when their set drains empty.
pub struct ConnectionRegistry {
    peers: DashMap<ConnectionId, Peer>,
    rooms: DashMap<i64, HashSet<ConnectionId>>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            peers: DashMap::new(),
            rooms: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn next_connection_id(&self) -> ConnectionId {
        ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Attach an authenticated peer. Called after the auth handshake
    /// succeeds; a repeated handshake on the same connection starts from a
    /// clean subscription slate.
    pub fn register(
        &self,
        conn: ConnectionId,
        user_id: i64,
        user_email: &str,
        sender: mpsc::UnboundedSender<ServerMessage>,
    ) {
        self.detach(conn);
        self.peers.insert(
            conn,
            Peer {
                user_id,
                user_email: user_email.to_string(),
                sender,
                rooms: HashSet::new(),
                active_room: None,
            },
        );
    }

    /// Add the connection to a room's fanout set. Safe to call redundantly.
    pub fn subscribe(&self, conn: ConnectionId, room_id: i64) {
        let Some(mut peer) = self.peers.get_mut(&conn) else {
            return;
        };
        peer.rooms.insert(room_id);
        drop(peer);
        self.rooms.entry(room_id).or_default().insert(conn);
    }

    pub fn is_subscribed(&self, conn: ConnectionId, room_id: i64) -> bool {
        self.peers
            .get(&conn)
            .map(|p| p.rooms.contains(&room_id))
            .unwrap_or(false)
    }

    /// Set or clear the foregrounded room. Setting a room the connection is
    /// not subscribed to is refused, preserving the active⊆subscribed
    /// invariant.
    pub fn set_active_room(&self, conn: ConnectionId, room_id: Option<i64>) -> bool {
        let Some(mut peer) = self.peers.get_mut(&conn) else {
            return false;
        };
        match room_id {
            Some(id) if !peer.rooms.contains(&id) => false,
            other => {
                peer.active_room = other;
                true
            }
        }
    }

    pub fn active_room(&self, conn: ConnectionId) -> Option<i64> {
        self.peers.get(&conn).and_then(|p| p.active_room)
    }

    /// Deliver directly to one connection. Returns false when the connection
    /// is unknown or its channel has closed.
    pub fn send_to(&self, conn: ConnectionId, event: ServerMessage) -> bool {
        match self.peers.get(&conn) {
            Some(peer) => peer.sender.send(event).is_ok(),
            None => false,
        }
    }

    /// Deliver to every connection in the room's fanout set except
    /// `exclude`. Works off a snapshot, so a connection closing mid-fanout
    /// is skipped without disturbing the other recipients.
    pub fn broadcast(&self, room_id: i64, event: &ServerMessage, exclude: Option<ConnectionId>) {
        for conn in self.connections_in(room_id) {
            if Some(conn) == exclude {
                continue;
            }
            if let Some(peer) = self.peers.get(&conn) {
                let _ = peer.sender.send(event.clone());
            }
        }
    }

    /// Snapshot of the fanout set for a room.
    pub fn connections_in(&self, room_id: i64) -> Vec<ConnectionId> {
        self.rooms
            .get(&room_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Detach a connection: drop it from every fanout set it belongs to and
    /// discard its peer entry. Idempotent; a second close is a no-op.
    pub fn close(&self, conn: ConnectionId) {
        self.detach(conn);
    }

    fn detach(&self, conn: ConnectionId) {
        let Some((_, peer)) = self.peers.remove(&conn) else {
            return;
        };
        for room_id in peer.rooms {
            if let Some(mut set) = self.rooms.get_mut(&room_id) {
                set.remove(&conn);
                let emptied = set.is_empty();
                drop(set);
                if emptied {
                    self.rooms.remove_if(&room_id, |_, set| set.is_empty());
                    tracing::debug!(room_id, "fanout entry dropped (no subscribers left)");
                }
            }
        }
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
