use std::collections::HashSet;

use hearth_core::registry::ConnectionId;
use hearth_models::User;

/// Per-connection state, owned by the connection task and destroyed with it.
///
/// Everything except the connection id is unset until the auth handshake
/// succeeds; the state machine is `Unauthenticated -> Authenticated`, with
/// socket teardown as the terminal transition.
pub struct Session {
    pub conn: ConnectionId,
    pub user: Option<User>,
    /// Cache of the user's memberships plus rooms joined on this connection.
    /// Mirrors the registry's fanout membership for this connection.
    pub rooms: HashSet<i64>,
}

impl Session {
    pub fn new(conn: ConnectionId) -> Self {
        Self {
            conn,
            user: None,
            rooms: HashSet::new(),
        }
    }
}
