use crate::error::CoreError;
use crate::registry::ConnectionId;
use crate::AppState;
use hearth_models::{HistoryMessage, ServerMessage};

pub const DEFAULT_HISTORY_LIMIT: u32 = 50;
pub const MAX_HISTORY_LIMIT: u32 = 200;

/// Caller-supplied history limits are advisory; the store never sees a value
/// outside 1..=MAX.
pub fn clamp_history_limit(limit: Option<u32>) -> i64 {
    i64::from(
        limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT),
    )
}

/// Persist a membership for the user and add the connection to the room's
/// fanout set. Joining a room that does not exist is a silent no-op
/// (returns false); duplicate joins are safe.
pub async fn join_room(
    state: &AppState,
    conn: ConnectionId,
    user_id: i64,
    room_id: i64,
) -> Result<bool, CoreError> {
    if hearth_db::rooms::get_room(&state.db, room_id)
        .await?
        .is_none()
    {
        tracing::debug!(user_id, room_id, "join ignored: room does not resolve");
        return Ok(false);
    }
    hearth_db::memberships::add_membership(&state.db, user_id, room_id).await?;
    state.registry.subscribe(conn, room_id);
    Ok(true)
}

/// Whether the session may address the room: a live fanout subscription or a
/// persisted membership both qualify.
pub async fn can_address_room(
    state: &AppState,
    conn: ConnectionId,
    user_id: i64,
    room_id: i64,
) -> Result<bool, CoreError> {
    if state.registry.is_subscribed(conn, room_id) {
        return Ok(true);
    }
    Ok(hearth_db::memberships::is_member(&state.db, user_id, room_id).await?)
}

/// Replay the most recent messages for a room, oldest first, to the
/// requesting connection only. The batch is tagged with the room id so a
/// client that has since navigated away can discard it. A room with no
/// messages replays an empty batch.
pub async fn replay_history(
    state: &AppState,
    conn: ConnectionId,
    room_id: i64,
    limit: Option<u32>,
) -> Result<(), CoreError> {
    let rows =
        hearth_db::messages::list_recent_messages(&state.db, room_id, clamp_history_limit(limit))
            .await?;
    let messages = rows
        .into_iter()
        .map(|m| HistoryMessage {
            id: m.id,
            text: m.content,
            created_at: m.created_at,
            user_id: m.user_id,
            user_email: m.user_email,
        })
        .collect();
    state
        .registry
        .send_to(conn, ServerMessage::MessageHistory { room_id, messages });
    Ok(())
}
