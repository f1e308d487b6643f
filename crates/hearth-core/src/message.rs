use crate::error::CoreError;
use crate::registry::ConnectionId;
use crate::AppState;
use hearth_models::{ServerMessage, User};

/// Notifications carry an excerpt, not the full body.
pub const NOTIFICATION_PREVIEW_CHARS: usize = 80;

fn preview(text: &str) -> String {
    text.chars().take(NOTIFICATION_PREVIEW_CHARS).collect()
}

#[derive(Debug, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered { message_id: i64 },
    /// The user holds no membership; answered with a corrective notice so
    /// the client can join and retry.
    JoinRequired,
    /// Validation failure (empty text, unresolvable room): dropped silently.
    Ignored,
}

/// Route one inbound send: authorize, persist, then fan out.
///
/// A persisted member who never joined on this connection is auto-subscribed
/// by sending (send-implies-join). The durable id comes from the store; the
/// client's `temp_id` is passed through untouched for optimistic-UI
/// reconciliation — the server keeps no record of it. Exactly one message row
/// is created per successful call; retries are new attempts by contract.
pub async fn send_message(
    state: &AppState,
    conn: ConnectionId,
    user: &User,
    room_id: i64,
    text: &str,
    temp_id: Option<String>,
) -> Result<SendOutcome, CoreError> {
    if text.trim().is_empty() {
        tracing::debug!(user_id = user.id, room_id, "send ignored: empty text");
        return Ok(SendOutcome::Ignored);
    }
    if hearth_db::rooms::get_room(&state.db, room_id)
        .await?
        .is_none()
    {
        tracing::debug!(user_id = user.id, room_id, "send ignored: room does not resolve");
        return Ok(SendOutcome::Ignored);
    }

    let subscribed = state.registry.is_subscribed(conn, room_id);
    if !subscribed && !hearth_db::memberships::is_member(&state.db, user.id, room_id).await? {
        return Ok(SendOutcome::JoinRequired);
    }

    // Write-through membership plus fanout registration, both idempotent.
    hearth_db::memberships::add_membership(&state.db, user.id, room_id).await?;
    state.registry.subscribe(conn, room_id);

    let row = hearth_db::messages::insert_message(&state.db, room_id, user.id, text).await?;

    let event = ServerMessage::MessageNew {
        id: row.id,
        room_id,
        text: row.content.clone(),
        temp_id: temp_id.clone(),
        user_id: user.id,
        user_email: user.email.clone(),
        created_at: row.created_at,
    };
    state.registry.broadcast(room_id, &event, None);

    state
        .registry
        .send_to(conn, ServerMessage::MessageAck { temp_id, id: row.id });

    // Lightweight unread signal for subscribers not foregrounding this room.
    let notification = ServerMessage::NotificationNew {
        room_id,
        message_id: row.id,
        preview: preview(text),
    };
    for subscriber in state.registry.connections_in(room_id) {
        if subscriber == conn {
            continue;
        }
        if state.registry.active_room(subscriber) != Some(room_id) {
            state.registry.send_to(subscriber, notification.clone());
        }
    }

    Ok(SendOutcome::Delivered { message_id: row.id })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ConnectionId;
    use crate::{AppConfig, AppState};
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    async fn test_state() -> AppState {
        let db = hearth_db::create_pool("sqlite::memory:", 1).await.expect("pool");
        hearth_db::run_migrations(&db).await.expect("migrations");
        AppState::new(
            db,
            AppConfig {
                jwt_secret: "test-secret".into(),
                token_expiry_seconds: 3600,
            },
        )
    }

    async fn seed_user(state: &AppState, email: &str) -> User {
        let row = hearth_db::users::create_user(&state.db, email, "hash")
            .await
            .expect("user");
        User {
            id: row.id,
            email: row.email,
        }
    }

    async fn seed_room(state: &AppState, name: &str, created_by: i64) -> i64 {
        hearth_db::rooms::create_room(&state.db, name, None, created_by)
            .await
            .expect("room")
            .id
    }

    fn attach(state: &AppState, user: &User) -> (ConnectionId, UnboundedReceiver<ServerMessage>) {
        let conn = state.registry.next_connection_id();
        let (tx, rx) = mpsc::unbounded_channel();
        state.registry.register(conn, user.id, &user.email, tx);
        (conn, rx)
    }

    fn drain(rx: &mut UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[tokio::test]
    async fn empty_text_and_unknown_room_are_ignored() {
        let state = test_state().await;
        let user = seed_user(&state, "a@example.com").await;
        let room_id = seed_room(&state, "general", user.id).await;
        let (conn, mut rx) = attach(&state, &user);
        state.registry.subscribe(conn, room_id);

        let outcome = send_message(&state, conn, &user, room_id, "   ", None)
            .await
            .expect("send");
        assert_eq!(outcome, SendOutcome::Ignored);

        let outcome = send_message(&state, conn, &user, 999, "hi", None)
            .await
            .expect("send");
        assert_eq!(outcome, SendOutcome::Ignored);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn non_member_gets_join_required_and_nothing_persisted() {
        let state = test_state().await;
        let owner = seed_user(&state, "owner@example.com").await;
        let user = seed_user(&state, "a@example.com").await;
        let room_id = seed_room(&state, "general", owner.id).await;
        let (conn, mut rx) = attach(&state, &user);

        let outcome = send_message(&state, conn, &user, room_id, "hi", Some("t1".into()))
            .await
            .expect("send");
        assert_eq!(outcome, SendOutcome::JoinRequired);
        assert!(drain(&mut rx).is_empty());

        let history = hearth_db::messages::list_recent_messages(&state.db, room_id, 10)
            .await
            .expect("history");
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn send_implies_join_for_persisted_members() {
        let state = test_state().await;
        let user = seed_user(&state, "a@example.com").await;
        let room_id = seed_room(&state, "general", user.id).await;
        hearth_db::memberships::add_membership(&state.db, user.id, room_id)
            .await
            .expect("membership");
        // Member, but this connection never subscribed.
        let (conn, mut rx) = attach(&state, &user);
        assert!(!state.registry.is_subscribed(conn, room_id));

        let outcome = send_message(&state, conn, &user, room_id, "hi", Some("t1".into()))
            .await
            .expect("send");
        assert!(matches!(outcome, SendOutcome::Delivered { .. }));
        assert!(state.registry.is_subscribed(conn, room_id));

        // Sender sees its own message:new plus the ack, matched by tempId.
        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(
            e,
            ServerMessage::MessageNew { temp_id: Some(t), .. } if t == "t1"
        )));
        assert!(events.iter().any(|e| matches!(
            e,
            ServerMessage::MessageAck { temp_id: Some(t), .. } if t == "t1"
        )));
    }

    #[tokio::test]
    async fn notifications_are_gated_by_active_room() {
        let state = test_state().await;
        let alice = seed_user(&state, "alice@example.com").await;
        let bob = seed_user(&state, "bob@example.com").await;
        let carol = seed_user(&state, "carol@example.com").await;
        let room_id = seed_room(&state, "general", alice.id).await;

        let (a, mut rx_a) = attach(&state, &alice);
        let (b, mut rx_b) = attach(&state, &bob);
        let (c, mut rx_c) = attach(&state, &carol);
        for (conn, user) in [(a, &alice), (b, &bob), (c, &carol)] {
            hearth_db::memberships::add_membership(&state.db, user.id, room_id)
                .await
                .expect("membership");
            state.registry.subscribe(conn, room_id);
        }
        // Bob is viewing the room; Carol is foregrounding another one.
        state.registry.set_active_room(b, Some(room_id));

        let outcome = send_message(&state, a, &alice, room_id, "hello there", Some("t9".into()))
            .await
            .expect("send");
        let SendOutcome::Delivered { message_id } = outcome else {
            panic!("expected delivery");
        };

        let a_events = drain(&mut rx_a);
        assert!(!a_events
            .iter()
            .any(|e| matches!(e, ServerMessage::NotificationNew { .. })));

        let b_events = drain(&mut rx_b);
        assert!(b_events
            .iter()
            .any(|e| matches!(e, ServerMessage::MessageNew { id, .. } if *id == message_id)));
        assert!(!b_events
            .iter()
            .any(|e| matches!(e, ServerMessage::NotificationNew { .. })));

        // Carol gets the full event and the unread signal.
        let c_events = drain(&mut rx_c);
        assert!(c_events
            .iter()
            .any(|e| matches!(e, ServerMessage::MessageNew { id, .. } if *id == message_id)));
        assert!(c_events.iter().any(|e| matches!(
            e,
            ServerMessage::NotificationNew { message_id: m, preview, .. }
                if *m == message_id && preview == "hello there"
        )));
    }

    #[tokio::test]
    async fn fanout_survives_the_sender_closing() {
        let state = test_state().await;
        let alice = seed_user(&state, "alice@example.com").await;
        let bob = seed_user(&state, "bob@example.com").await;
        let room_id = seed_room(&state, "general", alice.id).await;

        let (a, rx_a) = attach(&state, &alice);
        let (b, mut rx_b) = attach(&state, &bob);
        for (conn, user) in [(a, &alice), (b, &bob)] {
            hearth_db::memberships::add_membership(&state.db, user.id, room_id)
                .await
                .expect("membership");
            state.registry.subscribe(conn, room_id);
        }
        // Sender's socket goes away before the router runs.
        drop(rx_a);

        let outcome = send_message(&state, a, &alice, room_id, "parting words", None)
            .await
            .expect("send");
        assert!(matches!(outcome, SendOutcome::Delivered { .. }));
        assert!(drain(&mut rx_b)
            .iter()
            .any(|e| matches!(e, ServerMessage::MessageNew { text, .. } if text == "parting words")));
    }

    #[test]
    fn long_messages_are_previewed_in_notifications() {
        let text = "x".repeat(500);
        assert_eq!(preview(&text).chars().count(), NOTIFICATION_PREVIEW_CHARS);
        // Truncation is by character, never mid-codepoint.
        let accented = "é".repeat(100);
        assert_eq!(preview(&accented).chars().count(), 80);
    }
}
