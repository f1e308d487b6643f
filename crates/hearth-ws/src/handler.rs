use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use hearth_core::message::{send_message, SendOutcome};
use hearth_core::{room, AppState};
use hearth_models::{ClientMessage, Room, ServerMessage, User};
use tokio::sync::mpsc;
use tokio::sync::mpsc::UnboundedSender;

use crate::session::Session;

pub async fn handle_connection(socket: WebSocket, state: AppState) {
    let conn = state.registry.next_connection_id();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let (mut sender, mut receiver) = socket.split();
    let mut session = Session::new(conn);
    tracing::debug!(%conn, "websocket connection opened");

    // Greeting before any auth, so clients can tell socket-open from
    // gateway-ready.
    if send_event(
        &mut sender,
        &ServerMessage::Connected {
            status: "connected".to_string(),
        },
    )
    .await
    .is_err()
    {
        return;
    }

    let disconnect_reason = loop {
        tokio::select! {
            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(frame) => {
                                handle_client_message(frame, &mut session, &state, &tx).await;
                            }
                            Err(err) => {
                                // Protocol errors are dropped; the connection
                                // stays open.
                                tracing::debug!(%conn, %err, "dropping malformed frame");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        break "client close frame".to_string();
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        break format!("websocket receive error: {err}");
                    }
                    None => {
                        break "websocket stream ended".to_string();
                    }
                }
            }
            outbound = rx.recv() => {
                match outbound {
                    Some(event) => {
                        if send_event(&mut sender, &event).await.is_err() {
                            break "websocket send error".to_string();
                        }
                    }
                    None => {
                        break "outbound channel closed".to_string();
                    }
                }
            }
        }
    };

    state.typing.connection_closed(conn);
    state.registry.close(conn);
    match &session.user {
        Some(user) => {
            tracing::info!(%conn, user_id = user.id, "client disconnected: {disconnect_reason}");
        }
        None => {
            tracing::debug!(%conn, "unauthenticated connection closed: {disconnect_reason}");
        }
    }
}

async fn send_event(
    sender: &mut (impl SinkExt<Message> + Unpin),
    event: &ServerMessage,
) -> Result<(), ()> {
    let payload = match serde_json::to_string(event) {
        Ok(payload) => payload,
        Err(err) => {
            tracing::error!(%err, "failed to serialize outbound event");
            return Ok(());
        }
    };
    sender
        .send(Message::Text(payload.into()))
        .await
        .map_err(|_| ())
}

async fn handle_client_message(
    frame: ClientMessage,
    session: &mut Session,
    state: &AppState,
    tx: &UnboundedSender<ServerMessage>,
) {
    if let ClientMessage::AuthToken { token } = &frame {
        authenticate(state, session, tx, token).await;
        return;
    }

    let Some(user) = session.user.clone() else {
        let _ = tx.send(ServerMessage::AuthRequired(
            "Authenticate before sending messages.".to_string(),
        ));
        return;
    };

    match frame {
        ClientMessage::AuthToken { .. } => {}

        ClientMessage::RoomJoin { room_id } => {
            match room::join_room(state, session.conn, user.id, room_id).await {
                Ok(true) => {
                    session.rooms.insert(room_id);
                    let _ = tx.send(ServerMessage::RoomJoined { room_id });
                }
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(user_id = user.id, room_id, %err, "room join failed");
                }
            }
        }

        ClientMessage::RoomEnter { room_id, limit } => {
            match room::can_address_room(state, session.conn, user.id, room_id).await {
                Ok(true) => {
                    // A persisted member entering via another connection's
                    // join still lands in the fanout set here.
                    state.registry.subscribe(session.conn, room_id);
                    session.rooms.insert(room_id);
                    state.registry.set_active_room(session.conn, Some(room_id));
                    if let Err(err) = room::replay_history(state, session.conn, room_id, limit).await
                    {
                        tracing::warn!(user_id = user.id, room_id, %err, "history replay failed");
                    }
                }
                Ok(false) => {
                    let _ = tx.send(ServerMessage::RoomJoinRequired { room_id });
                }
                Err(err) => {
                    tracing::warn!(user_id = user.id, room_id, %err, "room enter failed");
                }
            }
        }

        ClientMessage::RoomLeave => {
            state.registry.set_active_room(session.conn, None);
        }

        ClientMessage::MessageHistory { room_id, limit } => {
            match room::can_address_room(state, session.conn, user.id, room_id).await {
                Ok(true) => {
                    if let Err(err) = room::replay_history(state, session.conn, room_id, limit).await
                    {
                        tracing::warn!(user_id = user.id, room_id, %err, "history replay failed");
                    }
                }
                Ok(false) => {
                    let _ = tx.send(ServerMessage::RoomJoinRequired { room_id });
                }
                Err(err) => {
                    tracing::warn!(user_id = user.id, room_id, %err, "history request failed");
                }
            }
        }

        ClientMessage::MessageSend {
            room_id,
            text,
            temp_id,
        } => {
            match send_message(state, session.conn, &user, room_id, &text, temp_id.clone()).await {
                Ok(SendOutcome::Delivered { .. }) => {
                    session.rooms.insert(room_id);
                }
                Ok(SendOutcome::JoinRequired) => {
                    let _ = tx.send(ServerMessage::RoomJoinRequired { room_id });
                }
                Ok(SendOutcome::Ignored) => {}
                Err(err) => {
                    tracing::warn!(user_id = user.id, room_id, %err, "message send failed");
                    let _ = tx.send(ServerMessage::MessageError {
                        room_id,
                        temp_id,
                        error: "failed to deliver".to_string(),
                    });
                }
            }
        }

        ClientMessage::TypingStart { room_id } => {
            handle_typing(state, session, &user, room_id, true).await;
        }
        ClientMessage::TypingStop { room_id } => {
            handle_typing(state, session, &user, room_id, false).await;
        }
    }
}

async fn handle_typing(
    state: &AppState,
    session: &Session,
    user: &User,
    room_id: i64,
    is_typing: bool,
) {
    match room::can_address_room(state, session.conn, user.id, room_id).await {
        Ok(true) => {
            state
                .typing
                .set_typing(session.conn, room_id, user.id, &user.email, is_typing);
        }
        Ok(false) => {
            tracing::debug!(user_id = user.id, room_id, "typing ignored: not subscribed");
        }
        Err(err) => {
            tracing::debug!(user_id = user.id, room_id, %err, "typing lookup failed");
        }
    }
}

/// Exchange the bearer token for an authenticated session: load the user's
/// memberships, register the peer, and subscribe it to each known room.
/// On failure the connection stays unauthenticated and may retry.
async fn authenticate(
    state: &AppState,
    session: &mut Session,
    tx: &UnboundedSender<ServerMessage>,
    token: &str,
) {
    let claims = match hearth_core::auth::validate_token(token, &state.config.jwt_secret) {
        Ok(claims) => claims,
        Err(_) => {
            let _ = tx.send(ServerMessage::AuthError("Invalid token".to_string()));
            return;
        }
    };

    let room_rows = match hearth_db::rooms::list_rooms_for_user(&state.db, claims.sub).await {
        Ok(rows) => rows,
        Err(err) => {
            tracing::warn!(user_id = claims.sub, %err, "membership load failed during handshake");
            let _ = tx.send(ServerMessage::AuthError("Authentication failed".to_string()));
            return;
        }
    };

    let user = User {
        id: claims.sub,
        email: claims.email,
    };
    state
        .registry
        .register(session.conn, user.id, &user.email, tx.clone());
    session.rooms = room_rows.iter().map(|r| r.id).collect();
    for room_id in &session.rooms {
        state.registry.subscribe(session.conn, *room_id);
    }
    session.user = Some(user.clone());
    tracing::info!(conn = %session.conn, user_id = user.id, rooms = session.rooms.len(), "session authenticated");

    let rooms: Vec<Room> = room_rows.into_iter().map(Room::from).collect();
    let _ = tx.send(ServerMessage::AuthOk { user, rooms });
}
