use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::room::Room;
use crate::user::User;

/// Frames accepted from clients. Envelopes are `{"type": ..., "payload": ...}`;
/// anything that fails to deserialize into this enum is a protocol error and
/// is dropped without a reply.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ClientMessage {
    #[serde(rename = "auth:token")]
    AuthToken { token: String },

    #[serde(rename = "room:join", rename_all = "camelCase")]
    RoomJoin { room_id: i64 },

    #[serde(rename = "room:enter", rename_all = "camelCase")]
    RoomEnter {
        room_id: i64,
        #[serde(default)]
        limit: Option<u32>,
    },

    #[serde(rename = "room:leave")]
    RoomLeave,

    #[serde(rename = "message:send", rename_all = "camelCase")]
    MessageSend {
        room_id: i64,
        text: String,
        #[serde(default)]
        temp_id: Option<String>,
    },

    /// Explicit history request, same gate and payload as entering a room
    /// but without changing the active room.
    #[serde(rename = "message:history", rename_all = "camelCase")]
    MessageHistory {
        room_id: i64,
        #[serde(default)]
        limit: Option<u32>,
    },

    #[serde(rename = "typing:start", rename_all = "camelCase")]
    TypingStart { room_id: i64 },

    #[serde(rename = "typing:stop", rename_all = "camelCase")]
    TypingStop { room_id: i64 },
}

/// Frames emitted to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum ServerMessage {
    /// Greeting sent as soon as the socket is accepted, before any auth.
    #[serde(rename = "connection")]
    Connected { status: String },

    #[serde(rename = "auth:ok")]
    AuthOk { user: User, rooms: Vec<Room> },

    #[serde(rename = "auth:error")]
    AuthError(String),

    #[serde(rename = "auth:required")]
    AuthRequired(String),

    #[serde(rename = "room:joined", rename_all = "camelCase")]
    RoomJoined { room_id: i64 },

    /// Corrective notice: the client must `room:join` before the attempted
    /// operation can succeed. Not a hard failure.
    #[serde(rename = "room:join_required", rename_all = "camelCase")]
    RoomJoinRequired { room_id: i64 },

    #[serde(rename = "message:new", rename_all = "camelCase")]
    MessageNew {
        id: i64,
        room_id: i64,
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        temp_id: Option<String>,
        user_id: i64,
        user_email: String,
        created_at: DateTime<Utc>,
    },

    #[serde(rename = "message:ack", rename_all = "camelCase")]
    MessageAck {
        #[serde(skip_serializing_if = "Option::is_none")]
        temp_id: Option<String>,
        id: i64,
    },

    /// Persistence failed after validation passed; the optimistic copy
    /// correlated by `tempId` should be marked failed instead of waiting for
    /// an ack that will never come.
    #[serde(rename = "message:error", rename_all = "camelCase")]
    MessageError {
        room_id: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        temp_id: Option<String>,
        error: String,
    },

    #[serde(rename = "message:history", rename_all = "camelCase")]
    MessageHistory {
        room_id: i64,
        messages: Vec<HistoryMessage>,
    },

    #[serde(rename = "typing:update", rename_all = "camelCase")]
    TypingUpdate {
        room_id: i64,
        user_id: i64,
        user_email: String,
        is_typing: bool,
    },

    #[serde(rename = "notification:new", rename_all = "camelCase")]
    NotificationNew {
        room_id: i64,
        message_id: i64,
        preview: String,
    },
}

/// One persisted message as replayed in a `message:history` batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryMessage {
    pub id: i64,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub user_id: i64,
    pub user_email: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_envelope_uses_type_and_payload() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"room:join","payload":{"roomId":7}}"#).unwrap();
        assert!(matches!(msg, ClientMessage::RoomJoin { room_id: 7 }));
    }

    #[test]
    fn room_leave_needs_no_payload() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"room:leave"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::RoomLeave));
    }

    #[test]
    fn unknown_type_is_rejected() {
        let result = serde_json::from_str::<ClientMessage>(
            r#"{"type":"room:destroy","payload":{"roomId":1}}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn non_numeric_room_id_is_rejected() {
        let result = serde_json::from_str::<ClientMessage>(
            r#"{"type":"room:enter","payload":{"roomId":"lobby"}}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn message_send_tolerates_missing_temp_id() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"message:send","payload":{"roomId":3,"text":"hi"}}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::MessageSend { room_id, text, temp_id } => {
                assert_eq!(room_id, 3);
                assert_eq!(text, "hi");
                assert!(temp_id.is_none());
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn ack_serializes_camel_case() {
        let ack = ServerMessage::MessageAck {
            temp_id: Some("t1".into()),
            id: 42,
        };
        let json = serde_json::to_value(&ack).unwrap();
        assert_eq!(json["type"], "message:ack");
        assert_eq!(json["payload"]["tempId"], "t1");
        assert_eq!(json["payload"]["id"], 42);
    }

    #[test]
    fn auth_required_payload_is_a_plain_string() {
        let msg = ServerMessage::AuthRequired("Authenticate before sending messages.".into());
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "auth:required");
        assert!(json["payload"].is_string());
    }
}
