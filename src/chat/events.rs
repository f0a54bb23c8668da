//! Wire protocol: named events with JSON payloads, framed as
//! `{ "type": ..., "payload": ... }` in both directions.

use serde::{Deserialize, Serialize};

use crate::chat::message::{ChatMessage, MessageKind, NewMessage, RoomId, UserId};
use crate::chat::presence::OnlineUser;

/// Client → Server events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ClientEvent {
    /// Announce the authenticated identity behind this connection.
    #[serde(rename = "markOnline")]
    MarkOnline(MarkOnline),
    /// Subscribe this connection to a room.
    #[serde(rename = "join")]
    Join(Join),
    /// Ask for a room's ordered history; answered with a unicast `history`.
    #[serde(rename = "fetchHistory")]
    FetchHistory(FetchHistory),
    #[serde(rename = "send")]
    Send(NewMessage),
    #[serde(rename = "editRequest")]
    EditRequest(EditRequest),
    #[serde(rename = "deleteRequest")]
    DeleteRequest(DeleteRequest),
    #[serde(rename = "reactRequest")]
    ReactRequest(ReactRequest),
    #[serde(rename = "typingStart")]
    TypingStart(TypingSignal),
    #[serde(rename = "typingStop")]
    TypingStop(TypingSignal),
}

/// Server → Client events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ServerEvent {
    #[serde(rename = "history")]
    History(Vec<ChatMessage>),
    #[serde(rename = "newMessage")]
    NewMessage(ChatMessage),
    #[serde(rename = "messageUpdated")]
    MessageUpdated(ChatMessage),
    #[serde(rename = "onlineUsers")]
    OnlineUsers(Vec<OnlineUser>),
    #[serde(rename = "typingStart")]
    TypingStart(TypingNotice),
    #[serde(rename = "typingStop")]
    TypingStop(TypingNotice),
    #[serde(rename = "errorNotice")]
    ErrorNotice(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkOnline {
    pub identity: UserId,
    pub display_name: String,
    #[serde(default)]
    pub avatar_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Join {
    pub room_id: RoomId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchHistory {
    pub identity: UserId,
    #[serde(default)]
    pub room_id: Option<RoomId>,
    /// When set, the history of the private pairing with this identity is
    /// returned instead of `room_id`.
    #[serde(default)]
    pub target_identity: Option<UserId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditRequest {
    pub id: i64,
    pub author_id: UserId,
    pub new_body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteRequest {
    pub id: i64,
    pub author_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactRequest {
    pub id: i64,
    pub reactor_id: UserId,
    pub reactor_name: String,
    pub emoji: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingSignal {
    pub identity: UserId,
    #[serde(default)]
    pub room_id: Option<RoomId>,
    pub kind: MessageKind,
    #[serde(default)]
    pub recipient_id: Option<UserId>,
}

/// Relayed to everyone else in the room; carries only who is typing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingNotice {
    pub identity: UserId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn client_send_envelope_shape() {
        let event = ClientEvent::Send(NewMessage {
            author_id: "7".to_owned(),
            author_display_name: "Seven".to_owned(),
            avatar_ref: None,
            kind: MessageKind::Public,
            recipient_id: None,
            body: "hi".to_owned(),
            attachment: None,
        });
        let value: Value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "send");
        assert_eq!(value["payload"]["authorId"], "7");
        assert_eq!(value["payload"]["authorDisplayName"], "Seven");
        assert_eq!(value["payload"]["kind"], "public");

        let back: ClientEvent = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn client_events_accept_sparse_payloads() {
        // optional fields may be absent entirely, not just null
        let event: ClientEvent = serde_json::from_value(json!({
            "type": "fetchHistory",
            "payload": { "identity": "1", "targetIdentity": "2" }
        }))
        .unwrap();
        assert_eq!(
            event,
            ClientEvent::FetchHistory(FetchHistory {
                identity: "1".to_owned(),
                room_id: None,
                target_identity: Some("2".to_owned()),
            })
        );

        let event: ClientEvent = serde_json::from_value(json!({
            "type": "typingStart",
            "payload": { "identity": "1", "kind": "private", "recipientId": "2" }
        }))
        .unwrap();
        assert_eq!(
            event,
            ClientEvent::TypingStart(TypingSignal {
                identity: "1".to_owned(),
                room_id: None,
                kind: MessageKind::Private,
                recipient_id: Some("2".to_owned()),
            })
        );
    }

    #[test]
    fn server_error_notice_is_plain_text() {
        let event = ServerEvent::ErrorNotice("message not found".to_owned());
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "errorNotice");
        assert_eq!(value["payload"], "message not found");
    }

    #[test]
    fn server_online_users_roundtrip() {
        let event = ServerEvent::OnlineUsers(vec![crate::chat::presence::OnlineUser {
            identity: "1".to_owned(),
            display_name: "One".to_owned(),
            avatar_ref: Some("a.png".to_owned()),
        }]);
        let text = serde_json::to_string(&event).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "onlineUsers");
        assert_eq!(value["payload"][0]["displayName"], "One");
        assert_eq!(value["payload"][0]["avatarRef"], "a.png");

        let back: ServerEvent = serde_json::from_str(&text).unwrap();
        assert_eq!(back, event);
    }
}
