use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub type UserId = String;
pub type RoomId = String;

/// Body a message is left with once deleted.
pub const TOMBSTONE_BODY: &str = "This message has been deleted.";

/// Upper bound on an attachment payload, checked before anything is stored.
pub const MAX_ATTACHMENT_BYTES: usize = 5 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum MessageKind {
    Public,
    Private,
}

/// File riding along with a message, payload carried as text (base64 at the
/// producing edge).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub payload: String,
    pub filename: String,
    pub mime_type: String,
}

/// One emoji's worth of reactions on a message. `reactor_ids` and
/// `reactor_names` are parallel lists; an identity appears at most once per
/// emoji.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub emoji: String,
    pub reactor_ids: Vec<UserId>,
    pub reactor_names: Vec<String>,
}

/// A chat message as stored and as sent over the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: i64,
    pub room_id: RoomId,
    pub author_id: UserId,
    /// Display name snapshotted at send time, not a live reference.
    pub author_display_name: String,
    pub kind: MessageKind,
    pub recipient_id: Option<UserId>,
    pub body: String,
    pub attachment: Option<Attachment>,
    pub reactions: Vec<Reaction>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub edited_at: Option<OffsetDateTime>,
    pub deleted: bool,
}

impl ChatMessage {
    pub fn is_editable_by(&self, identity: &UserId) -> bool {
        !self.deleted && self.author_id == *identity
    }
}

/// Client-supplied payload for a new message; the server assigns id,
/// timestamps and the effective room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    pub author_id: UserId,
    pub author_display_name: String,
    #[serde(default)]
    pub avatar_ref: Option<String>,
    pub kind: MessageKind,
    #[serde(default)]
    pub recipient_id: Option<UserId>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub attachment: Option<Attachment>,
}
