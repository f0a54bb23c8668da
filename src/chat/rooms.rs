use crate::chat::error::ChatError;
use crate::chat::message::{MessageKind, RoomId, UserId};

/// Room id of the shared lobby every connection starts in.
pub const PUBLIC_ROOM: &str = "agora_lobby";

/// Canonical room id for a two-party private pairing.
///
/// The two identities are compared as strings and joined low-first, so
/// `resolve(a, b) == resolve(b, a)` for any pair.
pub fn resolve(a: &UserId, b: &UserId) -> Result<RoomId, ChatError> {
    if a.is_empty() || b.is_empty() {
        return Err(ChatError::Validation(
            "private room needs both participant identities".to_owned(),
        ));
    }

    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    Ok(format!("{lo}-{hi}"))
}

/// Effective room for an event carrying a kind and an optional recipient.
/// Anything that is not a fully-addressed private message lands in the lobby.
pub fn room_for(
    kind: MessageKind,
    author: &UserId,
    recipient: Option<&UserId>,
) -> Result<RoomId, ChatError> {
    match (kind, recipient) {
        (MessageKind::Private, Some(recipient)) => resolve(author, recipient),
        _ => Ok(PUBLIC_ROOM.to_owned()),
    }
}
