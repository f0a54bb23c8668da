use sqlx::SqlitePool;
use time::OffsetDateTime;

use crate::chat::error::ChatError;
use crate::chat::message::{
    Attachment, ChatMessage, MessageKind, NewMessage, Reaction, RoomId, UserId, TOMBSTONE_BODY,
};

/// Hard cap on a single history transfer.
pub const HISTORY_LIMIT: i64 = 200;

/// Durable log of chat messages, one row per message plus one
/// `message_reactions` row per (message, emoji, reactor) triple.
#[derive(Clone)]
pub struct MessageStore {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: i64,
    room_id: String,
    author_id: String,
    author_display_name: String,
    kind: MessageKind,
    recipient_id: Option<String>,
    body: String,
    attachment_payload: Option<String>,
    attachment_filename: Option<String>,
    attachment_mime_type: Option<String>,
    created_at: OffsetDateTime,
    edited_at: Option<OffsetDateTime>,
    deleted: bool,
}

#[derive(sqlx::FromRow)]
struct ReactionRow {
    message_id: i64,
    emoji: String,
    reactor_id: String,
    reactor_name: String,
}

impl MessageRow {
    fn into_message(self, reactions: Vec<Reaction>) -> ChatMessage {
        let attachment = match (
            self.attachment_payload,
            self.attachment_filename,
            self.attachment_mime_type,
        ) {
            (Some(payload), Some(filename), Some(mime_type)) => Some(Attachment {
                payload,
                filename,
                mime_type,
            }),
            _ => None,
        };

        ChatMessage {
            id: self.id,
            room_id: self.room_id,
            author_id: self.author_id,
            author_display_name: self.author_display_name,
            kind: self.kind,
            recipient_id: self.recipient_id,
            body: self.body,
            attachment,
            reactions,
            created_at: self.created_at,
            edited_at: self.edited_at,
            deleted: self.deleted,
        }
    }
}

/// Fold (message, emoji, reactor) rows into per-emoji entries, keeping the
/// order the reactions arrived in.
fn group_reactions(rows: Vec<ReactionRow>) -> impl Iterator<Item = (i64, Vec<Reaction>)> {
    let mut grouped: Vec<(i64, Vec<Reaction>)> = Vec::new();
    for row in rows {
        let slot = match grouped.iter().position(|(id, _)| *id == row.message_id) {
            Some(i) => i,
            None => {
                grouped.push((row.message_id, Vec::new()));
                grouped.len() - 1
            }
        };
        let per_message = &mut grouped[slot].1;
        match per_message.iter_mut().find(|r| r.emoji == row.emoji) {
            Some(reaction) => {
                reaction.reactor_ids.push(row.reactor_id);
                reaction.reactor_names.push(row.reactor_name);
            }
            None => per_message.push(Reaction {
                emoji: row.emoji,
                reactor_ids: vec![row.reactor_id],
                reactor_names: vec![row.reactor_name],
            }),
        }
    }
    grouped.into_iter()
}

impl MessageStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist a new message in `room_id`, assigning its id and creation
    /// instant. Reactions start empty, the message starts live.
    pub async fn append(&self, room_id: &RoomId, msg: &NewMessage) -> Result<ChatMessage, ChatError> {
        let created_at = OffsetDateTime::now_utc();
        let result = sqlx::query(
            "INSERT INTO chat_messages \
             (room_id, author_id, author_display_name, kind, recipient_id, body, \
              attachment_payload, attachment_filename, attachment_mime_type, created_at, deleted) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0)",
        )
        .bind(room_id)
        .bind(&msg.author_id)
        .bind(&msg.author_display_name)
        .bind(msg.kind)
        .bind(&msg.recipient_id)
        .bind(&msg.body)
        .bind(msg.attachment.as_ref().map(|a| a.payload.as_str()))
        .bind(msg.attachment.as_ref().map(|a| a.filename.as_str()))
        .bind(msg.attachment.as_ref().map(|a| a.mime_type.as_str()))
        .bind(created_at)
        .execute(&self.pool)
        .await?;

        Ok(ChatMessage {
            id: result.last_insert_rowid(),
            room_id: room_id.clone(),
            author_id: msg.author_id.clone(),
            author_display_name: msg.author_display_name.clone(),
            kind: msg.kind,
            recipient_id: msg.recipient_id.clone(),
            body: msg.body.clone(),
            attachment: msg.attachment.clone(),
            reactions: Vec::new(),
            created_at,
            edited_at: None,
            deleted: false,
        })
    }

    /// Messages of a room in append order, at most `limit` (clamped to
    /// [`HISTORY_LIMIT`]). Ids are assigned in append order, so creation
    /// instants never decrease along the result.
    pub async fn list_by_room(
        &self,
        room_id: &str,
        limit: i64,
    ) -> Result<Vec<ChatMessage>, ChatError> {
        let limit = limit.clamp(1, HISTORY_LIMIT);
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT id, room_id, author_id, author_display_name, kind, recipient_id, body, \
                    attachment_payload, attachment_filename, attachment_mime_type, \
                    created_at, edited_at, deleted \
             FROM chat_messages WHERE room_id = ? \
             ORDER BY id ASC LIMIT ?",
        )
        .bind(room_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let reaction_rows: Vec<ReactionRow> = sqlx::query_as(
            "SELECT r.message_id, r.emoji, r.reactor_id, r.reactor_name \
             FROM message_reactions r \
             JOIN chat_messages m ON m.id = r.message_id \
             WHERE m.room_id = ? ORDER BY r.rowid ASC",
        )
        .bind(room_id)
        .fetch_all(&self.pool)
        .await?;

        let mut messages: Vec<ChatMessage> = rows
            .into_iter()
            .map(|row| row.into_message(Vec::new()))
            .collect();
        for (message_id, reactions) in group_reactions(reaction_rows) {
            if let Some(msg) = messages.iter_mut().find(|m| m.id == message_id) {
                msg.reactions = reactions;
            }
        }
        Ok(messages)
    }

    /// A single message by id, reactions included.
    pub async fn fetch(&self, id: i64) -> Result<ChatMessage, ChatError> {
        let row: Option<MessageRow> = sqlx::query_as(
            "SELECT id, room_id, author_id, author_display_name, kind, recipient_id, body, \
                    attachment_payload, attachment_filename, attachment_mime_type, \
                    created_at, edited_at, deleted \
             FROM chat_messages WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        let row = row.ok_or(ChatError::NotFound)?;

        let reaction_rows: Vec<ReactionRow> = sqlx::query_as(
            "SELECT message_id, emoji, reactor_id, reactor_name \
             FROM message_reactions WHERE message_id = ? ORDER BY rowid ASC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        let reactions = group_reactions(reaction_rows)
            .next()
            .map(|(_, r)| r)
            .unwrap_or_default();
        Ok(row.into_message(reactions))
    }

    /// Replace the body of a live message. Author-only.
    pub async fn edit(
        &self,
        id: i64,
        author_id: &UserId,
        new_body: &str,
    ) -> Result<ChatMessage, ChatError> {
        let mut tx = self.pool.begin().await?;
        let row: Option<(String, bool)> =
            sqlx::query_as("SELECT author_id, deleted FROM chat_messages WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let (owner, deleted) = row.ok_or(ChatError::NotFound)?;
        if owner != *author_id {
            return Err(ChatError::Forbidden);
        }
        if deleted {
            return Err(ChatError::InvalidState);
        }

        sqlx::query("UPDATE chat_messages SET body = ?, edited_at = ? WHERE id = ?")
            .bind(new_body)
            .bind(OffsetDateTime::now_utc())
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        self.fetch(id).await
    }

    /// Tombstone a message: body replaced, attachment and reactions cleared.
    /// One-way; a second delete fails with `InvalidState`.
    pub async fn delete(&self, id: i64, author_id: &UserId) -> Result<ChatMessage, ChatError> {
        let mut tx = self.pool.begin().await?;
        let row: Option<(String, bool)> =
            sqlx::query_as("SELECT author_id, deleted FROM chat_messages WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let (owner, deleted) = row.ok_or(ChatError::NotFound)?;
        if owner != *author_id {
            return Err(ChatError::Forbidden);
        }
        if deleted {
            return Err(ChatError::InvalidState);
        }

        sqlx::query(
            "UPDATE chat_messages SET deleted = 1, body = ?, \
             attachment_payload = NULL, attachment_filename = NULL, attachment_mime_type = NULL \
             WHERE id = ?",
        )
        .bind(TOMBSTONE_BODY)
        .bind(id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM message_reactions WHERE message_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        self.fetch(id).await
    }

    /// Toggle `reactor`'s `emoji` on a message: remove the triple if present,
    /// add it otherwise. The check and the row flip run in one transaction,
    /// keyed to this message id.
    pub async fn toggle_reaction(
        &self,
        id: i64,
        reactor_id: &UserId,
        reactor_name: &str,
        emoji: &str,
    ) -> Result<ChatMessage, ChatError> {
        let mut tx = self.pool.begin().await?;
        let row: Option<(bool,)> =
            sqlx::query_as("SELECT deleted FROM chat_messages WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let (deleted,) = row.ok_or(ChatError::NotFound)?;
        if deleted {
            return Err(ChatError::InvalidState);
        }

        let removed = sqlx::query(
            "DELETE FROM message_reactions WHERE message_id = ? AND emoji = ? AND reactor_id = ?",
        )
        .bind(id)
        .bind(emoji)
        .bind(reactor_id)
        .execute(&mut *tx)
        .await?;
        if removed.rows_affected() == 0 {
            sqlx::query(
                "INSERT INTO message_reactions (message_id, emoji, reactor_id, reactor_name) \
                 VALUES (?, ?, ?, ?)",
            )
            .bind(id)
            .bind(emoji)
            .bind(reactor_id)
            .bind(reactor_name)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        self.fetch(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::rooms::PUBLIC_ROOM;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn store() -> MessageStore {
        // one connection: every handle of a `sqlite::memory:` pool would
        // otherwise see its own empty database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::db::init_schema(&pool).await.unwrap();
        MessageStore::new(pool)
    }

    fn public_msg(author: &str, body: &str) -> NewMessage {
        NewMessage {
            author_id: author.to_owned(),
            author_display_name: author.to_uppercase(),
            avatar_ref: None,
            kind: MessageKind::Public,
            recipient_id: None,
            body: body.to_owned(),
            attachment: None,
        }
    }

    #[tokio::test]
    async fn append_assigns_ids_and_lists_in_order() {
        let store = store().await;
        let room = PUBLIC_ROOM.to_owned();
        let first = store.append(&room, &public_msg("u1", "hi")).await.unwrap();
        let second = store.append(&room, &public_msg("u2", "hello")).await.unwrap();
        assert!(second.id > first.id);
        assert!(!first.deleted);
        assert!(first.edited_at.is_none());
        assert!(first.reactions.is_empty());

        let listed = store.list_by_room(&room, HISTORY_LIMIT).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, first.id);
        assert_eq!(listed[1].id, second.id);
        assert!(listed[0].created_at <= listed[1].created_at);
    }

    #[tokio::test]
    async fn list_honors_limit() {
        let store = store().await;
        let room = PUBLIC_ROOM.to_owned();
        for i in 0..3 {
            store
                .append(&room, &public_msg("u1", &format!("m{i}")))
                .await
                .unwrap();
        }
        let listed = store.list_by_room(&room, 2).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].body, "m0");
    }

    #[tokio::test]
    async fn edit_is_author_only() {
        let store = store().await;
        let room = PUBLIC_ROOM.to_owned();
        let msg = store.append(&room, &public_msg("u1", "draft")).await.unwrap();

        let edited = store.edit(msg.id, &"u1".to_owned(), "final").await.unwrap();
        assert_eq!(edited.body, "final");
        assert!(edited.edited_at.is_some());

        let err = store.edit(msg.id, &"u2".to_owned(), "hijack").await.unwrap_err();
        assert!(matches!(err, ChatError::Forbidden));
        // stored message untouched by the refused edit
        assert_eq!(store.fetch(msg.id).await.unwrap().body, "final");

        let err = store.edit(9999, &"u1".to_owned(), "nope").await.unwrap_err();
        assert!(matches!(err, ChatError::NotFound));
    }

    #[tokio::test]
    async fn delete_is_terminal() {
        let store = store().await;
        let room = PUBLIC_ROOM.to_owned();
        let mut msg = public_msg("u1", "soon gone");
        msg.attachment = Some(Attachment {
            payload: "aGk=".to_owned(),
            filename: "hi.txt".to_owned(),
            mime_type: "text/plain".to_owned(),
        });
        let msg = store.append(&room, &msg).await.unwrap();
        store
            .toggle_reaction(msg.id, &"u2".to_owned(), "U2", "👍")
            .await
            .unwrap();

        let gone = store.delete(msg.id, &"u1".to_owned()).await.unwrap();
        assert!(gone.deleted);
        assert_eq!(gone.body, TOMBSTONE_BODY);
        assert!(gone.attachment.is_none());
        assert!(gone.reactions.is_empty());

        assert!(matches!(
            store.delete(msg.id, &"u1".to_owned()).await.unwrap_err(),
            ChatError::InvalidState
        ));
        assert!(matches!(
            store.edit(msg.id, &"u1".to_owned(), "revive").await.unwrap_err(),
            ChatError::InvalidState
        ));
        assert!(matches!(
            store
                .toggle_reaction(msg.id, &"u2".to_owned(), "U2", "👍")
                .await
                .unwrap_err(),
            ChatError::InvalidState
        ));
    }

    #[tokio::test]
    async fn reaction_toggle_is_symmetric() {
        let store = store().await;
        let room = PUBLIC_ROOM.to_owned();
        let msg = store.append(&room, &public_msg("u1", "react to me")).await.unwrap();

        let on = store
            .toggle_reaction(msg.id, &"u2".to_owned(), "U2", "👍")
            .await
            .unwrap();
        assert_eq!(on.reactions.len(), 1);
        assert_eq!(on.reactions[0].emoji, "👍");
        assert_eq!(on.reactions[0].reactor_ids, vec!["u2".to_owned()]);

        let off = store
            .toggle_reaction(msg.id, &"u2".to_owned(), "U2", "👍")
            .await
            .unwrap();
        assert!(off.reactions.is_empty());
    }

    #[tokio::test]
    async fn distinct_emojis_are_independent() {
        let store = store().await;
        let room = PUBLIC_ROOM.to_owned();
        let msg = store.append(&room, &public_msg("u1", "hi")).await.unwrap();

        store
            .toggle_reaction(msg.id, &"u2".to_owned(), "U2", "👍")
            .await
            .unwrap();
        let both = store
            .toggle_reaction(msg.id, &"u2".to_owned(), "U2", "🎉")
            .await
            .unwrap();
        assert_eq!(both.reactions.len(), 2);

        // second reactor joins the existing entry
        let shared = store
            .toggle_reaction(msg.id, &"u3".to_owned(), "U3", "👍")
            .await
            .unwrap();
        let thumbs = shared
            .reactions
            .iter()
            .find(|r| r.emoji == "👍")
            .unwrap();
        assert_eq!(thumbs.reactor_ids, vec!["u2".to_owned(), "u3".to_owned()]);
        assert_eq!(thumbs.reactor_names, vec!["U2".to_owned(), "U3".to_owned()]);
    }
}
