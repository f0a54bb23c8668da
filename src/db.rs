use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

pub async fn connect(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    SqlitePoolOptions::new()
        .max_connections(16)
        .connect(database_url)
        .await
}

/// Ensure the chat tables exist. Reactions live in their own table, one row
/// per (message, emoji, reactor) triple.
pub async fn init_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS chat_messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            room_id TEXT NOT NULL,
            author_id TEXT NOT NULL,
            author_display_name TEXT NOT NULL,
            kind TEXT NOT NULL DEFAULT 'public',
            recipient_id TEXT,
            body TEXT NOT NULL,
            attachment_payload TEXT,
            attachment_filename TEXT,
            attachment_mime_type TEXT,
            created_at TEXT NOT NULL,
            edited_at TEXT,
            deleted INTEGER NOT NULL DEFAULT 0
        )",
    )
    .execute(pool)
    .await?;

    // range scans per room walk this in order
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chat_messages_room \
         ON chat_messages (room_id, kind, created_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS message_reactions (
            message_id INTEGER NOT NULL REFERENCES chat_messages(id) ON DELETE CASCADE,
            emoji TEXT NOT NULL,
            reactor_id TEXT NOT NULL,
            reactor_name TEXT NOT NULL,
            PRIMARY KEY (message_id, emoji, reactor_id)
        )",
    )
    .execute(pool)
    .await?;

    Ok(())
}
