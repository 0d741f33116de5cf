use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            email       TEXT NOT NULL UNIQUE,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- The two participants are stored as the lexicographically ordered
        -- pair, so one-conversation-per-unordered-pair is a schema constraint.
        CREATE TABLE IF NOT EXISTS conversations (
            id          TEXT PRIMARY KEY,
            created_by  TEXT NOT NULL REFERENCES users(id),
            peer_lo     TEXT NOT NULL REFERENCES users(id),
            peer_hi     TEXT NOT NULL REFERENCES users(id),
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at  TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(peer_lo, peer_hi)
        );

        -- deleted_at NULL = active, non-NULL = deleted for all participants
        CREATE TABLE IF NOT EXISTS messages (
            id               TEXT PRIMARY KEY,
            conversation_id  TEXT NOT NULL REFERENCES conversations(id),
            sender_id        TEXT NOT NULL REFERENCES users(id),
            content          TEXT NOT NULL,
            created_at       TEXT NOT NULL DEFAULT (datetime('now')),
            deleted_at       TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, created_at);

        CREATE TABLE IF NOT EXISTS conversation_hides (
            user_id          TEXT NOT NULL REFERENCES users(id),
            conversation_id  TEXT NOT NULL REFERENCES conversations(id),
            created_at       TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (user_id, conversation_id)
        );

        CREATE TABLE IF NOT EXISTS message_hides (
            user_id     TEXT NOT NULL REFERENCES users(id),
            message_id  TEXT NOT NULL REFERENCES messages(id),
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (user_id, message_id)
        );

        CREATE INDEX IF NOT EXISTS idx_message_hides_message
            ON message_hides(message_id);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
