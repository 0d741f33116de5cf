//! Per-user hide markers. Hides are a private lens: they suppress a
//! conversation or message from one user's view and never affect what other
//! participants see.

use crate::Database;
use anyhow::Result;

impl Database {
    /// Idempotent: a second hide for the same pair is a no-op, never an error.
    pub fn hide_conversation_for_user(&self, user_id: &str, conversation_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO conversation_hides (user_id, conversation_id) VALUES (?1, ?2)",
                (user_id, conversation_id),
            )?;
            Ok(())
        })
    }

    /// Idempotent, same contract as `hide_conversation_for_user`.
    pub fn hide_message_for_user(&self, user_id: &str, message_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO message_hides (user_id, message_id) VALUES (?1, ?2)",
                (user_id, message_id),
            )?;
            Ok(())
        })
    }

    pub fn is_conversation_hidden(&self, user_id: &str, conversation_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: i64 = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM conversation_hides
                 WHERE user_id = ?1 AND conversation_id = ?2)",
                (user_id, conversation_id),
                |row| row.get(0),
            )?;
            Ok(found != 0)
        })
    }

    pub fn is_message_hidden(&self, user_id: &str, message_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: i64 = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM message_hides
                 WHERE user_id = ?1 AND message_id = ?2)",
                (user_id, message_id),
                |row| row.get(0),
            )?;
            Ok(found != 0)
        })
    }
}
