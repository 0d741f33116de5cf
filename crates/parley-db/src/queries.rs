use crate::Database;
use crate::models::{ConversationRow, MessageRow, UserRow};
use anyhow::{Result, anyhow, bail};
use rusqlite::Connection;

impl Database {
    // -- Users --

    pub fn create_user(&self, id: &str, name: &str, email: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, name, email) VALUES (?1, ?2, ?3)",
                (id, name, email),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_id(conn, id))
    }

    /// Batch-fetch users for a set of ids (participant name resolution).
    pub fn users_by_ids(&self, ids: &[String]) -> Result<Vec<UserRow>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT id, name, email, created_at FROM users WHERE id IN ({})",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> =
                ids.iter().map(|id| id as &dyn rusqlite::types::ToSql).collect();

            let rows = stmt
                .query_map(params.as_slice(), |row| {
                    Ok(UserRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        email: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Conversations --

    pub fn find_conversation_between(&self, user_a: &str, user_b: &str) -> Result<Option<ConversationRow>> {
        let (lo, hi) = pair_key(user_a, user_b);
        self.with_conn(|conn| query_conversation_by_pair(conn, lo, hi))
    }

    /// Atomic find-or-create for the unordered pair. On create, also inserts
    /// the welcome message authored by the creator. Returns the row and
    /// whether this call created it.
    pub fn find_or_create_conversation(
        &self,
        id: &str,
        creator_id: &str,
        recipient_id: &str,
        welcome_message_id: &str,
        welcome_content: &str,
    ) -> Result<(ConversationRow, bool)> {
        let (lo, hi) = pair_key(creator_id, recipient_id);
        self.with_conn(|conn| {
            if let Some(existing) = query_conversation_by_pair(conn, lo, hi)? {
                return Ok((existing, false));
            }

            conn.execute(
                "INSERT INTO conversations (id, created_by, peer_lo, peer_hi) VALUES (?1, ?2, ?3, ?4)",
                (id, creator_id, lo, hi),
            )?;
            conn.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, content) VALUES (?1, ?2, ?3, ?4)",
                (welcome_message_id, id, creator_id, welcome_content),
            )?;

            let row = query_conversation_by_id(conn, id)?
                .ok_or_else(|| anyhow!("conversation vanished after insert: {}", id))?;
            Ok((row, true))
        })
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| query_conversation_by_id(conn, id))
    }

    pub fn is_participant(&self, conversation_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: i64 = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM conversations
                 WHERE id = ?1 AND (peer_lo = ?2 OR peer_hi = ?2))",
                (conversation_id, user_id),
                |row| row.get(0),
            )?;
            Ok(found != 0)
        })
    }

    /// Conversations the user participates in and has not hidden,
    /// most recently active first.
    pub fn list_conversations_for_user(&self, user_id: &str) -> Result<Vec<ConversationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, created_by, peer_lo, peer_hi, created_at, updated_at
                 FROM conversations c
                 WHERE (c.peer_lo = ?1 OR c.peer_hi = ?1)
                   AND NOT EXISTS (SELECT 1 FROM conversation_hides h
                                   WHERE h.conversation_id = c.id AND h.user_id = ?1)
                 ORDER BY c.updated_at DESC, c.rowid DESC",
            )?;

            let rows = stmt
                .query_map([user_id], map_conversation_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Messages --

    /// Append a message and bump the conversation's activity timestamp.
    pub fn append_message(
        &self,
        id: &str,
        conversation_id: &str,
        sender_id: &str,
        content: &str,
    ) -> Result<MessageRow> {
        if content.trim().is_empty() {
            bail!("message content must not be empty");
        }

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, content) VALUES (?1, ?2, ?3, ?4)",
                (id, conversation_id, sender_id, content),
            )?;
            conn.execute(
                "UPDATE conversations SET updated_at = datetime('now') WHERE id = ?1",
                [conversation_id],
            )?;

            query_message_by_id(conn, id)?
                .ok_or_else(|| anyhow!("message vanished after insert: {}", id))
        })
    }

    /// Most recent message regardless of visibility. Only the
    /// create-conversation echo wants this view.
    pub fn latest_message(&self, conversation_id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{MESSAGE_SELECT}
                 WHERE m.conversation_id = ?1
                 ORDER BY m.created_at DESC, m.rowid DESC
                 LIMIT 1",
            ))?;

            stmt.query_row([conversation_id], map_message_row).optional()
        })
    }

    pub fn get_message_in_conversation(
        &self,
        message_id: &str,
        conversation_id: &str,
    ) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{MESSAGE_SELECT}
                 WHERE m.id = ?1 AND m.conversation_id = ?2",
            ))?;

            stmt.query_row((message_id, conversation_id), map_message_row)
                .optional()
        })
    }

    /// One-way transition to deleted-for-all. Returns true only for the call
    /// that performed the transition; retries leave the row untouched.
    pub fn mark_message_deleted(&self, message_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET deleted_at = datetime('now')
                 WHERE id = ?1 AND deleted_at IS NULL",
                [message_id],
            )?;
            Ok(changed > 0)
        })
    }

    /// Ascending history as seen by one user: not deleted-for-all and not
    /// hidden by that user.
    pub fn visible_messages(&self, conversation_id: &str, user_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{MESSAGE_SELECT}
                 WHERE m.conversation_id = ?1
                   AND m.deleted_at IS NULL
                   AND NOT EXISTS (SELECT 1 FROM message_hides h
                                   WHERE h.message_id = m.id AND h.user_id = ?2)
                 ORDER BY m.created_at ASC, m.rowid ASC",
            ))?;

            let rows = stmt
                .query_map((conversation_id, user_id), map_message_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Batch: newest visible message per conversation, for the list view.
    /// Window query over an IN-list instead of one query per conversation.
    pub fn latest_visible_messages(
        &self,
        conversation_ids: &[String],
        user_id: &str,
    ) -> Result<Vec<MessageRow>> {
        if conversation_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (2..=conversation_ids.len() + 1)
                .map(|i| format!("?{}", i))
                .collect();
            let sql = format!(
                "SELECT id, conversation_id, sender_id, sender_name, content, created_at, deleted_at
                 FROM (
                     SELECT m.id, m.conversation_id, m.sender_id,
                            u.name AS sender_name, m.content, m.created_at, m.deleted_at,
                            ROW_NUMBER() OVER (
                                PARTITION BY m.conversation_id
                                ORDER BY m.created_at DESC, m.rowid DESC
                            ) AS rn
                     FROM messages m
                     LEFT JOIN users u ON m.sender_id = u.id
                     WHERE m.conversation_id IN ({})
                       AND m.deleted_at IS NULL
                       AND NOT EXISTS (SELECT 1 FROM message_hides h
                                       WHERE h.message_id = m.id AND h.user_id = ?1)
                 ) WHERE rn = 1",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let mut params: Vec<&dyn rusqlite::types::ToSql> = vec![&user_id];
            params.extend(
                conversation_ids
                    .iter()
                    .map(|id| id as &dyn rusqlite::types::ToSql),
            );

            let rows = stmt
                .query_map(params.as_slice(), |row| {
                    Ok(MessageRow {
                        id: row.get(0)?,
                        conversation_id: row.get(1)?,
                        sender_id: row.get(2)?,
                        sender_name: row
                            .get::<_, Option<String>>(3)?
                            .unwrap_or_else(|| "unknown".to_string()),
                        content: row.get(4)?,
                        created_at: row.get(5)?,
                        deleted_at: row.get(6)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}

/// Normalized ordering for the participant pair.
fn pair_key<'a>(user_a: &'a str, user_b: &'a str) -> (&'a str, &'a str) {
    if user_a <= user_b {
        (user_a, user_b)
    } else {
        (user_b, user_a)
    }
}

// JOIN users to fetch sender_name in a single query (eliminates N+1)
const MESSAGE_SELECT: &str =
    "SELECT m.id, m.conversation_id, m.sender_id, u.name, m.content, m.created_at, m.deleted_at
     FROM messages m
     LEFT JOIN users u ON m.sender_id = u.id";

fn map_message_row(row: &rusqlite::Row<'_>) -> std::result::Result<MessageRow, rusqlite::Error> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        sender_name: row
            .get::<_, Option<String>>(3)?
            .unwrap_or_else(|| "unknown".to_string()),
        content: row.get(4)?,
        created_at: row.get(5)?,
        deleted_at: row.get(6)?,
    })
}

fn map_conversation_row(
    row: &rusqlite::Row<'_>,
) -> std::result::Result<ConversationRow, rusqlite::Error> {
    Ok(ConversationRow {
        id: row.get(0)?,
        created_by: row.get(1)?,
        peer_lo: row.get(2)?,
        peer_hi: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn query_user_by_id(conn: &Connection, id: &str) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare("SELECT id, name, email, created_at FROM users WHERE id = ?1")?;

    let row = stmt
        .query_row([id], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                name: row.get(1)?,
                email: row.get(2)?,
                created_at: row.get(3)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn query_message_by_id(conn: &Connection, id: &str) -> Result<Option<MessageRow>> {
    let mut stmt = conn.prepare(&format!("{MESSAGE_SELECT} WHERE m.id = ?1"))?;

    stmt.query_row([id], map_message_row).optional()
}

fn query_conversation_by_id(conn: &Connection, id: &str) -> Result<Option<ConversationRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, created_by, peer_lo, peer_hi, created_at, updated_at
         FROM conversations WHERE id = ?1",
    )?;

    stmt.query_row([id], map_conversation_row).optional()
}

fn query_conversation_by_pair(
    conn: &Connection,
    peer_lo: &str,
    peer_hi: &str,
) -> Result<Option<ConversationRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, created_by, peer_lo, peer_hi, created_at, updated_at
         FROM conversations WHERE peer_lo = ?1 AND peer_hi = ?2",
    )?;

    stmt.query_row((peer_lo, peer_hi), map_conversation_row)
        .optional()
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::Database;

    fn db_with_users() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.create_user("u-ada", "Ada", "ada@example.com").unwrap();
        db.create_user("u-grace", "Grace", "grace@example.com").unwrap();
        db.create_user("u-linus", "Linus", "linus@example.com").unwrap();
        db
    }

    #[test]
    fn conversation_pair_is_unordered() {
        let db = db_with_users();

        let (conv, created) = db
            .find_or_create_conversation("c1", "u-grace", "u-ada", "m1", "hello there")
            .unwrap();
        assert!(created);
        assert_eq!(conv.created_by, "u-grace");

        // Lookup works regardless of argument order
        let found = db.find_conversation_between("u-ada", "u-grace").unwrap().unwrap();
        assert_eq!(found.id, "c1");
        let found = db.find_conversation_between("u-grace", "u-ada").unwrap().unwrap();
        assert_eq!(found.id, "c1");

        // Second create from the other side returns the same row
        let (conv, created) = db
            .find_or_create_conversation("c2", "u-ada", "u-grace", "m2", "ignored")
            .unwrap();
        assert!(!created);
        assert_eq!(conv.id, "c1");

        // The welcome message of the losing call was never inserted
        assert!(db.get_message_in_conversation("m2", "c1").unwrap().is_none());
    }

    #[test]
    fn welcome_message_is_attached_on_create() {
        let db = db_with_users();
        db.find_or_create_conversation("c1", "u-ada", "u-grace", "m1", "New conversation between Ada and Grace")
            .unwrap();

        let latest = db.latest_message("c1").unwrap().unwrap();
        assert_eq!(latest.id, "m1");
        assert_eq!(latest.sender_id, "u-ada");
        assert_eq!(latest.content, "New conversation between Ada and Grace");
    }

    #[test]
    fn append_rejects_empty_content() {
        let db = db_with_users();
        db.find_or_create_conversation("c1", "u-ada", "u-grace", "m1", "welcome")
            .unwrap();

        assert!(db.append_message("m2", "c1", "u-ada", "").is_err());
        assert!(db.append_message("m3", "c1", "u-ada", "   ").is_err());
        assert!(db.append_message("m4", "c1", "u-ada", "hi").is_ok());
    }

    #[test]
    fn history_preserves_insertion_order() {
        let db = db_with_users();
        db.find_or_create_conversation("c1", "u-ada", "u-grace", "m1", "welcome")
            .unwrap();
        db.append_message("m2", "c1", "u-ada", "first").unwrap();
        db.append_message("m3", "c1", "u-grace", "second").unwrap();

        let history = db.visible_messages("c1", "u-ada").unwrap();
        let ids: Vec<&str> = history.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2", "m3"]);
        assert_eq!(history[2].sender_name, "Grace");
    }

    #[test]
    fn mark_deleted_is_one_way_and_idempotent() {
        let db = db_with_users();
        db.find_or_create_conversation("c1", "u-ada", "u-grace", "m1", "welcome")
            .unwrap();
        db.append_message("m2", "c1", "u-ada", "oops").unwrap();

        assert!(db.mark_message_deleted("m2").unwrap());
        // Retry is a no-op on the terminal state
        assert!(!db.mark_message_deleted("m2").unwrap());

        let row = db.get_message_in_conversation("m2", "c1").unwrap().unwrap();
        assert!(row.deleted_at.is_some());

        let history = db.visible_messages("c1", "u-grace").unwrap();
        assert!(history.iter().all(|m| m.id != "m2"));
    }

    #[test]
    fn latest_visible_skips_deleted_and_hidden() {
        let db = db_with_users();
        db.find_or_create_conversation("c1", "u-ada", "u-grace", "m1", "welcome")
            .unwrap();
        db.append_message("m2", "c1", "u-ada", "kept").unwrap();
        db.append_message("m3", "c1", "u-ada", "deleted later").unwrap();
        db.append_message("m4", "c1", "u-ada", "hidden by grace").unwrap();

        db.mark_message_deleted("m3").unwrap();
        db.hide_message_for_user("u-grace", "m4").unwrap();

        let latest = db
            .latest_visible_messages(&["c1".to_string()], "u-grace")
            .unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].id, "m2");

        // Ada never hid m4, so she still sees it as the newest
        let latest = db
            .latest_visible_messages(&["c1".to_string()], "u-ada")
            .unwrap();
        assert_eq!(latest[0].id, "m4");
    }

    #[test]
    fn list_skips_hidden_conversations() {
        let db = db_with_users();
        db.find_or_create_conversation("c1", "u-ada", "u-grace", "m1", "welcome")
            .unwrap();
        db.find_or_create_conversation("c2", "u-ada", "u-linus", "m2", "welcome")
            .unwrap();

        db.hide_conversation_for_user("u-ada", "c1").unwrap();

        let listed = db.list_conversations_for_user("u-ada").unwrap();
        let ids: Vec<&str> = listed.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c2"]);

        // Grace still sees the conversation Ada hid
        let listed = db.list_conversations_for_user("u-grace").unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "c1");
    }
}
