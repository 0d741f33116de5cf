use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity rows are owned by the external user service; the chat core only
/// reads them to validate callers and to name participants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
}

/// Lifecycle of a message. Deleting for all participants is a one-way
/// transition; there is no path back to `Active`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum MessageState {
    Active,
    #[serde(rename_all = "camelCase")]
    DeletedForAll { deleted_at: DateTime<Utc> },
}

impl MessageState {
    pub fn is_deleted(&self) -> bool {
        matches!(self, Self::DeletedForAll { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub state: MessageState,
}
