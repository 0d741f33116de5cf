use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// -- JWT Claims --

/// JWT claims shared between the REST middleware and the WebSocket identify
/// handshake. The external auth service issues these tokens; `sub` is the
/// authenticated user id and is trusted unchecked by the chat core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub name: String,
    pub exp: usize,
}

// -- Conversations --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct CreateConversationRequest {
    pub recipient_id: Uuid,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationResponse {
    pub success: bool,
    pub conversation_id: Uuid,
    pub message: String,
    pub is_new: bool,
    pub last_message: Option<LastMessage>,
}

/// Echo of a conversation's most recent message, visibility filters not
/// applied. Only used by the create-conversation response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub content: String,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: Uuid,
    pub updated_at: DateTime<Utc>,
    pub users: Vec<UserSummary>,
    /// Newest message that is neither deleted-for-all nor hidden by the
    /// requesting user; None when nothing qualifies.
    pub last_visible_message: Option<MessageView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationDetail {
    pub id: Uuid,
    pub updated_at: DateTime<Utc>,
    pub users: Vec<UserSummary>,
    pub messages: Vec<MessageView>,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: Uuid,
    pub content: String,
    pub sender: UserSummary,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub name: String,
}

// -- Generic outcome --

/// Body shape for mutating operations: `{error, message}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub error: bool,
    pub message: String,
}
