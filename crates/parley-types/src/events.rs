use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::MessageView;

/// Events pushed to clients over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum GatewayEvent {
    /// Server confirms successful identification
    #[serde(rename_all = "camelCase")]
    Ready { user_id: Uuid, name: String },

    /// A message was posted to a conversation the client joined
    #[serde(rename_all = "camelCase")]
    NewMessage {
        conversation_id: Uuid,
        message: MessageView,
    },

    /// A message was deleted for every participant
    #[serde(rename_all = "camelCase")]
    MessageDeleted {
        conversation_id: Uuid,
        message_id: Uuid,
        scope: DeleteScope,
    },
}

impl GatewayEvent {
    /// Returns the conversation this event is scoped to. `Ready` is
    /// connection-local and never enters a room.
    pub fn conversation_id(&self) -> Option<Uuid> {
        match self {
            Self::NewMessage { conversation_id, .. } => Some(*conversation_id),
            Self::MessageDeleted { conversation_id, .. } => Some(*conversation_id),
            Self::Ready { .. } => None,
        }
    }
}

/// Deletion scope carried by `messageDeleted`. Per-user hides are never
/// broadcast, so `all` is the only scope that exists on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeleteScope {
    All,
}

/// Commands sent FROM client TO server over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Subscribe to live events for one conversation
    #[serde(rename_all = "camelCase")]
    Join { conversation_id: Uuid },
}
