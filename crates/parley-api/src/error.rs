use axum::{Json, http::StatusCode, response::{IntoResponse, Response}};
use thiserror::Error;
use tracing::error;

use parley_types::api::StatusResponse;

/// Error taxonomy of the chat service. Every operation returns one of these
/// instead of letting anything cross the service boundary; handlers translate
/// them into `{error, message}` responses.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("You cannot start a conversation with yourself.")]
    SelfConversation,

    #[error("Message content must not be empty.")]
    EmptyContent,

    #[error("The selected user does not exist.")]
    RecipientNotFound,

    #[error("Your account is no longer valid.")]
    CallerNotFound,

    #[error("The user does not exist.")]
    UserNotFound,

    #[error("The conversation does not exist.")]
    ConversationNotFound,

    #[error("Message not found")]
    MessageNotFound,

    #[error("Access denied")]
    AccessDenied,

    #[error("Only the sender can delete a message for everyone")]
    NotSender,

    #[error("{0}")]
    Storage(#[from] anyhow::Error),
}

impl ChatError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::SelfConversation | Self::EmptyContent => StatusCode::BAD_REQUEST,
            Self::RecipientNotFound
            | Self::CallerNotFound
            | Self::UserNotFound
            | Self::ConversationNotFound
            | Self::MessageNotFound => StatusCode::NOT_FOUND,
            Self::AccessDenied | Self::NotSender => StatusCode::FORBIDDEN,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        if let Self::Storage(e) = &self {
            error!("storage failure: {:#}", e);
        }

        let body = StatusResponse {
            error: true,
            message: self.to_string(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}
