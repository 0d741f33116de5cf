use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use parley_types::api::{
    Claims, CreateConversationRequest, CreateConversationResponse, SendMessageRequest,
    StatusResponse,
};

use crate::error::ChatError;
use crate::service::ChatService;

pub async fn create_conversation(
    State(service): State<ChatService>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateConversationRequest>,
) -> Response {
    match service.create_conversation(claims.sub, req.recipient_id).await {
        Ok(created) => {
            let (status, message) = if created.is_new {
                (StatusCode::CREATED, "Conversation created")
            } else {
                (StatusCode::OK, "Existing conversation found")
            };
            (
                status,
                Json(CreateConversationResponse {
                    success: true,
                    conversation_id: created.conversation_id,
                    message: message.to_string(),
                    is_new: created.is_new,
                    last_message: created.last_message,
                }),
            )
                .into_response()
        }
        // This route reports failures as {success:false, message} rather
        // than the {error:true, message} shape of the other operations.
        Err(e) => (
            e.status_code(),
            Json(serde_json::json!({ "success": false, "message": e.to_string() })),
        )
            .into_response(),
    }
}

pub async fn send_message(
    State(service): State<ChatService>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ChatError> {
    service
        .send_message(conversation_id, claims.sub, req.content)
        .await?;

    Ok(Json(StatusResponse {
        error: false,
        message: "Message sent".to_string(),
    }))
}

pub async fn list_conversations(
    State(service): State<ChatService>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ChatError> {
    let conversations = service.list_conversations(claims.sub).await?;
    Ok(Json(conversations))
}

pub async fn get_conversation(
    State(service): State<ChatService>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ChatError> {
    let conversation = service.get_conversation(claims.sub, conversation_id).await?;
    Ok(Json(conversation))
}

pub async fn hide_conversation(
    State(service): State<ChatService>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ChatError> {
    service.hide_conversation(claims.sub, conversation_id).await?;

    Ok(Json(StatusResponse {
        error: false,
        message: "Conversation hidden".to_string(),
    }))
}

pub async fn hide_message(
    State(service): State<ChatService>,
    Path((conversation_id, message_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ChatError> {
    service
        .hide_message(claims.sub, conversation_id, message_id)
        .await?;

    Ok(Json(StatusResponse {
        error: false,
        message: "Message hidden".to_string(),
    }))
}

pub async fn delete_message_for_all(
    State(service): State<ChatService>,
    Path((conversation_id, message_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ChatError> {
    service
        .delete_message_for_all(claims.sub, conversation_id, message_id)
        .await?;

    Ok(Json(StatusResponse {
        error: false,
        message: "Message deleted for everyone".to_string(),
    }))
}
