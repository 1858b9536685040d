use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use agora_chat::{ChatError, MessageDraft, SendOutcome, Session, presence, stream};
use agora_types::api::{SendMessageRequest, SendMessageResponse};

use super::decode_attachment;
use crate::AppState;
use crate::error::ApiResult;

pub async fn get_messages(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Extension(session): Extension<Session>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(stream::load_messages(&state.backend, session, chat_id).await?))
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Extension(session): Extension<Session>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    let draft = MessageDraft {
        content: req.content,
        file: req.attachment.map(decode_attachment).transpose()?,
        editing_id: req.editing_id,
    };

    let outcome = stream::send_message(&state.backend, session, chat_id, draft).await?;
    let (status, edited, message) = match outcome {
        SendOutcome::Sent { message, .. } => (StatusCode::CREATED, false, message),
        SendOutcome::Edited(message) => (StatusCode::OK, true, message),
    };

    Ok((status, Json(SendMessageResponse { edited, message })))
}

pub async fn delete_message(
    State(state): State<AppState>,
    Path((chat_id, message_id)): Path<(Uuid, Uuid)>,
    Extension(session): Extension<Session>,
) -> ApiResult<impl IntoResponse> {
    let in_chat = state
        .backend
        .db_call(move |db| Ok(db.get_message(message_id)?.is_some_and(|m| m.chat_id == chat_id)))
        .await
        .map_err(ChatError::Store)?;
    if !in_chat {
        return Err(ChatError::NotFound(format!("message {} in chat {}", message_id, chat_id)).into());
    }

    stream::delete_message(&state.backend, session, message_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn notify_typing(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Extension(session): Extension<Session>,
) -> ApiResult<impl IntoResponse> {
    let signal = presence::notify_typing(&state.backend, session, chat_id).await?;
    Ok((StatusCode::CREATED, Json(signal)))
}
