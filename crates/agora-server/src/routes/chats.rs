use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use agora_chat::{GroupDraft, Session, directory, lifecycle};
use agora_types::api::{
    AddMembersRequest, CreateChatResponse, CreateDirectChatRequest, CreateGroupRequest,
    DeleteChatResponse,
};

use super::decode_attachment;
use crate::AppState;
use crate::error::ApiResult;

pub async fn list_chats(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(directory::list_chats(&state.backend, session).await?))
}

pub async fn create_direct_chat(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(req): Json<CreateDirectChatRequest>,
) -> ApiResult<impl IntoResponse> {
    let created = lifecycle::create_one_to_one(&state.backend, session, req.user_id).await?;
    let status = if created.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    Ok((
        status,
        Json(CreateChatResponse {
            chat_id: created.chat.id,
            created: created.created,
        }),
    ))
}

pub async fn create_group(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(req): Json<CreateGroupRequest>,
) -> ApiResult<impl IntoResponse> {
    let draft = GroupDraft {
        name: req.name,
        description: req.description,
        avatar: req.avatar.map(decode_attachment).transpose()?,
    };

    let created = lifecycle::create_group(&state.backend, session, draft, &req.member_ids).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateChatResponse {
            chat_id: created.chat.id,
            created: true,
        }),
    ))
}

pub async fn delete_chat(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Extension(session): Extension<Session>,
) -> ApiResult<impl IntoResponse> {
    let report = lifecycle::delete_chat(&state.backend, session, chat_id).await?;
    Ok(Json(DeleteChatResponse {
        chat_id: report.chat_id,
        attempts: report.attempts,
        removed_objects: report.removed_objects,
        failed_objects: report.failed_objects,
    }))
}

pub async fn add_members(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Extension(session): Extension<Session>,
    Json(req): Json<AddMembersRequest>,
) -> ApiResult<impl IntoResponse> {
    let added = lifecycle::add_members(&state.backend, session, chat_id, &req.user_ids).await?;
    Ok(Json(added))
}

/// Removing yourself is leaving; removing anyone else is an admin action.
pub async fn remove_member(
    State(state): State<AppState>,
    Path((chat_id, user_id)): Path<(Uuid, Uuid)>,
    Extension(session): Extension<Session>,
) -> ApiResult<impl IntoResponse> {
    if user_id == session.user_id {
        lifecycle::leave_chat(&state.backend, session, chat_id).await?;
    } else {
        lifecycle::remove_member(&state.backend, session, chat_id, user_id).await?;
    }
    Ok(StatusCode::NO_CONTENT)
}
