use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use parley_db::StoreError;
use parley_db::models::{Avatar, ConversationView, UserRow};
use parley_types::api::{
    ConversationDetail, ConversationIdResponse, ConversationSummary, LastMessagePreview,
    StartConversationRequest, UserResponse,
};

use crate::auth::{AppState, run_db};
use crate::error::ApiResult;
use crate::extract::{ApiJson, ApiPath};
use crate::middleware::AuthUser;

pub(crate) fn photo_url(avatar: Avatar) -> String {
    match avatar {
        Avatar::User(id) => format!("/users/{}/photo", id),
        Avatar::Group(id) => format!("/groups/{}/photo", id),
    }
}

pub(crate) fn user_response(user: UserRow) -> UserResponse {
    UserResponse {
        user_id: user.id,
        username: user.name,
    }
}

fn summary(view: ConversationView) -> ConversationSummary {
    ConversationSummary {
        id: view.id,
        kind: view.kind,
        name: view.display_name,
        photo_url: photo_url(view.avatar),
        creator_id: view.creator_id,
        last_message: view.last_message.map(|m| LastMessagePreview {
            id: m.id,
            sender_id: m.sender_id,
            content: m.content,
            created_at: m.created_at,
        }),
    }
}

/// POST /conversations: open the private conversation with `username`.
pub async fn start(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    ApiJson(req): ApiJson<StartConversationRequest>,
) -> ApiResult<impl IntoResponse> {
    let (conversation_id, created) = run_db(&state, move |db| {
        let target = db
            .get_user_by_name(&req.username)?
            .ok_or(StoreError::NotFound("user"))?;
        db.create_private_conversation(user.id, target.id)
    })
    .await?;

    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(ConversationIdResponse { conversation_id })))
}

pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<Vec<ConversationSummary>>> {
    let views = run_db(&state, move |db| db.list_conversations(user.id)).await?;
    Ok(Json(views.into_iter().map(summary).collect()))
}

pub async fn get(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    ApiPath(conversation_id): ApiPath<Uuid>,
) -> ApiResult<Json<ConversationDetail>> {
    let detail = run_db(&state, move |db| db.get_conversation(conversation_id, user.id)).await?;

    let created_at = detail.view.created_at;
    Ok(Json(ConversationDetail {
        summary: summary(detail.view),
        created_at,
        members: detail.members.into_iter().map(user_response).collect(),
    }))
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    ApiPath(conversation_id): ApiPath<Uuid>,
) -> ApiResult<StatusCode> {
    run_db(&state, move |db| db.delete_conversation(conversation_id, user.id)).await?;
    Ok(StatusCode::NO_CONTENT)
}
