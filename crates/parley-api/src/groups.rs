use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::info;
use uuid::Uuid;

use parley_types::api::{AddMemberRequest, ConversationIdResponse, CreateGroupRequest, PhotoRequest, RenameRequest};

use crate::auth::{AppState, run_db};
use crate::conversations::user_response;
use crate::error::ApiResult;
use crate::extract::{ApiJson, ApiPath};
use crate::middleware::AuthUser;
use crate::photos::{Photo, PhotoOwner, image_response};

pub async fn create_group(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    ApiJson(req): ApiJson<CreateGroupRequest>,
) -> ApiResult<impl IntoResponse> {
    let conversation_id = run_db(&state, move |db| db.create_group(user.id, &req.name, &req.members)).await?;
    Ok((StatusCode::CREATED, Json(ConversationIdResponse { conversation_id })))
}

pub async fn rename_group(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    ApiPath(group_id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<RenameRequest>,
) -> ApiResult<StatusCode> {
    run_db(&state, move |db| db.rename_group(group_id, user.id, &req.name)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn add_member(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    ApiPath(group_id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<AddMemberRequest>,
) -> ApiResult<impl IntoResponse> {
    let added = run_db(&state, move |db| db.add_group_member(group_id, user.id, &req.username)).await?;
    Ok((StatusCode::CREATED, Json(user_response(added))))
}

/// DELETE /groups/{id}/members/me
pub async fn leave_group(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    ApiPath(group_id): ApiPath<Uuid>,
) -> ApiResult<StatusCode> {
    run_db(&state, move |db| db.leave_group(group_id, user.id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn set_group_photo(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    ApiPath(group_id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<PhotoRequest>,
) -> ApiResult<StatusCode> {
    let user_id = user.id;
    // Membership first; nothing touches disk for a missing group or an outsider.
    run_db(&state, move |db| db.group_photo(group_id, user_id)).await?;

    let photo = Photo::decode(&req.photo)?;
    let reference = state.photos.store(PhotoOwner::Group(group_id), &photo).await?;

    let new_ref = reference.clone();
    let previous = match run_db(&state, move |db| db.set_group_photo(group_id, user_id, &new_ref)).await {
        Ok(previous) => previous,
        Err(e) => {
            state.photos.delete(&reference).await;
            return Err(e);
        }
    };

    if let Some(previous) = previous {
        state.photos.delete(&previous).await;
    }
    info!(conversation_id = %group_id, "Group photo updated");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_group_photo(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    ApiPath(group_id): ApiPath<Uuid>,
) -> ApiResult<Response> {
    let reference = run_db(&state, move |db| db.group_photo(group_id, user.id)).await?;
    let bytes = state.photos.load(reference.as_deref()).await?;
    Ok(image_response(bytes))
}
