use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::Response,
};
use tracing::info;
use uuid::Uuid;

use parley_types::api::{PhotoRequest, RenameRequest, UserResponse};

use crate::auth::{AppState, run_db};
use crate::conversations::user_response;
use crate::error::ApiResult;
use crate::extract::{ApiJson, ApiPath};
use crate::middleware::AuthUser;
use crate::photos::{Photo, PhotoOwner, image_response};

/// PUT /users/me/name
pub async fn rename_me(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    ApiJson(req): ApiJson<RenameRequest>,
) -> ApiResult<Json<UserResponse>> {
    let renamed = run_db(&state, move |db| db.rename_user(user.id, &req.name)).await?;
    Ok(Json(user_response(renamed)))
}

/// PUT /users/me/photo
pub async fn set_my_photo(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    ApiJson(req): ApiJson<PhotoRequest>,
) -> ApiResult<StatusCode> {
    let user_id = user.id;
    let photo = Photo::decode(&req.photo)?;
    let reference = state.photos.store(PhotoOwner::User(user_id), &photo).await?;

    let new_ref = reference.clone();
    let previous = match run_db(&state, move |db| db.set_user_photo(user_id, &new_ref)).await {
        Ok(previous) => previous,
        Err(e) => {
            state.photos.delete(&reference).await;
            return Err(e);
        }
    };

    if let Some(previous) = previous {
        state.photos.delete(&previous).await;
    }
    info!(user_id = %user_id, "Profile photo updated");
    Ok(StatusCode::NO_CONTENT)
}

/// GET /users/me/photo
pub async fn my_photo(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Response> {
    photo_of(&state, user.id).await
}

/// GET /users/{id}/photo
pub async fn user_photo(
    State(state): State<AppState>,
    ApiPath(user_id): ApiPath<Uuid>,
) -> ApiResult<Response> {
    photo_of(&state, user_id).await
}

async fn photo_of(state: &AppState, user_id: Uuid) -> ApiResult<Response> {
    let reference = run_db(state, move |db| db.user_photo(user_id)).await?;
    let bytes = state.photos.load(reference.as_deref()).await?;
    Ok(image_response(bytes))
}
