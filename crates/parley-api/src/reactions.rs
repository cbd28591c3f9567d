use axum::{Extension, Json, extract::State, http::StatusCode};
use uuid::Uuid;

use parley_types::api::{ReactRequest, ReactionResponse};

use crate::auth::{AppState, run_db};
use crate::error::ApiResult;
use crate::extract::{ApiJson, ApiPath};
use crate::middleware::AuthUser;

/// Set the caller's reaction, replacing any earlier one.
pub async fn react(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    ApiPath(message_id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<ReactRequest>,
) -> ApiResult<Json<ReactionResponse>> {
    let outcome = run_db(&state, move |db| db.react(message_id, user.id, &req.emoji)).await?;

    Ok(Json(ReactionResponse {
        message_id,
        emoji: outcome.emoji,
        replaced: outcome.replaced,
        reaction_count: outcome.reaction_count,
    }))
}

pub async fn unreact(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    ApiPath(message_id): ApiPath<Uuid>,
) -> ApiResult<StatusCode> {
    run_db(&state, move |db| db.unreact(message_id, user.id)).await?;
    Ok(StatusCode::NO_CONTENT)
}
