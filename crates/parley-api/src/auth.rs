use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::{error, info};
use uuid::Uuid;

use parley_db::{Database, StoreError};
use parley_types::api::{LoginRequest, LoginResponse};

use crate::error::{ApiError, ApiResult};
use crate::extract::ApiJson;
use crate::middleware::Claims;
use crate::photos::PhotoStorage;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub jwt_secret: String,
    pub token_ttl_days: i64,
    pub photos: PhotoStorage,
}

/// Run a store call on the blocking pool.
pub(crate) async fn run_db<F, T>(state: &AppState, f: F) -> ApiResult<T>
where
    F: FnOnce(&Database) -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state.db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(e.into())
        })?
        .map_err(ApiError::from)
}

/// POST /session: log in by name, creating the user on first contact.
pub async fn login(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let (user, created) = run_db(&state, move |db| db.resolve_or_create_user(&req.username)).await?;

    let token = create_token(&state.jwt_secret, state.token_ttl_days, user.id)?;

    if !created {
        info!(user_id = %user.id, "User {} logged in", user.name);
    }
    let status = if created { StatusCode::CREATED } else { StatusCode::OK };

    Ok((
        status,
        Json(LoginResponse {
            user_id: user.id,
            username: user.name,
            token,
        }),
    ))
}

pub fn create_token(secret: &str, ttl_days: i64, user_id: Uuid) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        exp: (chrono::Utc::now() + chrono::Duration::days(ttl_days)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::decode_token;

    #[test]
    fn tokens_round_trip_with_the_same_secret() {
        let id = Uuid::new_v4();
        let token = create_token("s3cret-for-tests", 1, id).unwrap();
        assert_eq!(decode_token("s3cret-for-tests", &token).unwrap().sub, id);
        assert!(matches!(decode_token("other-secret", &token), Err(ApiError::Auth(_))));
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let token = create_token("s3cret-for-tests", -2, Uuid::new_v4()).unwrap();
        assert!(matches!(decode_token("s3cret-for-tests", &token), Err(ApiError::Auth(_))));
    }
}
