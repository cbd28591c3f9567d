pub mod auth;
pub mod conversations;
pub mod error;
pub mod extract;
pub mod groups;
pub mod messages;
pub mod middleware;
pub mod photos;
pub mod reactions;
pub mod users;

use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{delete, get, post, put},
};
use serde_json::{Value, json};

use crate::auth::AppState;
use crate::middleware::require_auth;

/// Base64 inflates a 5 MB photo to just under 7 MB of JSON.
const MAX_BODY_SIZE: usize = 8 * 1024 * 1024;

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Every route of the HTTP surface. Transport layers (tracing, CORS) are
/// added by the server binary.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/session", post(auth::login));

    let protected_routes = Router::new()
        .route("/conversations", get(conversations::list).post(conversations::start))
        .route(
            "/conversations/{conversation_id}",
            get(conversations::get).delete(conversations::delete),
        )
        .route(
            "/conversations/{conversation_id}/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        .route(
            "/messages/{message_id}",
            post(messages::forward_message).delete(messages::delete_message),
        )
        .route(
            "/messages/{message_id}/reaction",
            post(reactions::react).delete(reactions::unreact),
        )
        .route("/groups", post(groups::create_group))
        .route("/groups/{group_id}/name", put(groups::rename_group))
        .route("/groups/{group_id}/members", post(groups::add_member))
        .route("/groups/{group_id}/members/me", delete(groups::leave_group))
        .route(
            "/groups/{group_id}/photo",
            get(groups::get_group_photo).put(groups::set_group_photo),
        )
        .route("/users/me/name", put(users::rename_me))
        .route("/users/me/photo", get(users::my_photo).put(users::set_my_photo))
        .route("/users/{user_id}/photo", get(users::user_photo))
        .route_layer(from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .with_state(state)
}
