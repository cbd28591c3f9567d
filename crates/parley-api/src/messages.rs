use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use parley_db::models::{MessageRow, MessageWithReactions, ReactionRow};
use parley_types::api::{ForwardMessageRequest, MessageResponse, ReactionGroup, SendMessageRequest};

use crate::auth::{AppState, run_db};
use crate::error::ApiResult;
use crate::extract::{ApiJson, ApiPath};
use crate::middleware::AuthUser;

/// Group reactions by emoji, in order of each emoji's first use.
pub(crate) fn group_reactions(reactions: &[ReactionRow]) -> Vec<ReactionGroup> {
    let mut groups: Vec<ReactionGroup> = Vec::new();
    for r in reactions {
        match groups.iter_mut().find(|g| g.emoji == r.emoji) {
            Some(group) => {
                group.count += 1;
                group.user_ids.push(r.user_id);
            }
            None => groups.push(ReactionGroup {
                emoji: r.emoji.clone(),
                count: 1,
                user_ids: vec![r.user_id],
            }),
        }
    }
    groups
}

fn message_response(row: MessageRow, reactions: &[ReactionRow]) -> MessageResponse {
    MessageResponse {
        id: row.id,
        conversation_id: row.conversation_id,
        sender_id: row.sender_id,
        sender_name: row.sender_name,
        content: row.content,
        status: row.status,
        created_at: row.created_at,
        reaction_count: row.reaction_count,
        reactions: group_reactions(reactions),
    }
}

pub async fn send_message(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    ApiPath(conversation_id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<SendMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    let row = run_db(&state, move |db| db.post_message(conversation_id, user.id, &req.content)).await?;
    Ok((StatusCode::CREATED, Json(message_response(row, &[]))))
}

pub async fn get_messages(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    ApiPath(conversation_id): ApiPath<Uuid>,
) -> ApiResult<Json<Vec<MessageResponse>>> {
    let rows = run_db(&state, move |db| db.list_messages(conversation_id, user.id)).await?;

    let messages = rows
        .into_iter()
        .map(|MessageWithReactions { message, reactions }| message_response(message, &reactions))
        .collect();
    Ok(Json(messages))
}

/// POST /messages/{id}: forward a copy into another conversation.
pub async fn forward_message(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    ApiPath(message_id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<ForwardMessageRequest>,
) -> ApiResult<Json<MessageResponse>> {
    let row = run_db(&state, move |db| {
        db.forward_message(message_id, req.conversation_id, user.id)
    })
    .await?;
    Ok(Json(message_response(row, &[])))
}

pub async fn delete_message(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    ApiPath(message_id): ApiPath<Uuid>,
) -> ApiResult<StatusCode> {
    run_db(&state, move |db| db.delete_message(message_id, user.id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn reaction(user_id: Uuid, emoji: &str) -> ReactionRow {
        ReactionRow {
            message_id: Uuid::nil(),
            user_id,
            emoji: emoji.to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn reactions_group_by_emoji_in_first_use_order() {
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let groups = group_reactions(&[reaction(a, "🚀"), reaction(b, "😀"), reaction(c, "🚀")]);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].emoji, "🚀");
        assert_eq!(groups[0].count, 2);
        assert_eq!(groups[0].user_ids, vec![a, c]);
        assert_eq!(groups[1].emoji, "😀");
        assert_eq!(groups[1].user_ids, vec![b]);
    }

    #[test]
    fn no_reactions_no_groups() {
        assert!(group_reactions(&[]).is_empty());
    }
}
