//! Row types for the SQLite schema, plus the column helpers that turn
//! TEXT columns back into typed values.

use chrono::{DateTime, Utc};
use parley_types::models::{ConversationKind, MessageStatus};
use rusqlite::Row;
use rusqlite::types::Type;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRow {
    pub id: Uuid,
    pub name: String,
    pub photo: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationRow {
    pub id: Uuid,
    pub kind: ConversationKind,
    pub creator_id: Uuid,
    /// Second endpoint of a private conversation; `None` for groups.
    pub other_user_id: Option<Uuid>,
    /// Group name; `None` for private conversations.
    pub name: Option<String>,
    pub photo: Option<String>,
    pub last_message_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl ConversationRow {
    pub fn is_group(&self) -> bool {
        self.kind == ConversationKind::Group
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRow {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub sender_name: String,
    pub content: String,
    pub status: MessageStatus,
    pub reaction_count: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionRow {
    pub message_id: Uuid,
    pub user_id: Uuid,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageWithReactions {
    pub message: MessageRow,
    pub reactions: Vec<ReactionRow>,
}

/// Where a conversation's picture comes from: the other participant's
/// profile photo, or the group's own photo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Avatar {
    User(Uuid),
    Group(Uuid),
}

/// A conversation as seen by one participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationView {
    pub id: Uuid,
    pub kind: ConversationKind,
    pub creator_id: Uuid,
    pub display_name: String,
    pub avatar: Avatar,
    pub last_message: Option<MessageRow>,
    pub created_at: DateTime<Utc>,
}

impl ConversationView {
    /// Timestamp of the latest activity, used to order conversation lists.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_message
            .as_ref()
            .map(|m| m.created_at)
            .unwrap_or(self.created_at)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationDetail {
    pub view: ConversationView,
    pub members: Vec<UserRow>,
}

// -- Column helpers --

pub(crate) const USER_COLUMNS: &str = "id, name, photo, created_at";

pub(crate) const MEMBER_COLUMNS: &str = "u.id, u.name, u.photo, u.created_at";

pub(crate) const CONVERSATION_COLUMNS: &str =
    "c.id, c.kind, c.creator_id, c.other_user_id, c.name, c.photo, c.last_message_id, c.created_at";

pub(crate) const MESSAGE_COLUMNS: &str = "m.id, m.conversation_id, m.sender_id, u.name, m.content, \
     m.status, m.reaction_count, m.created_at";

/// Timestamps are stored as fixed-width RFC 3339 so that lexical order in
/// SQLite matches chronological order.
pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

pub(crate) fn now_ts() -> (DateTime<Utc>, String) {
    let now = Utc::now();
    let text = format_ts(now);
    // Re-parse so the in-memory value carries exactly the stored precision.
    let stored = parse_ts(&text).unwrap_or(now);
    (stored, text)
}

fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

pub(crate) fn uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let text: String = row.get(idx)?;
    text.parse().map_err(|e| conversion_error(idx, e))
}

pub(crate) fn opt_uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| t.parse().map_err(|e| conversion_error(idx, e)))
        .transpose()
}

pub(crate) fn ts_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

pub(crate) fn map_user(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: uuid_at(row, 0)?,
        name: row.get(1)?,
        photo: row.get(2)?,
        created_at: ts_at(row, 3)?,
    })
}

pub(crate) fn map_conversation(row: &Row<'_>) -> rusqlite::Result<ConversationRow> {
    let kind: String = row.get(1)?;
    Ok(ConversationRow {
        id: uuid_at(row, 0)?,
        kind: kind.parse().map_err(|e| conversion_error(1, e))?,
        creator_id: uuid_at(row, 2)?,
        other_user_id: opt_uuid_at(row, 3)?,
        name: row.get(4)?,
        photo: row.get(5)?,
        last_message_id: opt_uuid_at(row, 6)?,
        created_at: ts_at(row, 7)?,
    })
}

pub(crate) fn map_message(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    let status: String = row.get(5)?;
    Ok(MessageRow {
        id: uuid_at(row, 0)?,
        conversation_id: uuid_at(row, 1)?,
        sender_id: uuid_at(row, 2)?,
        sender_name: row.get(3)?,
        content: row.get(4)?,
        status: status.parse().map_err(|e| conversion_error(5, e))?,
        reaction_count: row.get(6)?,
        created_at: ts_at(row, 7)?,
    })
}

pub(crate) fn map_reaction(row: &Row<'_>) -> rusqlite::Result<ReactionRow> {
    Ok(ReactionRow {
        message_id: uuid_at(row, 0)?,
        user_id: uuid_at(row, 1)?,
        emoji: row.get(2)?,
        created_at: ts_at(row, 3)?,
    })
}
