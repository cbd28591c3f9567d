use rusqlite::Connection;
use tracing::info;
use uuid::Uuid;

use crate::Database;
use crate::conversations::{is_group_member, query_conversation};
use crate::error::StoreError;
use crate::identity::query_user_by_name;
use crate::models::{ConversationRow, UserRow, now_ts};
use crate::validate::validate_group_name;

impl Database {
    /// Create a group owned by `creator_id`. Every member name must belong
    /// to an existing user; unknown names are reported all at once and
    /// nothing is written.
    pub fn create_group(
        &self,
        creator_id: Uuid,
        name: &str,
        member_names: &[String],
    ) -> Result<Uuid, StoreError> {
        validate_group_name(name)?;
        if member_names.is_empty() {
            return Err(StoreError::validation("a group needs at least one member"));
        }

        self.with_tx(|tx| {
            let mut members = Vec::with_capacity(member_names.len());
            let mut unknown = Vec::new();
            for raw in member_names {
                let folded = raw.to_lowercase();
                match query_user_by_name(tx, &folded)? {
                    Some(user) => members.push(user.id),
                    None => unknown.push(folded),
                }
            }
            if !unknown.is_empty() {
                return Err(StoreError::validation(format!(
                    "unknown members: {}",
                    unknown.join(", ")
                )));
            }

            let id = Uuid::new_v4();
            let (_, ts) = now_ts();
            tx.execute(
                "INSERT INTO conversations (id, kind, creator_id, name, created_at)
                 VALUES (?1, 'group', ?2, ?3, ?4)",
                (id.to_string(), creator_id.to_string(), name, &ts),
            )?;

            insert_member(tx, id, creator_id, &ts)?;
            for member in members {
                insert_member(tx, id, member, &ts)?;
            }

            info!(conversation_id = %id, "Created group {}", name);
            Ok(id)
        })
    }

    pub fn rename_group(&self, group_id: Uuid, requester_id: Uuid, name: &str) -> Result<(), StoreError> {
        validate_group_name(name)?;

        self.with_tx(|tx| {
            let group = require_group(tx, group_id)?;
            if group.creator_id != requester_id {
                return Err(StoreError::forbidden("only the group creator can rename it"));
            }

            tx.execute(
                "UPDATE conversations SET name = ?1 WHERE id = ?2",
                (name, group_id.to_string()),
            )?;
            Ok(())
        })
    }

    /// Add a user to a group on behalf of an existing member.
    pub fn add_group_member(
        &self,
        group_id: Uuid,
        requester_id: Uuid,
        username: &str,
    ) -> Result<UserRow, StoreError> {
        let username = username.to_lowercase();

        self.with_tx(|tx| {
            require_group_member(tx, group_id, requester_id)?;

            let user = query_user_by_name(tx, &username)?.ok_or(StoreError::NotFound("user"))?;
            if is_group_member(tx, group_id, user.id)? {
                return Err(StoreError::conflict("user is already a member of this group"));
            }

            let (_, ts) = now_ts();
            insert_member(tx, group_id, user.id, &ts)?;

            info!(conversation_id = %group_id, user_id = %user.id, "Added group member");
            Ok(user)
        })
    }

    /// The creator cannot leave; every other member can.
    pub fn leave_group(&self, group_id: Uuid, user_id: Uuid) -> Result<(), StoreError> {
        self.with_tx(|tx| {
            let group = require_group_member(tx, group_id, user_id)?;
            if group.creator_id == user_id {
                return Err(StoreError::forbidden("the group creator cannot leave the group"));
            }

            tx.execute(
                "DELETE FROM conversation_members WHERE conversation_id = ?1 AND user_id = ?2",
                (group_id.to_string(), user_id.to_string()),
            )?;

            info!(conversation_id = %group_id, user_id = %user_id, "Member left group");
            Ok(())
        })
    }

    /// Point the group photo at a new blob reference; returns the old one.
    pub fn set_group_photo(
        &self,
        group_id: Uuid,
        requester_id: Uuid,
        photo_ref: &str,
    ) -> Result<Option<String>, StoreError> {
        self.with_tx(|tx| {
            let group = require_group_member(tx, group_id, requester_id)?;
            tx.execute(
                "UPDATE conversations SET photo = ?1 WHERE id = ?2",
                (photo_ref, group_id.to_string()),
            )?;
            Ok(group.photo)
        })
    }

    /// `None` means no photo was ever set for the group.
    pub fn group_photo(&self, group_id: Uuid, requester_id: Uuid) -> Result<Option<String>, StoreError> {
        self.with_conn(|conn| Ok(require_group_member(conn, group_id, requester_id)?.photo))
    }
}

fn insert_member(conn: &Connection, group_id: Uuid, user_id: Uuid, ts: &str) -> Result<(), StoreError> {
    conn.execute(
        "INSERT OR IGNORE INTO conversation_members (conversation_id, user_id, joined_at)
         VALUES (?1, ?2, ?3)",
        (group_id.to_string(), user_id.to_string(), ts),
    )?;
    Ok(())
}

/// A private conversation is not a group, so group operations on it
/// report the group as missing.
fn require_group(conn: &Connection, group_id: Uuid) -> Result<ConversationRow, StoreError> {
    query_conversation(conn, group_id)?
        .filter(ConversationRow::is_group)
        .ok_or(StoreError::NotFound("group"))
}

fn require_group_member(conn: &Connection, group_id: Uuid, user_id: Uuid) -> Result<ConversationRow, StoreError> {
    let group = require_group(conn, group_id)?;
    if !is_group_member(conn, group_id, user_id)? {
        return Err(StoreError::forbidden("not a member of this group"));
    }
    Ok(group)
}
