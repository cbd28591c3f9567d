use parley_types::models::ConversationKind;
use rusqlite::{Connection, ErrorCode, OptionalExtension};
use tracing::info;
use uuid::Uuid;

use crate::Database;
use crate::error::StoreError;
use crate::identity::query_user_by_id;
use crate::messages::query_message;
use crate::models::{
    Avatar, CONVERSATION_COLUMNS, ConversationDetail, ConversationRow, ConversationView,
    MEMBER_COLUMNS, UserRow, map_conversation, map_user, now_ts,
};

impl Database {
    /// Start (or reopen) the private conversation between two users.
    /// Returns the conversation id and whether a new row was created.
    pub fn create_private_conversation(
        &self,
        creator_id: Uuid,
        target_id: Uuid,
    ) -> Result<(Uuid, bool), StoreError> {
        if creator_id == target_id {
            return Err(StoreError::validation("cannot start a conversation with yourself"));
        }

        self.with_tx(|tx| {
            query_user_by_id(tx, target_id)?.ok_or(StoreError::NotFound("user"))?;

            if let Some(existing) = query_private_between(tx, creator_id, target_id)? {
                return Ok((existing, false));
            }

            let id = Uuid::new_v4();
            let (_, ts) = now_ts();
            let inserted = tx.execute(
                "INSERT INTO conversations (id, kind, creator_id, other_user_id, created_at)
                 VALUES (?1, 'private', ?2, ?3, ?4)",
                (id.to_string(), creator_id.to_string(), target_id.to_string(), &ts),
            );

            match inserted {
                Ok(_) => {
                    info!(conversation_id = %id, "Created private conversation");
                    Ok((id, true))
                }
                // Another writer won the race for this pair; hand back its row.
                Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                    let existing = query_private_between(tx, creator_id, target_id)?
                        .ok_or(StoreError::NotFound("conversation"))?;
                    Ok((existing, false))
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn get_conversation(
        &self,
        conversation_id: Uuid,
        requester_id: Uuid,
    ) -> Result<ConversationDetail, StoreError> {
        self.with_conn(|conn| {
            let row = require_participant(conn, conversation_id, requester_id)?;
            let members = participants(conn, &row)?;
            let view = build_view(conn, row, requester_id)?;
            Ok(ConversationDetail { view, members })
        })
    }

    /// Every conversation the user takes part in, most recently active first.
    pub fn list_conversations(&self, user_id: Uuid) -> Result<Vec<ConversationView>, StoreError> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM conversations c
                 WHERE (c.kind = 'private' AND (c.creator_id = ?1 OR c.other_user_id = ?1))
                    OR (c.kind = 'group' AND EXISTS (
                        SELECT 1 FROM conversation_members gm
                        WHERE gm.conversation_id = c.id AND gm.user_id = ?1))",
                CONVERSATION_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id.to_string()], map_conversation)?
                .collect::<Result<Vec<_>, _>>()?;

            let mut views = rows
                .into_iter()
                .map(|row| build_view(conn, row, user_id))
                .collect::<Result<Vec<_>, _>>()?;
            views.sort_by(|a, b| b.last_activity().cmp(&a.last_activity()));
            Ok(views)
        })
    }

    /// Private conversations may be deleted by either participant, groups
    /// only by their creator. Messages, reactions and memberships go with it.
    pub fn delete_conversation(
        &self,
        conversation_id: Uuid,
        requester_id: Uuid,
    ) -> Result<ConversationKind, StoreError> {
        self.with_tx(|tx| {
            let row = query_conversation(tx, conversation_id)?
                .ok_or(StoreError::NotFound("conversation"))?;

            match row.kind {
                ConversationKind::Private => {
                    if !is_participant(tx, &row, requester_id)? {
                        return Err(StoreError::forbidden("not a member of this conversation"));
                    }
                }
                ConversationKind::Group => {
                    if row.creator_id != requester_id {
                        return Err(StoreError::forbidden("only the group creator can delete it"));
                    }
                }
            }

            let id = conversation_id.to_string();
            tx.execute("UPDATE conversations SET last_message_id = NULL WHERE id = ?1", [&id])?;
            tx.execute("DELETE FROM conversations WHERE id = ?1", [&id])?;

            info!(conversation_id = %conversation_id, kind = %row.kind, "Deleted conversation");
            Ok(row.kind)
        })
    }
}

pub(crate) fn query_conversation(conn: &Connection, id: Uuid) -> Result<Option<ConversationRow>, StoreError> {
    let sql = format!("SELECT {} FROM conversations c WHERE c.id = ?1", CONVERSATION_COLUMNS);
    let row = conn
        .query_row(&sql, [id.to_string()], map_conversation)
        .optional()?;
    Ok(row)
}

fn query_private_between(conn: &Connection, a: Uuid, b: Uuid) -> Result<Option<Uuid>, StoreError> {
    let id: Option<String> = conn
        .query_row(
            "SELECT id FROM conversations
             WHERE kind = 'private'
               AND ((creator_id = ?1 AND other_user_id = ?2)
                 OR (creator_id = ?2 AND other_user_id = ?1))",
            (a.to_string(), b.to_string()),
            |row| row.get(0),
        )
        .optional()?;

    id.map(|id| id.parse::<Uuid>().map_err(|e| StoreError::Internal(e.into())))
        .transpose()
}

pub(crate) fn is_group_member(conn: &Connection, conversation_id: Uuid, user_id: Uuid) -> Result<bool, StoreError> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS (
             SELECT 1 FROM conversation_members WHERE conversation_id = ?1 AND user_id = ?2
         )",
        (conversation_id.to_string(), user_id.to_string()),
        |row| row.get(0),
    )?;
    Ok(exists)
}

pub(crate) fn is_participant(conn: &Connection, row: &ConversationRow, user_id: Uuid) -> Result<bool, StoreError> {
    match row.kind {
        ConversationKind::Private => {
            Ok(row.creator_id == user_id || row.other_user_id == Some(user_id))
        }
        ConversationKind::Group => is_group_member(conn, row.id, user_id),
    }
}

/// Load a conversation the user is allowed to see: `NotFound` when it does
/// not exist, `Forbidden` when the user is not a participant.
pub(crate) fn require_participant(
    conn: &Connection,
    conversation_id: Uuid,
    user_id: Uuid,
) -> Result<ConversationRow, StoreError> {
    let row = query_conversation(conn, conversation_id)?.ok_or(StoreError::NotFound("conversation"))?;
    if !is_participant(conn, &row, user_id)? {
        return Err(StoreError::forbidden("not a member of this conversation"));
    }
    Ok(row)
}

fn participants(conn: &Connection, row: &ConversationRow) -> Result<Vec<UserRow>, StoreError> {
    match row.kind {
        ConversationKind::Private => {
            let mut users = Vec::with_capacity(2);
            for id in std::iter::once(row.creator_id).chain(row.other_user_id) {
                users.push(query_user_by_id(conn, id)?.ok_or(StoreError::NotFound("user"))?);
            }
            Ok(users)
        }
        ConversationKind::Group => {
            let sql = format!(
                "SELECT {} FROM conversation_members gm
                 JOIN users u ON u.id = gm.user_id
                 WHERE gm.conversation_id = ?1
                 ORDER BY gm.joined_at, gm.rowid",
                MEMBER_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let users = stmt
                .query_map([row.id.to_string()], map_user)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(users)
        }
    }
}

/// Compute name, avatar and last message as seen by `viewer`. A private
/// conversation is presented as the other participant.
pub(crate) fn build_view(
    conn: &Connection,
    row: ConversationRow,
    viewer: Uuid,
) -> Result<ConversationView, StoreError> {
    let (display_name, avatar) = match row.kind {
        ConversationKind::Private => {
            let counterpart = if row.creator_id == viewer {
                row.other_user_id.ok_or(StoreError::NotFound("user"))?
            } else {
                row.creator_id
            };
            let user = query_user_by_id(conn, counterpart)?.ok_or(StoreError::NotFound("user"))?;
            (user.name, Avatar::User(counterpart))
        }
        ConversationKind::Group => (row.name.clone().unwrap_or_default(), Avatar::Group(row.id)),
    };

    let last_message = match row.last_message_id {
        Some(id) => query_message(conn, id)?,
        None => None,
    };

    Ok(ConversationView {
        id: row.id,
        kind: row.kind,
        creator_id: row.creator_id,
        display_name,
        avatar,
        last_message,
        created_at: row.created_at,
    })
}

#[cfg(test)]
mod tests {
    use crate::StoreError;
    use crate::models::Avatar;
    use crate::testing::{db, login};
    use parley_types::models::ConversationKind;
    use uuid::Uuid;

    #[test]
    fn private_create_is_idempotent_in_both_directions() {
        let db = db();
        let alice = login(&db, "alice");
        let bob = login(&db, "bob");

        let (c1, created) = db.create_private_conversation(alice, bob).unwrap();
        assert!(created);
        let (c2, created) = db.create_private_conversation(alice, bob).unwrap();
        assert!(!created);
        let (c3, _) = db.create_private_conversation(bob, alice).unwrap();
        assert_eq!(c1, c2);
        assert_eq!(c1, c3);
        assert_eq!(db.list_conversations(alice).unwrap().len(), 1);
    }

    #[test]
    fn private_create_rejects_self_and_unknown_targets() {
        let db = db();
        let alice = login(&db, "alice");
        assert!(matches!(
            db.create_private_conversation(alice, alice),
            Err(StoreError::Validation(_))
        ));
        assert!(matches!(
            db.create_private_conversation(alice, Uuid::new_v4()),
            Err(StoreError::NotFound("user"))
        ));
    }

    #[test]
    fn private_view_shows_the_other_party() {
        let db = db();
        let alice = login(&db, "alice");
        let bob = login(&db, "bob");
        let (conv, _) = db.create_private_conversation(alice, bob).unwrap();

        let for_alice = db.get_conversation(conv, alice).unwrap();
        assert_eq!(for_alice.view.display_name, "bob");
        assert_eq!(for_alice.view.avatar, Avatar::User(bob));
        assert_eq!(for_alice.members.len(), 2);

        let for_bob = db.get_conversation(conv, bob).unwrap();
        assert_eq!(for_bob.view.display_name, "alice");
        assert_eq!(for_bob.view.avatar, Avatar::User(alice));
    }

    #[test]
    fn outsiders_are_forbidden_and_missing_is_not_found() {
        let db = db();
        let alice = login(&db, "alice");
        let bob = login(&db, "bob");
        let eve = login(&db, "eve");
        let (conv, _) = db.create_private_conversation(alice, bob).unwrap();

        assert!(matches!(db.get_conversation(conv, eve), Err(StoreError::Forbidden(_))));
        assert!(matches!(
            db.get_conversation(Uuid::new_v4(), alice),
            Err(StoreError::NotFound("conversation"))
        ));
        assert!(db.list_conversations(eve).unwrap().is_empty());
    }

    #[test]
    fn list_is_ordered_by_latest_activity() {
        let db = db();
        let alice = login(&db, "alice");
        let bob = login(&db, "bob");
        let carol = login(&db, "carol");

        let (with_bob, _) = db.create_private_conversation(alice, bob).unwrap();
        let (with_carol, _) = db.create_private_conversation(alice, carol).unwrap();
        db.post_message(with_bob, bob, "ping").unwrap();

        let list = db.list_conversations(alice).unwrap();
        let ids: Vec<Uuid> = list.iter().map(|v| v.id).collect();
        assert_eq!(ids, vec![with_bob, with_carol]);
        assert_eq!(list[0].last_message.as_ref().unwrap().content, "ping");
        assert!(list[1].last_message.is_none());
    }

    #[test]
    fn private_delete_by_either_participant_cascades() {
        let db = db();
        let alice = login(&db, "alice");
        let bob = login(&db, "bob");
        let eve = login(&db, "eve");
        let (conv, _) = db.create_private_conversation(alice, bob).unwrap();
        let msg = db.post_message(conv, alice, "hello").unwrap();
        db.react(msg.id, bob, "😀").unwrap();

        assert!(matches!(db.delete_conversation(conv, eve), Err(StoreError::Forbidden(_))));
        assert_eq!(db.delete_conversation(conv, bob).unwrap(), ConversationKind::Private);

        assert!(matches!(db.get_conversation(conv, alice), Err(StoreError::NotFound(_))));
        let leftovers: i64 = db
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT (SELECT COUNT(*) FROM messages) + (SELECT COUNT(*) FROM reactions)",
                    [],
                    |r| r.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(leftovers, 0);

        // The pair can start over afterwards.
        let (fresh, created) = db.create_private_conversation(bob, alice).unwrap();
        assert!(created);
        assert_ne!(fresh, conv);
    }

    #[test]
    fn concurrent_private_creates_yield_one_conversation() {
        use std::collections::HashSet;
        use std::sync::Arc;
        use std::thread;

        let path = std::env::temp_dir().join(format!("parley-race-{}.db", Uuid::new_v4()));
        let db = Arc::new(crate::Database::open(&path).unwrap());
        let alice = login(&db, "alice");
        let bob = login(&db, "bob");

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let db = Arc::clone(&db);
                thread::spawn(move || {
                    if i % 2 == 0 {
                        db.create_private_conversation(alice, bob).unwrap()
                    } else {
                        db.create_private_conversation(bob, alice).unwrap()
                    }
                })
            })
            .collect();
        let results: Vec<(Uuid, bool)> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|(_, created)| *created).count(), 1);
        let ids: HashSet<Uuid> = results.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids.len(), 1);

        let rows: i64 = db
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM conversations WHERE kind = 'private'",
                    [],
                    |r| r.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(rows, 1);

        drop(db);
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", path.display(), suffix));
        }
    }

    #[test]
    fn group_delete_is_creator_only() {
        let db = db();
        let alice = login(&db, "alice");
        let bob = login(&db, "bob");
        let group = db.create_group(alice, "team", &["bob".to_string()]).unwrap();

        assert!(matches!(db.delete_conversation(group, bob), Err(StoreError::Forbidden(_))));
        assert_eq!(db.delete_conversation(group, alice).unwrap(), ConversationKind::Group);
        assert!(db.list_conversations(bob).unwrap().is_empty());
    }
}
