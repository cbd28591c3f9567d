use rusqlite::{Connection, OptionalExtension};
use tracing::debug;
use uuid::Uuid;

use crate::Database;
use crate::conversations::require_participant;
use crate::error::StoreError;
use crate::messages::query_message;
use crate::models::{MessageRow, now_ts};
use crate::validate::is_single_emoji;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionOutcome {
    pub emoji: String,
    /// Emoji of the reaction this one replaced, if any.
    pub replaced: Option<String>,
    pub reaction_count: u32,
}

impl Database {
    /// Record the user's reaction on a message, replacing any previous one.
    /// The message's counter only moves when the user had no reaction yet.
    pub fn react(&self, message_id: Uuid, user_id: Uuid, emoji: &str) -> Result<ReactionOutcome, StoreError> {
        if !is_single_emoji(emoji) {
            return Err(StoreError::validation("reaction must be a single emoji"));
        }

        self.with_tx(|tx| {
            visible_message(tx, message_id, user_id)?;

            let mid = message_id.to_string();
            let uid = user_id.to_string();
            let previous: Option<String> = tx
                .query_row(
                    "SELECT emoji FROM reactions WHERE message_id = ?1 AND user_id = ?2",
                    (&mid, &uid),
                    |row| row.get(0),
                )
                .optional()?;

            if previous.is_some() {
                tx.execute(
                    "DELETE FROM reactions WHERE message_id = ?1 AND user_id = ?2",
                    (&mid, &uid),
                )?;
            }

            let (_, ts) = now_ts();
            tx.execute(
                "INSERT INTO reactions (message_id, user_id, emoji, created_at) VALUES (?1, ?2, ?3, ?4)",
                (&mid, &uid, emoji, &ts),
            )?;

            if previous.is_none() {
                tx.execute(
                    "UPDATE messages SET reaction_count = reaction_count + 1 WHERE id = ?1",
                    [&mid],
                )?;
            }

            debug!(message_id = %message_id, user_id = %user_id, "Reaction {} stored", emoji);
            Ok(ReactionOutcome {
                emoji: emoji.to_string(),
                replaced: previous,
                reaction_count: reaction_count(tx, &mid)?,
            })
        })
    }

    /// Withdraw the user's reaction. Returns the message's new counter.
    pub fn unreact(&self, message_id: Uuid, user_id: Uuid) -> Result<u32, StoreError> {
        self.with_tx(|tx| {
            visible_message(tx, message_id, user_id)?;

            let mid = message_id.to_string();
            let removed = tx.execute(
                "DELETE FROM reactions WHERE message_id = ?1 AND user_id = ?2",
                (&mid, user_id.to_string()),
            )?;
            if removed == 0 {
                return Err(StoreError::NotFound("reaction"));
            }

            tx.execute(
                "UPDATE messages SET reaction_count = MAX(reaction_count - 1, 0) WHERE id = ?1",
                [&mid],
            )?;

            reaction_count(tx, &mid)
        })
    }
}

/// The message, provided the user may see its conversation.
fn visible_message(conn: &Connection, message_id: Uuid, user_id: Uuid) -> Result<MessageRow, StoreError> {
    let message = query_message(conn, message_id)?.ok_or(StoreError::NotFound("message"))?;
    require_participant(conn, message.conversation_id, user_id)?;
    Ok(message)
}

fn reaction_count(conn: &Connection, message_id: &str) -> Result<u32, StoreError> {
    let count = conn.query_row(
        "SELECT reaction_count FROM messages WHERE id = ?1",
        [message_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use crate::StoreError;
    use crate::testing::{db, login};
    use uuid::Uuid;

    fn ledger_rows(db: &crate::Database, message: Uuid) -> i64 {
        db.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM reactions WHERE message_id = ?1",
                [message.to_string()],
                |r| r.get(0),
            )?)
        })
        .unwrap()
    }

    #[test]
    fn replacing_a_reaction_keeps_one_row_and_the_count() {
        let db = db();
        let alice = login(&db, "alice");
        let bob = login(&db, "bob");
        let (conv, _) = db.create_private_conversation(alice, bob).unwrap();
        let msg = db.post_message(conv, alice, "hi").unwrap();

        let first = db.react(msg.id, bob, "😀").unwrap();
        assert_eq!(first.reaction_count, 1);
        assert_eq!(first.replaced, None);

        let second = db.react(msg.id, bob, "🚀").unwrap();
        assert_eq!(second.reaction_count, 1);
        assert_eq!(second.replaced.as_deref(), Some("😀"));
        assert_eq!(ledger_rows(&db, msg.id), 1);

        db.react(msg.id, alice, "❤").unwrap();
        let listed = db.list_messages(conv, alice).unwrap();
        assert_eq!(listed[0].message.reaction_count, 2);
        assert_eq!(ledger_rows(&db, msg.id), 2);
    }

    #[test]
    fn invalid_emoji_is_rejected_before_any_write() {
        let db = db();
        let alice = login(&db, "alice");
        let bob = login(&db, "bob");
        let (conv, _) = db.create_private_conversation(alice, bob).unwrap();
        let msg = db.post_message(conv, alice, "hi").unwrap();

        for bad in ["", "ok", "😀😀", "👍🏽"] {
            assert!(matches!(db.react(msg.id, bob, bad), Err(StoreError::Validation(_))));
        }
        assert_eq!(ledger_rows(&db, msg.id), 0);
    }

    #[test]
    fn outsiders_cannot_react() {
        let db = db();
        let alice = login(&db, "alice");
        let bob = login(&db, "bob");
        let eve = login(&db, "eve");
        let (conv, _) = db.create_private_conversation(alice, bob).unwrap();
        let msg = db.post_message(conv, alice, "hi").unwrap();

        assert!(matches!(db.react(msg.id, eve, "😀"), Err(StoreError::Forbidden(_))));
        assert!(matches!(db.react(Uuid::new_v4(), bob, "😀"), Err(StoreError::NotFound("message"))));
    }

    #[test]
    fn unreact_decrements_and_reports_missing() {
        let db = db();
        let alice = login(&db, "alice");
        let bob = login(&db, "bob");
        let (conv, _) = db.create_private_conversation(alice, bob).unwrap();
        let msg = db.post_message(conv, alice, "hi").unwrap();

        assert!(matches!(db.unreact(msg.id, bob), Err(StoreError::NotFound("reaction"))));

        db.react(msg.id, bob, "😀").unwrap();
        assert_eq!(db.unreact(msg.id, bob).unwrap(), 0);
        assert_eq!(ledger_rows(&db, msg.id), 0);
        assert!(matches!(db.unreact(msg.id, bob), Err(StoreError::NotFound("reaction"))));
    }

    #[test]
    fn deleting_a_message_drops_its_reactions() {
        let db = db();
        let alice = login(&db, "alice");
        let bob = login(&db, "bob");
        let (conv, _) = db.create_private_conversation(alice, bob).unwrap();
        let msg = db.post_message(conv, alice, "hi").unwrap();
        db.react(msg.id, bob, "😀").unwrap();

        db.delete_message(msg.id, alice).unwrap();
        assert_eq!(ledger_rows(&db, msg.id), 0);
    }
}
