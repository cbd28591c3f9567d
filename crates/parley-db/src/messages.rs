use std::collections::HashMap;

use rusqlite::{Connection, OptionalExtension};
use tracing::debug;
use uuid::Uuid;

use crate::Database;
use crate::conversations::require_participant;
use crate::error::StoreError;
use crate::models::{MESSAGE_COLUMNS, MessageRow, MessageWithReactions, map_message, map_reaction, now_ts};
use crate::validate::validate_content;

impl Database {
    /// Append a message and move the conversation's last-message pointer to it.
    pub fn post_message(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        content: &str,
    ) -> Result<MessageRow, StoreError> {
        self.with_tx(|tx| {
            require_participant(tx, conversation_id, sender_id)?;
            validate_content(content)?;
            insert_message(tx, conversation_id, sender_id, content)
        })
    }

    /// Copy a message's content into another conversation as a fresh
    /// message from the forwarder. The forwarder must be able to see the
    /// source and post to the destination.
    pub fn forward_message(
        &self,
        message_id: Uuid,
        destination_id: Uuid,
        forwarder_id: Uuid,
    ) -> Result<MessageRow, StoreError> {
        self.with_tx(|tx| {
            let source = query_message(tx, message_id)?.ok_or(StoreError::NotFound("message"))?;
            require_participant(tx, source.conversation_id, forwarder_id)?;
            require_participant(tx, destination_id, forwarder_id)?;
            insert_message(tx, destination_id, forwarder_id, &source.content)
        })
    }

    /// Remove a message (sender only) and repoint its conversation at the
    /// newest remaining message. Returns the new pointer.
    pub fn delete_message(&self, message_id: Uuid, requester_id: Uuid) -> Result<Option<Uuid>, StoreError> {
        self.with_tx(|tx| {
            let message = query_message(tx, message_id)?.ok_or(StoreError::NotFound("message"))?;
            if message.sender_id != requester_id {
                return Err(StoreError::forbidden("only the sender can delete a message"));
            }

            tx.execute("DELETE FROM messages WHERE id = ?1", [message_id.to_string()])?;
            let last = refresh_last_message(tx, message.conversation_id)?;

            debug!(message_id = %message_id, conversation_id = %message.conversation_id, "Deleted message");
            Ok(last)
        })
    }

    /// All messages of a conversation, oldest first, each with its reactions.
    pub fn list_messages(
        &self,
        conversation_id: Uuid,
        requester_id: Uuid,
    ) -> Result<Vec<MessageWithReactions>, StoreError> {
        self.with_conn(|conn| {
            require_participant(conn, conversation_id, requester_id)?;

            let sql = format!(
                "SELECT {} FROM messages m
                 JOIN users u ON u.id = m.sender_id
                 WHERE m.conversation_id = ?1
                 ORDER BY m.created_at ASC, m.rowid ASC",
                MESSAGE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let messages = stmt
                .query_map([conversation_id.to_string()], map_message)?
                .collect::<Result<Vec<_>, _>>()?;

            let mut stmt = conn.prepare(
                "SELECT r.message_id, r.user_id, r.emoji, r.created_at
                 FROM reactions r
                 JOIN messages m ON m.id = r.message_id
                 WHERE m.conversation_id = ?1
                 ORDER BY r.created_at ASC, r.rowid ASC",
            )?;
            let mut by_message: HashMap<Uuid, Vec<_>> = HashMap::new();
            for reaction in stmt.query_map([conversation_id.to_string()], map_reaction)? {
                let reaction = reaction?;
                by_message.entry(reaction.message_id).or_default().push(reaction);
            }

            Ok(messages
                .into_iter()
                .map(|message| {
                    let reactions = by_message.remove(&message.id).unwrap_or_default();
                    MessageWithReactions { message, reactions }
                })
                .collect())
        })
    }
}

pub(crate) fn query_message(conn: &Connection, id: Uuid) -> Result<Option<MessageRow>, StoreError> {
    let sql = format!(
        "SELECT {} FROM messages m JOIN users u ON u.id = m.sender_id WHERE m.id = ?1",
        MESSAGE_COLUMNS
    );
    let row = conn
        .query_row(&sql, [id.to_string()], map_message)
        .optional()?;
    Ok(row)
}

fn insert_message(
    conn: &Connection,
    conversation_id: Uuid,
    sender_id: Uuid,
    content: &str,
) -> Result<MessageRow, StoreError> {
    let id = Uuid::new_v4();
    let (_, ts) = now_ts();
    conn.execute(
        "INSERT INTO messages (id, conversation_id, sender_id, content, status, created_at)
         VALUES (?1, ?2, ?3, ?4, 'sent', ?5)",
        (id.to_string(), conversation_id.to_string(), sender_id.to_string(), content, &ts),
    )?;
    conn.execute(
        "UPDATE conversations SET last_message_id = ?1 WHERE id = ?2",
        (id.to_string(), conversation_id.to_string()),
    )?;

    query_message(conn, id)?.ok_or(StoreError::NotFound("message"))
}

/// Point the conversation at its newest remaining message, or at nothing.
fn refresh_last_message(conn: &Connection, conversation_id: Uuid) -> Result<Option<Uuid>, StoreError> {
    let last: Option<String> = conn
        .query_row(
            "SELECT id FROM messages
             WHERE conversation_id = ?1
             ORDER BY created_at DESC, rowid DESC
             LIMIT 1",
            [conversation_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;

    conn.execute(
        "UPDATE conversations SET last_message_id = ?1 WHERE id = ?2",
        (&last, conversation_id.to_string()),
    )?;

    last.map(|id| id.parse::<Uuid>().map_err(|e| StoreError::Internal(e.into())))
        .transpose()
}

#[cfg(test)]
mod tests {
    use crate::StoreError;
    use crate::testing::{db, login};
    use parley_types::models::MessageStatus;
    use uuid::Uuid;

    fn last_message_id(db: &crate::Database, conversation: Uuid, viewer: Uuid) -> Option<Uuid> {
        db.get_conversation(conversation, viewer)
            .unwrap()
            .view
            .last_message
            .map(|m| m.id)
    }

    #[test]
    fn post_moves_the_last_message_pointer() {
        let db = db();
        let alice = login(&db, "alice");
        let bob = login(&db, "bob");
        let (conv, _) = db.create_private_conversation(alice, bob).unwrap();

        let m1 = db.post_message(conv, alice, "hi").unwrap();
        assert_eq!(m1.status, MessageStatus::Sent);
        assert_eq!(m1.sender_name, "alice");
        assert_eq!(m1.reaction_count, 0);
        assert_eq!(last_message_id(&db, conv, bob), Some(m1.id));

        let m2 = db.post_message(conv, bob, "hey").unwrap();
        assert_eq!(last_message_id(&db, conv, alice), Some(m2.id));
    }

    #[test]
    fn post_requires_membership_and_content() {
        let db = db();
        let alice = login(&db, "alice");
        let bob = login(&db, "bob");
        let eve = login(&db, "eve");
        let (conv, _) = db.create_private_conversation(alice, bob).unwrap();

        assert!(matches!(db.post_message(conv, eve, "hi"), Err(StoreError::Forbidden(_))));
        assert!(matches!(db.post_message(conv, alice, "   "), Err(StoreError::Validation(_))));
        assert!(matches!(
            db.post_message(Uuid::new_v4(), alice, "hi"),
            Err(StoreError::NotFound("conversation"))
        ));
        assert!(db.list_messages(conv, alice).unwrap().is_empty());
    }

    #[test]
    fn delete_is_sender_only_and_clears_pointer() {
        let db = db();
        let alice = login(&db, "alice");
        let bob = login(&db, "bob");
        let (conv, _) = db.create_private_conversation(alice, bob).unwrap();
        let m1 = db.post_message(conv, alice, "hi").unwrap();

        assert!(matches!(db.delete_message(m1.id, bob), Err(StoreError::Forbidden(_))));
        assert_eq!(last_message_id(&db, conv, alice), Some(m1.id));

        assert_eq!(db.delete_message(m1.id, alice).unwrap(), None);
        assert_eq!(last_message_id(&db, conv, alice), None);
        assert!(matches!(db.delete_message(m1.id, alice), Err(StoreError::NotFound("message"))));
    }

    #[test]
    fn delete_falls_back_to_previous_message() {
        let db = db();
        let alice = login(&db, "alice");
        let bob = login(&db, "bob");
        let (conv, _) = db.create_private_conversation(alice, bob).unwrap();
        let m1 = db.post_message(conv, alice, "one").unwrap();
        let m2 = db.post_message(conv, bob, "two").unwrap();
        let m3 = db.post_message(conv, alice, "three").unwrap();

        // Deleting a message that is not the latest leaves the pointer alone.
        assert_eq!(db.delete_message(m2.id, bob).unwrap(), Some(m3.id));
        assert_eq!(db.delete_message(m3.id, alice).unwrap(), Some(m1.id));
        assert_eq!(last_message_id(&db, conv, bob), Some(m1.id));
    }

    #[test]
    fn forward_copies_content_only() {
        let db = db();
        let alice = login(&db, "alice");
        let bob = login(&db, "bob");
        let carol = login(&db, "carol");
        let (ab, _) = db.create_private_conversation(alice, bob).unwrap();
        let (bc, _) = db.create_private_conversation(bob, carol).unwrap();

        let original = db.post_message(ab, alice, "meet at 5 ☕").unwrap();
        let forwarded = db.forward_message(original.id, bc, bob).unwrap();

        assert_ne!(forwarded.id, original.id);
        assert_eq!(forwarded.content, original.content);
        assert_eq!(forwarded.conversation_id, bc);
        assert_eq!(forwarded.sender_id, bob);
        assert!(forwarded.created_at >= original.created_at);
        assert_eq!(last_message_id(&db, bc, carol), Some(forwarded.id));
        // the source conversation is untouched
        assert_eq!(last_message_id(&db, ab, alice), Some(original.id));
    }

    #[test]
    fn forward_needs_access_to_both_sides() {
        let db = db();
        let alice = login(&db, "alice");
        let bob = login(&db, "bob");
        let carol = login(&db, "carol");
        let (ab, _) = db.create_private_conversation(alice, bob).unwrap();
        let (bc, _) = db.create_private_conversation(bob, carol).unwrap();
        let original = db.post_message(ab, alice, "secret").unwrap();

        // carol cannot read ab, so she cannot forward out of it
        assert!(matches!(db.forward_message(original.id, bc, carol), Err(StoreError::Forbidden(_))));
        // alice is not in bc
        assert!(matches!(db.forward_message(original.id, bc, alice), Err(StoreError::Forbidden(_))));
        assert!(matches!(
            db.forward_message(Uuid::new_v4(), bc, bob),
            Err(StoreError::NotFound("message"))
        ));
        assert!(db.list_messages(bc, carol).unwrap().is_empty());
    }

    #[test]
    fn list_is_chronological_with_reactions_attached() {
        let db = db();
        let alice = login(&db, "alice");
        let bob = login(&db, "bob");
        let eve = login(&db, "eve");
        let (conv, _) = db.create_private_conversation(alice, bob).unwrap();
        let m1 = db.post_message(conv, alice, "first").unwrap();
        let m2 = db.post_message(conv, bob, "second").unwrap();
        db.react(m1.id, bob, "👍").unwrap();

        let listed = db.list_messages(conv, bob).unwrap();
        let ids: Vec<Uuid> = listed.iter().map(|m| m.message.id).collect();
        assert_eq!(ids, vec![m1.id, m2.id]);
        assert_eq!(listed[0].reactions.len(), 1);
        assert_eq!(listed[0].reactions[0].emoji, "👍");
        assert_eq!(listed[0].message.reaction_count, 1);
        assert!(listed[1].reactions.is_empty());

        assert!(matches!(db.list_messages(conv, eve), Err(StoreError::Forbidden(_))));
    }
}
