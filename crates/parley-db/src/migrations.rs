use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            BEGIN;

            CREATE TABLE users (
                id          TEXT PRIMARY KEY,
                name        TEXT NOT NULL UNIQUE COLLATE NOCASE,
                photo       TEXT,
                created_at  TEXT NOT NULL
            );

            CREATE TABLE conversations (
                id              TEXT PRIMARY KEY,
                kind            TEXT NOT NULL CHECK (kind IN ('private', 'group')),
                creator_id      TEXT NOT NULL REFERENCES users(id),
                other_user_id   TEXT REFERENCES users(id),
                name            TEXT,
                photo           TEXT,
                last_message_id TEXT REFERENCES messages(id) ON DELETE SET NULL,
                created_at      TEXT NOT NULL,
                CHECK (
                    (kind = 'private' AND other_user_id IS NOT NULL
                        AND other_user_id != creator_id AND name IS NULL)
                    OR (kind = 'group' AND other_user_id IS NULL AND name IS NOT NULL)
                )
            );

            -- At most one private conversation per unordered pair of users
            CREATE UNIQUE INDEX idx_conversations_private_pair
                ON conversations (min(creator_id, other_user_id), max(creator_id, other_user_id))
                WHERE kind = 'private';

            CREATE INDEX idx_conversations_other_user
                ON conversations (other_user_id);

            CREATE TABLE conversation_members (
                conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                user_id         TEXT NOT NULL REFERENCES users(id),
                joined_at       TEXT NOT NULL,
                PRIMARY KEY (conversation_id, user_id)
            );

            CREATE INDEX idx_members_user
                ON conversation_members (user_id);

            CREATE TABLE messages (
                id              TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                sender_id       TEXT NOT NULL REFERENCES users(id),
                content         TEXT NOT NULL,
                status          TEXT NOT NULL DEFAULT 'sent'
                                CHECK (status IN ('sent', 'received', 'read')),
                reaction_count  INTEGER NOT NULL DEFAULT 0 CHECK (reaction_count >= 0),
                created_at      TEXT NOT NULL
            );

            CREATE INDEX idx_messages_conversation
                ON messages (conversation_id, created_at);

            CREATE TABLE reactions (
                message_id  TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
                user_id     TEXT NOT NULL REFERENCES users(id),
                emoji       TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                PRIMARY KEY (message_id, user_id)
            );

            INSERT INTO schema_version (version) VALUES (1);

            COMMIT;
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
