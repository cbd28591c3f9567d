use rusqlite::{Connection, OptionalExtension};
use tracing::info;
use uuid::Uuid;

use crate::Database;
use crate::error::StoreError;
use crate::models::{USER_COLUMNS, UserRow, map_user, now_ts};
use crate::validate::normalize_username;

impl Database {
    /// Look a user up by name, creating it on first login.
    /// Returns the user and whether it was just created.
    pub fn resolve_or_create_user(&self, name: &str) -> Result<(UserRow, bool), StoreError> {
        let name = normalize_username(name)?;

        self.with_tx(|tx| {
            if let Some(user) = query_user_by_name(tx, &name)? {
                return Ok((user, false));
            }

            let id = Uuid::new_v4();
            let (created_at, ts) = now_ts();
            tx.execute(
                "INSERT INTO users (id, name, created_at) VALUES (?1, ?2, ?3)",
                (id.to_string(), &name, &ts),
            )?;

            info!(user_id = %id, "Created user {}", name);
            Ok((
                UserRow {
                    id,
                    name,
                    photo: None,
                    created_at,
                },
                true,
            ))
        })
    }

    /// Resolve a presented identity to an existing user.
    pub fn authenticate(&self, user_id: Uuid) -> Result<UserRow, StoreError> {
        self.with_conn(|conn| query_user_by_id(conn, user_id)?.ok_or(StoreError::Auth))
    }

    pub fn get_user(&self, user_id: Uuid) -> Result<UserRow, StoreError> {
        self.with_conn(|conn| query_user_by_id(conn, user_id)?.ok_or(StoreError::NotFound("user")))
    }

    pub fn get_user_by_name(&self, name: &str) -> Result<Option<UserRow>, StoreError> {
        let name = name.to_lowercase();
        self.with_conn(|conn| query_user_by_name(conn, &name))
    }

    pub fn rename_user(&self, user_id: Uuid, new_name: &str) -> Result<UserRow, StoreError> {
        let new_name = normalize_username(new_name)?;

        self.with_tx(|tx| {
            let mut user = query_user_by_id(tx, user_id)?.ok_or(StoreError::NotFound("user"))?;

            if let Some(holder) = query_user_by_name(tx, &new_name)? {
                if holder.id != user_id {
                    return Err(StoreError::conflict("username is already taken"));
                }
            }

            tx.execute(
                "UPDATE users SET name = ?1 WHERE id = ?2",
                (&new_name, user_id.to_string()),
            )?;

            info!(user_id = %user_id, "Renamed user {} to {}", user.name, new_name);
            user.name = new_name;
            Ok(user)
        })
    }

    /// Point a user's profile photo at a new blob reference.
    /// Returns the reference it replaced.
    pub fn set_user_photo(&self, user_id: Uuid, photo_ref: &str) -> Result<Option<String>, StoreError> {
        self.with_tx(|tx| {
            let user = query_user_by_id(tx, user_id)?.ok_or(StoreError::NotFound("user"))?;
            tx.execute(
                "UPDATE users SET photo = ?1 WHERE id = ?2",
                (photo_ref, user_id.to_string()),
            )?;
            Ok(user.photo)
        })
    }

    /// `None` means the user exists but never set a photo.
    pub fn user_photo(&self, user_id: Uuid) -> Result<Option<String>, StoreError> {
        self.get_user(user_id).map(|user| user.photo)
    }
}

pub(crate) fn query_user_by_id(conn: &Connection, id: Uuid) -> Result<Option<UserRow>, StoreError> {
    let sql = format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS);
    let row = conn
        .query_row(&sql, [id.to_string()], map_user)
        .optional()?;
    Ok(row)
}

pub(crate) fn query_user_by_name(conn: &Connection, name: &str) -> Result<Option<UserRow>, StoreError> {
    let sql = format!("SELECT {} FROM users WHERE name = ?1", USER_COLUMNS);
    let row = conn.query_row(&sql, [name], map_user).optional()?;
    Ok(row)
}
