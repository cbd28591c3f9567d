use uuid::Uuid;

use crate::Database;

pub(crate) fn db() -> Database {
    Database::open_in_memory().unwrap()
}

pub(crate) fn login(db: &Database, name: &str) -> Uuid {
    db.resolve_or_create_user(name).unwrap().0.id
}
