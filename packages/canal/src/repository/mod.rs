// Repository layer — each domain lives in its own file with `impl ContactRepository`.

use sqlx::sqlite::SqlitePool;

mod conversations;
mod messages;

#[cfg(test)]
pub(crate) mod test_helpers;

#[derive(Clone)]
pub struct ContactRepository {
    pub(crate) pool: SqlitePool,
}

impl ContactRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}
