//! Schema definitions for the identity tables.
//!
//! Every statement is create-if-absent, so migrating an up-to-date database is
//! a no-op and existing rows are never touched. The DDL sticks to the subset
//! shared by Postgres and SQLite; identifiers are generated by the service.
//!
//! A failing statement aborts the run. Statements already applied stay
//! applied, which is harmless because each one is idempotent; the operator
//! fixes the cause and restarts.

use crate::server::database::error::MigrationError;
use sqlx::AnyPool;

/// Ordered `(object, statement)` pairs. Referenced tables come first.
pub const SCHEMA: &[(&str, &str)] = &[
    (
        "permissions",
        "CREATE TABLE IF NOT EXISTS permissions (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            created_at BIGINT NOT NULL,
            updated_at BIGINT NOT NULL
        )",
    ),
    (
        "roles",
        "CREATE TABLE IF NOT EXISTS roles (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            created_at BIGINT NOT NULL,
            updated_at BIGINT NOT NULL
        )",
    ),
    (
        "role_permissions",
        "CREATE TABLE IF NOT EXISTS role_permissions (
            role_id TEXT NOT NULL REFERENCES roles (id) ON DELETE CASCADE,
            permission_id TEXT NOT NULL REFERENCES permissions (id) ON DELETE CASCADE,
            PRIMARY KEY (role_id, permission_id)
        )",
    ),
    (
        "users",
        "CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            password TEXT NOT NULL,
            role_id TEXT REFERENCES roles (id),
            created_at BIGINT NOT NULL,
            updated_at BIGINT NOT NULL
        )",
    ),
    (
        "user_permissions",
        "CREATE TABLE IF NOT EXISTS user_permissions (
            user_id TEXT NOT NULL REFERENCES users (id) ON DELETE CASCADE,
            permission_id TEXT NOT NULL REFERENCES permissions (id) ON DELETE CASCADE,
            PRIMARY KEY (user_id, permission_id)
        )",
    ),
    (
        "idx_users_role_id",
        "CREATE INDEX IF NOT EXISTS idx_users_role_id ON users (role_id)",
    ),
];

/// Applies [`SCHEMA`] in order.
pub async fn migrate(pool: &AnyPool) -> Result<(), MigrationError> {
    for &(object, statement) in SCHEMA {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|source| MigrationError { object, source })?;
        tracing::debug!(object, "Schema object ensured");
    }
    tracing::info!(objects = SCHEMA.len(), "Migrations applied");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::database::testing::memory_pool;

    async fn table_count(pool: &AnyPool) -> i64 {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN \
             ('permissions', 'roles', 'role_permissions', 'users', 'user_permissions')",
        )
        .fetch_one(pool)
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn creates_every_table() {
        let pool = memory_pool().await;
        migrate(&pool).await.unwrap();
        assert_eq!(table_count(&pool).await, 5);
    }

    #[tokio::test]
    async fn rerun_keeps_existing_rows() {
        let pool = memory_pool().await;
        migrate(&pool).await.unwrap();
        sqlx::query("INSERT INTO permissions (id, name, created_at, updated_at) VALUES ('p1', 'a.view', 0, 0)")
            .execute(&pool)
            .await
            .unwrap();

        migrate(&pool).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM permissions")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn failure_names_the_object() {
        let pool = memory_pool().await;
        // A pre-existing `users` table without `role_id` survives the
        // create-if-absent step and then breaks the index.
        sqlx::query("CREATE TABLE users (id TEXT PRIMARY KEY)")
            .execute(&pool)
            .await
            .unwrap();

        let err = migrate(&pool).await.unwrap_err();
        assert_eq!(err.object, "idx_users_role_id");
    }
}
