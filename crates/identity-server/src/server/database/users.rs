//! User queries used by the RPC handlers.
//!
//! These functions only take an existing pool; they never connect or retry.
//! Driver errors are logged here and surface to callers as
//! [`Error::Database`], which maps to a generic internal status.

use identity_core::{
    Error, Result,
    types::{RecordId, new_record_id, now_millis},
};
use sqlx::AnyPool;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRow {
    pub id: RecordId,
    pub name: String,
    pub email: String,
    /// Role name, if the user has a role that still exists.
    pub role: Option<String>,
    pub created_at: i64,
}

/// A user together with its effective permission names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserDetail {
    pub name: String,
    pub email: String,
    pub role: Option<String>,
    pub role_permissions: Vec<String>,
    pub permissions: Vec<String>,
    pub created_at: i64,
}

pub struct NewUser<'a> {
    pub name: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
    pub role_id: &'a str,
}

fn database(context: &'static str) -> impl FnOnce(sqlx::Error) -> Error {
    move |err| {
        tracing::error!(%err, context, "Query failed");
        Error::Database {
            context: context.to_string(),
        }
    }
}

pub async fn list_users(pool: &AnyPool) -> Result<Vec<UserRow>> {
    let rows: Vec<(String, String, String, Option<String>, i64)> = sqlx::query_as(
        "SELECT u.id, u.name, u.email, r.name, u.created_at \
         FROM users u LEFT JOIN roles r ON r.id = u.role_id \
         ORDER BY u.created_at, u.id",
    )
    .fetch_all(pool)
    .await
    .map_err(database("list users"))?;

    Ok(rows
        .into_iter()
        .map(|(id, name, email, role, created_at)| UserRow {
            id,
            name,
            email,
            role,
            created_at,
        })
        .collect())
}

pub async fn find_user(pool: &AnyPool, id: &str) -> Result<UserDetail> {
    let row: Option<(String, String, Option<String>, Option<String>, i64)> = sqlx::query_as(
        "SELECT u.name, u.email, u.role_id, r.name, u.created_at \
         FROM users u LEFT JOIN roles r ON r.id = u.role_id \
         WHERE u.id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .map_err(database("find user"))?;

    let Some((name, email, role_id, role, created_at)) = row else {
        return Err(Error::NotFound {
            entity: "user",
            id: id.to_string(),
        });
    };

    let role_permissions = match role_id.as_deref() {
        Some(role_id) => sqlx::query_scalar(
            "SELECT p.name FROM role_permissions rp \
             JOIN permissions p ON p.id = rp.permission_id \
             WHERE rp.role_id = $1 ORDER BY p.name",
        )
        .bind(role_id)
        .fetch_all(pool)
        .await
        .map_err(database("load role permissions"))?,
        None => Vec::new(),
    };

    let permissions = sqlx::query_scalar(
        "SELECT p.name FROM user_permissions up \
         JOIN permissions p ON p.id = up.permission_id \
         WHERE up.user_id = $1 ORDER BY p.name",
    )
    .bind(id)
    .fetch_all(pool)
    .await
    .map_err(database("load user permissions"))?;

    Ok(UserDetail {
        name,
        email,
        role,
        role_permissions,
        permissions,
        created_at,
    })
}

/// Inserts a user after checking that the role exists and the e-mail is free.
pub async fn store_user(pool: &AnyPool, user: NewUser<'_>) -> Result<UserRow> {
    let role: Option<String> = sqlx::query_scalar("SELECT name FROM roles WHERE id = $1")
        .bind(user.role_id)
        .fetch_optional(pool)
        .await
        .map_err(database("look up role"))?;
    let Some(role) = role else {
        return Err(Error::NotFound {
            entity: "role",
            id: user.role_id.to_string(),
        });
    };

    let taken: Option<String> = sqlx::query_scalar("SELECT id FROM users WHERE email = $1")
        .bind(user.email)
        .fetch_optional(pool)
        .await
        .map_err(database("look up e-mail"))?;
    if taken.is_some() {
        return Err(already_exists(user.email));
    }

    let id = new_record_id();
    let now = now_millis();
    sqlx::query(
        "INSERT INTO users (id, name, email, password, role_id, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(id.as_str())
    .bind(user.name)
    .bind(user.email)
    .bind(user.password_hash)
    .bind(user.role_id)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .map_err(|err| {
        // Lost a race with a concurrent registration of the same address.
        if err
            .as_database_error()
            .is_some_and(|db| db.is_unique_violation())
        {
            already_exists(user.email)
        } else {
            database("insert user")(err)
        }
    })?;

    tracing::info!(user_id = %id, role = %role, "User stored");
    Ok(UserRow {
        id,
        name: user.name.to_string(),
        email: user.email.to_string(),
        role: Some(role),
        created_at: now,
    })
}

fn already_exists(email: &str) -> Error {
    Error::AlreadyExists {
        entity: "user",
        key: email.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::database::{
        migrate::migrate,
        seed::{SeedSpec, seed},
        testing::memory_pool,
    };

    async fn seeded_pool() -> AnyPool {
        let pool = memory_pool().await;
        migrate(&pool).await.unwrap();
        seed(&pool, &SeedSpec::builtin()).await.unwrap();
        pool
    }

    async fn role_id(pool: &AnyPool, name: &str) -> String {
        sqlx::query_scalar("SELECT id FROM roles WHERE name = $1")
            .bind(name)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    fn new_user<'a>(email: &'a str, role_id: &'a str) -> NewUser<'a> {
        NewUser {
            name: "Ada",
            email,
            password_hash: "pbkdf2-sha256$1$c2FsdA$aGFzaA",
            role_id,
        }
    }

    #[tokio::test]
    async fn stored_user_is_listed_with_role() {
        let pool = seeded_pool().await;
        let member = role_id(&pool, "member").await;

        let stored = store_user(&pool, new_user("ada@example.com", &member))
            .await
            .unwrap();
        assert_eq!(stored.role.as_deref(), Some("member"));
        assert_eq!(stored.id.len(), 26);

        let users = list_users(&pool).await.unwrap();
        assert_eq!(users, vec![stored]);
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let pool = seeded_pool().await;
        let member = role_id(&pool, "member").await;
        store_user(&pool, new_user("ada@example.com", &member))
            .await
            .unwrap();

        let err = store_user(&pool, new_user("ada@example.com", &member))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists { entity: "user", .. }));
    }

    #[tokio::test]
    async fn unknown_role_is_not_found() {
        let pool = seeded_pool().await;
        let err = store_user(&pool, new_user("ada@example.com", "missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { entity: "role", .. }));
        assert!(list_users(&pool).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn detail_includes_role_and_user_permissions() {
        let pool = seeded_pool().await;
        let member = role_id(&pool, "member").await;
        let stored = store_user(&pool, new_user("ada@example.com", &member))
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO user_permissions (user_id, permission_id) \
             SELECT $1, id FROM permissions WHERE name = 'user.view'",
        )
        .bind(stored.id.as_str())
        .execute(&pool)
        .await
        .unwrap();

        let detail = find_user(&pool, &stored.id).await.unwrap();
        assert_eq!(detail.role.as_deref(), Some("member"));
        assert_eq!(detail.role_permissions, ["profile.edit", "profile.view"]);
        assert_eq!(detail.permissions, ["user.view"]);
        assert_eq!(detail.created_at, stored.created_at);
    }

    #[tokio::test]
    async fn missing_user_is_not_found() {
        let pool = seeded_pool().await;
        assert!(matches!(
            find_user(&pool, "nope").await,
            Err(Error::NotFound { entity: "user", .. })
        ));
    }
}
