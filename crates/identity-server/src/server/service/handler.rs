//! gRPC handlers for the identity service.
//!
//! [`IdentityHandler`] implements the generated [`IdentityService`] trait on
//! top of the shared [`ConnectionManager`]. Handlers only reuse the pool
//! established at bootstrap: when it is missing the call fails with
//! `Unavailable` instead of dialing.

use crate::server::database::{
    manager::ConnectionManager,
    users::{self, NewUser, UserRow},
};
use crate::server::service::password::{DEFAULT_ROUNDS, hash_password};
use identity_core::{
    Error,
    proto::{
        GetUserRequest, GetUserResponse, GetUsersRequest, GetUsersResponse, RoleUserResponse,
        StoreUserRequest, StoreUserResponse, User, identity_service_server::IdentityService,
    },
    types::format_timestamp,
};
use sqlx::AnyPool;
use std::sync::Arc;
use tonic::{Request, Response, Status};

#[derive(Clone)]
pub struct IdentityHandler {
    manager: Arc<ConnectionManager>,
    password_rounds: u32,
}

impl IdentityHandler {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self {
            manager,
            password_rounds: DEFAULT_ROUNDS,
        }
    }

    /// Overrides the PBKDF2 work factor for new passwords.
    #[must_use]
    pub fn with_password_rounds(mut self, rounds: u32) -> Self {
        self.password_rounds = rounds;
        self
    }

    async fn pool(&self) -> Result<AnyPool, Error> {
        self.manager
            .pool()
            .await
            .map_err(|err| Error::Unavailable {
                reason: err.to_string(),
            })
    }
}

fn required<'a>(field: &'static str, value: &'a str) -> Result<&'a str, Error> {
    let value = value.trim();
    if value.is_empty() {
        return Err(Error::InvalidRequest {
            reason: format!("{field} must not be empty"),
        });
    }
    Ok(value)
}

fn user_message(row: UserRow) -> User {
    User {
        id: row.id,
        name: row.name,
        email: row.email,
        role: row.role.unwrap_or_default(),
        created_at: format_timestamp(row.created_at),
    }
}

#[tonic::async_trait]
impl IdentityService for IdentityHandler {
    async fn get_users(
        &self,
        _request: Request<GetUsersRequest>,
    ) -> Result<Response<GetUsersResponse>, Status> {
        let pool = self.pool().await?;
        let users = users::list_users(&pool).await?;
        Ok(Response::new(GetUsersResponse {
            users: users.into_iter().map(user_message).collect(),
        }))
    }

    async fn get_user(
        &self,
        request: Request<GetUserRequest>,
    ) -> Result<Response<GetUserResponse>, Status> {
        let request = request.into_inner();
        let id = required("id", &request.id)?;
        let pool = self.pool().await?;
        let user = users::find_user(&pool, id).await?;

        Ok(Response::new(GetUserResponse {
            name: user.name,
            email: user.email,
            role: user.role.map(|name| RoleUserResponse {
                name,
                permissions: user.role_permissions,
            }),
            permissions: user.permissions,
            created_at: format_timestamp(user.created_at),
        }))
    }

    async fn store_user(
        &self,
        request: Request<StoreUserRequest>,
    ) -> Result<Response<StoreUserResponse>, Status> {
        let request = request.into_inner();
        let name = required("name", &request.name)?;
        let email = required("email", &request.email)?;
        let role_id = required("role_id", &request.role_id)?;
        if request.password.is_empty() {
            return Err(Error::InvalidRequest {
                reason: "password must not be empty".to_string(),
            }
            .into());
        }
        let pool = self.pool().await?;

        let password = request.password;
        let rounds = self.password_rounds;
        let password_hash = tokio::task::spawn_blocking(move || hash_password(&password, rounds))
            .await
            .map_err(|err| Error::Internal {
                context: format!("password hashing task failed: {err}"),
            })?;

        let stored = users::store_user(
            &pool,
            NewUser {
                name,
                email,
                password_hash: &password_hash,
                role_id,
            },
        )
        .await?;

        Ok(Response::new(StoreUserResponse {
            user: Some(user_message(stored)),
        }))
    }
}
