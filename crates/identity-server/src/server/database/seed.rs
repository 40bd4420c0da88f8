//! Convergent reference-data seeding.
//!
//! A [`SeedSpec`] declares the permission taxonomy and, for each role, the
//! exact set of permissions it must hold. [`seed`] applies it inside a single
//! transaction:
//!
//! 1. every permission is created if no row with that name exists;
//! 2. every role is created if no row with that name exists;
//! 3. each role's permission names are resolved to ids, and an unknown name
//!    aborts the whole transaction;
//! 4. the role's grants are replaced by the resolved set: stale grants are
//!    deleted and missing ones inserted.
//!
//! Any error drops the transaction, which rolls it back, so the store is left
//! as it was before the call. Re-running with the same spec changes nothing;
//! re-running with a different spec converges to it.

use crate::server::database::error::SeedError;
use identity_core::types::{RecordId, new_record_id, now_millis};
use serde::{Deserialize, Serialize};
use sqlx::{AnyConnection, AnyPool};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;

/// Declarative seed input.
///
/// The JSON form is
/// `{"permissions": ["a.view", ...], "roles": {"member": ["a.view"]}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeedSpec {
    permissions: Vec<String>,
    #[serde(default)]
    roles: BTreeMap<String, BTreeSet<String>>,
}

impl SeedSpec {
    pub fn new<I, S>(permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            permissions: permissions.into_iter().map(Into::into).collect(),
            roles: BTreeMap::new(),
        }
    }

    /// Sets the exact permission set of `name`, replacing any earlier entry.
    #[must_use]
    pub fn role<I, S>(mut self, name: impl Into<String>, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles.insert(
            name.into(),
            permissions.into_iter().map(Into::into).collect(),
        );
        self
    }

    /// The taxonomy the service ships with.
    pub fn builtin() -> Self {
        Self::new([
            "profile.edit",
            "profile.view",
            "user.view",
            "user.delete",
            "user.store",
            "user.update",
        ])
        .role("member", ["profile.edit", "profile.view"])
        .role(
            "admin",
            [
                "profile.edit",
                "profile.view",
                "user.view",
                "user.delete",
                "user.store",
                "user.update",
            ],
        )
    }

    /// Reads and validates a JSON seed file.
    pub fn load(path: &Path) -> Result<Self, SeedError> {
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|source| SeedError::Read {
            path: display.clone(),
            source,
        })?;
        let spec: Self = serde_json::from_str(&raw).map_err(|source| SeedError::Parse {
            path: display,
            source,
        })?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn permissions(&self) -> &[String] {
        &self.permissions
    }

    pub fn roles(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.roles
    }

    /// Checks that names are non-empty, permissions are unique and every role
    /// only references declared permissions.
    ///
    /// [`seed`] does not require this: it detects unknown permissions while
    /// resolving and rolls back. Validating up front just reports the mistake
    /// before touching the database.
    pub fn validate(&self) -> Result<(), SeedError> {
        let mut declared = HashSet::with_capacity(self.permissions.len());
        for name in &self.permissions {
            if name.trim().is_empty() {
                return Err(invalid("permission names must not be empty"));
            }
            if !declared.insert(name.as_str()) {
                return Err(invalid(format!("permission `{name}` is declared twice")));
            }
        }
        for (role, permissions) in &self.roles {
            if role.trim().is_empty() {
                return Err(invalid("role names must not be empty"));
            }
            if let Some(missing) = permissions
                .iter()
                .find(|name| !declared.contains(name.as_str()))
            {
                return Err(SeedError::UnknownPermission {
                    role: role.clone(),
                    permission: missing.clone(),
                });
            }
        }
        Ok(())
    }
}

fn invalid(reason: impl Into<String>) -> SeedError {
    SeedError::InvalidSpec {
        reason: reason.into(),
    }
}

/// What a [`seed`] run changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub permissions_created: usize,
    pub roles_created: usize,
    pub grants_added: usize,
    pub grants_removed: usize,
}

impl SeedReport {
    pub const fn is_noop(&self) -> bool {
        self.permissions_created == 0
            && self.roles_created == 0
            && self.grants_added == 0
            && self.grants_removed == 0
    }
}

#[derive(Debug, Clone, Copy)]
enum Named {
    Permission,
    Role,
}

impl Named {
    const fn label(self) -> &'static str {
        match self {
            Self::Permission => "permission",
            Self::Role => "role",
        }
    }

    const fn select_id(self) -> &'static str {
        match self {
            Self::Permission => "SELECT id FROM permissions WHERE name = $1",
            Self::Role => "SELECT id FROM roles WHERE name = $1",
        }
    }

    const fn insert(self) -> &'static str {
        match self {
            Self::Permission => {
                "INSERT INTO permissions (id, name, created_at, updated_at) VALUES ($1, $2, $3, $4)"
            }
            Self::Role => {
                "INSERT INTO roles (id, name, created_at, updated_at) VALUES ($1, $2, $3, $4)"
            }
        }
    }
}

/// Applies `spec` atomically. See the module docs for the algorithm.
pub async fn seed(pool: &AnyPool, spec: &SeedSpec) -> Result<SeedReport, SeedError> {
    let mut tx = pool.begin().await.map_err(SeedError::Begin)?;
    let mut report = SeedReport::default();
    let now = now_millis();

    for name in &spec.permissions {
        let (_, created) = ensure_named(&mut tx, Named::Permission, name, now).await?;
        report.permissions_created += usize::from(created);
    }

    for (role, permission_names) in &spec.roles {
        let (role_id, created) = ensure_named(&mut tx, Named::Role, role, now).await?;
        report.roles_created += usize::from(created);

        let desired = resolve_permissions(&mut tx, role, permission_names).await?;
        let (added, removed) = replace_grants(&mut tx, role, &role_id, &desired).await?;
        report.grants_added += added;
        report.grants_removed += removed;

        tracing::debug!(
            role = %role,
            permissions = desired.len(),
            added,
            removed,
            "Role permissions converged"
        );
    }

    tx.commit().await.map_err(SeedError::Commit)?;

    tracing::info!(
        permissions = spec.permissions.len(),
        roles = spec.roles.len(),
        permissions_created = report.permissions_created,
        roles_created = report.roles_created,
        grants_added = report.grants_added,
        grants_removed = report.grants_removed,
        "Seed applied"
    );
    Ok(report)
}

/// Returns the id of the row called `name`, inserting it first if absent.
async fn ensure_named(
    conn: &mut AnyConnection,
    entity: Named,
    name: &str,
    now: i64,
) -> Result<(RecordId, bool), SeedError> {
    let existing: Option<String> = sqlx::query_scalar(entity.select_id())
        .bind(name)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|source| SeedError::Lookup {
            entity: entity.label(),
            name: name.to_string(),
            source,
        })?;

    if let Some(id) = existing {
        return Ok((id, false));
    }

    let id = new_record_id();
    sqlx::query(entity.insert())
        .bind(id.as_str())
        .bind(name)
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(|source| SeedError::Create {
            entity: entity.label(),
            name: name.to_string(),
            source,
        })?;
    Ok((id, true))
}

async fn resolve_permissions(
    conn: &mut AnyConnection,
    role: &str,
    names: &BTreeSet<String>,
) -> Result<BTreeSet<RecordId>, SeedError> {
    let mut ids = BTreeSet::new();
    for name in names {
        let id: Option<String> = sqlx::query_scalar(Named::Permission.select_id())
            .bind(name.as_str())
            .fetch_optional(&mut *conn)
            .await
            .map_err(|source| SeedError::Lookup {
                entity: Named::Permission.label(),
                name: name.clone(),
                source,
            })?;
        match id {
            Some(id) => {
                ids.insert(id);
            }
            None => {
                return Err(SeedError::UnknownPermission {
                    role: role.to_string(),
                    permission: name.clone(),
                });
            }
        }
    }
    Ok(ids)
}

/// Makes the role's grants exactly `desired`. Returns `(added, removed)`.
async fn replace_grants(
    conn: &mut AnyConnection,
    role: &str,
    role_id: &str,
    desired: &BTreeSet<RecordId>,
) -> Result<(usize, usize), SeedError> {
    let association = |source: sqlx::Error| SeedError::Association {
        role: role.to_string(),
        source,
    };

    let current: BTreeSet<String> =
        sqlx::query_scalar("SELECT permission_id FROM role_permissions WHERE role_id = $1")
            .bind(role_id)
            .fetch_all(&mut *conn)
            .await
            .map_err(association)?
            .into_iter()
            .collect();

    let mut removed = 0;
    for stale in current.difference(desired) {
        sqlx::query("DELETE FROM role_permissions WHERE role_id = $1 AND permission_id = $2")
            .bind(role_id)
            .bind(stale.as_str())
            .execute(&mut *conn)
            .await
            .map_err(association)?;
        removed += 1;
    }

    let mut added = 0;
    for missing in desired.difference(&current) {
        sqlx::query("INSERT INTO role_permissions (role_id, permission_id) VALUES ($1, $2)")
            .bind(role_id)
            .bind(missing.as_str())
            .execute(&mut *conn)
            .await
            .map_err(association)?;
        added += 1;
    }

    Ok((added, removed))
}
