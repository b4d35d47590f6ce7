//! Role-based access policy.
//!
//! Every mutating handler resolves the caller into an [`Actor`] and checks a
//! [`Capability`] before touching the database. The checks are pure except
//! for [`require_coach_of`], which needs the coach-client table.

mod extractor;

use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgExecutor};
use thiserror::Error;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Coach,
    Admin,
}

#[derive(Debug, Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Coach => "coach",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "coach" => Ok(Role::Coach),
            "admin" => Ok(Role::Admin),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = UnknownRole;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// The authenticated caller, as loaded from the database for this request.
#[derive(Debug, Clone, FromRow)]
pub struct Actor {
    pub id: i64,
    pub email: String,
    #[sqlx(try_from = "String")]
    pub role: Role,
    pub is_active: bool,
    pub coach_profile_id: Option<i64>,
}

impl Actor {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub async fn load(db: impl PgExecutor<'_>, user_id: i64) -> sqlx::Result<Option<Actor>> {
        sqlx::query_as::<_, Actor>(
            r#"
            SELECT u.user_id AS id, u.email, u.user_type AS role, u.is_active,
                   cp.profile_id AS coach_profile_id
              FROM users u
              LEFT JOIN coach_profiles cp ON cp.user_id = u.user_id
             WHERE u.user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(db)
        .await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Role must be exactly `admin`.
    Admin,
    /// Role must be `coach` with a coach profile in place.
    Coach,
    /// Caller owns the resource or is an admin. Denial is 403.
    SelfOrAdmin(i64),
    /// Caller owns the resource. Denial is 404 so existence is not revealed.
    Owner(i64),
    /// As `Owner`, but admins pass as well.
    OwnerOrAdmin(i64),
}

pub fn authorize(actor: &Actor, cap: Capability) -> AppResult<()> {
    match cap {
        Capability::Admin if actor.role == Role::Admin => Ok(()),
        Capability::Admin => Err(AppError::forbidden("admin access required")),
        Capability::Coach if actor.role == Role::Coach && actor.coach_profile_id.is_some() => {
            Ok(())
        }
        Capability::Coach => Err(AppError::forbidden("access denied: user is not a coach")),
        Capability::SelfOrAdmin(owner) if actor.id == owner || actor.is_admin() => Ok(()),
        Capability::SelfOrAdmin(_) => Err(AppError::forbidden("not authorized")),
        Capability::Owner(owner) if actor.id == owner => Ok(()),
        Capability::Owner(_) => Err(AppError::not_found("resource not found")),
        Capability::OwnerOrAdmin(owner) if actor.id == owner || actor.is_admin() => Ok(()),
        Capability::OwnerOrAdmin(_) => Err(AppError::not_found("resource not found")),
    }
}

/// Coach gate for per-client operations: the caller must be a coach and
/// hold an `active` assignment for `client_id`. Returns the coach profile id.
pub async fn require_coach_of(
    db: impl PgExecutor<'_>,
    actor: &Actor,
    client_id: i64,
) -> AppResult<i64> {
    authorize(actor, Capability::Coach)?;
    let coach_profile_id = actor
        .coach_profile_id
        .ok_or_else(|| AppError::forbidden("access denied: user is not a coach"))?;

    let assigned: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT id FROM coach_clients
         WHERE coach_id = $1 AND client_id = $2 AND status = 'active'
        "#,
    )
    .bind(coach_profile_id)
    .bind(client_id)
    .fetch_optional(db)
    .await?;

    match assigned {
        Some(_) => Ok(coach_profile_id),
        None => Err(AppError::not_found("client not found or not assigned to you")),
    }
}

#[cfg(test)]
pub(crate) fn test_actor(id: i64, role: Role) -> Actor {
    Actor {
        id,
        email: format!("user{id}@example.com"),
        role,
        is_active: true,
        coach_profile_id: (role == Role::Coach).then_some(id * 10),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn admin_capability_requires_literal_admin_role() {
        assert!(authorize(&test_actor(1, Role::Admin), Capability::Admin).is_ok());
        for role in [Role::User, Role::Coach] {
            let err = authorize(&test_actor(1, role), Capability::Admin).unwrap_err();
            assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        }
    }

    #[test]
    fn coach_capability_needs_role_and_profile() {
        assert!(authorize(&test_actor(2, Role::Coach), Capability::Coach).is_ok());

        let mut without_profile = test_actor(2, Role::Coach);
        without_profile.coach_profile_id = None;
        assert!(authorize(&without_profile, Capability::Coach).is_err());

        // admins are not implicitly coaches
        assert!(authorize(&test_actor(3, Role::Admin), Capability::Coach).is_err());
    }

    #[test]
    fn self_or_admin() {
        let user = test_actor(7, Role::User);
        assert!(authorize(&user, Capability::SelfOrAdmin(7)).is_ok());
        let err = authorize(&user, Capability::SelfOrAdmin(8)).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        assert!(authorize(&test_actor(1, Role::Admin), Capability::SelfOrAdmin(8)).is_ok());
    }

    #[test]
    fn owner_denial_hides_existence() {
        let coach = test_actor(4, Role::Coach);
        assert!(authorize(&coach, Capability::Owner(4)).is_ok());
        let err = authorize(&coach, Capability::Owner(5)).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        // ownership is not widened for admins
        let err = authorize(&test_actor(1, Role::Admin), Capability::Owner(5)).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn owner_or_admin() {
        assert!(authorize(&test_actor(4, Role::Coach), Capability::OwnerOrAdmin(4)).is_ok());
        assert!(authorize(&test_actor(1, Role::Admin), Capability::OwnerOrAdmin(4)).is_ok());
        let err = authorize(&test_actor(6, Role::Coach), Capability::OwnerOrAdmin(4)).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn role_parsing() {
        assert_eq!("coach".parse::<Role>().unwrap(), Role::Coach);
        assert_eq!(Role::try_from("admin".to_string()).unwrap(), Role::Admin);
        assert!("Admin".parse::<Role>().is_err());
        assert_eq!(Role::User.to_string(), "user");
    }
}
