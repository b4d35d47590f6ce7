//! Startup data fixes: the configured admin account and coach profiles for
//! coach users that lack one.

use sqlx::PgPool;
use tracing::{info, instrument, warn};

use crate::{
    access::Role,
    auth::{password::hash_password, services::normalize_email},
    coaching::repo::CoachProfile,
    config::AdminBootstrap,
    error::AppResult,
    users::repo::{ensure_coach_profile, NewUser, User},
};

/// Creates the admin account if no user holds the address yet. An existing
/// account is left untouched, whatever its role.
#[instrument(skip(db, admin))]
pub async fn ensure_admin(db: &PgPool, admin: &AdminBootstrap) -> AppResult<bool> {
    let email = normalize_email(&admin.email)?;
    if let Some(existing) = User::find_by_email(db, &email).await? {
        if existing.user_type != Role::Admin {
            warn!(user_id = existing.user_id, "bootstrap admin email belongs to a non-admin account");
        }
        return Ok(false);
    }

    let hash = hash_password(&admin.password)?;
    let user = User::create(
        db,
        NewUser {
            email: &email,
            password_hash: &hash,
            first_name: "Admin",
            last_name: "User",
            role: Role::Admin,
        },
    )
    .await?;
    info!(user_id = user.user_id, "bootstrap admin created");
    Ok(true)
}

/// Gives every coach user a profile row. Returns how many were created.
#[instrument(skip(db))]
pub async fn backfill_coach_profiles(db: &PgPool) -> AppResult<usize> {
    let mut created = 0;
    for user_id in CoachProfile::missing_user_ids(db).await? {
        if ensure_coach_profile(db, user_id).await? {
            created += 1;
        }
    }
    if created > 0 {
        info!(created, "coach profiles backfilled");
    }
    Ok(created)
}

pub async fn run(db: &PgPool, admin: Option<&AdminBootstrap>) -> AppResult<()> {
    match admin {
        Some(admin) => {
            ensure_admin(db, admin).await?;
        }
        None => info!("ADMIN_EMAIL not set; skipping admin bootstrap"),
    }
    backfill_coach_profiles(db).await?;
    Ok(())
}
