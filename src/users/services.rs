use sqlx::{Postgres, Transaction};
use tracing::info;

use super::{
    dto::{UpdateProfileRequest, UpdateUserRequest},
    repo::ensure_coach_profile,
};
use crate::{
    access::Role,
    auth::password,
    error::{is_unique_violation, AppError, AppResult},
};

pub const MAX_NAME_LEN: usize = 50;
/// Width of `users.profile_image_url`.
pub const MAX_URL_LEN: usize = 255;

/// Rejects optional text wider than its column.
pub(crate) fn check_max_len(field: &str, value: Option<&str>, max: usize) -> AppResult<()> {
    match value {
        Some(v) if v.chars().count() > max => Err(AppError::validation(format!(
            "{field} must be at most {max} characters"
        ))),
        _ => Ok(()),
    }
}

pub fn validate_profile(req: &UpdateProfileRequest) -> AppResult<()> {
    if let Some(age) = req.age {
        if !(1..=149).contains(&age) {
            return Err(AppError::validation("age must be between 1 and 149"));
        }
    }
    if let Some(height) = req.height {
        if !(height > 50.0 && height < 300.0) {
            return Err(AppError::validation("height must be between 50 and 300 cm"));
        }
    }
    if let Some(weight) = req.weight {
        if !(weight > 10.0 && weight < 500.0) {
            return Err(AppError::validation("weight must be between 10 and 500 kg"));
        }
    }
    check_max_len("gender", req.gender.as_deref(), 20)?;
    check_max_len("location", req.location.as_deref(), 100)?;
    check_max_len("fitness_level", req.fitness_level.as_deref(), 50)?;
    check_max_len("timezone", req.timezone.as_deref(), 50)?;
    check_max_len("contact_number", req.contact_number.as_deref(), 20)?;
    check_max_len("emergency_contact", req.emergency_contact.as_deref(), 100)?;
    check_max_len("activity_level", req.activity_level.as_deref(), 50)?;
    Ok(())
}

pub fn validate_name(field: &str, value: &str) -> AppResult<()> {
    let len = value.trim().chars().count();
    if len == 0 || len > MAX_NAME_LEN {
        return Err(AppError::validation(format!(
            "{field} must be between 1 and {MAX_NAME_LEN} characters"
        )));
    }
    Ok(())
}

pub fn validate_user_update(req: &UpdateUserRequest) -> AppResult<()> {
    if let Some(first) = &req.first_name {
        validate_name("first name", first)?;
    }
    if let Some(last) = &req.last_name {
        validate_name("last name", last)?;
    }
    if let Some(url) = req.profile_image_url.as_deref().filter(|u| !u.is_empty()) {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(AppError::validation("invalid profile image URL"));
        }
        check_max_len("profile image URL", Some(url), MAX_URL_LEN)?;
    }
    if let Some(pw) = req.password.as_deref().filter(|p| !p.is_empty()) {
        password::check_strength(pw)?;
    }
    Ok(())
}

/// Maps a duplicate-email insert or update to 409.
pub fn email_taken(e: sqlx::Error) -> AppError {
    if is_unique_violation(&e) {
        AppError::conflict("user with this email already exists")
    } else {
        AppError::Database(e)
    }
}

/// What a role change does to the coach profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProfileChange {
    Keep,
    Create,
    Remove,
}

pub(crate) fn profile_change(from: Role, to: Role) -> ProfileChange {
    match (from, to) {
        (f, t) if f == t => ProfileChange::Keep,
        (_, Role::Coach) => ProfileChange::Create,
        (Role::Coach, _) => ProfileChange::Remove,
        _ => ProfileChange::Keep,
    }
}

/// A coach with active clients keeps the role until they are reassigned.
pub(crate) fn check_demotion(active_clients: i64) -> AppResult<()> {
    if active_clients > 0 {
        return Err(AppError::conflict(
            "coach still has active clients; reassign them first",
        ));
    }
    Ok(())
}

/// Keeps the coach profile in step with a role change, inside the same
/// transaction as the role update.
pub async fn apply_role_change(
    tx: &mut Transaction<'_, Postgres>,
    user_id: i64,
    from: Role,
    to: Role,
) -> AppResult<()> {
    match profile_change(from, to) {
        ProfileChange::Keep => {}
        ProfileChange::Create => {
            if ensure_coach_profile(&mut **tx, user_id).await? {
                info!(user_id, "coach profile created");
            }
        }
        ProfileChange::Remove => {
            let active: i64 = sqlx::query_scalar(
                r#"
                SELECT COUNT(*) FROM coach_clients cc
                  JOIN coach_profiles cp ON cp.profile_id = cc.coach_id
                 WHERE cp.user_id = $1 AND cc.status = 'active'
                "#,
            )
            .bind(user_id)
            .fetch_one(&mut **tx)
            .await?;
            check_demotion(active)?;
            sqlx::query(
                "DELETE FROM coach_clients WHERE coach_id IN \
                 (SELECT profile_id FROM coach_profiles WHERE user_id = $1)",
            )
            .bind(user_id)
            .execute(&mut **tx)
            .await?;
            sqlx::query("DELETE FROM coach_profiles WHERE user_id = $1")
                .bind(user_id)
                .execute(&mut **tx)
                .await?;
            info!(user_id, "coach profile removed");
        }
    }
    Ok(())
}
