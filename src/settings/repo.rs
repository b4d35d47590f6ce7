use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgExecutor};
use time::OffsetDateTime;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, FromRow)]
pub struct SystemSettings {
    pub setting_id: i64,
    pub site_name: String,
    pub site_description: Option<String>,
    pub maintenance_mode: bool,
    pub allow_registrations: bool,
    pub max_users_per_trainer: i32,
    pub default_user_quota: i32,
    pub email_notifications: bool,
    pub analytics_enabled: bool,
    pub updated_at: OffsetDateTime,
    pub updated_by: Option<i64>,
}

/// Wire shape used by the admin dashboard.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsView {
    pub site_name: String,
    pub site_description: Option<String>,
    pub maintenance_mode: bool,
    pub allow_new_registrations: bool,
    pub max_users_per_trainer: i32,
    pub default_user_quota: i32,
    pub email_notifications: bool,
    pub analytics_enabled: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl From<SystemSettings> for SettingsView {
    fn from(s: SystemSettings) -> Self {
        Self {
            site_name: s.site_name,
            site_description: s.site_description,
            maintenance_mode: s.maintenance_mode,
            allow_new_registrations: s.allow_registrations,
            max_users_per_trainer: s.max_users_per_trainer,
            default_user_quota: s.default_user_quota,
            email_notifications: s.email_notifications,
            analytics_enabled: s.analytics_enabled,
            updated_at: s.updated_at,
        }
    }
}

/// Body of `PUT /admin/settings`. Absent fields keep their value.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSettings {
    pub site_name: Option<String>,
    pub site_description: Option<String>,
    pub maintenance_mode: Option<bool>,
    pub allow_new_registrations: Option<bool>,
    pub max_users_per_trainer: Option<i32>,
    pub default_user_quota: Option<i32>,
    pub email_notifications: Option<bool>,
    pub analytics_enabled: Option<bool>,
}

impl UpdateSettings {
    pub fn validate(&self) -> AppResult<()> {
        if let Some(name) = &self.site_name {
            let len = name.trim().chars().count();
            if len == 0 || len > 100 {
                return Err(AppError::validation(
                    "site name must be between 1 and 100 characters",
                ));
            }
        }
        if self
            .site_description
            .as_ref()
            .is_some_and(|d| d.chars().count() > 500)
        {
            return Err(AppError::validation(
                "site description must be at most 500 characters",
            ));
        }
        if self.max_users_per_trainer.is_some_and(|n| n < 1) {
            return Err(AppError::validation("max users per trainer must be positive"));
        }
        if self.default_user_quota.is_some_and(|n| n < 0) {
            return Err(AppError::validation("default user quota cannot be negative"));
        }
        Ok(())
    }
}

/// Returns the settings row, inserting defaults when the table is empty.
pub async fn get_or_create(db: impl PgExecutor<'_>) -> sqlx::Result<SystemSettings> {
    sqlx::query_as::<_, SystemSettings>(
        r#"
        WITH existing AS (
            SELECT * FROM system_settings ORDER BY setting_id LIMIT 1
        ), ins AS (
            INSERT INTO system_settings (site_name)
            SELECT 'TrainSync' WHERE NOT EXISTS (SELECT 1 FROM existing)
            RETURNING *
        )
        SELECT * FROM existing
        UNION ALL
        SELECT * FROM ins
        LIMIT 1
        "#,
    )
    .fetch_one(db)
    .await
}

pub async fn update(
    db: impl PgExecutor<'_>,
    setting_id: i64,
    req: &UpdateSettings,
    updated_by: i64,
) -> sqlx::Result<SystemSettings> {
    sqlx::query_as::<_, SystemSettings>(
        r#"
        UPDATE system_settings SET
            site_name = COALESCE($2, site_name),
            site_description = COALESCE($3, site_description),
            maintenance_mode = COALESCE($4, maintenance_mode),
            allow_registrations = COALESCE($5, allow_registrations),
            max_users_per_trainer = COALESCE($6, max_users_per_trainer),
            default_user_quota = COALESCE($7, default_user_quota),
            email_notifications = COALESCE($8, email_notifications),
            analytics_enabled = COALESCE($9, analytics_enabled),
            updated_by = $10,
            updated_at = now()
        WHERE setting_id = $1
        RETURNING *
        "#,
    )
    .bind(setting_id)
    .bind(req.site_name.as_deref().map(str::trim))
    .bind(req.site_description.as_deref())
    .bind(req.maintenance_mode)
    .bind(req.allow_new_registrations)
    .bind(req.max_users_per_trainer)
    .bind(req.default_user_quota)
    .bind(req.email_notifications)
    .bind(req.analytics_enabled)
    .bind(updated_by)
    .fetch_one(db)
    .await
}
