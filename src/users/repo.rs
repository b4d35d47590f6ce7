use serde::Serialize;
use sqlx::{FromRow, PgExecutor, Postgres, Transaction};
use time::OffsetDateTime;

use super::dto::UpdateProfileRequest;
use crate::access::Role;

macro_rules! user_columns {
    () => {
        "user_id, email, password_hash, first_name, last_name, user_type, profile_image_url, \
         is_active, balance, created_at, updated_at, last_login"
    };
}

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub user_id: i64,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    #[sqlx(try_from = "String")]
    pub user_type: Role,
    pub profile_image_url: Option<String>,
    pub is_active: bool,
    pub balance: f64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub last_login: Option<OffsetDateTime>,
}

/// Account fields safe to return to clients.
#[derive(Debug, Clone, Serialize)]
pub struct PublicUser {
    pub id: i64,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub user_type: Role,
    pub profile_image_url: Option<String>,
    pub is_active: bool,
    pub balance: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_login: Option<OffsetDateTime>,
}

impl From<User> for PublicUser {
    fn from(u: User) -> Self {
        Self {
            id: u.user_id,
            email: u.email,
            first_name: u.first_name,
            last_name: u.last_name,
            user_type: u.user_type,
            profile_image_url: u.profile_image_url,
            is_active: u.is_active,
            balance: u.balance,
            created_at: u.created_at,
            last_login: u.last_login,
        }
    }
}

pub struct NewUser<'a> {
    pub email: &'a str,
    pub password_hash: &'a str,
    pub first_name: &'a str,
    pub last_name: &'a str,
    pub role: Role,
}

impl User {
    pub async fn find_by_email(db: impl PgExecutor<'_>, email: &str) -> sqlx::Result<Option<User>> {
        sqlx::query_as::<_, User>(concat!("SELECT ", user_columns!(), " FROM users WHERE email = $1"))
            .bind(email)
            .fetch_optional(db)
            .await
    }

    pub async fn find(db: impl PgExecutor<'_>, user_id: i64) -> sqlx::Result<Option<User>> {
        sqlx::query_as::<_, User>(concat!("SELECT ", user_columns!(), " FROM users WHERE user_id = $1"))
            .bind(user_id)
            .fetch_optional(db)
            .await
    }

    pub async fn lock(
        tx: &mut Transaction<'_, Postgres>,
        user_id: i64,
    ) -> sqlx::Result<Option<User>> {
        sqlx::query_as::<_, User>(concat!(
            "SELECT ",
            user_columns!(),
            " FROM users WHERE user_id = $1 FOR UPDATE"
        ))
        .bind(user_id)
        .fetch_optional(&mut **tx)
        .await
    }

    pub async fn create(db: impl PgExecutor<'_>, new: NewUser<'_>) -> sqlx::Result<User> {
        sqlx::query_as::<_, User>(concat!(
            "INSERT INTO users (email, password_hash, first_name, last_name, user_type) \
             VALUES ($1, $2, $3, $4, $5) RETURNING ",
            user_columns!()
        ))
        .bind(new.email)
        .bind(new.password_hash)
        .bind(new.first_name)
        .bind(new.last_name)
        .bind(new.role.as_str())
        .fetch_one(db)
        .await
    }

    pub async fn list(db: impl PgExecutor<'_>) -> sqlx::Result<Vec<User>> {
        sqlx::query_as::<_, User>(concat!("SELECT ", user_columns!(), " FROM users ORDER BY user_id"))
            .fetch_all(db)
            .await
    }

    pub async fn touch_last_login(
        db: impl PgExecutor<'_>,
        user_id: i64,
        now: OffsetDateTime,
    ) -> sqlx::Result<()> {
        sqlx::query("UPDATE users SET last_login = $2 WHERE user_id = $1")
            .bind(user_id)
            .bind(now)
            .execute(db)
            .await?;
        Ok(())
    }

    pub async fn set_password(
        db: impl PgExecutor<'_>,
        user_id: i64,
        password_hash: &str,
    ) -> sqlx::Result<()> {
        sqlx::query("UPDATE users SET password_hash = $2, updated_at = now() WHERE user_id = $1")
            .bind(user_id)
            .bind(password_hash)
            .execute(db)
            .await?;
        Ok(())
    }

    pub async fn update_account(
        db: impl PgExecutor<'_>,
        user_id: i64,
        first_name: Option<&str>,
        last_name: Option<&str>,
        profile_image_url: Option<&str>,
    ) -> sqlx::Result<User> {
        sqlx::query_as::<_, User>(concat!(
            "UPDATE users SET first_name = COALESCE($2, first_name), \
             last_name = COALESCE($3, last_name), \
             profile_image_url = COALESCE($4, profile_image_url), \
             updated_at = now() WHERE user_id = $1 RETURNING ",
            user_columns!()
        ))
        .bind(user_id)
        .bind(first_name)
        .bind(last_name)
        .bind(profile_image_url)
        .fetch_one(db)
        .await
    }

    pub async fn admin_update(
        db: impl PgExecutor<'_>,
        user_id: i64,
        first_name: Option<&str>,
        last_name: Option<&str>,
        email: Option<&str>,
        role: Option<Role>,
    ) -> sqlx::Result<User> {
        sqlx::query_as::<_, User>(concat!(
            "UPDATE users SET first_name = COALESCE($2, first_name), \
             last_name = COALESCE($3, last_name), \
             email = COALESCE($4, email), \
             user_type = COALESCE($5, user_type), \
             updated_at = now() WHERE user_id = $1 RETURNING ",
            user_columns!()
        ))
        .bind(user_id)
        .bind(first_name)
        .bind(last_name)
        .bind(email)
        .bind(role.map(|r| r.as_str()))
        .fetch_one(db)
        .await
    }

    pub async fn set_active(
        db: impl PgExecutor<'_>,
        user_id: i64,
        active: bool,
    ) -> sqlx::Result<User> {
        sqlx::query_as::<_, User>(concat!(
            "UPDATE users SET is_active = $2, updated_at = now() WHERE user_id = $1 RETURNING ",
            user_columns!()
        ))
        .bind(user_id)
        .bind(active)
        .fetch_one(db)
        .await
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct UserProfile {
    pub profile_id: i64,
    pub user_id: i64,
    pub bio: Option<String>,
    pub age: Option<i32>,
    pub gender: Option<String>,
    pub location: Option<String>,
    pub fitness_level: Option<String>,
    pub goals: Option<String>,
    pub preferences: Option<String>,
    pub timezone: Option<String>,
    pub contact_number: Option<String>,
    pub emergency_contact: Option<String>,
    pub health_conditions: Option<String>,
    pub height: Option<f64>,
    pub weight: Option<f64>,
    pub activity_level: Option<String>,
    pub workout_preferences: Option<String>,
    pub dietary_preferences: Option<String>,
    pub allergies: Option<String>,
    pub injury_history: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl UserProfile {
    pub async fn find(db: impl PgExecutor<'_>, user_id: i64) -> sqlx::Result<Option<UserProfile>> {
        sqlx::query_as::<_, UserProfile>("SELECT * FROM user_profiles WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(db)
            .await
    }

    /// Returns the profile, creating an empty one on first access.
    pub async fn get_or_create(db: impl PgExecutor<'_>, user_id: i64) -> sqlx::Result<UserProfile> {
        sqlx::query_as::<_, UserProfile>(
            r#"
            WITH ins AS (
                INSERT INTO user_profiles (user_id) VALUES ($1)
                ON CONFLICT (user_id) DO NOTHING
                RETURNING *
            )
            SELECT * FROM ins
            UNION ALL
            SELECT * FROM user_profiles WHERE user_id = $1
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_one(db)
        .await
    }

    pub async fn update(
        db: impl PgExecutor<'_>,
        user_id: i64,
        req: &UpdateProfileRequest,
    ) -> sqlx::Result<UserProfile> {
        sqlx::query_as::<_, UserProfile>(
            r#"
            UPDATE user_profiles SET
                bio = COALESCE($2, bio),
                age = COALESCE($3, age),
                gender = COALESCE($4, gender),
                location = COALESCE($5, location),
                fitness_level = COALESCE($6, fitness_level),
                goals = COALESCE($7, goals),
                preferences = COALESCE($8, preferences),
                timezone = COALESCE($9, timezone),
                contact_number = COALESCE($10, contact_number),
                emergency_contact = COALESCE($11, emergency_contact),
                health_conditions = COALESCE($12, health_conditions),
                height = COALESCE($13, height),
                weight = COALESCE($14, weight),
                activity_level = COALESCE($15, activity_level),
                workout_preferences = COALESCE($16, workout_preferences),
                dietary_preferences = COALESCE($17, dietary_preferences),
                allergies = COALESCE($18, allergies),
                injury_history = COALESCE($19, injury_history),
                updated_at = now()
            WHERE user_id = $1
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(req.bio.as_deref())
        .bind(req.age)
        .bind(req.gender.as_deref())
        .bind(req.location.as_deref())
        .bind(req.fitness_level.as_deref())
        .bind(req.goals.as_deref())
        .bind(req.preferences.as_deref())
        .bind(req.timezone.as_deref())
        .bind(req.contact_number.as_deref())
        .bind(req.emergency_contact.as_deref())
        .bind(req.health_conditions.as_deref())
        .bind(req.height)
        .bind(req.weight)
        .bind(req.activity_level.as_deref())
        .bind(req.workout_preferences.as_deref())
        .bind(req.dietary_preferences.as_deref())
        .bind(req.allergies.as_deref())
        .bind(req.injury_history.as_deref())
        .fetch_one(db)
        .await
    }

    pub async fn height_of(db: impl PgExecutor<'_>, user_id: i64) -> sqlx::Result<Option<f64>> {
        let height: Option<Option<f64>> =
            sqlx::query_scalar("SELECT height FROM user_profiles WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(db)
                .await?;
        Ok(height.flatten())
    }
}

/// Coach profile defaults used when a user becomes a coach.
pub async fn ensure_coach_profile(db: impl PgExecutor<'_>, user_id: i64) -> sqlx::Result<bool> {
    let created = sqlx::query(
        r#"
        INSERT INTO coach_profiles (user_id, specializations, experience_years, rating, bio)
        VALUES ($1, 'General Fitness', 0, 0, '')
        ON CONFLICT (user_id) DO NOTHING
        "#,
    )
    .bind(user_id)
    .execute(db)
    .await?
    .rows_affected();
    Ok(created > 0)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminStats {
    pub total_users: i64,
    pub active_users: i64,
    pub new_users_this_month: i64,
    pub total_workouts: i64,
}

pub async fn admin_stats(db: impl PgExecutor<'_>) -> sqlx::Result<AdminStats> {
    let (total_users, active_users, new_users_this_month, total_workouts) =
        sqlx::query_as::<_, (i64, i64, i64, i64)>(
            r#"
            SELECT
                (SELECT COUNT(*) FROM users),
                (SELECT COUNT(*) FROM users WHERE is_active),
                (SELECT COUNT(*) FROM users WHERE created_at >= date_trunc('month', now())),
                (SELECT COUNT(*) FROM progress_tracking)
            "#,
        )
        .fetch_one(db)
        .await?;
    Ok(AdminStats {
        total_users,
        active_users,
        new_users_this_month,
        total_workouts,
    })
}
