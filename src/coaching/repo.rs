use serde::Serialize;
use sqlx::{FromRow, PgExecutor, Postgres, Transaction};
use time::OffsetDateTime;

use super::dto::UpdateCoachProfile;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CoachProfile {
    pub profile_id: i64,
    pub user_id: i64,
    pub specializations: String,
    pub experience_years: i32,
    pub rating: f64,
    pub bio: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CoachClient {
    pub id: i64,
    pub coach_id: i64,
    pub client_id: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub assigned_at: OffsetDateTime,
    pub status: String,
}

/// Active client of a coach, joined with the account.
#[derive(Debug, Clone, FromRow)]
pub struct ClientRow {
    pub id: i64,
    pub client_id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub profile_image_url: Option<String>,
    pub assigned_at: OffsetDateTime,
    pub status: String,
}

/// Assignment with both parties' names, for the admin overview.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AssignmentView {
    pub id: i64,
    pub coach_id: i64,
    pub coach_name: String,
    pub client_id: i64,
    pub client_name: String,
    pub status: String,
    #[serde(with = "time::serde::rfc3339")]
    pub assigned_at: OffsetDateTime,
}

impl CoachProfile {
    pub async fn find_by_user(db: impl PgExecutor<'_>, user_id: i64) -> sqlx::Result<Option<CoachProfile>> {
        sqlx::query_as::<_, CoachProfile>("SELECT * FROM coach_profiles WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(db)
            .await
    }

    /// Partial update. `rating` is only ever passed by admins.
    pub async fn update(
        db: impl PgExecutor<'_>,
        profile_id: i64,
        req: &UpdateCoachProfile,
        rating: Option<f64>,
    ) -> sqlx::Result<CoachProfile> {
        sqlx::query_as::<_, CoachProfile>(
            r#"
            UPDATE coach_profiles SET
                specializations = COALESCE($2, specializations),
                experience_years = COALESCE($3, experience_years),
                bio = COALESCE($4, bio),
                rating = COALESCE($5, rating),
                updated_at = now()
            WHERE profile_id = $1
            RETURNING *
            "#,
        )
        .bind(profile_id)
        .bind(req.specializations.as_deref().map(str::trim))
        .bind(req.experience_years)
        .bind(req.bio.as_deref())
        .bind(rating)
        .fetch_one(db)
        .await
    }

    /// Coach users that lack a profile row. Used by the startup backfill.
    pub async fn missing_user_ids(db: impl PgExecutor<'_>) -> sqlx::Result<Vec<i64>> {
        sqlx::query_scalar(
            r#"
            SELECT u.user_id FROM users u
              LEFT JOIN coach_profiles cp ON cp.user_id = u.user_id
             WHERE u.user_type = 'coach' AND cp.profile_id IS NULL
            "#,
        )
        .fetch_all(db)
        .await
    }
}

impl CoachClient {
    pub async fn count_active(db: impl PgExecutor<'_>, coach_profile_id: i64) -> sqlx::Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM coach_clients WHERE coach_id = $1 AND status = 'active'")
            .bind(coach_profile_id)
            .fetch_one(db)
            .await
    }

    pub async fn active_clients(db: impl PgExecutor<'_>, coach_profile_id: i64) -> sqlx::Result<Vec<ClientRow>> {
        sqlx::query_as::<_, ClientRow>(
            r#"
            SELECT cc.id, u.user_id AS client_id, u.first_name, u.last_name, u.email,
                   u.profile_image_url, cc.assigned_at, cc.status
              FROM coach_clients cc
              JOIN users u ON u.user_id = cc.client_id
             WHERE cc.coach_id = $1 AND cc.status = 'active'
             ORDER BY u.first_name, u.last_name
            "#,
        )
        .bind(coach_profile_id)
        .fetch_all(db)
        .await
    }

    /// The client's active assignment, locked for the rest of the transaction.
    pub async fn active_for_client(
        tx: &mut Transaction<'_, Postgres>,
        client_id: i64,
    ) -> sqlx::Result<Option<CoachClient>> {
        sqlx::query_as::<_, CoachClient>(
            "SELECT * FROM coach_clients WHERE client_id = $1 AND status = 'active' FOR UPDATE",
        )
        .bind(client_id)
        .fetch_optional(&mut **tx)
        .await
    }

    pub async fn insert_active(
        tx: &mut Transaction<'_, Postgres>,
        coach_profile_id: i64,
        client_id: i64,
    ) -> sqlx::Result<CoachClient> {
        sqlx::query_as::<_, CoachClient>(
            r#"
            INSERT INTO coach_clients (coach_id, client_id, status)
            VALUES ($1, $2, 'active')
            RETURNING *
            "#,
        )
        .bind(coach_profile_id)
        .bind(client_id)
        .fetch_one(&mut **tx)
        .await
    }

    pub async fn set_inactive(db: impl PgExecutor<'_>, id: i64) -> sqlx::Result<CoachClient> {
        sqlx::query_as::<_, CoachClient>(
            "UPDATE coach_clients SET status = 'inactive' WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .fetch_one(db)
        .await
    }

    /// Ends the active assignment between a coach profile and a client.
    pub async fn deactivate(
        db: impl PgExecutor<'_>,
        coach_profile_id: i64,
        client_id: i64,
    ) -> sqlx::Result<Option<CoachClient>> {
        sqlx::query_as::<_, CoachClient>(
            r#"
            UPDATE coach_clients SET status = 'inactive'
             WHERE coach_id = $1 AND client_id = $2 AND status = 'active'
            RETURNING *
            "#,
        )
        .bind(coach_profile_id)
        .bind(client_id)
        .fetch_optional(db)
        .await
    }

    pub async fn list_all(db: impl PgExecutor<'_>) -> sqlx::Result<Vec<AssignmentView>> {
        sqlx::query_as::<_, AssignmentView>(
            r#"
            SELECT cc.id, cc.coach_id,
                   coach.first_name || ' ' || coach.last_name AS coach_name,
                   cc.client_id,
                   client.first_name || ' ' || client.last_name AS client_name,
                   cc.status, cc.assigned_at
              FROM coach_clients cc
              JOIN coach_profiles cp ON cp.profile_id = cc.coach_id
              JOIN users coach ON coach.user_id = cp.user_id
              JOIN users client ON client.user_id = cc.client_id
             ORDER BY cc.assigned_at DESC, cc.id DESC
            "#,
        )
        .fetch_all(db)
        .await
    }
}

/// Number of training plans authored by the coach user.
pub async fn authored_plan_count(db: impl PgExecutor<'_>, coach_user_id: i64) -> sqlx::Result<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM training_plans WHERE coach_id = $1")
        .bind(coach_user_id)
        .fetch_one(db)
        .await
}
