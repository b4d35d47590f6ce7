use std::collections::HashMap;

use serde::Serialize;
use sqlx::{FromRow, PgExecutor, PgPool};
use time::OffsetDateTime;

use super::dto::{BodyMetricsRequest, ProgressRequest};
use crate::training::repo::Exercise;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ProgressRecord {
    pub tracking_id: i64,
    pub user_id: i64,
    pub exercise_id: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub date: OffsetDateTime,
    pub sets_completed: i32,
    pub reps_completed: i32,
    pub weight_used: Option<f64>,
    pub duration_minutes: Option<i32>,
    pub notes: Option<String>,
    pub rating: Option<i32>,
}

/// A progress record together with the exercise it logs.
#[derive(Debug, Serialize)]
pub struct ProgressEntry {
    #[serde(flatten)]
    pub record: ProgressRecord,
    pub exercise: Option<Exercise>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct BodyMetric {
    pub metric_id: i64,
    pub user_id: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub date: OffsetDateTime,
    pub weight: Option<f64>,
    pub height: Option<f64>,
    pub bmi: Option<f64>,
    pub body_fat: Option<f64>,
    pub muscle_mass: Option<f64>,
    pub photo_key: Option<String>,
    pub notes: Option<String>,
}

impl ProgressRecord {
    pub async fn find(db: impl PgExecutor<'_>, tracking_id: i64) -> sqlx::Result<Option<ProgressRecord>> {
        sqlx::query_as::<_, ProgressRecord>("SELECT * FROM progress_tracking WHERE tracking_id = $1")
            .bind(tracking_id)
            .fetch_optional(db)
            .await
    }

    /// Records of the user, newest first. With `plan_id`, only records for
    /// exercises of that plan.
    pub async fn list_for_user(
        db: impl PgExecutor<'_>,
        user_id: i64,
        plan_id: Option<i64>,
    ) -> sqlx::Result<Vec<ProgressRecord>> {
        sqlx::query_as::<_, ProgressRecord>(
            r#"
            SELECT pt.* FROM progress_tracking pt
              JOIN plan_exercises pe ON pe.exercise_id = pt.exercise_id
             WHERE pt.user_id = $1 AND ($2::BIGINT IS NULL OR pe.plan_id = $2)
             ORDER BY pt.date DESC, pt.tracking_id DESC
            "#,
        )
        .bind(user_id)
        .bind(plan_id)
        .fetch_all(db)
        .await
    }

    pub async fn create(
        db: impl PgExecutor<'_>,
        user_id: i64,
        exercise_id: i64,
        sets_and_reps: (i32, i32),
        req: &ProgressRequest,
    ) -> sqlx::Result<ProgressRecord> {
        sqlx::query_as::<_, ProgressRecord>(
            r#"
            INSERT INTO progress_tracking (
                user_id, exercise_id, sets_completed, reps_completed, weight_used,
                duration_minutes, notes, rating
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(exercise_id)
        .bind(sets_and_reps.0)
        .bind(sets_and_reps.1)
        .bind(req.weight_used)
        .bind(req.duration_minutes)
        .bind(req.notes.as_deref())
        .bind(req.rating)
        .fetch_one(db)
        .await
    }

    pub async fn update(
        db: impl PgExecutor<'_>,
        tracking_id: i64,
        req: &ProgressRequest,
    ) -> sqlx::Result<ProgressRecord> {
        sqlx::query_as::<_, ProgressRecord>(
            r#"
            UPDATE progress_tracking SET
                sets_completed = COALESCE($2, sets_completed),
                reps_completed = COALESCE($3, reps_completed),
                weight_used = COALESCE($4, weight_used),
                duration_minutes = COALESCE($5, duration_minutes),
                notes = COALESCE($6, notes),
                rating = COALESCE($7, rating)
            WHERE tracking_id = $1
            RETURNING *
            "#,
        )
        .bind(tracking_id)
        .bind(req.sets_completed)
        .bind(req.reps_completed)
        .bind(req.weight_used)
        .bind(req.duration_minutes)
        .bind(req.notes.as_deref())
        .bind(req.rating)
        .fetch_one(db)
        .await
    }

    pub async fn delete(db: impl PgExecutor<'_>, tracking_id: i64) -> sqlx::Result<bool> {
        let res = sqlx::query("DELETE FROM progress_tracking WHERE tracking_id = $1")
            .bind(tracking_id)
            .execute(db)
            .await?;
        Ok(res.rows_affected() > 0)
    }
}

/// Loads records and attaches their exercises with one extra query.
pub async fn progress_entries(
    db: &PgPool,
    user_id: i64,
    plan_id: Option<i64>,
) -> sqlx::Result<Vec<ProgressEntry>> {
    let records = ProgressRecord::list_for_user(db, user_id, plan_id).await?;
    let mut ids: Vec<i64> = records.iter().map(|r| r.exercise_id).collect();
    ids.sort_unstable();
    ids.dedup();

    let exercises: HashMap<i64, Exercise> = Exercise::find_many(db, &ids)
        .await?
        .into_iter()
        .map(|e| (e.exercise_id, e))
        .collect();

    Ok(records
        .into_iter()
        .map(|record| {
            let exercise = exercises.get(&record.exercise_id).cloned();
            ProgressEntry { record, exercise }
        })
        .collect())
}

impl BodyMetric {
    pub async fn find(db: impl PgExecutor<'_>, metric_id: i64) -> sqlx::Result<Option<BodyMetric>> {
        sqlx::query_as::<_, BodyMetric>("SELECT * FROM body_metrics WHERE metric_id = $1")
            .bind(metric_id)
            .fetch_optional(db)
            .await
    }

    pub async fn list_for_user(db: impl PgExecutor<'_>, user_id: i64) -> sqlx::Result<Vec<BodyMetric>> {
        sqlx::query_as::<_, BodyMetric>(
            "SELECT * FROM body_metrics WHERE user_id = $1 ORDER BY date DESC, metric_id DESC",
        )
        .bind(user_id)
        .fetch_all(db)
        .await
    }

    pub async fn latest(db: impl PgExecutor<'_>, user_id: i64) -> sqlx::Result<Option<BodyMetric>> {
        sqlx::query_as::<_, BodyMetric>(
            "SELECT * FROM body_metrics WHERE user_id = $1 ORDER BY date DESC, metric_id DESC LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(db)
        .await
    }

    pub async fn create(
        db: impl PgExecutor<'_>,
        user_id: i64,
        height: f64,
        bmi: Option<f64>,
        req: &BodyMetricsRequest,
    ) -> sqlx::Result<BodyMetric> {
        sqlx::query_as::<_, BodyMetric>(
            r#"
            INSERT INTO body_metrics (user_id, weight, height, bmi, body_fat, muscle_mass, notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(req.weight)
        .bind(height)
        .bind(bmi)
        .bind(req.body_fat)
        .bind(req.muscle_mass)
        .bind(req.notes.as_deref())
        .fetch_one(db)
        .await
    }

    pub async fn update(
        db: impl PgExecutor<'_>,
        metric_id: i64,
        height: Option<f64>,
        bmi: Option<f64>,
        req: &BodyMetricsRequest,
    ) -> sqlx::Result<BodyMetric> {
        sqlx::query_as::<_, BodyMetric>(
            r#"
            UPDATE body_metrics SET
                weight = COALESCE($2, weight),
                height = COALESCE($3, height),
                bmi = COALESCE($4, bmi),
                body_fat = COALESCE($5, body_fat),
                muscle_mass = COALESCE($6, muscle_mass),
                notes = COALESCE($7, notes)
            WHERE metric_id = $1
            RETURNING *
            "#,
        )
        .bind(metric_id)
        .bind(req.weight)
        .bind(height)
        .bind(bmi)
        .bind(req.body_fat)
        .bind(req.muscle_mass)
        .bind(req.notes.as_deref())
        .fetch_one(db)
        .await
    }

    pub async fn set_photo(
        db: impl PgExecutor<'_>,
        metric_id: i64,
        photo_key: &str,
    ) -> sqlx::Result<BodyMetric> {
        sqlx::query_as::<_, BodyMetric>(
            "UPDATE body_metrics SET photo_key = $2 WHERE metric_id = $1 RETURNING *",
        )
        .bind(metric_id)
        .bind(photo_key)
        .fetch_one(db)
        .await
    }
}
