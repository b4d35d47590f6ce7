use serde::Serialize;
use sqlx::{FromRow, PgExecutor, Postgres, Transaction};
use time::OffsetDateTime;

use super::dto::{ExerciseRequest, PlanRequest};

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TrainingPlan {
    pub plan_id: i64,
    pub coach_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub difficulty_level: Option<String>,
    pub duration_weeks: Option<i32>,
    pub training_frequency: Option<i32>,
    pub training_objective: Option<String>,
    pub focus_areas: Option<String>,
    pub exercise_types: Option<String>,
    pub specific_instructions: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Exercise {
    pub exercise_id: i64,
    pub plan_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub sets: Option<String>,
    pub reps: Option<String>,
    pub intensity: Option<String>,
    pub rest_period: Option<String>,
    pub special_instructions: Option<String>,
    pub week_number: Option<i32>,
    pub day_number: Option<i32>,
    pub order_in_day: Option<i32>,
    pub video_url: Option<String>,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PlanAssignment {
    pub assignment_id: i64,
    pub user_id: i64,
    pub plan_id: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub start_date: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub end_date: Option<OffsetDateTime>,
    pub status: String,
    pub progress: f64,
    pub notes: Option<String>,
}

impl TrainingPlan {
    pub async fn find(db: impl PgExecutor<'_>, plan_id: i64) -> sqlx::Result<Option<TrainingPlan>> {
        sqlx::query_as::<_, TrainingPlan>("SELECT * FROM training_plans WHERE plan_id = $1")
            .bind(plan_id)
            .fetch_optional(db)
            .await
    }

    pub async fn list_by_coach(db: impl PgExecutor<'_>, coach_id: i64) -> sqlx::Result<Vec<TrainingPlan>> {
        sqlx::query_as::<_, TrainingPlan>(
            "SELECT * FROM training_plans WHERE coach_id = $1 ORDER BY created_at DESC",
        )
        .bind(coach_id)
        .fetch_all(db)
        .await
    }

    pub async fn list_all(db: impl PgExecutor<'_>) -> sqlx::Result<Vec<TrainingPlan>> {
        sqlx::query_as::<_, TrainingPlan>("SELECT * FROM training_plans ORDER BY created_at DESC")
            .fetch_all(db)
            .await
    }

    pub async fn create(
        db: impl PgExecutor<'_>,
        coach_id: i64,
        title: &str,
        req: &PlanRequest,
    ) -> sqlx::Result<TrainingPlan> {
        sqlx::query_as::<_, TrainingPlan>(
            r#"
            INSERT INTO training_plans (
                coach_id, title, description, difficulty_level, duration_weeks,
                training_frequency, training_objective, focus_areas, exercise_types,
                specific_instructions
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(coach_id)
        .bind(title)
        .bind(req.description.as_deref())
        .bind(req.difficulty_level.as_deref())
        .bind(req.duration_weeks)
        .bind(req.training_frequency)
        .bind(req.training_objective.as_deref())
        .bind(req.focus_areas.as_deref())
        .bind(req.exercise_types.as_deref())
        .bind(req.specific_instructions.as_deref())
        .fetch_one(db)
        .await
    }

    pub async fn update(
        db: impl PgExecutor<'_>,
        plan_id: i64,
        req: &PlanRequest,
    ) -> sqlx::Result<TrainingPlan> {
        sqlx::query_as::<_, TrainingPlan>(
            r#"
            UPDATE training_plans SET
                title = COALESCE($2, title),
                description = COALESCE($3, description),
                difficulty_level = COALESCE($4, difficulty_level),
                duration_weeks = COALESCE($5, duration_weeks),
                training_frequency = COALESCE($6, training_frequency),
                training_objective = COALESCE($7, training_objective),
                focus_areas = COALESCE($8, focus_areas),
                exercise_types = COALESCE($9, exercise_types),
                specific_instructions = COALESCE($10, specific_instructions),
                updated_at = now()
            WHERE plan_id = $1
            RETURNING *
            "#,
        )
        .bind(plan_id)
        .bind(req.title.as_deref().map(str::trim))
        .bind(req.description.as_deref())
        .bind(req.difficulty_level.as_deref())
        .bind(req.duration_weeks)
        .bind(req.training_frequency)
        .bind(req.training_objective.as_deref())
        .bind(req.focus_areas.as_deref())
        .bind(req.exercise_types.as_deref())
        .bind(req.specific_instructions.as_deref())
        .fetch_one(db)
        .await
    }

    /// Exercises, assignments and progress records go with the plan through
    /// `ON DELETE CASCADE`.
    pub async fn delete(db: impl PgExecutor<'_>, plan_id: i64) -> sqlx::Result<bool> {
        let res = sqlx::query("DELETE FROM training_plans WHERE plan_id = $1")
            .bind(plan_id)
            .execute(db)
            .await?;
        Ok(res.rows_affected() > 0)
    }
}

impl Exercise {
    pub async fn list_for_plan(db: impl PgExecutor<'_>, plan_id: i64) -> sqlx::Result<Vec<Exercise>> {
        sqlx::query_as::<_, Exercise>(
            r#"
            SELECT * FROM plan_exercises WHERE plan_id = $1
            ORDER BY week_number NULLS LAST, day_number NULLS LAST, order_in_day NULLS LAST, exercise_id
            "#,
        )
        .bind(plan_id)
        .fetch_all(db)
        .await
    }

    pub async fn find(db: impl PgExecutor<'_>, exercise_id: i64) -> sqlx::Result<Option<Exercise>> {
        sqlx::query_as::<_, Exercise>("SELECT * FROM plan_exercises WHERE exercise_id = $1")
            .bind(exercise_id)
            .fetch_optional(db)
            .await
    }

    pub async fn find_many(db: impl PgExecutor<'_>, ids: &[i64]) -> sqlx::Result<Vec<Exercise>> {
        sqlx::query_as::<_, Exercise>("SELECT * FROM plan_exercises WHERE exercise_id = ANY($1)")
            .bind(ids)
            .fetch_all(db)
            .await
    }

    /// Looks the exercise up within its plan only.
    pub async fn find_in_plan(
        db: impl PgExecutor<'_>,
        plan_id: i64,
        exercise_id: i64,
    ) -> sqlx::Result<Option<Exercise>> {
        sqlx::query_as::<_, Exercise>(
            "SELECT * FROM plan_exercises WHERE plan_id = $1 AND exercise_id = $2",
        )
        .bind(plan_id)
        .bind(exercise_id)
        .fetch_optional(db)
        .await
    }

    pub async fn create(
        db: impl PgExecutor<'_>,
        plan_id: i64,
        name: &str,
        req: &ExerciseRequest,
    ) -> sqlx::Result<Exercise> {
        sqlx::query_as::<_, Exercise>(
            r#"
            INSERT INTO plan_exercises (
                plan_id, name, description, sets, reps, intensity, rest_period,
                special_instructions, week_number, day_number, order_in_day, video_url, image_url
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING *
            "#,
        )
        .bind(plan_id)
        .bind(name)
        .bind(req.description.as_deref())
        .bind(req.sets.as_deref())
        .bind(req.reps.as_deref())
        .bind(req.intensity.as_deref())
        .bind(req.rest_period.as_deref())
        .bind(req.special_instructions.as_deref())
        .bind(req.week_number)
        .bind(req.day_number)
        .bind(req.order_in_day)
        .bind(req.video_url.as_deref())
        .bind(req.image_url.as_deref())
        .fetch_one(db)
        .await
    }

    pub async fn update(
        db: impl PgExecutor<'_>,
        exercise_id: i64,
        req: &ExerciseRequest,
    ) -> sqlx::Result<Exercise> {
        sqlx::query_as::<_, Exercise>(
            r#"
            UPDATE plan_exercises SET
                name = COALESCE($2, name),
                description = COALESCE($3, description),
                sets = COALESCE($4, sets),
                reps = COALESCE($5, reps),
                intensity = COALESCE($6, intensity),
                rest_period = COALESCE($7, rest_period),
                special_instructions = COALESCE($8, special_instructions),
                week_number = COALESCE($9, week_number),
                day_number = COALESCE($10, day_number),
                order_in_day = COALESCE($11, order_in_day),
                video_url = COALESCE($12, video_url),
                image_url = COALESCE($13, image_url)
            WHERE exercise_id = $1
            RETURNING *
            "#,
        )
        .bind(exercise_id)
        .bind(req.name.as_deref().map(str::trim))
        .bind(req.description.as_deref())
        .bind(req.sets.as_deref())
        .bind(req.reps.as_deref())
        .bind(req.intensity.as_deref())
        .bind(req.rest_period.as_deref())
        .bind(req.special_instructions.as_deref())
        .bind(req.week_number)
        .bind(req.day_number)
        .bind(req.order_in_day)
        .bind(req.video_url.as_deref())
        .bind(req.image_url.as_deref())
        .fetch_one(db)
        .await
    }

    pub async fn delete(db: impl PgExecutor<'_>, exercise_id: i64) -> sqlx::Result<bool> {
        let res = sqlx::query("DELETE FROM plan_exercises WHERE exercise_id = $1")
            .bind(exercise_id)
            .execute(db)
            .await?;
        Ok(res.rows_affected() > 0)
    }
}

impl PlanAssignment {
    /// The plan the user is currently working through, if any.
    pub async fn current(db: impl PgExecutor<'_>, user_id: i64) -> sqlx::Result<Option<PlanAssignment>> {
        sqlx::query_as::<_, PlanAssignment>(
            r#"
            SELECT * FROM user_training_plans
             WHERE user_id = $1 AND status = 'in_progress'
             ORDER BY start_date DESC
             LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(db)
        .await
    }

    pub async fn exists(db: impl PgExecutor<'_>, user_id: i64, plan_id: i64) -> sqlx::Result<bool> {
        sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM user_training_plans WHERE user_id = $1 AND plan_id = $2)",
        )
        .bind(user_id)
        .bind(plan_id)
        .fetch_one(db)
        .await
    }

    /// Drops every training plan assignment of the user. Returns the ids
    /// removed.
    pub async fn clear(tx: &mut Transaction<'_, Postgres>, user_id: i64) -> sqlx::Result<Vec<i64>> {
        sqlx::query_scalar("DELETE FROM user_training_plans WHERE user_id = $1 RETURNING assignment_id")
            .bind(user_id)
            .fetch_all(&mut **tx)
            .await
    }

    /// Replaces whatever plan the user had with `plan_id`.
    pub async fn replace(
        tx: &mut Transaction<'_, Postgres>,
        user_id: i64,
        plan_id: i64,
    ) -> sqlx::Result<(PlanAssignment, Vec<i64>)> {
        let removed = Self::clear(tx, user_id).await?;
        let assignment = sqlx::query_as::<_, PlanAssignment>(
            r#"
            INSERT INTO user_training_plans (user_id, plan_id, status, progress)
            VALUES ($1, $2, 'in_progress', 0)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(plan_id)
        .fetch_one(&mut **tx)
        .await?;
        Ok((assignment, removed))
    }
}
