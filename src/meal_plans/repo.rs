use serde::Serialize;
use sqlx::{FromRow, PgExecutor, Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use super::dto::{MealPlanRequest, MealRequest, RequiredMealFields};

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct MealPlan {
    pub id: Uuid,
    pub coach_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub total_calories: Option<i32>,
    pub total_protein: Option<i32>,
    pub total_carbs: Option<i32>,
    pub total_fats: Option<i32>,
    pub dietary_preferences: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Meal {
    pub id: Uuid,
    pub meal_plan_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub ingredients: Option<String>,
    pub cooking_instructions: Option<String>,
    pub calories: Option<i32>,
    pub protein: Option<i32>,
    pub carbs: Option<i32>,
    pub fats: Option<i32>,
    pub meal_type: String,
    pub day_of_week: String,
    pub meal_time: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct MealPlanAssignment {
    pub assignment_id: i64,
    pub user_id: i64,
    pub plan_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub start_date: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub end_date: Option<OffsetDateTime>,
    pub status: String,
    pub notes: Option<String>,
}

impl MealPlan {
    pub async fn find(db: impl PgExecutor<'_>, id: Uuid) -> sqlx::Result<Option<MealPlan>> {
        sqlx::query_as::<_, MealPlan>("SELECT * FROM meal_plans WHERE id = $1")
            .bind(id)
            .fetch_optional(db)
            .await
    }

    pub async fn list_by_coach(db: impl PgExecutor<'_>, coach_id: i64) -> sqlx::Result<Vec<MealPlan>> {
        sqlx::query_as::<_, MealPlan>(
            "SELECT * FROM meal_plans WHERE coach_id = $1 ORDER BY created_at DESC",
        )
        .bind(coach_id)
        .fetch_all(db)
        .await
    }

    pub async fn list_all(db: impl PgExecutor<'_>) -> sqlx::Result<Vec<MealPlan>> {
        sqlx::query_as::<_, MealPlan>("SELECT * FROM meal_plans ORDER BY created_at DESC")
            .fetch_all(db)
            .await
    }

    /// Plans the user is actively following.
    pub async fn assigned_to(db: impl PgExecutor<'_>, user_id: i64) -> sqlx::Result<Vec<MealPlan>> {
        sqlx::query_as::<_, MealPlan>(
            r#"
            SELECT mp.* FROM meal_plans mp
              JOIN user_meal_plans ump ON ump.plan_id = mp.id
             WHERE ump.user_id = $1 AND ump.status = 'active'
             ORDER BY ump.start_date DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(db)
        .await
    }

    pub async fn create(
        db: impl PgExecutor<'_>,
        coach_id: i64,
        name: &str,
        req: &MealPlanRequest,
    ) -> sqlx::Result<MealPlan> {
        sqlx::query_as::<_, MealPlan>(
            r#"
            INSERT INTO meal_plans (
                id, coach_id, name, description, total_calories, total_protein,
                total_carbs, total_fats, dietary_preferences
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(coach_id)
        .bind(name)
        .bind(req.description.as_deref())
        .bind(req.total_calories)
        .bind(req.total_protein)
        .bind(req.total_carbs)
        .bind(req.total_fats)
        .bind(req.dietary_preferences.as_deref())
        .fetch_one(db)
        .await
    }

    pub async fn update(
        db: impl PgExecutor<'_>,
        id: Uuid,
        req: &MealPlanRequest,
    ) -> sqlx::Result<MealPlan> {
        sqlx::query_as::<_, MealPlan>(
            r#"
            UPDATE meal_plans SET
                name = COALESCE($2, name),
                description = COALESCE($3, description),
                total_calories = COALESCE($4, total_calories),
                total_protein = COALESCE($5, total_protein),
                total_carbs = COALESCE($6, total_carbs),
                total_fats = COALESCE($7, total_fats),
                dietary_preferences = COALESCE($8, dietary_preferences),
                updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(req.name.as_deref().map(str::trim))
        .bind(req.description.as_deref())
        .bind(req.total_calories)
        .bind(req.total_protein)
        .bind(req.total_carbs)
        .bind(req.total_fats)
        .bind(req.dietary_preferences.as_deref())
        .fetch_one(db)
        .await
    }

    /// Meals and assignments go with the plan through `ON DELETE CASCADE`.
    pub async fn delete(db: impl PgExecutor<'_>, id: Uuid) -> sqlx::Result<bool> {
        let res = sqlx::query("DELETE FROM meal_plans WHERE id = $1")
            .bind(id)
            .execute(db)
            .await?;
        Ok(res.rows_affected() > 0)
    }
}

impl Meal {
    pub async fn list_for_plan(db: impl PgExecutor<'_>, plan_id: Uuid) -> sqlx::Result<Vec<Meal>> {
        sqlx::query_as::<_, Meal>(
            "SELECT * FROM meals WHERE meal_plan_id = $1 ORDER BY day_of_week, meal_time NULLS LAST, created_at",
        )
        .bind(plan_id)
        .fetch_all(db)
        .await
    }

    pub async fn find_in_plan(
        db: impl PgExecutor<'_>,
        plan_id: Uuid,
        meal_id: Uuid,
    ) -> sqlx::Result<Option<Meal>> {
        sqlx::query_as::<_, Meal>("SELECT * FROM meals WHERE meal_plan_id = $1 AND id = $2")
            .bind(plan_id)
            .bind(meal_id)
            .fetch_optional(db)
            .await
    }

    pub async fn create(
        db: impl PgExecutor<'_>,
        plan_id: Uuid,
        required: RequiredMealFields<'_>,
        req: &MealRequest,
    ) -> sqlx::Result<Meal> {
        sqlx::query_as::<_, Meal>(
            r#"
            INSERT INTO meals (
                id, meal_plan_id, name, description, ingredients, cooking_instructions,
                calories, protein, carbs, fats, meal_type, day_of_week, meal_time
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(plan_id)
        .bind(required.name)
        .bind(req.description.as_deref())
        .bind(req.ingredients.as_deref())
        .bind(req.cooking_instructions.as_deref())
        .bind(req.calories)
        .bind(req.protein)
        .bind(req.carbs)
        .bind(req.fats)
        .bind(required.meal_type)
        .bind(required.day_of_week)
        .bind(req.meal_time.as_deref())
        .fetch_one(db)
        .await
    }

    pub async fn update(db: impl PgExecutor<'_>, meal_id: Uuid, req: &MealRequest) -> sqlx::Result<Meal> {
        sqlx::query_as::<_, Meal>(
            r#"
            UPDATE meals SET
                name = COALESCE($2, name),
                description = COALESCE($3, description),
                ingredients = COALESCE($4, ingredients),
                cooking_instructions = COALESCE($5, cooking_instructions),
                calories = COALESCE($6, calories),
                protein = COALESCE($7, protein),
                carbs = COALESCE($8, carbs),
                fats = COALESCE($9, fats),
                meal_type = COALESCE($10, meal_type),
                day_of_week = COALESCE($11, day_of_week),
                meal_time = COALESCE($12, meal_time),
                updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(meal_id)
        .bind(req.name.as_deref().map(str::trim))
        .bind(req.description.as_deref())
        .bind(req.ingredients.as_deref())
        .bind(req.cooking_instructions.as_deref())
        .bind(req.calories)
        .bind(req.protein)
        .bind(req.carbs)
        .bind(req.fats)
        .bind(req.meal_type.as_deref())
        .bind(req.day_of_week.as_deref())
        .bind(req.meal_time.as_deref())
        .fetch_one(db)
        .await
    }

    pub async fn delete(db: impl PgExecutor<'_>, meal_id: Uuid) -> sqlx::Result<bool> {
        let res = sqlx::query("DELETE FROM meals WHERE id = $1")
            .bind(meal_id)
            .execute(db)
            .await?;
        Ok(res.rows_affected() > 0)
    }
}

impl MealPlanAssignment {
    pub async fn exists(db: impl PgExecutor<'_>, user_id: i64, plan_id: Uuid) -> sqlx::Result<bool> {
        sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM user_meal_plans WHERE user_id = $1 AND plan_id = $2)",
        )
        .bind(user_id)
        .bind(plan_id)
        .fetch_one(db)
        .await
    }

    /// Replaces the user's meal plan with `plan_id`. Returns the new row and
    /// the ids of the assignments it replaced.
    pub async fn replace(
        tx: &mut Transaction<'_, Postgres>,
        user_id: i64,
        plan_id: Uuid,
    ) -> sqlx::Result<(MealPlanAssignment, Vec<i64>)> {
        let removed: Vec<i64> =
            sqlx::query_scalar("DELETE FROM user_meal_plans WHERE user_id = $1 RETURNING assignment_id")
                .bind(user_id)
                .fetch_all(&mut **tx)
                .await?;
        let assignment = sqlx::query_as::<_, MealPlanAssignment>(
            r#"
            INSERT INTO user_meal_plans (user_id, plan_id, status)
            VALUES ($1, $2, 'active')
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
