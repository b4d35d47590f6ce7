use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use serde_json::json;
use tracing::{info, instrument};
use uuid::Uuid;

use super::{
    dto::{MealPlanDetails, MealPlanRequest, MealRequest, MessageResponse},
    repo::{Meal, MealPlan, MealPlanAssignment},
};
use crate::{
    access::{authorize, Actor, Capability},
    audit::{AuditAction, ClientMeta, EntityType, NewAuditEntry},
    error::{AppError, AppResult},
    state::AppState,
};

const PLAN_NOT_FOUND: &str = "meal plan not found";
const MEAL_NOT_FOUND: &str = "meal not found";

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/meal-plans", get(list_plans).post(create_plan))
        .route("/meal-plans/:id", put(update_plan).delete(delete_plan))
        .route("/meal-plans/:id/meals", get(list_meals).post(create_meal))
        .route(
            "/meal-plans/:id/meals/:meal_id",
            put(update_meal).delete(delete_meal),
        )
        .route("/user/meal-plans", get(my_meal_plans))
        .route("/admin/meal-plans", get(admin_list_plans))
        .route("/admin/meal-plans/:id", get(admin_get_plan))
}

fn require_author(actor: &Actor) -> AppResult<()> {
    if actor.is_admin() {
        return Ok(());
    }
    authorize(actor, Capability::Coach)
}

async fn managed_plan(state: &AppState, actor: &Actor, id: Uuid) -> AppResult<MealPlan> {
    let plan = MealPlan::find(&state.db, id)
        .await?
        .ok_or_else(|| AppError::not_found(PLAN_NOT_FOUND))?;
    authorize(actor, Capability::OwnerOrAdmin(plan.coach_id))?;
    Ok(plan)
}

async fn with_meals(state: &AppState, plan: MealPlan) -> AppResult<MealPlanDetails> {
    let meals = Meal::list_for_plan(&state.db, plan.id).await?;
    Ok(MealPlanDetails { plan, meals })
}

#[instrument(skip(state, actor), fields(user_id = actor.id))]
pub async fn list_plans(
    State(state): State<AppState>,
    actor: Actor,
) -> AppResult<Json<Vec<MealPlanDetails>>> {
    require_author(&actor)?;
    let plans = MealPlan::list_by_coach(&state.db, actor.id).await?;
    let mut out = Vec::with_capacity(plans.len());
    for plan in plans {
        out.push(with_meals(&state, plan).await?);
    }
    Ok(Json(out))
}

#[instrument(skip(state, actor, meta, payload), fields(user_id = actor.id))]
pub async fn create_plan(
    State(state): State<AppState>,
    actor: Actor,
    meta: ClientMeta,
    Json(payload): Json<MealPlanRequest>,
) -> AppResult<(StatusCode, Json<MealPlan>)> {
    require_author(&actor)?;
    let name = payload.required_name()?;

    let plan = MealPlan::create(&state.db, actor.id, name, &payload).await?;
    info!(plan_id = %plan.id, "meal plan created");
    state
        .audit
        .record(
            NewAuditEntry::new(actor.id, AuditAction::Create, EntityType::MealPlan, plan.id)
                .details(json!({ "name": plan.name }))
                .meta(&meta),
        )
        .await;
    Ok((StatusCode::CREATED, Json(plan)))
}

#[instrument(skip(state, actor, meta, payload), fields(user_id = actor.id))]
pub async fn update_plan(
    State(state): State<AppState>,
    actor: Actor,
    meta: ClientMeta,
    Path(id): Path<Uuid>,
    Json(payload): Json<MealPlanRequest>,
) -> AppResult<Json<MealPlan>> {
    payload.validate()?;
    managed_plan(&state, &actor, id).await?;

    let plan = MealPlan::update(&state.db, id, &payload).await?;
    state
        .audit
        .record(
            NewAuditEntry::new(actor.id, AuditAction::Update, EntityType::MealPlan, id)
                .details(json!({ "name": plan.name }))
                .meta(&meta),
        )
        .await;
    Ok(Json(plan))
}

#[instrument(skip(state, actor, meta), fields(user_id = actor.id))]
pub async fn delete_plan(
    State(state): State<AppState>,
    actor: Actor,
    meta: ClientMeta,
    Path(id): Path<Uuid>,
) -> AppResult<Json<MessageResponse>> {
    let plan = managed_plan(&state, &actor, id).await?;
    if !MealPlan::delete(&state.db, id).await? {
        return Err(AppError::not_found(PLAN_NOT_FOUND));
    }

    info!(plan_id = %id, "meal plan deleted");
    state
        .audit
        .record(
            NewAuditEntry::new(actor.id, AuditAction::Delete, EntityType::MealPlan, id)
                .details(json!({ "name": plan.name }))
                .meta(&meta),
        )
        .await;
    Ok(Json(MessageResponse {
        message: "meal plan deleted successfully",
    }))
}

/// Readable by the author, admins and users following the plan.
#[instrument(skip(state, actor), fields(user_id = actor.id))]
pub async fn list_meals(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<Meal>>> {
    let plan = MealPlan::find(&state.db, id)
        .await?
        .ok_or_else(|| AppError::not_found(PLAN_NOT_FOUND))?;
    if authorize(&actor, Capability::OwnerOrAdmin(plan.coach_id)).is_err()
        && !MealPlanAssignment::exists(&state.db, actor.id, id).await?
    {
        return Err(AppError::not_found(PLAN_NOT_FOUND));
    }
    Ok(Json(Meal::list_for_plan(&state.db, id).await?))
}

#[instrument(skip(state, actor, meta, payload), fields(user_id = actor.id))]
pub async fn create_meal(
    State(state): State<AppState>,
    actor: Actor,
    meta: ClientMeta,
    Path(id): Path<Uuid>,
    Json(payload): Json<MealRequest>,
) -> AppResult<(StatusCode, Json<Meal>)> {
    let required = payload.required()?;
    let plan = managed_plan(&state, &actor, id).await?;

    let meal = Meal::create(&state.db, id, required, &payload).await?;
    state
        .audit
        .record(
            NewAuditEntry::new(actor.id, AuditAction::Create, EntityType::Meal, meal.id)
                .details(json!({ "name": meal.name, "meal_plan": plan.name }))
                .meta(&meta),
        )
        .await;
    Ok((StatusCode::CREATED, Json(meal)))
}

#[instrument(skip(state, actor, meta, payload), fields(user_id = actor.id))]
pub async fn update_meal(
    State(state): State<AppState>,
    actor: Actor,
    meta: ClientMeta,
    Path((id, meal_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<MealRequest>,
) -> AppResult<Json<Meal>> {
    payload.validate()?;
    managed_plan(&state, &actor, id).await?;
    Meal::find_in_plan(&state.db, id, meal_id)
        .await?
        .ok_or_else(|| AppError::not_found(MEAL_NOT_FOUND))?;

    let meal = Meal::update(&state.db, meal_id, &payload).await?;
    state
        .audit
        .record(
            NewAuditEntry::new(actor.id, AuditAction::Update, EntityType::Meal, meal_id)
                .details(json!({ "name": meal.name, "meal_plan_id": id.to_string() }))
                .meta(&meta),
        )
        .await;
    Ok(Json(meal))
}

#[instrument(skip(state, actor, meta), fields(user_id = actor.id))]
pub async fn delete_meal(
    State(state): State<AppState>,
    actor: Actor,
    meta: ClientMeta,
    Path((id, meal_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<MessageResponse>> {
    managed_plan(&state, &actor, id).await?;
    let meal = Meal::find_in_plan(&state.db, id, meal_id)
        .await?
        .ok_or_else(|| AppError::not_found(MEAL_NOT_FOUND))?;
    Meal::delete(&state.db, meal_id).await?;

    state
        .audit
        .record(
            NewAuditEntry::new(actor.id, AuditAction::Delete, EntityType::Meal, meal_id)
                .details(json!({ "name": meal.name, "meal_plan_id": id.to_string() }))
                .meta(&meta),
        )
        .await;
    Ok(Json(MessageResponse {
        message: "meal deleted successfully",
    }))
}

#[instrument(skip(state, actor), fields(user_id = actor.id))]
pub async fn my_meal_plans(
    State(state): State<AppState>,
    actor: Actor,
) -> AppResult<Json<Vec<MealPlanDetails>>> {
    let plans = MealPlan::assigned_to(&state.db, actor.id).await?;
    let mut out = Vec::with_capacity(plans.len());
    for plan in plans {
        out.push(with_meals(&state, plan).await?);
    }
    Ok(Json(out))
}

#[instrument(skip(state, actor), fields(admin_id = actor.id))]
pub async fn admin_list_plans(
    State(state): State<AppState>,
    actor: Actor,
) -> AppResult<Json<Vec<MealPlan>>> {
    authorize(&actor, Capability::Admin)?;
    Ok(Json(MealPlan::list_all(&state.db).await?))
}

#[instrument(skip(state, actor), fields(admin_id = actor.id))]
pub async fn admin_get_plan(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> AppResult<Json<MealPlanDetails>> {
    authorize(&actor, Capability::Admin)?;
    let plan = MealPlan::find(&state.db, id)
        .await?
        .ok_or_else(|| AppError::not_found(PLAN_NOT_FOUND))?;
    Ok(Json(with_meals(&state, plan).await?))
}
