use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde_json::json;
use tracing::{info, instrument};

use super::{
    dto::{CurrentPlanResponse, ExerciseRequest, MessageResponse, PlanDetails, PlanRequest},
    repo::{Exercise, PlanAssignment, TrainingPlan},
};
use crate::{
    access::{authorize, Actor, Capability},
    audit::{AuditAction, ClientMeta, EntityType, NewAuditEntry},
    error::{AppError, AppResult},
    state::AppState,
};

const PLAN_NOT_FOUND: &str = "training plan not found";

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/training-plans", get(list_plans).post(create_plan))
        .route(
            "/training-plans/:id",
            get(get_plan).put(update_plan).delete(delete_plan),
        )
        .route("/training-plans/:id/exercises", post(create_exercise))
        .route(
            "/training-plans/:id/exercises/:exercise_id",
            put(update_exercise).delete(delete_exercise),
        )
        .route("/user/training-plan", get(current_plan))
        .route("/admin/training-plans", get(admin_list_plans))
        .route("/admin/training-plans/:id", get(admin_get_plan))
}

/// Coaches author plans; admins may too.
fn require_author(actor: &Actor) -> AppResult<()> {
    if actor.is_admin() {
        return Ok(());
    }
    authorize(actor, Capability::Coach)
}

/// Loads a plan the actor may modify: its author or an admin.
async fn managed_plan(state: &AppState, actor: &Actor, plan_id: i64) -> AppResult<TrainingPlan> {
    let plan = TrainingPlan::find(&state.db, plan_id)
        .await?
        .ok_or_else(|| AppError::not_found(PLAN_NOT_FOUND))?;
    authorize(actor, Capability::OwnerOrAdmin(plan.coach_id))?;
    Ok(plan)
}

async fn with_exercises(state: &AppState, plan: TrainingPlan) -> AppResult<PlanDetails> {
    let exercises = Exercise::list_for_plan(&state.db, plan.plan_id).await?;
    Ok(PlanDetails { plan, exercises })
}

#[instrument(skip(state, actor), fields(user_id = actor.id))]
pub async fn list_plans(
    State(state): State<AppState>,
    actor: Actor,
) -> AppResult<Json<Vec<TrainingPlan>>> {
    require_author(&actor)?;
    Ok(Json(TrainingPlan::list_by_coach(&state.db, actor.id).await?))
}

#[instrument(skip(state, actor, meta, payload), fields(user_id = actor.id))]
pub async fn create_plan(
    State(state): State<AppState>,
    actor: Actor,
    meta: ClientMeta,
    Json(payload): Json<PlanRequest>,
) -> AppResult<(StatusCode, Json<TrainingPlan>)> {
    require_author(&actor)?;
    let title = payload.required_title()?;

    let plan = TrainingPlan::create(&state.db, actor.id, title, &payload).await?;
    info!(plan_id = plan.plan_id, "training plan created");
    state
        .audit
        .record(
            NewAuditEntry::new(actor.id, AuditAction::Create, EntityType::TrainingPlan, plan.plan_id)
                .details(json!({ "title": plan.title }))
                .meta(&meta),
        )
        .await;
    Ok((StatusCode::CREATED, Json(plan)))
}

/// Readable by the author, admins and users the plan is assigned to.
#[instrument(skip(state, actor), fields(user_id = actor.id))]
pub async fn get_plan(
    State(state): State<AppState>,
    actor: Actor,
    Path(plan_id): Path<i64>,
) -> AppResult<Json<PlanDetails>> {
    let plan = TrainingPlan::find(&state.db, plan_id)
        .await?
        .ok_or_else(|| AppError::not_found(PLAN_NOT_FOUND))?;
    if authorize(&actor, Capability::OwnerOrAdmin(plan.coach_id)).is_err()
        && !PlanAssignment::exists(&state.db, actor.id, plan_id).await?
    {
        return Err(AppError::not_found(PLAN_NOT_FOUND));
    }
    Ok(Json(with_exercises(&state, plan).await?))
}

#[instrument(skip(state, actor, meta, payload), fields(user_id = actor.id))]
pub async fn update_plan(
    State(state): State<AppState>,
    actor: Actor,
    meta: ClientMeta,
    Path(plan_id): Path<i64>,
    Json(payload): Json<PlanRequest>,
) -> AppResult<Json<TrainingPlan>> {
    payload.validate()?;
    managed_plan(&state, &actor, plan_id).await?;

    let plan = TrainingPlan::update(&state.db, plan_id, &payload).await?;
    state
        .audit
        .record(
            NewAuditEntry::new(actor.id, AuditAction::Update, EntityType::TrainingPlan, plan_id)
                .details(json!({ "title": plan.title }))
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
    Path(plan_id): Path<i64>,
) -> AppResult<Json<MessageResponse>> {
    let plan = managed_plan(&state, &actor, plan_id).await?;
    if !TrainingPlan::delete(&state.db, plan_id).await? {
        return Err(AppError::not_found(PLAN_NOT_FOUND));
    }

    info!(plan_id, "training plan deleted");
    state
        .audit
        .record(
            NewAuditEntry::new(actor.id, AuditAction::Delete, EntityType::TrainingPlan, plan_id)
                .details(json!({ "title": plan.title }))
                .meta(&meta),
        )
        .await;
    Ok(Json(MessageResponse {
        message: "training plan deleted successfully",
    }))
}

#[instrument(skip(state, actor, meta, payload), fields(user_id = actor.id))]
pub async fn create_exercise(
    State(state): State<AppState>,
    actor: Actor,
    meta: ClientMeta,
    Path(plan_id): Path<i64>,
    Json(payload): Json<ExerciseRequest>,
) -> AppResult<(StatusCode, Json<Exercise>)> {
    let name = payload.required_name()?;
    let plan = managed_plan(&state, &actor, plan_id).await?;

    let exercise = Exercise::create(&state.db, plan_id, name, &payload).await?;
    state
        .audit
        .record(
            NewAuditEntry::new(actor.id, AuditAction::Create, EntityType::Exercise, exercise.exercise_id)
                .details(json!({ "name": exercise.name, "plan": plan.title }))
                .meta(&meta),
        )
        .await;
    Ok((StatusCode::CREATED, Json(exercise)))
}

#[instrument(skip(state, actor, meta, payload), fields(user_id = actor.id))]
pub async fn update_exercise(
    State(state): State<AppState>,
    actor: Actor,
    meta: ClientMeta,
    Path((plan_id, exercise_id)): Path<(i64, i64)>,
    Json(payload): Json<ExerciseRequest>,
) -> AppResult<Json<Exercise>> {
    payload.validate()?;
    managed_plan(&state, &actor, plan_id).await?;
    Exercise::find_in_plan(&state.db, plan_id, exercise_id)
        .await?
        .ok_or_else(|| AppError::not_found("exercise not found"))?;

    let exercise = Exercise::update(&state.db, exercise_id, &payload).await?;
    state
        .audit
        .record(
            NewAuditEntry::new(actor.id, AuditAction::Update, EntityType::Exercise, exercise_id)
                .details(json!({ "name": exercise.name, "plan_id": plan_id }))
                .meta(&meta),
        )
        .await;
    Ok(Json(exercise))
}

#[instrument(skip(state, actor, meta), fields(user_id = actor.id))]
pub async fn delete_exercise(
    State(state): State<AppState>,
    actor: Actor,
    meta: ClientMeta,
    Path((plan_id, exercise_id)): Path<(i64, i64)>,
) -> AppResult<Json<MessageResponse>> {
    managed_plan(&state, &actor, plan_id).await?;
    let exercise = Exercise::find_in_plan(&state.db, plan_id, exercise_id)
        .await?
        .ok_or_else(|| AppError::not_found("exercise not found"))?;
    Exercise::delete(&state.db, exercise_id).await?;

    state
        .audit
        .record(
            NewAuditEntry::new(actor.id, AuditAction::Delete, EntityType::Exercise, exercise_id)
                .details(json!({ "name": exercise.name, "plan_id": plan_id }))
                .meta(&meta),
        )
        .await;
    Ok(Json(MessageResponse {
        message: "exercise deleted successfully",
    }))
}

#[instrument(skip(state, actor), fields(user_id = actor.id))]
pub async fn current_plan(
    State(state): State<AppState>,
    actor: Actor,
) -> AppResult<Json<CurrentPlanResponse>> {
    let none = || CurrentPlanResponse {
        message: Some("no active training plan found"),
        training_plan: None,
        assignment: None,
        exercises: Vec::new(),
    };
    let Some(assignment) = PlanAssignment::current(&state.db, actor.id).await? else {
        return Ok(Json(none()));
    };
    let Some(plan) = TrainingPlan::find(&state.db, assignment.plan_id).await? else {
        return Ok(Json(none()));
    };
    let exercises = Exercise::list_for_plan(&state.db, plan.plan_id).await?;
    Ok(Json(CurrentPlanResponse {
        message: None,
        training_plan: Some(plan),
        assignment: Some(assignment),
        exercises,
    }))
}

#[instrument(skip(state, actor), fields(admin_id = actor.id))]
pub async fn admin_list_plans(
    State(state): State<AppState>,
    actor: Actor,
) -> AppResult<Json<Vec<TrainingPlan>>> {
    authorize(&actor, Capability::Admin)?;
    Ok(Json(TrainingPlan::list_all(&state.db).await?))
}

#[instrument(skip(state, actor), fields(admin_id = actor.id))]
pub async fn admin_get_plan(
    State(state): State<AppState>,
    actor: Actor,
    Path(plan_id): Path<i64>,
) -> AppResult<Json<PlanDetails>> {
    authorize(&actor, Capability::Admin)?;
    let plan = TrainingPlan::find(&state.db, plan_id)
        .await?
        .ok_or_else(|| AppError::not_found(PLAN_NOT_FOUND))?;
    Ok(Json(with_exercises(&state, plan).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{test_actor, Role};

    #[test]
    fn only_coaches_and_admins_author_plans() {
        assert!(require_author(&test_actor(1, Role::Admin)).is_ok());
        assert!(require_author(&test_actor(2, Role::Coach)).is_ok());
        let err = require_author(&test_actor(3, Role::User)).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn trainee_cannot_create_plans() {
        let req = PlanRequest {
            title: Some("Cut".into()),
            ..Default::default()
        };
        let err = create_plan(
            State(AppState::fake()),
            test_actor(3, Role::User),
            ClientMeta::default(),
            Json(req),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
    }

    mod db {
        use super::super::*;
        use crate::{access::Role, test_support};

        #[tokio::test]
        #[ignore = "needs DATABASE_URL"]
        async fn another_coachs_plan_is_invisible() {
            let mut state = AppState::fake();
            state.db = test_support::pool().await;
            let author = test_support::insert_user(&state.db, Role::Coach).await;
            let other = test_support::insert_user(&state.db, Role::Coach).await;
            let author = Actor::load(&state.db, author).await.unwrap().unwrap();
            let other = Actor::load(&state.db, other).await.unwrap().unwrap();

            let (_, Json(plan)) = create_plan(
                State(state.clone()),
                author,
                ClientMeta::default(),
                Json(PlanRequest {
                    title: Some("Hypertrophy".into()),
                    ..Default::default()
                }),
            )
            .await
            .unwrap();

            let err = get_plan(State(state.clone()), other.clone(), Path(plan.plan_id))
                .await
                .unwrap_err();
            assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
            let err = delete_plan(State(state), other, ClientMeta::default(), Path(plan.plan_id))
                .await
                .unwrap_err();
            assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        }
    }
}
