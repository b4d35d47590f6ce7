use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};
use serde_json::json;
use tracing::{info, instrument};

use super::{
    dto::{
        settings_changes, split_specializations, AdminCoachProfileUpdate, AssignClientRequest, AssignMealPlanRequest, AssignMealPlanResponse,
        AssignPlanRequest, AssignPlanResponse, AssignmentList, AssignmentResponse, ClientInfo,
        ClientInfoResponse, ClientList, ClientSummary, CoachProfileResponse, CoachStats,
        DeactivateRequest, UpdateCoachProfile,
    },
    repo::{authored_plan_count, CoachClient, CoachProfile},
    services,
};
use crate::{
    access::{authorize, require_coach_of, Actor, Capability, Role},
    audit::{AuditAction, ClientMeta, EntityType, NewAuditEntry},
    error::{AppError, AppResult},
    meal_plans::repo::{MealPlan, MealPlanAssignment},
    progress::{
        dto::{BodyMetricsList, ProgressList},
        repo::{progress_entries, BodyMetric},
    },
    state::AppState,
    training::repo::{Exercise, PlanAssignment, TrainingPlan},
    users::repo::{ensure_coach_profile, User, UserProfile},
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/coach/profile", get(get_profile).put(update_profile))
        .route("/coach/settings", get(get_settings).put(update_settings))
        .route("/coach/stats", get(get_stats))
        .route("/coach/clients", get(list_clients))
        .route("/coach/clients/:id/info", get(client_info))
        .route("/coach/clients/:id/progress", get(client_progress))
        .route("/coach/clients/:id/metrics", get(client_metrics))
        .route("/coach/clients/:id/exercises", get(client_exercises))
        .route("/coach/clients/:id/assign-plan", post(assign_plan))
        .route("/coach/clients/:id/assign-meal-plan", post(assign_meal_plan))
        .route(
            "/admin/users/:id/coach-profile",
            get(admin_get_coach_profile).put(admin_update_coach_profile),
        )
        .route("/admin/assign-client", post(admin_assign_client))
        .route("/admin/coach-clients", get(admin_list_assignments))
        .route(
            "/admin/coach-clients/:coach_id/deactivate",
            patch(admin_deactivate_assignment),
        )
}

async fn own_profile(state: &AppState, actor: &Actor) -> AppResult<CoachProfile> {
    CoachProfile::find_by_user(&state.db, actor.id)
        .await?
        .ok_or_else(|| AppError::not_found("coach profile not found"))
}

/// Returns the caller's coach profile, creating it on first access.
#[instrument(skip(state, actor), fields(user_id = actor.id))]
pub async fn get_profile(State(state): State<AppState>, actor: Actor) -> AppResult<Json<CoachProfile>> {
    if actor.role != Role::Coach {
        return Err(AppError::forbidden("access denied: user is not a coach"));
    }
    if ensure_coach_profile(&state.db, actor.id).await? {
        info!("coach profile created on first access");
    }
    Ok(Json(own_profile(&state, &actor).await?))
}

#[instrument(skip(state, actor, meta, payload), fields(user_id = actor.id))]
pub async fn update_profile(
    State(state): State<AppState>,
    actor: Actor,
    meta: ClientMeta,
    Json(payload): Json<UpdateCoachProfile>,
) -> AppResult<Json<CoachProfileResponse>> {
    authorize(&actor, Capability::Coach)?;
    payload.validate()?;
    let current = own_profile(&state, &actor).await?;

    let profile = CoachProfile::update(&state.db, current.profile_id, &payload, None).await?;
    state
        .audit
        .record(
            NewAuditEntry::new(actor.id, AuditAction::Update, EntityType::CoachProfile, profile.profile_id)
                .details(json!({ "changed_fields": payload.changed_fields() }))
                .meta(&meta),
        )
        .await;
    Ok(Json(CoachProfileResponse {
        message: "coach profile updated successfully",
        profile,
    }))
}

/// Settings view of the caller's coach profile. Unlike `/coach/profile`
/// nothing is created on access.
#[instrument(skip(state, actor), fields(user_id = actor.id))]
pub async fn get_settings(State(state): State<AppState>, actor: Actor) -> AppResult<Json<CoachProfile>> {
    authorize(&actor, Capability::Coach)?;
    Ok(Json(own_profile(&state, &actor).await?))
}

/// Audited with the old and new value of every field that changed; a
/// no-op save leaves no audit row.
#[instrument(skip(state, actor, meta, payload), fields(user_id = actor.id))]
pub async fn update_settings(
    State(state): State<AppState>,
    actor: Actor,
    meta: ClientMeta,
    Json(payload): Json<UpdateCoachProfile>,
) -> AppResult<Json<CoachProfileResponse>> {
    authorize(&actor, Capability::Coach)?;
    payload.validate()?;
    let before = own_profile(&state, &actor).await?;

    let profile = CoachProfile::update(&state.db, before.profile_id, &payload, None).await?;
    let changes = settings_changes(&before, &profile);
    if !changes.is_empty() {
        state
            .audit
            .record(
                NewAuditEntry::new(actor.id, AuditAction::Update, EntityType::CoachProfile, profile.profile_id)
                    .details(json!({ "settings": changes }))
                    .meta(&meta),
            )
            .await;
    }
    Ok(Json(CoachProfileResponse {
        message: "coach settings updated successfully",
        profile,
    }))
}

/// Admin views of a coach profile address the coach by user id.
pub(crate) fn check_coach_target(role: Option<Role>) -> AppResult<()> {
    match role {
        None => Err(AppError::not_found("user not found")),
        Some(Role::Coach) => Ok(()),
        Some(_) => Err(AppError::validation("user is not a coach")),
    }
}

#[instrument(skip(state, actor), fields(admin_id = actor.id))]
pub async fn admin_get_coach_profile(
    State(state): State<AppState>,
    actor: Actor,
    Path(user_id): Path<i64>,
) -> AppResult<Json<CoachProfile>> {
    authorize(&actor, Capability::Admin)?;
    let target = User::find(&state.db, user_id).await?;
    check_coach_target(target.map(|u| u.user_type))?;

    CoachProfile::find_by_user(&state.db, user_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found("coach profile not found"))
}

/// Creates the profile when a coach has none yet.
#[instrument(skip(state, actor, meta, payload), fields(admin_id = actor.id))]
pub async fn admin_update_coach_profile(
    State(state): State<AppState>,
    actor: Actor,
    meta: ClientMeta,
    Path(user_id): Path<i64>,
    Json(payload): Json<AdminCoachProfileUpdate>,
) -> AppResult<Json<CoachProfileResponse>> {
    authorize(&actor, Capability::Admin)?;
    payload.validate()?;
    let target = User::find(&state.db, user_id).await?;
    check_coach_target(target.map(|u| u.user_type))?;

    if ensure_coach_profile(&state.db, user_id).await? {
        info!(user_id, "coach profile created by admin");
    }
    let current = CoachProfile::find_by_user(&state.db, user_id)
        .await?
        .ok_or_else(|| AppError::not_found("coach profile not found"))?;
    let profile =
        CoachProfile::update(&state.db, current.profile_id, &payload.profile, payload.rating).await?;

    state
        .audit
        .record(
            NewAuditEntry::new(actor.id, AuditAction::Update, EntityType::CoachProfile, profile.profile_id)
                .details(json!({
                    "coach_user_id": user_id,
                    "changed_fields": payload.changed_fields(),
                }))
                .meta(&meta),
        )
        .await;
    Ok(Json(CoachProfileResponse {
        message: "coach profile updated successfully",
        profile,
    }))
}

#[instrument(skip(state, actor), fields(user_id = actor.id))]
pub async fn get_stats(State(state): State<AppState>, actor: Actor) -> AppResult<Json<CoachStats>> {
    authorize(&actor, Capability::Coach)?;
    let profile = own_profile(&state, &actor).await?;

    Ok(Json(CoachStats {
        total_clients: CoachClient::count_active(&state.db, profile.profile_id).await?,
        active_programs: authored_plan_count(&state.db, actor.id).await?,
        average_rating: profile.rating,
        experience_years: profile.experience_years,
        specializations: split_specializations(&profile.specializations),
    }))
}

/// Active clients with profile, current plan and latest body metrics.
#[instrument(skip(state, actor), fields(user_id = actor.id))]
pub async fn list_clients(State(state): State<AppState>, actor: Actor) -> AppResult<Json<ClientList>> {
    authorize(&actor, Capability::Coach)?;
    let profile = own_profile(&state, &actor).await?;

    let rows = CoachClient::active_clients(&state.db, profile.profile_id).await?;
    let mut clients = Vec::with_capacity(rows.len());
    for row in rows {
        let user_profile = UserProfile::find(&state.db, row.client_id).await?;
        let plan = PlanAssignment::current(&state.db, row.client_id).await?;
        let metrics = BodyMetric::latest(&state.db, row.client_id).await?;
        clients.push(ClientSummary::new(row, user_profile, plan.map(|p| p.plan_id), metrics));
    }
    clients.sort_by(|a, b| a.full_name.cmp(&b.full_name));

    Ok(Json(ClientList {
        total_count: clients.len(),
        clients,
    }))
}

#[instrument(skip(state, actor), fields(user_id = actor.id))]
pub async fn client_info(
    State(state): State<AppState>,
    actor: Actor,
    Path(client_id): Path<i64>,
) -> AppResult<Json<ClientInfoResponse>> {
    require_coach_of(&state.db, &actor, client_id).await?;
    let client = User::find(&state.db, client_id)
        .await?
        .ok_or_else(|| AppError::not_found("client not found"))?;
    Ok(Json(ClientInfoResponse {
        client: ClientInfo {
            client_id: client.user_id,
            name: format!("{} {}", client.first_name, client.last_name),
            email: client.email,
            profile_image_url: client.profile_image_url,
        },
    }))
}

#[instrument(skip(state, actor), fields(user_id = actor.id))]
pub async fn client_progress(
    State(state): State<AppState>,
    actor: Actor,
    Path(client_id): Path<i64>,
) -> AppResult<Json<ProgressList>> {
    require_coach_of(&state.db, &actor, client_id).await?;
    Ok(Json(ProgressList {
        message: None,
        progress_records: progress_entries(&state.db, client_id, None).await?,
    }))
}

#[instrument(skip(state, actor), fields(user_id = actor.id))]
pub async fn client_metrics(
    State(state): State<AppState>,
    actor: Actor,
    Path(client_id): Path<i64>,
) -> AppResult<Json<BodyMetricsList>> {
    require_coach_of(&state.db, &actor, client_id).await?;
    Ok(Json(BodyMetricsList {
        body_metrics: BodyMetric::list_for_user(&state.db, client_id).await?,
    }))
}

#[instrument(skip(state, actor), fields(user_id = actor.id))]
pub async fn client_exercises(
    State(state): State<AppState>,
    actor: Actor,
    Path(client_id): Path<i64>,
) -> AppResult<Json<serde_json::Value>> {
    require_coach_of(&state.db, &actor, client_id).await?;
    let exercises = match PlanAssignment::current(&state.db, client_id).await? {
        Some(plan) => Exercise::list_for_plan(&state.db, plan.plan_id).await?,
        None => Vec::new(),
    };
    Ok(Json(json!({ "exercises": exercises })))
}

/// Gives the client one of the coach's training plans, replacing any
/// previous one. Without `plan_id` the current assignment is removed.
#[instrument(skip(state, actor, meta, payload), fields(user_id = actor.id))]
pub async fn assign_plan(
    State(state): State<AppState>,
    actor: Actor,
    meta: ClientMeta,
    Path(client_id): Path<i64>,
    Json(payload): Json<AssignPlanRequest>,
) -> AppResult<Json<AssignPlanResponse>> {
    require_coach_of(&state.db, &actor, client_id).await?;

    let Some(plan_id) = payload.plan_id else {
        let mut tx = state.db.begin().await?;
        let removed = PlanAssignment::clear(&mut tx, client_id).await?;
        tx.commit().await?;

        if !removed.is_empty() {
            state
                .audit
                .record(
                    NewAuditEntry::new(actor.id, AuditAction::Delete, EntityType::PlanAssignment, client_id)
                        .details(json!({ "client_id": client_id, "removed_assignments": removed }))
                        .meta(&meta),
                )
                .await;
        }
        return Ok(Json(AssignPlanResponse {
            message: "training plan assignment removed",
            assignment: None,
        }));
    };

    let plan = TrainingPlan::find(&state.db, plan_id)
        .await?
        .filter(|p| p.coach_id == actor.id)
        .ok_or_else(|| AppError::not_found("training plan not found or not owned by you"))?;

    let mut tx = state.db.begin().await?;
    let (assignment, removed) = PlanAssignment::replace(&mut tx, client_id, plan_id).await?;
    tx.commit().await?;

    info!(client_id, plan_id, "training plan assigned");
    state
        .audit
        .record(
            NewAuditEntry::new(actor.id, AuditAction::Assign, EntityType::TrainingPlan, plan_id)
                .details(json!({
                    "client_id": client_id,
                    "title": plan.title,
                    "replaced_assignments": removed,
                }))
                .meta(&meta),
        )
        .await;
    Ok(Json(AssignPlanResponse {
        message: "training plan assigned successfully",
        assignment: Some(assignment),
    }))
}

#[instrument(skip(state, actor, meta, payload), fields(user_id = actor.id))]
pub async fn assign_meal_plan(
    State(state): State<AppState>,
    actor: Actor,
    meta: ClientMeta,
    Path(client_id): Path<i64>,
    Json(payload): Json<AssignMealPlanRequest>,
) -> AppResult<Json<AssignMealPlanResponse>> {
    let plan_id = payload
        .meal_plan_id
        .ok_or_else(|| AppError::validation("meal plan id is required"))?;
    require_coach_of(&state.db, &actor, client_id).await?;

    let plan = MealPlan::find(&state.db, plan_id)
        .await?
        .filter(|p| p.coach_id == actor.id)
        .ok_or_else(|| AppError::not_found("meal plan not found or not owned by you"))?;

    let mut tx = state.db.begin().await?;
    let (assignment, removed) = MealPlanAssignment::replace(&mut tx, client_id, plan_id).await?;
    tx.commit().await?;

    info!(client_id, %plan_id, "meal plan assigned");
    state
        .audit
        .record(
            NewAuditEntry::new(actor.id, AuditAction::Assign, EntityType::MealPlan, plan_id)
                .details(json!({
                    "client_id": client_id,
                    "name": plan.name,
                    "replaced_assignments": removed,
                }))
                .meta(&meta),
        )
        .await;
    Ok(Json(AssignMealPlanResponse {
        message: "meal plan assigned successfully",
        assignment,
    }))
}

#[instrument(skip(state, actor, meta, payload), fields(admin_id = actor.id))]
pub async fn admin_assign_client(
    State(state): State<AppState>,
    actor: Actor,
    meta: ClientMeta,
    Json(payload): Json<AssignClientRequest>,
) -> AppResult<(StatusCode, Json<AssignmentResponse>)> {
    authorize(&actor, Capability::Admin)?;
    let assigned = services::assign_client(&state.db, payload.coach_id, payload.client_id).await?;

    state
        .audit
        .record(
            NewAuditEntry::new(actor.id, AuditAction::Assign, EntityType::CoachClient, assigned.active.id)
                .details(json!({
                    "coach_id": payload.coach_id,
                    "client_id": payload.client_id,
                    "replaced": assigned.replaced.as_ref().map(|r| r.id),
                }))
                .meta(&meta),
        )
        .await;
    Ok((
        StatusCode::CREATED,
        Json(AssignmentResponse {
            message: "client assigned successfully",
            assignment: assigned.active,
        }),
    ))
}

#[instrument(skip(state, actor), fields(admin_id = actor.id))]
pub async fn admin_list_assignments(
    State(state): State<AppState>,
    actor: Actor,
) -> AppResult<Json<AssignmentList>> {
    authorize(&actor, Capability::Admin)?;
    Ok(Json(AssignmentList {
        assignments: CoachClient::list_all(&state.db).await?,
    }))
}

/// `coach_id` is the coach profile id, as listed by the overview.
#[instrument(skip(state, actor, meta, payload), fields(admin_id = actor.id))]
pub async fn admin_deactivate_assignment(
    State(state): State<AppState>,
    actor: Actor,
    meta: ClientMeta,
    Path(coach_id): Path<i64>,
    Json(payload): Json<DeactivateRequest>,
) -> AppResult<Json<AssignmentResponse>> {
    authorize(&actor, Capability::Admin)?;
    let assignment = CoachClient::deactivate(&state.db, coach_id, payload.client_id)
        .await?
        .ok_or_else(|| AppError::not_found("active assignment not found"))?;

    info!(coach_id, client_id = payload.client_id, "coach assignment deactivated");
    state
        .audit
        .record(
            NewAuditEntry::new(actor.id, AuditAction::Update, EntityType::CoachClient, assignment.id)
                .details(json!({
                    "coach_id": coach_id,
                    "client_id": payload.client_id,
                    "status": "inactive",
                }))
                .meta(&meta),
        )
        .await;
    Ok(Json(AssignmentResponse {
        message: "coach assignment deactivated successfully",
        assignment,
    }))
}
