use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::Redirect,
    routing::{get, post, put},
    Json, Router,
};
use serde_json::json;
use tracing::{info, instrument, warn};

use super::{
    dto::{
        bmi, BodyMetricsList, BodyMetricsRequest, BodyMetricsResponse, MessageResponse,
        ProgressList, ProgressRequest, ProgressResponse,
    },
    photos::{self, PhotoUpload},
    repo::{progress_entries, BodyMetric, ProgressRecord},
};
use crate::{
    access::{authorize, Actor, Capability},
    audit::{AuditAction, ClientMeta, EntityType, NewAuditEntry},
    error::{AppError, AppResult},
    state::AppState,
    training::repo::{Exercise, PlanAssignment},
    users::repo::UserProfile,
};

const RECORD_NOT_FOUND: &str = "progress record not found";
const METRIC_NOT_FOUND: &str = "body metrics record not found";
const HEIGHT_REQUIRED: &str = "height must be set in user profile before adding body metrics";

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/user/progress", get(list_progress).post(create_progress))
        .route(
            "/user/progress/:id",
            put(update_progress).delete(delete_progress),
        )
        .route("/user/body-metrics", get(list_metrics).post(create_metrics))
        .route("/user/body-metrics/:id", put(update_metrics))
        .merge(photo_router())
}

fn photo_router() -> Router<AppState> {
    Router::new()
        .route(
            "/user/body-metrics/:id/photo",
            post(upload_photo).get(get_photo),
        )
        .layer(DefaultBodyLimit::max(10 * 1024 * 1024)) // 10MB
}

async fn owned_record(state: &AppState, actor: &Actor, tracking_id: i64) -> AppResult<ProgressRecord> {
    let record = ProgressRecord::find(&state.db, tracking_id)
        .await?
        .ok_or_else(|| AppError::not_found(RECORD_NOT_FOUND))?;
    authorize(actor, Capability::Owner(record.user_id))?;
    Ok(record)
}

async fn owned_metric(state: &AppState, actor: &Actor, metric_id: i64) -> AppResult<BodyMetric> {
    let metric = BodyMetric::find(&state.db, metric_id)
        .await?
        .ok_or_else(|| AppError::not_found(METRIC_NOT_FOUND))?;
    authorize(actor, Capability::Owner(metric.user_id))?;
    Ok(metric)
}

/// Progress against the exercises of the current training plan.
#[instrument(skip(state, actor), fields(user_id = actor.id))]
pub async fn list_progress(
    State(state): State<AppState>,
    actor: Actor,
) -> AppResult<Json<ProgressList>> {
    let Some(assignment) = PlanAssignment::current(&state.db, actor.id).await? else {
        return Ok(Json(ProgressList {
            message: Some("no active training plan found"),
            progress_records: Vec::new(),
        }));
    };
    let progress_records = progress_entries(&state.db, actor.id, Some(assignment.plan_id)).await?;
    Ok(Json(ProgressList {
        message: None,
        progress_records,
    }))
}

#[instrument(skip(state, actor, meta, payload), fields(user_id = actor.id))]
pub async fn create_progress(
    State(state): State<AppState>,
    actor: Actor,
    meta: ClientMeta,
    Json(payload): Json<ProgressRequest>,
) -> AppResult<(StatusCode, Json<ProgressResponse>)> {
    payload.validate()?;
    let (exercise_id, sets, reps) = payload.required()?;
    let exercise = Exercise::find(&state.db, exercise_id)
        .await?
        .ok_or_else(|| AppError::not_found("exercise not found"))?;

    let record = ProgressRecord::create(&state.db, actor.id, exercise_id, (sets, reps), &payload).await?;
    info!(tracking_id = record.tracking_id, exercise_id, "progress recorded");
    state
        .audit
        .record(
            NewAuditEntry::new(actor.id, AuditAction::Create, EntityType::Progress, record.tracking_id)
                .details(json!({
                    "exercise": exercise.name,
                    "sets": sets,
                    "reps": reps,
                }))
                .meta(&meta),
        )
        .await;
    Ok((
        StatusCode::CREATED,
        Json(ProgressResponse {
            message: "progress recorded successfully",
            progress: record,
        }),
    ))
}

#[instrument(skip(state, actor, meta, payload), fields(user_id = actor.id))]
pub async fn update_progress(
    State(state): State<AppState>,
    actor: Actor,
    meta: ClientMeta,
    Path(tracking_id): Path<i64>,
    Json(payload): Json<ProgressRequest>,
) -> AppResult<Json<ProgressResponse>> {
    payload.validate()?;
    owned_record(&state, &actor, tracking_id).await?;

    let record = ProgressRecord::update(&state.db, tracking_id, &payload).await?;
    state
        .audit
        .record(
            NewAuditEntry::new(actor.id, AuditAction::Update, EntityType::Progress, tracking_id)
                .details(json!({
                    "sets": record.sets_completed,
                    "reps": record.reps_completed,
                    "rating": record.rating,
                }))
                .meta(&meta),
        )
        .await;
    Ok(Json(ProgressResponse {
        message: "progress updated successfully",
        progress: record,
    }))
}

#[instrument(skip(state, actor, meta), fields(user_id = actor.id))]
pub async fn delete_progress(
    State(state): State<AppState>,
    actor: Actor,
    meta: ClientMeta,
    Path(tracking_id): Path<i64>,
) -> AppResult<Json<MessageResponse>> {
    let record = owned_record(&state, &actor, tracking_id).await?;
    if !ProgressRecord::delete(&state.db, tracking_id).await? {
        return Err(AppError::not_found(RECORD_NOT_FOUND));
    }

    state
        .audit
        .record(
            NewAuditEntry::new(actor.id, AuditAction::Delete, EntityType::Progress, tracking_id)
                .details(json!({ "exercise_id": record.exercise_id }))
                .meta(&meta),
        )
        .await;
    Ok(Json(MessageResponse {
        message: "progress record deleted successfully",
    }))
}

#[instrument(skip(state, actor), fields(user_id = actor.id))]
pub async fn list_metrics(
    State(state): State<AppState>,
    actor: Actor,
) -> AppResult<Json<BodyMetricsList>> {
    Ok(Json(BodyMetricsList {
        body_metrics: BodyMetric::list_for_user(&state.db, actor.id).await?,
    }))
}

/// Height comes from the profile; BMI is derived when a weight is given.
#[instrument(skip(state, actor, meta, payload), fields(user_id = actor.id))]
pub async fn create_metrics(
    State(state): State<AppState>,
    actor: Actor,
    meta: ClientMeta,
    Json(payload): Json<BodyMetricsRequest>,
) -> AppResult<(StatusCode, Json<BodyMetricsResponse>)> {
    payload.validate()?;
    let height = UserProfile::height_of(&state.db, actor.id)
        .await?
        .ok_or_else(|| AppError::validation(HEIGHT_REQUIRED))?;
    let bmi_value = payload.weight.map(|w| bmi(w, height)).transpose()?;

    let metric = BodyMetric::create(&state.db, actor.id, height, bmi_value, &payload).await?;
    info!(metric_id = metric.metric_id, "body metrics recorded");
    state
        .audit
        .record(
            NewAuditEntry::new(actor.id, AuditAction::Create, EntityType::BodyMetrics, metric.metric_id)
                .details(json!({ "weight": metric.weight, "bmi": metric.bmi }))
                .meta(&meta),
        )
        .await;
    Ok((
        StatusCode::CREATED,
        Json(BodyMetricsResponse {
            message: "body metrics recorded successfully",
            body_metrics: metric,
        }),
    ))
}

/// A new weight recomputes BMI against the current profile height.
#[instrument(skip(state, actor, meta, payload), fields(user_id = actor.id))]
pub async fn update_metrics(
    State(state): State<AppState>,
    actor: Actor,
    meta: ClientMeta,
    Path(metric_id): Path<i64>,
    Json(payload): Json<BodyMetricsRequest>,
) -> AppResult<Json<BodyMetricsResponse>> {
    payload.validate()?;
    owned_metric(&state, &actor, metric_id).await?;

    let (height, bmi_value) = match payload.weight {
        Some(weight) => {
            let height = UserProfile::height_of(&state.db, actor.id)
                .await?
                .ok_or_else(|| AppError::validation(HEIGHT_REQUIRED))?;
            (Some(height), Some(bmi(weight, height)?))
        }
        None => (None, None),
    };

    let metric = BodyMetric::update(&state.db, metric_id, height, bmi_value, &payload).await?;
    state
        .audit
        .record(
            NewAuditEntry::new(actor.id, AuditAction::Update, EntityType::BodyMetrics, metric_id)
                .details(json!({ "weight": metric.weight, "bmi": metric.bmi }))
                .meta(&meta),
        )
        .await;
    Ok(Json(BodyMetricsResponse {
        message: "body metrics updated successfully",
        body_metrics: metric,
    }))
}

/// POST /user/body-metrics/:id/photo (multipart)
/// Field: photo (single image).
#[instrument(skip(state, actor, meta, mp), fields(user_id = actor.id))]
pub async fn upload_photo(
    State(state): State<AppState>,
    actor: Actor,
    meta: ClientMeta,
    Path(metric_id): Path<i64>,
    mut mp: Multipart,
) -> AppResult<Json<BodyMetricsResponse>> {
    let metric = owned_metric(&state, &actor, metric_id).await?;

    let mut upload = None;
    while let Ok(Some(field)) = mp.next_field().await {
        if field.name() != Some("photo") {
            continue;
        }
        let content_type = field
            .content_type()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "application/octet-stream".into());
        let body = field.bytes().await.map_err(|e| {
            warn!(error = %e, "photo upload interrupted");
            AppError::validation("could not read uploaded photo")
        })?;
        upload = Some(PhotoUpload { body, content_type });
        break;
    }
    let upload = upload.ok_or_else(|| AppError::validation("no photo provided"))?;

    let metric = photos::attach_photo(&state, &metric, upload).await?;
    state
        .audit
        .record(
            NewAuditEntry::new(actor.id, AuditAction::Update, EntityType::BodyMetrics, metric_id)
                .details(json!({ "action": "photo_upload" }))
                .meta(&meta),
        )
        .await;
    Ok(Json(BodyMetricsResponse {
        message: "photo uploaded successfully",
        body_metrics: metric,
    }))
}

/// Redirects to a short-lived presigned URL for the stored photo.
#[instrument(skip(state, actor), fields(user_id = actor.id))]
pub async fn get_photo(
    State(state): State<AppState>,
    actor: Actor,
    Path(metric_id): Path<i64>,
) -> AppResult<Redirect> {
    let metric = owned_metric(&state, &actor, metric_id).await?;
    let key = metric
        .photo_key
        .ok_or_else(|| AppError::not_found("no photo for this record"))?;
    let url = photos::presign(&state, &key).await?;
    Ok(Redirect::temporary(&url))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        access::{test_actor, Role},
        test_support,
    };

    async fn db_state() -> AppState {
        let mut state = AppState::fake();
        state.db = test_support::pool().await;
        state
    }

    async fn metric_for(db: &sqlx::PgPool, user_id: i64, height: f64) -> BodyMetric {
        sqlx::query("INSERT INTO user_profiles (user_id, height) VALUES ($1, $2)")
            .bind(user_id)
            .bind(height)
            .execute(db)
            .await
            .unwrap();
        let req = BodyMetricsRequest {
            weight: Some(80.0),
            ..Default::default()
        };
        BodyMetric::create(db, user_id, height, Some(bmi(80.0, height).unwrap()), &req)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn invalid_payloads_fail_before_touching_the_database() {
        let actor = test_actor(5, Role::User);
        let err = create_progress(
            State(AppState::fake()),
            actor.clone(),
            ClientMeta::default(),
            Json(ProgressRequest {
                rating: Some(9),
                ..Default::default()
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        let err = create_metrics(
            State(AppState::fake()),
            actor,
            ClientMeta::default(),
            Json(BodyMetricsRequest {
                weight: Some(12.0),
                ..Default::default()
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    #[ignore = "needs DATABASE_URL"]
    async fn metrics_need_profile_height() {
        let state = db_state().await;
        let user = test_support::insert_user(&state.db, Role::User).await;

        let err = create_metrics(
            State(state),
            test_actor(user, Role::User),
            ClientMeta::default(),
            Json(BodyMetricsRequest {
                weight: Some(70.0),
                ..Default::default()
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    #[ignore = "needs DATABASE_URL"]
    async fn foreign_metrics_are_hidden() {
        let state = db_state().await;
        let owner = test_support::insert_user(&state.db, Role::User).await;
        let other = test_support::insert_user(&state.db, Role::User).await;
        let metric = metric_for(&state.db, owner, 180.0).await;
        assert_eq!(metric.bmi, Some(24.69));

        let err = get_photo(
            State(state.clone()),
            test_actor(other, Role::User),
            Path(metric.metric_id),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);

        let err = get_photo(
            State(state),
            test_actor(owner, Role::User),
            Path(metric.metric_id),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    #[ignore = "needs DATABASE_URL"]
    async fn replacing_a_photo_moves_the_key() {
        let state = db_state().await;
        let owner = test_support::insert_user(&state.db, Role::User).await;
        let metric = metric_for(&state.db, owner, 170.0).await;

        let upload = || PhotoUpload {
            body: bytes::Bytes::from_static(b"\x89PNG"),
            content_type: "image/png".into(),
        };
        let first = photos::attach_photo(&state, &metric, upload()).await.unwrap();
        let second = photos::attach_photo(&state, &first, upload()).await.unwrap();
        assert_ne!(first.photo_key, second.photo_key);

        let redirect = get_photo(
            State(state),
            test_actor(owner, Role::User),
            Path(metric.metric_id),
        )
        .await
        .unwrap();
        let res = axum::response::IntoResponse::into_response(redirect);
        assert_eq!(res.status(), StatusCode::TEMPORARY_REDIRECT);
    }
}
