use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, patch, post, put},
    Json, Router,
};
use serde_json::json;
use time::{Duration, OffsetDateTime};
use tracing::{info, instrument, warn};

use super::{
    deletion::{self, DeletedUser},
    dto::{
        AccountStatus, AdminUpdateUserRequest, InviteRequest, InviteResponse, InviteView,
        ProfileResponse, StatusRequest, UpdateProfileRequest, UpdateUserRequest, UserResponse,
    },
    repo::{admin_stats, AdminStats, PublicUser, User, UserProfile},
    services::{apply_role_change, email_taken, validate_name, validate_profile, validate_user_update},
};
use crate::{
    access::{authorize, Actor, Capability, Role},
    audit::{AuditAction, ClientMeta, EntityType, NewAuditEntry},
    auth::{password::hash_password, services::normalize_email},
    error::{AppError, AppResult},
    mail::{self, templates},
    state::AppState,
    tokens::{self, NewToken},
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/profile", get(get_profile).put(update_profile))
        .route("/user", put(update_user))
        .route("/admin/stats", get(get_admin_stats))
        .route("/admin/users", get(list_users))
        .route("/admin/users/:id", put(admin_update_user).delete(delete_user))
        .route("/admin/users/:id/status", patch(set_user_status))
        .route("/admin/invite-link", post(create_invite_link))
}

#[instrument(skip(state, actor), fields(user_id = actor.id))]
pub async fn get_profile(
    State(state): State<AppState>,
    actor: Actor,
) -> AppResult<Json<UserProfile>> {
    let profile = UserProfile::get_or_create(&state.db, actor.id).await?;
    Ok(Json(profile))
}

#[instrument(skip(state, actor, meta, payload), fields(user_id = actor.id))]
pub async fn update_profile(
    State(state): State<AppState>,
    actor: Actor,
    meta: ClientMeta,
    Json(payload): Json<UpdateProfileRequest>,
) -> AppResult<Json<ProfileResponse>> {
    validate_profile(&payload)?;

    let mut tx = state.db.begin().await?;
    UserProfile::get_or_create(&mut *tx, actor.id).await?;
    let profile = UserProfile::update(&mut *tx, actor.id, &payload).await?;
    tx.commit().await?;

    state
        .audit
        .record(
            NewAuditEntry::new(actor.id, AuditAction::Update, EntityType::UserProfile, profile.profile_id)
                .details(json!({ "updated_fields": payload.changed_fields() }))
                .meta(&meta),
        )
        .await;
    Ok(Json(ProfileResponse {
        message: "profile updated successfully",
        profile,
    }))
}

#[instrument(skip(state, actor, meta, payload), fields(user_id = actor.id))]
pub async fn update_user(
    State(state): State<AppState>,
    actor: Actor,
    meta: ClientMeta,
    Json(payload): Json<UpdateUserRequest>,
) -> AppResult<Json<UserResponse>> {
    validate_user_update(&payload)?;
    let password_hash = match payload.password.as_deref().filter(|p| !p.is_empty()) {
        Some(pw) => Some(hash_password(pw)?),
        None => None,
    };

    let mut tx = state.db.begin().await?;
    let user = User::update_account(
        &mut *tx,
        actor.id,
        payload.first_name.as_deref().map(str::trim),
        payload.last_name.as_deref().map(str::trim),
        payload.profile_image_url.as_deref(),
    )
    .await?;
    if let Some(hash) = &password_hash {
        User::set_password(&mut *tx, actor.id, hash).await?;
    }
    tx.commit().await?;

    state
        .audit
        .record(
            NewAuditEntry::new(actor.id, AuditAction::Update, EntityType::User, actor.id)
                .details(json!({ "password_changed": password_hash.is_some() }))
                .meta(&meta),
        )
        .await;
    Ok(Json(UserResponse {
        message: "user updated successfully",
        user: user.into(),
    }))
}

#[instrument(skip(state, actor), fields(admin_id = actor.id))]
pub async fn get_admin_stats(
    State(state): State<AppState>,
    actor: Actor,
) -> AppResult<Json<AdminStats>> {
    authorize(&actor, Capability::Admin)?;
    Ok(Json(admin_stats(&state.db).await?))
}

#[instrument(skip(state, actor), fields(admin_id = actor.id))]
pub async fn list_users(
    State(state): State<AppState>,
    actor: Actor,
) -> AppResult<Json<Vec<PublicUser>>> {
    authorize(&actor, Capability::Admin)?;
    let users = User::list(&state.db).await?;
    Ok(Json(users.into_iter().map(PublicUser::from).collect()))
}

#[instrument(skip(state, actor, meta, payload), fields(admin_id = actor.id))]
pub async fn admin_update_user(
    State(state): State<AppState>,
    actor: Actor,
    meta: ClientMeta,
    Path(user_id): Path<i64>,
    Json(payload): Json<AdminUpdateUserRequest>,
) -> AppResult<Json<UserResponse>> {
    authorize(&actor, Capability::Admin)?;
    if let Some(first) = &payload.first_name {
        validate_name("first name", first)?;
    }
    if let Some(last) = &payload.last_name {
        validate_name("last name", last)?;
    }
    let email = payload.email.as_deref().map(normalize_email).transpose()?;
    if user_id == actor.id && payload.user_type.is_some_and(|r| r != actor.role) {
        return Err(AppError::validation("you cannot change your own role"));
    }

    let mut tx = state.db.begin().await?;
    let current = User::lock(&mut tx, user_id)
        .await?
        .ok_or_else(|| AppError::not_found("user not found"))?;
    let updated = User::admin_update(
        &mut *tx,
        user_id,
        payload.first_name.as_deref().map(str::trim),
        payload.last_name.as_deref().map(str::trim),
        email.as_deref(),
        payload.user_type,
    )
    .await
    .map_err(email_taken)?;
    apply_role_change(&mut tx, user_id, current.user_type, updated.user_type).await?;
    tx.commit().await?;

    info!(user_id, from = %current.user_type, to = %updated.user_type, "user updated by admin");
    state
        .audit
        .record(
            NewAuditEntry::new(actor.id, AuditAction::Update, EntityType::User, user_id)
                .details(json!({
                    "email": updated.email,
                    "user_type": updated.user_type.as_str(),
                    "previous_user_type": current.user_type.as_str(),
                }))
                .meta(&meta),
        )
        .await;
    Ok(Json(UserResponse {
        message: "user updated successfully",
        user: updated.into(),
    }))
}

#[instrument(skip(state, actor, meta), fields(admin_id = actor.id))]
pub async fn delete_user(
    State(state): State<AppState>,
    actor: Actor,
    meta: ClientMeta,
    Path(user_id): Path<i64>,
) -> AppResult<Json<DeletedUser>> {
    let deleted = deletion::delete_user(&state.db, &state.audit, &actor, user_id, &meta).await?;

    for key in &deleted.photo_keys {
        if let Err(e) = state.storage.delete_object(key).await {
            warn!(error = ?e, %key, "orphaned progress photo left in storage");
        }
    }
    Ok(Json(deleted))
}

#[instrument(skip(state, actor, meta, payload), fields(admin_id = actor.id))]
pub async fn set_user_status(
    State(state): State<AppState>,
    actor: Actor,
    meta: ClientMeta,
    Path(user_id): Path<i64>,
    Json(payload): Json<StatusRequest>,
) -> AppResult<Json<UserResponse>> {
    authorize(&actor, Capability::Admin)?;
    let active = payload.status == AccountStatus::Active;

    let mut tx = state.db.begin().await?;
    let target = User::lock(&mut tx, user_id)
        .await?
        .ok_or_else(|| AppError::not_found("user not found"))?;
    if target.user_type == Role::Admin {
        return Err(AppError::forbidden("cannot change status of admin users"));
    }
    let user = User::set_active(&mut *tx, user_id, active).await?;
    tx.commit().await?;

    info!(user_id, active, "account status changed");
    state
        .audit
        .record(
            NewAuditEntry::new(actor.id, AuditAction::Update, EntityType::User, user_id)
                .details(json!({ "status": if active { "active" } else { "inactive" } }))
                .meta(&meta),
        )
        .await;
    Ok(Json(UserResponse {
        message: if active {
            "user activated successfully"
        } else {
            "user deactivated successfully"
        },
        user: user.into(),
    }))
}

#[instrument(skip(state, actor, meta, payload), fields(admin_id = actor.id))]
pub async fn create_invite_link(
    State(state): State<AppState>,
    actor: Actor,
    meta: ClientMeta,
    Json(payload): Json<InviteRequest>,
) -> AppResult<(StatusCode, Json<InviteResponse>)> {
    authorize(&actor, Capability::Admin)?;
    let email = normalize_email(&payload.email)?;
    if User::find_by_email(&state.db, &email).await?.is_some() {
        return Err(AppError::conflict("user with this email already exists"));
    }

    let ttl = Duration::hours(state.config.tokens.invite_ttl_hours);
    let mut tx = state.db.begin().await?;
    let invite = tokens::issue(
        &mut tx,
        NewToken::invite(&email, payload.user_type, actor.id, ttl).with_meta(meta.clone()),
        OffsetDateTime::now_utc(),
    )
    .await?;
    tx.commit().await?;

    let base = state.config.public_base_url.trim_end_matches('/');
    let html = templates::invite_html(base, &invite.token, payload.user_type, ttl.whole_days().max(1));
    let email_sent =
        mail::send_best_effort(state.mailer.as_ref(), &email, templates::INVITE_SUBJECT, &html).await;

    state
        .audit
        .record(
            NewAuditEntry::new(actor.id, AuditAction::Create, EntityType::InviteLink, invite.token_id)
                .details(json!({
                    "email": email,
                    "user_type": payload.user_type.as_str(),
                    "email_sent": email_sent,
                }))
                .meta(&meta),
        )
        .await;

    Ok((
        StatusCode::CREATED,
        Json(InviteResponse {
            message: if email_sent {
                "invite link created and sent"
            } else {
                "invite link created; email could not be sent"
            },
            invite: InviteView {
                invite_url: format!("{base}/invite-signup?token={}", invite.token),
                email,
                user_type: payload.user_type,
                token: invite.token,
                expires_at: invite.expires_at,
                email_sent,
            },
        }),
    ))
}
