use axum::{
    extract::{FromRef, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use time::{Duration, OffsetDateTime};
use tracing::{info, instrument, warn};

use super::{
    dto::{
        AuthResponse, LoginRequest, MessageResponse, PasswordResetRequest, RefreshRequest,
        RegisterRequest, ResetPasswordRequest, SetupPasswordRequest, VerifyInviteQuery,
        VerifyInviteResponse,
    },
    jwt::JwtKeys,
    password::{check_strength, hash_password, verify_password},
    services,
};
use crate::{
    access::Actor,
    audit::{AuditAction, ClientMeta, EntityType, NewAuditEntry},
    error::{AppError, AppResult},
    state::AppState,
    tokens::{self, TokenKind},
    users::repo::{PublicUser, User},
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/logout", post(logout))
        .route("/auth/me", get(get_me))
        .route("/auth/request-password-reset", post(request_password_reset))
        .route("/auth/reset-password", post(reset_password))
        .route("/auth/verify-invite", get(verify_invite))
        .route("/auth/setup-password", post(setup_password))
}

fn issue_pair(state: &AppState, user: User) -> AppResult<AuthResponse> {
    let keys = JwtKeys::from_ref(state);
    Ok(AuthResponse {
        access_token: keys.sign_access(user.user_id)?,
        refresh_token: keys.sign_refresh(user.user_id)?,
        user: user.into(),
    })
}

#[instrument(skip(state, meta, payload))]
pub async fn register(
    State(state): State<AppState>,
    meta: ClientMeta,
    Json(payload): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<AuthResponse>)> {
    let user = services::register(&state.db, &state.audit, payload, &meta).await?;
    Ok((StatusCode::CREATED, Json(issue_pair(&state, user)?)))
}

#[instrument(skip(state, meta, payload))]
pub async fn login(
    State(state): State<AppState>,
    meta: ClientMeta,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    let email = services::normalize_email(&payload.email)?;
    let invalid = || AppError::Authentication("invalid email or password".into());

    let Some(user) = User::find_by_email(&state.db, &email).await? else {
        warn!(email = %email, "login unknown email");
        return Err(invalid());
    };
    if !verify_password(&payload.password, &user.password_hash)? {
        warn!(user_id = user.user_id, "login invalid password");
        return Err(invalid());
    }
    if !user.is_active {
        warn!(user_id = user.user_id, "login to deactivated account");
        return Err(AppError::forbidden("account is deactivated"));
    }

    let now = OffsetDateTime::now_utc();
    User::touch_last_login(&state.db, user.user_id, now).await?;
    state
        .audit
        .record(
            NewAuditEntry::new(user.user_id, AuditAction::Login, EntityType::User, user.user_id)
                .meta(&meta),
        )
        .await;

    info!(user_id = user.user_id, "user logged in");
    let user = User {
        last_login: Some(now),
        ..user
    };
    Ok(Json(issue_pair(&state, user)?))
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> AppResult<Json<AuthResponse>> {
    let keys = JwtKeys::from_ref(&state);
    let claims = keys.verify_refresh(&payload.refresh_token).map_err(|e| {
        warn!(error = %e, "refresh rejected");
        AppError::Authentication("invalid or expired token".into())
    })?;

    let user = User::find(&state.db, claims.sub)
        .await?
        .ok_or_else(|| AppError::Authentication("user not found".into()))?;
    if !user.is_active {
        return Err(AppError::forbidden("account is deactivated"));
    }
    Ok(Json(issue_pair(&state, user)?))
}

#[instrument(skip(state, actor, meta), fields(user_id = actor.id))]
pub async fn logout(
    State(state): State<AppState>,
    actor: Actor,
    meta: ClientMeta,
) -> Json<MessageResponse> {
    state
        .audit
        .record(
            NewAuditEntry::new(actor.id, AuditAction::Logout, EntityType::User, actor.id)
                .details(json!({ "email": actor.email }))
                .meta(&meta),
        )
        .await;
    Json(MessageResponse {
        message: "logged out successfully",
    })
}

#[instrument(skip(state, actor), fields(user_id = actor.id))]
pub async fn get_me(State(state): State<AppState>, actor: Actor) -> AppResult<Json<PublicUser>> {
    let user = User::find(&state.db, actor.id)
        .await?
        .ok_or_else(|| AppError::not_found("user not found"))?;
    Ok(Json(user.into()))
}

#[instrument(skip(state, meta, payload))]
pub async fn request_password_reset(
    State(state): State<AppState>,
    meta: ClientMeta,
    Json(payload): Json<PasswordResetRequest>,
) -> AppResult<Json<MessageResponse>> {
    services::request_password_reset(
        &state.db,
        state.mailer.as_ref(),
        &payload.email,
        Duration::minutes(state.config.tokens.reset_ttl_minutes),
        &state.config.public_base_url,
        &meta,
    )
    .await?;
    Ok(Json(MessageResponse {
        message: "if an account exists with this email, a password reset link has been sent",
    }))
}

#[instrument(skip(state, meta, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    meta: ClientMeta,
    Json(payload): Json<ResetPasswordRequest>,
) -> AppResult<Json<MessageResponse>> {
    services::reset_password(&state.db, &state.audit, payload, &meta).await?;
    Ok(Json(MessageResponse {
        message: "password has been reset successfully",
    }))
}

#[instrument(skip(state, query))]
pub async fn verify_invite(
    State(state): State<AppState>,
    Query(query): Query<VerifyInviteQuery>,
) -> AppResult<Json<VerifyInviteResponse>> {
    let token = query
        .token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::validation("no token provided"))?;
    let invite = tokens::validate(
        &state.db,
        TokenKind::Invite,
        &token,
        OffsetDateTime::now_utc(),
    )
    .await?;
    let user_type = invite.granted_role();
    Ok(Json(VerifyInviteResponse {
        valid: true,
        email: invite.email,
        user_type,
    }))
}

#[instrument(skip(state, actor, meta, payload), fields(user_id = actor.id))]
pub async fn setup_password(
    State(state): State<AppState>,
    actor: Actor,
    meta: ClientMeta,
    Json(payload): Json<SetupPasswordRequest>,
) -> AppResult<Json<MessageResponse>> {
    check_strength(&payload.password)?;
    let hash = hash_password(&payload.password)?;
    User::set_password(&state.db, actor.id, &hash).await?;

    state
        .audit
        .record(
            NewAuditEntry::new(actor.id, AuditAction::Update, EntityType::User, actor.id)
                .details(json!({ "action": "password_setup" }))
                .meta(&meta),
        )
        .await;
    Ok(Json(MessageResponse {
        message: "password set successfully",
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::AuthUser;
    use axum::{
        extract::FromRequestParts,
        http::{header, Request},
    };

    async fn extract(auth: Option<String>) -> Result<AuthUser, AppError> {
        let mut req = Request::builder().uri("/auth/me");
        if let Some(value) = auth {
            req = req.header(header::AUTHORIZATION, value);
        }
        let (mut parts, _) = req.body(()).unwrap().into_parts();
        AuthUser::from_request_parts(&mut parts, &AppState::fake()).await
    }

    #[tokio::test]
    async fn access_token_identifies_the_user() {
        let token = JwtKeys::from_ref(&AppState::fake()).sign_access(17).unwrap();
        let AuthUser(id) = extract(Some(format!("Bearer {token}"))).await.unwrap();
        assert_eq!(id, 17);
    }

    #[tokio::test]
    async fn missing_or_foreign_credentials_are_unauthorized() {
        let refresh = JwtKeys::from_ref(&AppState::fake()).sign_refresh(17).unwrap();
        for auth in [
            None,
            Some("Basic dXNlcjpwYXNz".to_string()),
            Some("Bearer not-a-jwt".to_string()),
            Some(format!("Bearer {refresh}")),
        ] {
            let err = extract(auth.clone()).await.err().unwrap();
            assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED, "{auth:?}");
        }
    }

    #[tokio::test]
    async fn verify_invite_requires_token() {
        for token in [None, Some(String::new())] {
            let err = verify_invite(State(AppState::fake()), Query(VerifyInviteQuery { token }))
                .await
                .unwrap_err();
            assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        }
    }

    #[tokio::test]
    async fn malformed_refresh_token_is_unauthorized() {
        let req = RefreshRequest {
            refresh_token: "garbage".into(),
        };
        let err = refresh(State(AppState::fake()), Json(req)).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
    }
}
