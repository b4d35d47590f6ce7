use lazy_static::lazy_static;
use regex::Regex;
use serde_json::json;
use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use tracing::{info, instrument, warn};

use super::{
    dto::{RegisterRequest, ResetPasswordRequest},
    password::{check_strength, hash_password},
};
use crate::{
    access::Role,
    audit::{AuditAction, AuditRecorder, ClientMeta, EntityType, NewAuditEntry},
    error::{AppError, AppResult},
    mail::{self, templates, Mailer},
    settings,
    tokens::{self, NewToken, TokenKind},
    users::{
        repo::{ensure_coach_profile, NewUser, User},
        services::{email_taken, validate_name},
    },
};

/// Width of `users.email`.
pub const MAX_EMAIL_LEN: usize = 120;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Trims surrounding whitespace and checks the shape. Case is preserved:
/// invite matching compares addresses byte for byte.
pub(crate) fn normalize_email(raw: &str) -> AppResult<String> {
    let email = raw.trim();
    if !is_valid_email(email) {
        warn!(email = %email, "invalid email");
        return Err(AppError::validation("invalid email"));
    }
    if email.chars().count() > MAX_EMAIL_LEN {
        return Err(AppError::validation(format!(
            "email must be at most {MAX_EMAIL_LEN} characters"
        )));
    }
    Ok(email.to_string())
}

/// Creates an account, either through open signup or by redeeming an
/// invite. With an invite, token redemption, user insert and coach profile
/// commit together.
#[instrument(skip(db, audit, req, meta))]
pub async fn register(
    db: &PgPool,
    audit: &AuditRecorder,
    req: RegisterRequest,
    meta: &ClientMeta,
) -> AppResult<User> {
    let email = normalize_email(&req.email)?;
    check_strength(&req.password)?;
    validate_name("first name", &req.first_name)?;
    validate_name("last name", &req.last_name)?;

    if req.invite_token.is_none() && !settings::repo::get_or_create(db).await?.allow_registrations {
        return Err(AppError::forbidden("registrations are currently closed"));
    }
    if User::find_by_email(db, &email).await?.is_some() {
        warn!(email = %email, "email already registered");
        return Err(AppError::conflict("user with this email already exists"));
    }

    let hash = hash_password(&req.password)?;
    let now = OffsetDateTime::now_utc();

    let mut tx = db.begin().await?;
    let role = match req.invite_token.as_deref() {
        Some(token) => tokens::redeem_invite(&mut tx, token, &email, now)
            .await?
            .granted_role(),
        None => Role::User,
    };
    let user = User::create(
        &mut *tx,
        NewUser {
            email: &email,
            password_hash: &hash,
            first_name: req.first_name.trim(),
            last_name: req.last_name.trim(),
            role,
        },
    )
    .await
    .map_err(email_taken)?;
    if role == Role::Coach {
        ensure_coach_profile(&mut *tx, user.user_id).await?;
    }
    tx.commit().await?;

    info!(user_id = user.user_id, role = %role, "user registered");
    audit
        .record(
            NewAuditEntry::new(user.user_id, AuditAction::Create, EntityType::User, user.user_id)
                .details(json!({
                    "method": if req.invite_token.is_some() { "invite" } else { "signup" }
                }))
                .meta(meta),
        )
        .await;
    Ok(user)
}

/// Issues a reset token and mails the link. Unknown addresses succeed
/// silently so the endpoint does not reveal which accounts exist.
#[instrument(skip(db, mailer, raw_email, meta))]
pub async fn request_password_reset(
    db: &PgPool,
    mailer: &dyn Mailer,
    raw_email: &str,
    ttl: Duration,
    base_url: &str,
    meta: &ClientMeta,
) -> AppResult<()> {
    let email = normalize_email(raw_email)?;
    let Some(user) = User::find_by_email(db, &email).await? else {
        info!("password reset requested for unknown email");
        return Ok(());
    };

    let mut tx = db.begin().await?;
    let token = tokens::issue(
        &mut tx,
        NewToken::password_reset(user.user_id, ttl).with_meta(meta.clone()),
        OffsetDateTime::now_utc(),
    )
    .await?;
    tx.commit().await?;

    let html = templates::reset_html(base_url, &token.token, ttl.whole_minutes());
    mail::send_best_effort(mailer, &user.email, templates::RESET_SUBJECT, &html).await;
    Ok(())
}

/// Redeems a reset token and stores the new password in one transaction.
#[instrument(skip(db, audit, req, meta))]
pub async fn reset_password(
    db: &PgPool,
    audit: &AuditRecorder,
    req: ResetPasswordRequest,
    meta: &ClientMeta,
) -> AppResult<i64> {
    check_strength(&req.new_password)?;
    let hash = hash_password(&req.new_password)?;

    let mut tx = db.begin().await?;
    let token = tokens::redeem(
        &mut tx,
        TokenKind::PasswordReset,
        &req.token,
        OffsetDateTime::now_utc(),
    )
    .await?;
    let user_id = token
        .user_id
        .ok_or_else(|| AppError::not_found(tokens::INVALID_TOKEN))?;
    User::set_password(&mut *tx, user_id, &hash).await?;
    tx.commit().await?;

    info!(user_id, "password reset");
    audit
        .record(
            NewAuditEntry::new(user_id, AuditAction::Update, EntityType::User, user_id)
                .details(json!({ "action": "password_reset" }))
                .meta(meta),
        )
        .await;
    Ok(user_id)
}
