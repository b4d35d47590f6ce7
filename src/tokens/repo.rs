use sqlx::{PgExecutor, Postgres, Transaction};
use time::OffsetDateTime;
use tracing::{debug, info, instrument};

use super::{
    generate_token, live_token_predicate, token_columns, NewToken, Token, TokenKind, TokenState,
    INVALID_TOKEN,
};
use crate::error::{AppError, AppResult};

/// Creates a token inside the caller's transaction.
///
/// Reset tokens lock the owning user row and retire every live reset token
/// of that user first, so at most one is ever redeemable. Invites are
/// serialized per email and refused while another invite for the same
/// address is still live.
#[instrument(skip(tx, new), fields(kind = new.kind.as_str()))]
pub async fn issue(
    tx: &mut Transaction<'_, Postgres>,
    new: NewToken,
    now: OffsetDateTime,
) -> AppResult<Token> {
    match new.kind {
        TokenKind::PasswordReset => {
            let user_id = new
                .user_id
                .ok_or_else(|| AppError::validation("reset token requires a user"))?;

            sqlx::query_scalar::<_, i64>("SELECT user_id FROM users WHERE user_id = $1 FOR UPDATE")
                .bind(user_id)
                .fetch_optional(&mut **tx)
                .await?
                .ok_or_else(|| AppError::not_found("user not found"))?;

            let retired = sqlx::query(concat!(
                "UPDATE auth_tokens SET is_used = TRUE, used_at = $1 WHERE ",
                live_token_predicate!(),
                " AND kind = $2 AND user_id = $3"
            ))
            .bind(now)
            .bind(TokenKind::PasswordReset.as_str())
            .bind(user_id)
            .execute(&mut **tx)
            .await?
            .rows_affected();

            if retired > 0 {
                debug!(user_id, retired, "previous reset tokens invalidated");
            }
        }
        TokenKind::Invite => {
            let email = new
                .email
                .as_deref()
                .ok_or_else(|| AppError::validation("invite requires an email"))?;

            sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
                .bind(email)
                .execute(&mut **tx)
                .await?;

            let pending: bool = sqlx::query_scalar(concat!(
                "SELECT EXISTS (SELECT 1 FROM auth_tokens WHERE ",
                live_token_predicate!(),
                " AND kind = $2 AND email = $3)"
            ))
            .bind(now)
            .bind(TokenKind::Invite.as_str())
            .bind(email)
            .fetch_one(&mut **tx)
            .await?;

            if pending {
                return Err(pending_invite());
            }
        }
    }

    let token = sqlx::query_as::<_, Token>(concat!(
        "INSERT INTO auth_tokens (kind, token, user_id, email, granted_role, created_by, \
         created_at, expires_at, ip_address, user_agent) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) RETURNING ",
        token_columns!()
    ))
    .bind(new.kind.as_str())
    .bind(generate_token())
    .bind(new.user_id)
    .bind(new.email.as_deref())
    .bind(new.granted_role.map(|r| r.as_str()))
    .bind(new.created_by)
    .bind(now)
    .bind(now + new.ttl)
    .bind(new.meta.ip_address.as_deref())
    .bind(new.meta.user_agent.as_deref())
    .fetch_one(&mut **tx)
    .await?;

    info!(token_id = token.token_id, expires_at = %token.expires_at, "token issued");
    Ok(token)
}

pub(crate) fn pending_invite() -> AppError {
    AppError::conflict("an active invitation for this email already exists")
}

/// Looks a token up without consuming it. Unknown, expired and used tokens
/// are indistinguishable to the caller.
#[instrument(skip(db, token), fields(kind = kind.as_str()))]
pub async fn validate(
    db: impl PgExecutor<'_>,
    kind: TokenKind,
    token: &str,
    now: OffsetDateTime,
) -> AppResult<Token> {
    let found = sqlx::query_as::<_, Token>(concat!(
        "SELECT ",
        token_columns!(),
        " FROM auth_tokens WHERE token = $1 AND kind = $2"
    ))
    .bind(token)
    .bind(kind.as_str())
    .fetch_optional(db)
    .await?;

    classify_lookup(found, now)
}

/// Outcome of a lookup: only a token that is live at `now` comes back.
pub(crate) fn classify_lookup(found: Option<Token>, now: OffsetDateTime) -> AppResult<Token> {
    match found {
        Some(t) => match t.state_at(now) {
            TokenState::Valid => Ok(t),
            state => {
                debug!(token_id = t.token_id, ?state, "token rejected");
                Err(AppError::not_found(INVALID_TOKEN))
            }
        },
        None => {
            debug!("token rejected: unknown");
            Err(AppError::not_found(INVALID_TOKEN))
        }
    }
}

/// Marks a live token used. The conditional update is the only gate, so of
/// two concurrent redemptions exactly one sees a row come back.
#[instrument(skip(tx, token), fields(kind = kind.as_str()))]
pub async fn redeem(
    tx: &mut Transaction<'_, Postgres>,
    kind: TokenKind,
    token: &str,
    now: OffsetDateTime,
) -> AppResult<Token> {
    let redeemed = sqlx::query_as::<_, Token>(concat!(
        "UPDATE auth_tokens SET is_used = TRUE, used_at = $1 WHERE ",
        live_token_predicate!(),
        " AND token = $2 AND kind = $3 RETURNING ",
        token_columns!()
    ))
    .bind(now)
    .bind(token)
    .bind(kind.as_str())
    .fetch_optional(&mut **tx)
    .await?;

    classify_redemption(redeemed)
}

/// Outcome of the conditional update. No row back means unknown, expired,
/// already used or lost to a concurrent redemption, all reported alike.
pub(crate) fn classify_redemption(redeemed: Option<Token>) -> AppResult<Token> {
    match redeemed {
        Some(t) => {
            info!(token_id = t.token_id, "token redeemed");
            Ok(t)
        }
        None => {
            debug!("redemption refused");
            Err(AppError::not_found(INVALID_TOKEN))
        }
    }
}

/// Redeems an invite for `email`. A live invite addressed to someone else is
/// reported as a validation error and stays redeemable.
#[instrument(skip(tx, token, email))]
pub async fn redeem_invite(
    tx: &mut Transaction<'_, Postgres>,
    token: &str,
    email: &str,
    now: OffsetDateTime,
) -> AppResult<Token> {
    let live = sqlx::query_as::<_, Token>(concat!(
        "SELECT ",
        token_columns!(),
        " FROM auth_tokens WHERE ",
        live_token_predicate!(),
        " AND token = $2 AND kind = $3 FOR UPDATE"
    ))
    .bind(now)
    .bind(token)
    .bind(TokenKind::Invite.as_str())
    .fetch_optional(&mut **tx)
    .await?
    .ok_or_else(|| AppError::not_found(INVALID_TOKEN))?;

    check_invite_email(&live, email)?;
    redeem(tx, TokenKind::Invite, token, now).await
}

/// Invites are bound to the address they were sent to, compared exactly.
pub(crate) fn check_invite_email(invite: &Token, email: &str) -> AppResult<()> {
    if invite.email.as_deref() != Some(email) {
        debug!(token_id = invite.token_id, "invite email mismatch");
        return Err(AppError::validation("email does not match invitation"));
    }
    Ok(())
}
