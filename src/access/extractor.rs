use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use tracing::warn;

use super::Actor;
use crate::{auth::jwt::AuthUser, error::AppError, state::AppState};

#[async_trait]
impl FromRequestParts<AppState> for Actor {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let AuthUser(user_id) = AuthUser::from_request_parts(parts, state).await?;

        let actor = Actor::load(&state.db, user_id)
            .await?
            .ok_or_else(|| AppError::Authentication("user not found".into()))?;

        if !actor.is_active {
            warn!(user_id, "request from deactivated account");
            return Err(AppError::forbidden("account is deactivated"));
        }
        Ok(actor)
    }
}
