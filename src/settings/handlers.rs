use axum::{extract::State, routing::get, Json, Router};
use serde_json::json;
use tracing::{info, instrument};

use super::repo::{self, SettingsView, UpdateSettings};
use crate::{
    access::{authorize, Actor, Capability},
    audit::{AuditAction, ClientMeta, EntityType, NewAuditEntry},
    error::AppResult,
    state::AppState,
};

pub fn routes() -> Router<AppState> {
    Router::new().route("/admin/settings", get(get_settings).put(update_settings))
}

#[instrument(skip(state, actor), fields(admin_id = actor.id))]
pub async fn get_settings(
    State(state): State<AppState>,
    actor: Actor,
) -> AppResult<Json<SettingsView>> {
    authorize(&actor, Capability::Admin)?;
    let settings = repo::get_or_create(&state.db).await?;
    Ok(Json(settings.into()))
}

#[instrument(skip(state, actor, meta, payload), fields(admin_id = actor.id))]
pub async fn update_settings(
    State(state): State<AppState>,
    actor: Actor,
    meta: ClientMeta,
    Json(payload): Json<UpdateSettings>,
) -> AppResult<Json<SettingsView>> {
    authorize(&actor, Capability::Admin)?;
    payload.validate()?;

    let mut tx = state.db.begin().await?;
    let current = repo::get_or_create(&mut *tx).await?;
    let updated = repo::update(&mut *tx, current.setting_id, &payload, actor.id).await?;
    tx.commit().await?;

    info!(setting_id = updated.setting_id, "system settings updated");
    state
        .audit
        .record(
            NewAuditEntry::new(actor.id, AuditAction::Update, EntityType::Settings, updated.setting_id)
                .details(json!({
                    "maintenance_mode": updated.maintenance_mode,
                    "allow_registrations": updated.allow_registrations,
                }))
                .meta(&meta),
        )
        .await;
    Ok(Json(updated.into()))
}
