use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use tracing::{debug, instrument};

use super::{repo, AuditLogPage, AuditQuery};
use crate::{
    access::{authorize, Actor, Capability},
    error::AppResult,
    state::AppState,
};

pub fn routes() -> Router<AppState> {
    Router::new().route("/admin/audit-logs", get(list_audit_logs))
}

#[instrument(skip(state, actor, query), fields(admin_id = actor.id))]
pub async fn list_audit_logs(
    State(state): State<AppState>,
    actor: Actor,
    Query(query): Query<AuditQuery>,
) -> AppResult<Json<AuditLogPage>> {
    authorize(&actor, Capability::Admin)?;
    let filter = query.into_filter()?;
    debug!(?filter, "audit log query");

    let (logs, total) = repo::page(&state.db, &filter).await?;
    Ok(Json(AuditLogPage { logs, total }))
}
