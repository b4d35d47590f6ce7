//! Append-only action log.
//!
//! Entries are written after the primary change has committed. A failing
//! sink never fails the request: the error is logged and dropped.

mod dto;
pub mod handlers;
mod meta;
pub mod repo;

pub use dto::{AuditLogPage, AuditLogView, AuditQuery, SortField, SortOrder};
pub use meta::ClientMeta;

use std::{fmt, sync::Arc};

use axum::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use tracing::{debug, error};

const MAX_DETAILS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Login,
    Logout,
    Assign,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Update => "update",
            AuditAction::Delete => "delete",
            AuditAction::Login => "login",
            AuditAction::Logout => "logout",
            AuditAction::Assign => "assign",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityType {
    User,
    UserProfile,
    CoachProfile,
    CoachClient,
    TrainingPlan,
    /// A client's current training plan, keyed by the client's user id.
    PlanAssignment,
    Exercise,
    MealPlan,
    Meal,
    Progress,
    BodyMetrics,
    InviteLink,
    Settings,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::User => "user",
            EntityType::UserProfile => "user_profile",
            EntityType::CoachProfile => "coach_profile",
            EntityType::CoachClient => "coach_client",
            EntityType::TrainingPlan => "training_plan",
            EntityType::PlanAssignment => "training_plan_assignment",
            EntityType::Exercise => "exercise",
            EntityType::MealPlan => "meal_plan",
            EntityType::Meal => "meal",
            EntityType::Progress => "progress",
            EntityType::BodyMetrics => "body_metrics",
            EntityType::InviteLink => "invite_link",
            EntityType::Settings => "settings",
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub user_id: i64,
    pub action: AuditAction,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub details: Option<String>,
    pub meta: ClientMeta,
}

impl NewAuditEntry {
    pub fn new(
        user_id: i64,
        action: AuditAction,
        entity_type: EntityType,
        entity_id: impl fmt::Display,
    ) -> Self {
        Self {
            user_id,
            action,
            entity_type,
            entity_id: entity_id.to_string(),
            details: None,
            meta: ClientMeta::default(),
        }
    }

    pub fn details(mut self, details: Value) -> Self {
        let text = details.to_string();
        self.details = Some(text.chars().take(MAX_DETAILS).collect());
        self
    }

    pub fn meta(mut self, meta: &ClientMeta) -> Self {
        self.meta = meta.clone();
        self
    }
}

/// Destination for audit entries.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, entry: &NewAuditEntry) -> anyhow::Result<()>;
}

pub struct PgAuditSink {
    db: PgPool,
}

impl PgAuditSink {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AuditSink for PgAuditSink {
    async fn append(&self, entry: &NewAuditEntry) -> anyhow::Result<()> {
        repo::insert(&self.db, entry).await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct AuditRecorder {
    sink: Arc<dyn AuditSink>,
}

impl AuditRecorder {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    /// Best-effort append. Returns whether the entry reached the sink.
    pub async fn record(&self, entry: NewAuditEntry) -> bool {
        match self.sink.append(&entry).await {
            Ok(()) => {
                debug!(
                    user_id = entry.user_id,
                    action = entry.action.as_str(),
                    entity_type = entry.entity_type.as_str(),
                    entity_id = %entry.entity_id,
                    "audit entry recorded"
                );
                true
            }
            Err(e) => {
                error!(
                    error = ?e,
                    user_id = entry.user_id,
                    action = entry.action.as_str(),
                    entity_type = entry.entity_type.as_str(),
                    entity_id = %entry.entity_id,
                    "failed to record audit entry"
                );
                false
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MemorySink {
        pub entries: Mutex<Vec<NewAuditEntry>>,
    }

    #[async_trait]
    impl AuditSink for MemorySink {
        async fn append(&self, entry: &NewAuditEntry) -> anyhow::Result<()> {
            self.entries.lock().unwrap().push(entry.clone());
            Ok(())
        }
    }

    pub struct BrokenSink;

    #[async_trait]
    impl AuditSink for BrokenSink {
        async fn append(&self, _entry: &NewAuditEntry) -> anyhow::Result<()> {
            anyhow::bail!("audit table unavailable")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fakes::{BrokenSink, MemorySink};
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn sink_outage_is_swallowed() {
        let recorder = AuditRecorder::new(Arc::new(BrokenSink));
        let entry = NewAuditEntry::new(1, AuditAction::Update, EntityType::User, 1);
        assert!(!recorder.record(entry).await);
    }

    #[tokio::test]
    async fn entries_reach_the_sink() {
        let sink = Arc::new(MemorySink::default());
        let recorder = AuditRecorder::new(sink.clone());
        let meta = ClientMeta {
            ip_address: Some("10.1.2.3".into()),
            user_agent: None,
        };
        recorder
            .record(
                NewAuditEntry::new(9, AuditAction::Delete, EntityType::User, 42)
                    .details(json!({ "email": "gone@example.com" }))
                    .meta(&meta),
            )
            .await;

        let entries = sink.entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].entity_id, "42");
        assert_eq!(entries[0].meta.ip_address.as_deref(), Some("10.1.2.3"));
        assert!(entries[0].details.as_deref().unwrap().contains("gone@example.com"));
    }

    #[test]
    fn details_are_capped() {
        let long = "x".repeat(2_000);
        let entry = NewAuditEntry::new(1, AuditAction::Create, EntityType::Meal, "m")
            .details(json!({ "note": long }));
        assert_eq!(entry.details.unwrap().chars().count(), MAX_DETAILS);
    }

    #[test]
    fn plan_assignments_are_not_logged_as_plans() {
        let entry = NewAuditEntry::new(2, AuditAction::Delete, EntityType::PlanAssignment, 17);
        assert_eq!(entry.entity_type.as_str(), "training_plan_assignment");
        assert_ne!(entry.entity_type.as_str(), EntityType::TrainingPlan.as_str());
        assert!(entry.entity_type.as_str().len() <= 50);
    }

    #[test]
    fn uuid_entity_ids_are_kept_verbatim() {
        let id = uuid::Uuid::new_v4();
        let entry = NewAuditEntry::new(1, AuditAction::Create, EntityType::MealPlan, id);
        assert_eq!(entry.entity_id, id.to_string());
    }
}
