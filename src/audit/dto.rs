use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;

use crate::error::{AppError, AppResult};

pub const DEFAULT_PER_PAGE: i64 = 10;
pub const MAX_PER_PAGE: i64 = 100;
/// Largest page whose offset still fits an `i64` at [`MAX_PER_PAGE`].
pub const MAX_PAGE: i64 = i64::MAX / MAX_PER_PAGE;

/// Query string of `GET /admin/audit-logs`.
#[derive(Debug, Default, Deserialize)]
pub struct AuditQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
    pub action: Option<String>,
    pub entity_type: Option<String>,
    pub user_type: Option<String>,
    pub user_search: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    CreatedAt,
    Action,
    EntityType,
    EntityId,
}

impl SortField {
    pub const ALLOWED: [&'static str; 4] = ["created_at", "action", "entity_type", "entity_id"];

    pub fn parse(s: &str) -> AppResult<Self> {
        match s {
            "created_at" => Ok(SortField::CreatedAt),
            "action" => Ok(SortField::Action),
            "entity_type" => Ok(SortField::EntityType),
            "entity_id" => Ok(SortField::EntityId),
            _ => Err(AppError::validation(format!(
                "invalid sort field, must be one of: {}",
                Self::ALLOWED.join(", ")
            ))),
        }
    }

    pub fn column(&self) -> &'static str {
        match self {
            SortField::CreatedAt => "a.created_at",
            SortField::Action => "a.action",
            SortField::EntityType => "a.entity_type",
            SortField::EntityId => "a.entity_id",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn parse(s: &str) -> AppResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            _ => Err(AppError::validation("sort_order must be asc or desc")),
        }
    }

    pub fn sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Validated form of [`AuditQuery`].
#[derive(Debug, Clone)]
pub struct AuditFilter {
    pub page: i64,
    pub per_page: i64,
    pub sort_by: SortField,
    pub sort_order: SortOrder,
    pub action: Option<String>,
    pub entity_type: Option<String>,
    pub user_type: Option<String>,
    pub user_search: Option<String>,
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl AuditQuery {
    pub fn into_filter(self) -> AppResult<AuditFilter> {
        let sort_by = SortField::parse(self.sort_by.as_deref().unwrap_or("created_at"))?;
        let sort_order = SortOrder::parse(self.sort_order.as_deref().unwrap_or("desc"))?;
        let page = self.page.unwrap_or(1).max(1);
        if page > MAX_PAGE {
            return Err(AppError::validation(format!("page must be at most {MAX_PAGE}")));
        }
        Ok(AuditFilter {
            page,
            per_page: self
                .per_page
                .unwrap_or(DEFAULT_PER_PAGE)
                .clamp(1, MAX_PER_PAGE),
            sort_by,
            sort_order,
            action: non_empty(self.action),
            entity_type: non_empty(self.entity_type),
            user_type: non_empty(self.user_type),
            user_search: non_empty(self.user_search),
        })
    }
}

impl AuditFilter {
    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.per_page)
    }
}

#[derive(Debug, FromRow)]
pub struct AuditLogRow {
    pub id: i64,
    pub created_at: OffsetDateTime,
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    pub details: Option<String>,
    pub ip_address: Option<String>,
    pub user_id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub user_type: String,
}

#[derive(Debug, Serialize)]
pub struct AuditActor {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub user_type: String,
}

#[derive(Debug, Serialize)]
pub struct AuditLogView {
    pub id: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    pub details: Option<String>,
    pub ip_address: Option<String>,
    pub user: AuditActor,
}

impl From<AuditLogRow> for AuditLogView {
    fn from(r: AuditLogRow) -> Self {
        Self {
            id: r.id,
            created_at: r.created_at,
            action: r.action,
            entity_type: r.entity_type,
            entity_id: r.entity_id,
            details: r.details,
            ip_address: r.ip_address,
            user: AuditActor {
                id: r.user_id,
                first_name: r.first_name,
                last_name: r.last_name,
                email: r.email,
                user_type: r.user_type,
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AuditLogPage {
    pub logs: Vec<AuditLogView>,
    pub total: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn defaults() {
        let f = AuditQuery::default().into_filter().unwrap();
        assert_eq!(f.page, 1);
        assert_eq!(f.per_page, DEFAULT_PER_PAGE);
        assert_eq!(f.sort_by, SortField::CreatedAt);
        assert_eq!(f.sort_order, SortOrder::Desc);
        assert_eq!(f.offset(), 0);
    }

    #[test]
    fn unknown_sort_field_is_a_bad_request() {
        let q = AuditQuery {
            sort_by: Some("password_hash".into()),
            ..Default::default()
        };
        let err = q.into_filter().unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(err.to_string().contains("entity_id"));
    }

    #[test]
    fn every_allowed_field_parses() {
        for name in SortField::ALLOWED {
            assert!(SortField::parse(name).is_ok(), "{name}");
        }
    }

    #[test]
    fn paging_is_clamped() {
        let q = AuditQuery {
            page: Some(0),
            per_page: Some(1_000),
            ..Default::default()
        };
        let f = q.into_filter().unwrap();
        assert_eq!((f.page, f.per_page), (1, MAX_PER_PAGE));

        let q = AuditQuery {
            page: Some(3),
            per_page: Some(20),
            ..Default::default()
        };
        assert_eq!(q.into_filter().unwrap().offset(), 40);
    }

    #[test]
    fn huge_page_is_rejected_not_overflowed() {
        let q = AuditQuery {
            page: Some(i64::MAX),
            per_page: Some(100),
            ..Default::default()
        };
        let err = q.into_filter().unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        let q = AuditQuery {
            page: Some(MAX_PAGE),
            per_page: Some(MAX_PER_PAGE),
            ..Default::default()
        };
        let f = q.into_filter().unwrap();
        assert!(f.offset() > 0);
        assert_eq!(f.offset(), (MAX_PAGE - 1) * MAX_PER_PAGE);
    }

    #[test]
    fn blank_filters_are_ignored() {
        let q = AuditQuery {
            user_search: Some("   ".into()),
            action: Some(" login ".into()),
            ..Default::default()
        };
        let f = q.into_filter().unwrap();
        assert_eq!(f.user_search, None);
        assert_eq!(f.action.as_deref(), Some("login"));
    }
}
