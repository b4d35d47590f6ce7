use sqlx::{PgExecutor, PgPool, Postgres, QueryBuilder};

use super::{
    dto::{AuditFilter, AuditLogRow},
    AuditLogView, NewAuditEntry,
};

pub async fn insert(db: impl PgExecutor<'_>, e: &NewAuditEntry) -> sqlx::Result<i64> {
    sqlx::query_scalar(
        r#"
        INSERT INTO audit_logs (user_id, action, entity_type, entity_id, details, ip_address, user_agent)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING id
        "#,
    )
    .bind(e.user_id)
    .bind(e.action.as_str())
    .bind(e.entity_type.as_str())
    .bind(&e.entity_id)
    .bind(e.details.as_deref())
    .bind(e.meta.ip_address.as_deref())
    .bind(e.meta.user_agent.as_deref())
    .fetch_one(db)
    .await
}

/// Escapes `LIKE` metacharacters so the search text matches literally.
fn like_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, f: &AuditFilter) {
    qb.push(" FROM audit_logs a JOIN users u ON u.user_id = a.user_id WHERE TRUE");
    if let Some(action) = &f.action {
        qb.push(" AND a.action = ").push_bind(action.clone());
    }
    if let Some(entity_type) = &f.entity_type {
        qb.push(" AND a.entity_type = ").push_bind(entity_type.clone());
    }
    if let Some(user_type) = &f.user_type {
        qb.push(" AND u.user_type = ").push_bind(user_type.clone());
    }
    if let Some(search) = &f.user_search {
        let pattern = format!("%{}%", like_escape(search));
        qb.push(" AND (u.first_name ILIKE ")
            .push_bind(pattern.clone())
            .push(r" ESCAPE '\' OR u.last_name ILIKE ")
            .push_bind(pattern.clone())
            .push(r" ESCAPE '\' OR u.email ILIKE ")
            .push_bind(pattern.clone())
            .push(r" ESCAPE '\' OR (u.first_name || ' ' || u.last_name) ILIKE ")
            .push_bind(pattern)
            .push(r" ESCAPE '\')");
    }
}

/// One page of audit entries plus the total matching the filter.
pub async fn page(db: &PgPool, f: &AuditFilter) -> sqlx::Result<(Vec<AuditLogView>, i64)> {
    let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*)");
    push_filters(&mut count, f);
    let total: i64 = count.build_query_scalar().fetch_one(db).await?;

    let mut rows = QueryBuilder::<Postgres>::new(
        "SELECT a.id, a.created_at, a.action, a.entity_type, a.entity_id, a.details, \
         a.ip_address, u.user_id, u.first_name, u.last_name, u.email, u.user_type",
    );
    push_filters(&mut rows, f);
    // column and direction come from closed enums, never from the request text
    rows.push(" ORDER BY ")
        .push(f.sort_by.column())
        .push(" ")
        .push(f.sort_order.sql())
        .push(", a.id ")
        .push(f.sort_order.sql());
    rows.push(" LIMIT ")
        .push_bind(f.per_page)
        .push(" OFFSET ")
        .push_bind(f.offset());

    let logs = rows
        .build_query_as::<AuditLogRow>()
        .fetch_all(db)
        .await?
        .into_iter()
        .map(AuditLogView::from)
        .collect();
    Ok((logs, total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        access::Role,
        audit::{AuditAction, AuditQuery, EntityType},
        test_support,
    };

    #[test]
    fn search_metacharacters_match_literally() {
        assert_eq!(like_escape("a_b"), r"a\_b");
        assert_eq!(like_escape("100%"), r"100\%");
        assert_eq!(like_escape(r"c:\x"), r"c:\\x");
        assert_eq!(like_escape("smith"), "smith");
    }

    #[tokio::test]
    #[ignore = "needs DATABASE_URL"]
    async fn filters_and_sorts() {
        let db = test_support::pool().await;
        let admin = test_support::insert_user(&db, Role::Admin).await;
        for id in ["b", "a", "c"] {
            insert(
                &db,
                &NewAuditEntry::new(admin, AuditAction::Create, EntityType::Meal, id),
            )
            .await
            .unwrap();
        }
        let email: String = sqlx::query_scalar("SELECT email FROM users WHERE user_id = $1")
            .bind(admin)
            .fetch_one(&db)
            .await
            .unwrap();

        let f = AuditQuery {
            user_search: Some(email),
            entity_type: Some("meal".into()),
            sort_by: Some("entity_id".into()),
            sort_order: Some("asc".into()),
            ..Default::default()
        }
        .into_filter()
        .unwrap();
        let (logs, total) = page(&db, &f).await.unwrap();
        assert_eq!(total, 3);
        let ids: Vec<_> = logs.iter().map(|l| l.entity_id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
        assert_eq!(logs[0].user.id, admin);
    }
}
