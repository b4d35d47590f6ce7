//! Removal of a user together with every row that depends on it.
//!
//! Foreign keys to `users` do not cascade, so the order in [`CASCADE`] is
//! what makes the final `DELETE FROM users` legal. All steps share one
//! transaction with the target row locked; any failing step rolls the whole
//! removal back.

use serde::Serialize;
use serde_json::json;
use sqlx::PgPool;
use tracing::{debug, error, info, instrument, warn};

use super::repo::User;
use crate::{
    access::{authorize, Actor, Capability, Role},
    audit::{AuditAction, AuditRecorder, ClientMeta, EntityType, NewAuditEntry},
    error::{AppError, AppResult},
};

pub const STILL_REFERENCED: &str = "user is still referenced by other records";

/// One statement of the cascade. `$1` is the user id.
#[derive(Debug, Clone, Copy)]
pub struct CascadeStep {
    pub name: &'static str,
    pub sql: &'static str,
}

pub const CASCADE: [CascadeStep; 11] = [
    CascadeStep {
        name: "client assignments",
        sql: "DELETE FROM coach_clients WHERE client_id = $1",
    },
    CascadeStep {
        name: "coach assignments",
        sql: "DELETE FROM coach_clients WHERE coach_id IN \
              (SELECT profile_id FROM coach_profiles WHERE user_id = $1)",
    },
    CascadeStep {
        name: "training plan assignments",
        sql: "DELETE FROM user_training_plans WHERE user_id = $1",
    },
    CascadeStep {
        name: "meal plan assignments",
        sql: "DELETE FROM user_meal_plans WHERE user_id = $1",
    },
    CascadeStep {
        name: "progress records",
        sql: "DELETE FROM progress_tracking WHERE user_id = $1",
    },
    CascadeStep {
        name: "body metrics",
        sql: "DELETE FROM body_metrics WHERE user_id = $1",
    },
    CascadeStep {
        name: "coach profile",
        sql: "DELETE FROM coach_profiles WHERE user_id = $1",
    },
    CascadeStep {
        name: "user profile",
        sql: "DELETE FROM user_profiles WHERE user_id = $1",
    },
    CascadeStep {
        name: "auth tokens",
        sql: "DELETE FROM auth_tokens WHERE user_id = $1 OR created_by = $1",
    },
    CascadeStep {
        name: "audit entries",
        sql: "DELETE FROM audit_logs WHERE user_id = $1",
    },
    CascadeStep {
        name: "user",
        sql: "DELETE FROM users WHERE user_id = $1",
    },
];

const COMMIT: &str = "commit";

/// Who may be removed at all: the row must exist and must not be an admin.
pub(crate) fn check_deletable(user_id: i64, role: Option<Role>) -> AppResult<()> {
    match role {
        None => {
            warn!(user_id, "attempt to delete non-existent user");
            Err(AppError::not_found("user not found"))
        }
        Some(Role::Admin) => {
            warn!(user_id, "attempt to delete admin user");
            Err(AppError::forbidden("cannot delete admin users"))
        }
        Some(_) => Ok(()),
    }
}

/// Any failure after the first cascade statement, the commit included,
/// leaves the user in place and is reported as a conflict.
pub(crate) fn cascade_aborted(stage: &str, user_id: i64, e: &sqlx::Error) -> AppError {
    error!(error = %e, step = stage, user_id, "user deletion aborted");
    AppError::conflict(STILL_REFERENCED)
}

#[derive(Debug, Serialize)]
pub struct DeletedUser {
    pub user_id: i64,
    pub email: String,
    pub user_type: Role,
    /// Object-storage keys of progress photos that belonged to the user.
    #[serde(skip)]
    pub photo_keys: Vec<String>,
}

#[instrument(skip(db, audit, actor, meta), fields(admin_id = actor.id))]
pub async fn delete_user(
    db: &PgPool,
    audit: &AuditRecorder,
    actor: &Actor,
    user_id: i64,
    meta: &ClientMeta,
) -> AppResult<DeletedUser> {
    authorize(actor, Capability::Admin)?;

    let mut tx = db.begin().await?;
    let target = User::lock(&mut tx, user_id).await?;
    check_deletable(user_id, target.as_ref().map(|u| u.user_type))?;
    let target = target.ok_or_else(|| AppError::not_found("user not found"))?;

    let photo_keys: Vec<String> = sqlx::query_scalar(
        "SELECT photo_key FROM body_metrics WHERE user_id = $1 AND photo_key IS NOT NULL",
    )
    .bind(user_id)
    .fetch_all(&mut *tx)
    .await?;

    for step in CASCADE.iter() {
        match sqlx::query(step.sql).bind(user_id).execute(&mut *tx).await {
            Ok(done) => debug!(step = step.name, rows = done.rows_affected(), "cascade step"),
            Err(e) => {
                if let Err(rb) = tx.rollback().await {
                    warn!(error = %rb, "rollback after failed cascade step");
                }
                return Err(cascade_aborted(step.name, user_id, &e));
            }
        }
    }
    // deferred constraints are checked here, so a failure is the same abort
    tx.commit()
        .await
        .map_err(|e| cascade_aborted(COMMIT, user_id, &e))?;
    info!(user_id, user_type = %target.user_type, "user deleted");

    audit
        .record(
            NewAuditEntry::new(actor.id, AuditAction::Delete, EntityType::User, user_id)
                .details(json!({
                    "user_type": target.user_type,
                    "name": format!("{} {}", target.first_name, target.last_name),
                    "email": target.email,
                }))
                .meta(meta),
        )
        .await;

    Ok(DeletedUser {
        user_id,
        email: target.email,
        user_type: target.user_type,
        photo_keys,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependents_go_before_the_user_row() {
        let names: Vec<_> = CASCADE.iter().map(|s| s.name).collect();
        assert_eq!(names.last(), Some(&"user"));
        let pos = |n: &str| names.iter().position(|x| *x == n).unwrap();
        // assignments reference the coach profile, which must still exist when they go
        assert!(pos("coach assignments") < pos("coach profile"));
        assert!(pos("auth tokens") < pos("user"));
        assert!(pos("audit entries") < pos("user"));
    }

    #[test]
    fn dependents_of_each_table_go_first() {
        // (dependent table, table it references) pairs from the schema
        let edges = [
            ("coach_clients", "coach_profiles"),
            ("coach_clients", "users"),
            ("user_training_plans", "users"),
            ("user_meal_plans", "users"),
            ("progress_tracking", "users"),
            ("body_metrics", "users"),
            ("coach_profiles", "users"),
            ("user_profiles", "users"),
            ("auth_tokens", "users"),
            ("audit_logs", "users"),
        ];
        let last_touch = |table: &str| {
            CASCADE
                .iter()
                .rposition(|s| s.sql.starts_with(&format!("DELETE FROM {table} ")))
                .unwrap_or_else(|| panic!("no step for {table}"))
        };
        let first_touch = |table: &str| {
            CASCADE
                .iter()
                .position(|s| s.sql.starts_with(&format!("DELETE FROM {table} ")))
                .unwrap()
        };
        for (dependent, referenced) in edges {
            assert!(
                last_touch(dependent) < first_touch(referenced),
                "{dependent} must be cleared before {referenced}"
            );
        }
    }

    #[test]
    fn only_existing_non_admins_are_deletable() {
        use axum::http::StatusCode;

        assert_eq!(
            check_deletable(7, None).unwrap_err().status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            check_deletable(7, Some(Role::Admin)).unwrap_err().status_code(),
            StatusCode::FORBIDDEN
        );
        assert!(check_deletable(7, Some(Role::Coach)).is_ok());
        assert!(check_deletable(7, Some(Role::User)).is_ok());
    }

    #[test]
    fn step_and_commit_failures_report_the_same_conflict() {
        use axum::http::StatusCode;

        let stages = CASCADE.iter().map(|s| s.name).chain([COMMIT]);
        for stage in stages {
            for e in [
                sqlx::Error::RowNotFound,
                sqlx::Error::Protocol("deferred constraint violated".into()),
                sqlx::Error::PoolClosed,
            ] {
                let err = cascade_aborted(stage, 7, &e);
                assert_eq!(err.status_code(), StatusCode::CONFLICT, "{stage}");
                assert_eq!(err.to_string(), STILL_REFERENCED);
            }
        }
    }

    #[test]
    fn every_step_is_scoped_to_the_target() {
        for step in CASCADE {
            assert!(step.sql.starts_with("DELETE FROM "), "{}", step.name);
            assert!(step.sql.contains("$1"), "{}", step.name);
        }
    }

    mod db {
        use std::sync::Arc;

        use axum::http::StatusCode;
        use sqlx::PgPool;
        use uuid::Uuid;

        use super::super::*;
        use crate::{audit::PgAuditSink, test_support};

        const DEPENDENTS: &str = r#"
            SELECT (SELECT COUNT(*) FROM coach_clients WHERE client_id = $1)
                 + (SELECT COUNT(*) FROM user_training_plans WHERE user_id = $1)
                 + (SELECT COUNT(*) FROM user_meal_plans WHERE user_id = $1)
                 + (SELECT COUNT(*) FROM progress_tracking WHERE user_id = $1)
                 + (SELECT COUNT(*) FROM body_metrics WHERE user_id = $1)
                 + (SELECT COUNT(*) FROM user_profiles WHERE user_id = $1)
                 + (SELECT COUNT(*) FROM auth_tokens WHERE user_id = $1)
                 + (SELECT COUNT(*) FROM audit_logs WHERE user_id = $1)
                 + (SELECT COUNT(*) FROM users WHERE user_id = $1)
        "#;

        async fn admin(db: &PgPool) -> Actor {
            let id = test_support::insert_user(db, Role::Admin).await;
            Actor::load(db, id).await.unwrap().unwrap()
        }

        fn recorder(db: &PgPool) -> AuditRecorder {
            AuditRecorder::new(Arc::new(PgAuditSink::new(db.clone())))
        }

        /// A client with one row in every dependent table. Returns (coach, client).
        async fn seed(db: &PgPool) -> (i64, i64) {
            let coach = test_support::insert_user(db, Role::Coach).await;
            let client = test_support::insert_user(db, Role::User).await;
            let coach_profile = test_support::coach_profile_id(db, coach).await;

            sqlx::query("INSERT INTO coach_clients (coach_id, client_id) VALUES ($1, $2)")
                .bind(coach_profile)
                .bind(client)
                .execute(db)
                .await
                .unwrap();
            for sql in [
                "INSERT INTO user_profiles (user_id, height) VALUES ($1, 180)",
                "INSERT INTO body_metrics (user_id, weight) VALUES ($1, 80)",
                "INSERT INTO auth_tokens (kind, token, user_id, expires_at) \
                 VALUES ('password_reset', md5(random()::text), $1, now() + interval '1 hour')",
                "INSERT INTO audit_logs (user_id, action, entity_type, entity_id) \
                 VALUES ($1, 'login', 'user', $1::text)",
            ] {
                sqlx::query(sql).bind(client).execute(db).await.unwrap();
            }

            let plan: i64 = sqlx::query_scalar(
                "INSERT INTO training_plans (coach_id, title) VALUES ($1, 'Base') RETURNING plan_id",
            )
            .bind(coach)
            .fetch_one(db)
            .await
            .unwrap();
            let exercise: i64 = sqlx::query_scalar(
                "INSERT INTO plan_exercises (plan_id, name) VALUES ($1, 'Squat') RETURNING exercise_id",
            )
            .bind(plan)
            .fetch_one(db)
            .await
            .unwrap();
            sqlx::query("INSERT INTO user_training_plans (user_id, plan_id) VALUES ($1, $2)")
                .bind(client)
                .bind(plan)
                .execute(db)
                .await
                .unwrap();
            sqlx::query(
                "INSERT INTO progress_tracking (user_id, exercise_id, sets_completed, reps_completed) \
                 VALUES ($1, $2, 3, 10)",
            )
            .bind(client)
            .bind(exercise)
            .execute(db)
            .await
            .unwrap();

            let meal_plan = Uuid::new_v4();
            sqlx::query("INSERT INTO meal_plans (id, coach_id, name) VALUES ($1, $2, 'Lean')")
                .bind(meal_plan)
                .bind(coach)
                .execute(db)
                .await
                .unwrap();
            sqlx::query("INSERT INTO user_meal_plans (user_id, plan_id) VALUES ($1, $2)")
                .bind(client)
                .bind(meal_plan)
                .execute(db)
                .await
                .unwrap();

            (coach, client)
        }

        #[tokio::test]
        #[ignore = "needs DATABASE_URL"]
        async fn removes_every_dependent_row() {
            let db = test_support::pool().await;
            let admin = admin(&db).await;
            let (_, client) = seed(&db).await;
            assert_eq!(test_support::count(&db, DEPENDENTS, client).await, 9);

            let deleted = delete_user(&db, &recorder(&db), &admin, client, &ClientMeta::default())
                .await
                .unwrap();
            assert_eq!(deleted.user_id, client);
            assert_eq!(test_support::count(&db, DEPENDENTS, client).await, 0);

            let audited = test_support::count(
                &db,
                "SELECT COUNT(*) FROM audit_logs WHERE action = 'delete' AND entity_id = $1::text",
                client,
            )
            .await;
            assert_eq!(audited, 1);
        }

        #[tokio::test]
        #[ignore = "needs DATABASE_URL"]
        async fn injected_failure_at_any_step_changes_nothing() {
            let db = test_support::pool().await;
            let admin = admin(&db).await;
            sqlx::query(
                r#"
                CREATE OR REPLACE FUNCTION trainsync_refuse_delete() RETURNS trigger AS $$
                BEGIN RAISE EXCEPTION 'injected failure'; END;
                $$ LANGUAGE plpgsql
                "#,
            )
            .execute(&db)
            .await
            .unwrap();

            for table in ["user_meal_plans", "body_metrics", "auth_tokens", "audit_logs", "users"] {
                let (_, client) = seed(&db).await;
                let trigger = format!("refuse_{table}_{client}");
                sqlx::query(&format!(
                    "CREATE TRIGGER {trigger} BEFORE DELETE ON {table} FOR EACH ROW \
                     WHEN (OLD.user_id = {client}) EXECUTE FUNCTION trainsync_refuse_delete()"
                ))
                .execute(&db)
                .await
                .unwrap();

                let err = delete_user(&db, &recorder(&db), &admin, client, &ClientMeta::default())
                    .await
                    .unwrap_err();

                sqlx::query(&format!("DROP TRIGGER {trigger} ON {table}"))
                    .execute(&db)
                    .await
                    .unwrap();

                assert_eq!(err.status_code(), StatusCode::CONFLICT, "{table}");
                assert_eq!(err.to_string(), STILL_REFERENCED);
                assert_eq!(test_support::count(&db, DEPENDENTS, client).await, 9, "{table}");
            }
        }

        #[tokio::test]
        #[ignore = "needs DATABASE_URL"]
        async fn admins_cannot_be_deleted() {
            let db = test_support::pool().await;
            let admin = admin(&db).await;
            let other = test_support::insert_user(&db, Role::Admin).await;

            let err = delete_user(&db, &recorder(&db), &admin, other, &ClientMeta::default())
                .await
                .unwrap_err();
            assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
            assert_eq!(
                test_support::count(&db, "SELECT COUNT(*) FROM users WHERE user_id = $1", other).await,
                1
            );
        }

        #[tokio::test]
        #[ignore = "needs DATABASE_URL"]
        async fn coach_with_authored_plans_is_kept() {
            let db = test_support::pool().await;
            let admin = admin(&db).await;
            let (coach, _) = seed(&db).await;

            let err = delete_user(&db, &recorder(&db), &admin, coach, &ClientMeta::default())
                .await
                .unwrap_err();
            assert_eq!(err.status_code(), StatusCode::CONFLICT);
            assert_eq!(
                test_support::count(&db, "SELECT COUNT(*) FROM coach_profiles WHERE user_id = $1", coach)
                    .await,
                1
            );
        }

        #[tokio::test]
        #[ignore = "needs DATABASE_URL"]
        async fn unknown_user_is_not_found() {
            let db = test_support::pool().await;
            let admin = admin(&db).await;
            let err = delete_user(&db, &recorder(&db), &admin, i64::MAX, &ClientMeta::default())
                .await
                .unwrap_err();
            assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        }
    }
}
