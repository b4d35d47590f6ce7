use sqlx::PgPool;
use tracing::{info, instrument};

use super::repo::{CoachClient, CoachProfile};
use crate::{
    access::Role,
    error::{is_unique_violation, AppError, AppResult},
    users::repo::User,
};

/// Outcome of an admin assignment: the new active row and the one it
/// replaced, if the client had another coach.
#[derive(Debug)]
pub struct Assignment {
    pub active: CoachClient,
    pub replaced: Option<CoachClient>,
}

/// Only plain users can be coached.
pub(crate) fn check_client(role: Option<Role>) -> AppResult<()> {
    match role {
        Some(Role::User) => Ok(()),
        _ => Err(AppError::validation("invalid client id")),
    }
}

/// Decides what happens to the client's current active row, if any.
/// Returns the id of the row to retire; the same coach again is a conflict.
pub(crate) fn plan_assignment(
    current: Option<&CoachClient>,
    coach_profile_id: i64,
) -> AppResult<Option<i64>> {
    match current {
        Some(c) if c.coach_id == coach_profile_id => {
            Err(AppError::conflict("client is already assigned to this coach"))
        }
        Some(c) => Ok(Some(c.id)),
        None => Ok(None),
    }
}

/// The partial unique index on active rows turns a lost race into 409.
pub(crate) fn lost_race(e: sqlx::Error) -> AppError {
    if is_unique_violation(&e) {
        AppError::conflict("client already has an active coach")
    } else {
        AppError::Database(e)
    }
}

/// Makes `coach_user_id` the client's only active coach. The client row is
/// locked first, so concurrent assignments of one client run one after the
/// other and exactly one active row remains.
#[instrument(skip(db))]
pub async fn assign_client(db: &PgPool, coach_user_id: i64, client_id: i64) -> AppResult<Assignment> {
    let coach = User::find(db, coach_user_id).await?;
    let profile = match coach {
        Some(u) if u.user_type == Role::Coach => CoachProfile::find_by_user(db, u.user_id).await?,
        _ => None,
    }
    .ok_or_else(|| AppError::validation("invalid coach id"))?;

    let mut tx = db.begin().await?;
    let client = User::lock(&mut tx, client_id).await?;
    check_client(client.map(|c| c.user_type))?;

    let previous = CoachClient::active_for_client(&mut tx, client_id).await?;
    let replaced = match plan_assignment(previous.as_ref(), profile.profile_id)? {
        Some(row_id) => Some(CoachClient::set_inactive(&mut *tx, row_id).await?),
        None => None,
    };

    let active = CoachClient::insert_active(&mut tx, profile.profile_id, client_id)
        .await
        .map_err(lost_race)?;
    tx.commit().await?;

    info!(
        client_id,
        coach_profile_id = profile.profile_id,
        replaced = replaced.as_ref().map(|r| r.coach_id),
        "client assigned to coach"
    );
    Ok(Assignment { active, replaced })
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use super::*;
    use crate::test_support;

    fn row(id: i64, coach_id: i64) -> CoachClient {
        CoachClient {
            id,
            coach_id,
            client_id: 9,
            assigned_at: time::OffsetDateTime::now_utc(),
            status: "active".into(),
        }
    }

    #[test]
    fn first_coach_needs_nothing_retired() {
        assert_eq!(plan_assignment(None, 3).unwrap(), None);
    }

    #[test]
    fn new_coach_retires_the_current_row() {
        assert_eq!(plan_assignment(Some(&row(41, 2)), 3).unwrap(), Some(41));
    }

    #[test]
    fn same_coach_twice_is_a_conflict() {
        let err = plan_assignment(Some(&row(41, 3)), 3).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn only_plain_users_are_clients() {
        assert!(check_client(Some(Role::User)).is_ok());
        for role in [None, Some(Role::Coach), Some(Role::Admin)] {
            let err = check_client(role).unwrap_err();
            assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        }
    }

    #[test]
    fn non_unique_errors_stay_database_errors() {
        let err = lost_race(sqlx::Error::RowNotFound);
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    async fn active_rows(db: &PgPool, client: i64) -> i64 {
        test_support::count(
            db,
            "SELECT COUNT(*) FROM coach_clients WHERE client_id = $1 AND status = 'active'",
            client,
        )
        .await
    }

    #[tokio::test]
    #[ignore = "needs DATABASE_URL"]
    async fn reassignment_keeps_one_active_row() {
        let db = test_support::pool().await;
        let first = test_support::insert_user(&db, Role::Coach).await;
        let second = test_support::insert_user(&db, Role::Coach).await;
        let client = test_support::insert_user(&db, Role::User).await;

        assign_client(&db, first, client).await.unwrap();
        let moved = assign_client(&db, second, client).await.unwrap();
        assert_eq!(
            moved.replaced.map(|r| r.status),
            Some("inactive".to_string())
        );
        assert_eq!(active_rows(&db, client).await, 1);

        let err = assign_client(&db, second, client).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    #[ignore = "needs DATABASE_URL"]
    async fn concurrent_assignment_leaves_one_active_row() {
        let db = test_support::pool().await;
        let a = test_support::insert_user(&db, Role::Coach).await;
        let b = test_support::insert_user(&db, Role::Coach).await;
        let client = test_support::insert_user(&db, Role::User).await;

        let (ra, rb) = tokio::join!(assign_client(&db, a, client), assign_client(&db, b, client));
        assert!(ra.is_ok() || rb.is_ok());
        assert_eq!(active_rows(&db, client).await, 1);
    }

    #[tokio::test]
    #[ignore = "needs DATABASE_URL"]
    async fn only_coaches_and_trainees_can_be_paired() {
        let db = test_support::pool().await;
        let coach = test_support::insert_user(&db, Role::Coach).await;
        let not_coach = test_support::insert_user(&db, Role::User).await;
        let admin = test_support::insert_user(&db, Role::Admin).await;

        let err = assign_client(&db, not_coach, coach).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        let err = assign_client(&db, coach, admin).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }
}
