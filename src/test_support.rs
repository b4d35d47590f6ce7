//! Helpers for the database-backed tests. These tests are `#[ignore]`d and
//! run with `DATABASE_URL=... cargo test -- --ignored`.

use sqlx::{postgres::PgPoolOptions, PgPool};
use uuid::Uuid;

use crate::access::Role;

pub async fn pool() -> PgPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for ignored tests");
    let db = PgPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .expect("connect to test database");
    sqlx::migrate!("./migrations")
        .run(&db)
        .await
        .expect("run migrations");
    db
}

pub fn unique_email() -> String {
    format!("t-{}@example.com", Uuid::new_v4().simple())
}

pub async fn insert_user(db: &PgPool, role: Role) -> i64 {
    let user_id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO users (email, password_hash, first_name, last_name, user_type)
        VALUES ($1, 'x', 'Test', 'User', $2)
        RETURNING user_id
        "#,
    )
    .bind(unique_email())
    .bind(role.as_str())
    .fetch_one(db)
    .await
    .expect("insert user");

    if role == Role::Coach {
        sqlx::query("INSERT INTO coach_profiles (user_id) VALUES ($1)")
            .bind(user_id)
            .execute(db)
            .await
            .expect("insert coach profile");
    }
    user_id
}

pub async fn coach_profile_id(db: &PgPool, user_id: i64) -> i64 {
    sqlx::query_scalar("SELECT profile_id FROM coach_profiles WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(db)
        .await
        .expect("coach profile")
}

pub async fn count(db: &PgPool, sql: &str, id: i64) -> i64 {
    sqlx::query_scalar(sql)
        .bind(id)
        .fetch_one(db)
        .await
        .expect("count query")
}
