use anyhow::Context;

mod access;
mod app;
mod audit;
mod auth;
mod bootstrap;
mod coaching;
mod config;
mod contact;
mod error;
mod mail;
mod meal_plans;
mod progress;
mod settings;
mod state;
mod storage;
mod tokens;
mod training;
mod users;

#[cfg(test)]
mod test_support;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "trainsync=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let app_state = state::AppState::init().await?;

    sqlx::migrate!("./migrations")
        .run(&app_state.db)
        .await
        .context("run migrations")?;

    bootstrap::run(&app_state.db, app_state.config.admin.as_ref())
        .await
        .context("bootstrap")?;

    let app = app::build_app(app_state);
    app::serve(app).await
}
