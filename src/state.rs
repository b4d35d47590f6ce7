use std::sync::Arc;

use anyhow::Context;
use sqlx::PgPool;
use tracing::warn;

use crate::{
    audit::{AuditRecorder, PgAuditSink},
    config::AppConfig,
    mail::{self, Mailer},
    storage::{DisabledStorage, S3Storage, StorageClient},
};

const STORAGE_REGION: &str = "us-east-1";

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<AppConfig>,
    pub storage: Arc<dyn StorageClient>,
    pub mailer: Arc<dyn Mailer>,
    pub audit: AuditRecorder,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let db = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.database_url)
            .await
            .context("connect to database")?;

        let storage: Arc<dyn StorageClient> = match &config.storage {
            Some(cfg) => Arc::new(S3Storage::new(cfg, STORAGE_REGION).await?),
            None => {
                warn!("MINIO_ENDPOINT not set; photo uploads are disabled");
                Arc::new(DisabledStorage)
            }
        };
        let mailer: Arc<dyn Mailer> = Arc::from(mail::from_config(&config.mail)?);
        let audit = AuditRecorder::new(Arc::new(PgAuditSink::new(db.clone())));

        Ok(Self::from_parts(db, config, storage, mailer, audit))
    }

    pub fn from_parts(
        db: PgPool,
        config: Arc<AppConfig>,
        storage: Arc<dyn StorageClient>,
        mailer: Arc<dyn Mailer>,
        audit: AuditRecorder,
    ) -> Self {
        Self {
            db,
            config,
            storage,
            mailer,
            audit,
        }
    }

    /// State for handler tests: lazily connecting pool, in-memory
    /// collaborators, test configuration.
    #[cfg(test)]
    pub fn fake() -> Self {
        use crate::{audit::fakes::MemorySink, mail::fakes::RecordingMailer};

        let config = AppConfig::for_tests();
        let db = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy(&config.database_url)
            .expect("lazy pool ok");

        Self::from_parts(
            db,
            Arc::new(config),
            Arc::new(fakes::FakeStorage),
            Arc::new(RecordingMailer::default()),
            AuditRecorder::new(Arc::new(MemorySink::default())),
        )
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use axum::async_trait;
    use bytes::Bytes;

    use crate::storage::StorageClient;

    #[derive(Clone)]
    pub struct FakeStorage;

    #[async_trait]
    impl StorageClient for FakeStorage {
        async fn put_object(&self, _k: &str, _b: Bytes, _ct: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn delete_object(&self, _k: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn presign_get(&self, k: &str, _s: u64) -> anyhow::Result<String> {
            Ok(format!("https://fake.local/{}", k))
        }
    }
}
