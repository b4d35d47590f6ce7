use anyhow::Context;
use bytes::Bytes;
use tracing::{info, warn};
use uuid::Uuid;

use super::repo::BodyMetric;
use crate::{
    error::{AppError, AppResult},
    state::AppState,
    storage::ext_from_mime,
};

const PRESIGN_TTL_SECS: u64 = 30 * 60;

pub struct PhotoUpload {
    pub body: Bytes,
    pub content_type: String,
}

pub fn photo_key(user_id: i64, metric_id: i64, ext: &str) -> String {
    format!("progress/{}/{}-{}.{}", user_id, metric_id, Uuid::new_v4(), ext)
}

/// Stores the image and points the metric at it. The previous object, if
/// any, is removed afterwards; a failed removal only leaves an orphan.
pub async fn attach_photo(
    st: &AppState,
    metric: &BodyMetric,
    upload: PhotoUpload,
) -> AppResult<BodyMetric> {
    let ext = ext_from_mime(&upload.content_type)
        .ok_or_else(|| AppError::validation("only jpeg, png, webp or heic images are accepted"))?;
    if upload.body.is_empty() {
        return Err(AppError::validation("uploaded photo is empty"));
    }

    let key = photo_key(metric.user_id, metric.metric_id, ext);
    st.storage
        .put_object(&key, upload.body, &upload.content_type)
        .await
        .with_context(|| format!("put_object {}", key))?;

    let updated = match BodyMetric::set_photo(&st.db, metric.metric_id, &key).await {
        Ok(updated) => updated,
        Err(e) => {
            discard(st, &key).await;
            return Err(e.into());
        }
    };
    if let Some(old) = metric.photo_key.as_deref() {
        discard(st, old).await;
    }

    info!(metric_id = metric.metric_id, key = %key, "progress photo stored");
    Ok(updated)
}

pub async fn presign(st: &AppState, key: &str) -> AppResult<String> {
    let url = st
        .storage
        .presign_get(key, PRESIGN_TTL_SECS)
        .await
        .with_context(|| format!("presign url for key {}", key))?;
    Ok(url)
}

async fn discard(st: &AppState, key: &str) {
    if let Err(e) = st.storage.delete_object(key).await {
        warn!(error = %e, key = %key, "failed to delete stored photo");
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use time::OffsetDateTime;

    use super::*;

    fn metric(photo_key: Option<&str>) -> BodyMetric {
        BodyMetric {
            metric_id: 9,
            user_id: 4,
            date: OffsetDateTime::now_utc(),
            weight: Some(70.0),
            height: Some(175.0),
            bmi: Some(22.86),
            body_fat: None,
            muscle_mass: None,
            photo_key: photo_key.map(String::from),
            notes: None,
        }
    }

    #[test]
    fn keys_are_scoped_to_user_and_metric() {
        let key = photo_key(4, 9, "png");
        assert!(key.starts_with("progress/4/9-"));
        assert!(key.ends_with(".png"));
        assert_ne!(key, photo_key(4, 9, "png"));
    }

    #[tokio::test]
    async fn non_images_are_rejected_before_upload() {
        let err = attach_photo(
            &AppState::fake(),
            &metric(None),
            PhotoUpload {
                body: Bytes::from_static(b"%PDF-1.7"),
                content_type: "application/pdf".into(),
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn empty_upload_is_rejected() {
        let err = attach_photo(
            &AppState::fake(),
            &metric(None),
            PhotoUpload {
                body: Bytes::new(),
                content_type: "image/png".into(),
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn presign_uses_the_stored_key() {
        let url = presign(&AppState::fake(), "progress/4/9-x.webp").await.unwrap();
        assert!(url.contains("progress/4/9-x.webp"));
    }

    #[tokio::test]
    async fn storage_outage_is_an_internal_error() {
        use std::sync::Arc;

        use crate::storage::DisabledStorage;

        let mut st = AppState::fake();
        st.storage = Arc::new(DisabledStorage);
        let err = presign(&st, "progress/4/9-x.webp").await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
