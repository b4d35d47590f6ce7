use anyhow::anyhow;
use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use tracing::{info, instrument, warn};

use super::dto::{ContactRequest, FormResponse, SubscribeRequest};
use crate::{
    audit::ClientMeta,
    error::{AppError, AppResult},
    mail::{self, templates},
    state::AppState,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/subscribe", post(subscribe))
        .route("/contact/send", post(send_contact))
}

/// Forwards a newsletter signup to the site owner. The notice is the only
/// effect, so an undelivered notice fails the request.
#[instrument(skip(state, meta, payload), fields(ip = ?meta.ip_address))]
pub async fn subscribe(
    State(state): State<AppState>,
    meta: ClientMeta,
    Json(payload): Json<SubscribeRequest>,
) -> AppResult<Json<FormResponse>> {
    let sub = payload.validate()?;
    let html = templates::subscription_html(&sub.name, &sub.email);
    let to = &state.config.mail.notify_email;

    if !mail::send_best_effort(state.mailer.as_ref(), to, templates::SUBSCRIPTION_SUBJECT, &html).await {
        return Err(AppError::Internal(anyhow!("subscription notice not delivered")));
    }
    info!(email = %sub.email, "subscription forwarded");
    Ok(Json(FormResponse {
        status: "success",
        message: "subscription successful",
    }))
}

/// Maps delivery of the support copy and of the visitor's acknowledgement
/// to a response. The support copy decides success.
pub(crate) fn contact_outcome(support_sent: bool, reply_sent: bool) -> AppResult<(StatusCode, FormResponse)> {
    match (support_sent, reply_sent) {
        (true, _) => Ok((
            StatusCode::OK,
            FormResponse {
                status: "success",
                message: "contact form emails sent successfully",
            },
        )),
        (false, true) => Ok((
            StatusCode::ACCEPTED,
            FormResponse {
                status: "partial_success",
                message: "your message was received, but there may be a delay in our response",
            },
        )),
        (false, false) => Err(AppError::Internal(anyhow!("contact form mails not delivered"))),
    }
}

#[instrument(skip(state, meta, payload), fields(ip = ?meta.ip_address))]
pub async fn send_contact(
    State(state): State<AppState>,
    meta: ClientMeta,
    Json(payload): Json<ContactRequest>,
) -> AppResult<(StatusCode, Json<FormResponse>)> {
    let msg = payload.validate()?;
    let mailer = state.mailer.as_ref();

    let reply = templates::contact_reply_html(&msg.name, &msg.subject, &msg.message);
    let reply_sent =
        mail::send_best_effort(mailer, &msg.email, templates::CONTACT_REPLY_SUBJECT, &reply).await;

    let support = templates::contact_support_html(&msg.name, &msg.email, &msg.subject, &msg.message);
    let support_sent = mail::send_best_effort(
        mailer,
        &state.config.mail.support_email,
        &templates::contact_subject(&msg.subject),
        &support,
    )
    .await;

    if support_sent {
        info!(from = %msg.email, reply_sent, "contact form forwarded");
    } else {
        warn!(from = %msg.email, reply_sent, "contact form not forwarded to support");
    }
    let (status, body) = contact_outcome(support_sent, reply_sent)?;
    Ok((status, Json(body)))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::mail::{
        fakes::{FailingMailer, RecordingMailer},
        Mailer,
    };

    /// Delivers everywhere except to one address.
    struct RefusesTo(&'static str);

    #[async_trait]
    impl Mailer for RefusesTo {
        async fn send(&self, to: &str, _subject: &str, _html: &str) -> anyhow::Result<()> {
            if to == self.0 {
                anyhow::bail!("mailbox unavailable");
            }
            Ok(())
        }
    }

    fn contact() -> ContactRequest {
        ContactRequest {
            name: Some("Ann".into()),
            email: Some("ann@example.com".into()),
            subject: Some("Group sessions".into()),
            message: Some("Do you offer them?".into()),
        }
    }

    #[tokio::test]
    async fn subscription_notifies_the_owner() {
        let mailer = Arc::new(RecordingMailer::default());
        let mut state = AppState::fake();
        state.mailer = mailer.clone();

        let Json(res) = subscribe(
            State(state.clone()),
            ClientMeta::default(),
            Json(SubscribeRequest {
                name: Some("Ann".into()),
                email: Some("ann@example.com".into()),
            }),
        )
        .await
        .unwrap();
        assert_eq!(res.status, "success");

        let sent = mailer.sent.lock().unwrap();
        assert_eq!(
            sent.as_slice(),
            &[(
                state.config.mail.notify_email.clone(),
                templates::SUBSCRIPTION_SUBJECT.to_string()
            )]
        );
    }

    #[tokio::test]
    async fn undelivered_subscription_is_a_server_error() {
        let mut state = AppState::fake();
        state.mailer = Arc::new(FailingMailer);
        let err = subscribe(
            State(state),
            ClientMeta::default(),
            Json(SubscribeRequest {
                name: Some("Ann".into()),
                email: Some("ann@example.com".into()),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn invalid_subscription_sends_nothing() {
        let mailer = Arc::new(RecordingMailer::default());
        let mut state = AppState::fake();
        state.mailer = mailer.clone();
        let err = subscribe(State(state), ClientMeta::default(), Json(SubscribeRequest::default()))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(mailer.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn contact_form_reaches_support_and_visitor() {
        let mailer = Arc::new(RecordingMailer::default());
        let mut state = AppState::fake();
        state.mailer = mailer.clone();

        let (status, Json(res)) = send_contact(State(state.clone()), ClientMeta::default(), Json(contact()))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(res.status, "success");

        let sent = mailer.sent.lock().unwrap();
        let recipients: Vec<_> = sent.iter().map(|(to, _)| to.as_str()).collect();
        assert_eq!(
            recipients,
            vec!["ann@example.com", state.config.mail.support_email.as_str()]
        );
        assert_eq!(sent[1].1, "New contact form message: Group sessions");
    }

    #[tokio::test]
    async fn support_outage_is_a_partial_success() {
        let mut state = AppState::fake();
        state.mailer = Arc::new(RefusesTo("support@test.local"));
        let (status, Json(res)) = send_contact(State(state), ClientMeta::default(), Json(contact()))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(res.status, "partial_success");
    }

    #[tokio::test]
    async fn contact_with_no_delivery_fails() {
        let mut state = AppState::fake();
        state.mailer = Arc::new(FailingMailer);
        let err = send_contact(State(state), ClientMeta::default(), Json(contact()))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn missing_acknowledgement_does_not_fail_the_form() {
        let (status, body) = contact_outcome(true, false).unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.status, "success");
    }
}
