use serde::{Deserialize, Serialize};

use crate::{
    auth::services::normalize_email,
    error::{AppError, AppResult},
};

const MAX_NAME_LEN: usize = 100;
const MAX_SUBJECT_LEN: usize = 200;
const MAX_MESSAGE_LEN: usize = 5000;

fn required<'a>(field: &str, value: &'a Option<String>, max: usize) -> AppResult<&'a str> {
    let v = value.as_deref().map(str::trim).unwrap_or_default();
    if v.is_empty() {
        return Err(AppError::validation(format!("missing required field: {field}")));
    }
    if v.chars().count() > max {
        return Err(AppError::validation(format!(
            "{field} must be at most {max} characters"
        )));
    }
    Ok(v)
}

#[derive(Debug, Default, Deserialize)]
pub struct SubscribeRequest {
    pub name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
pub struct Subscriber {
    pub name: String,
    pub email: String,
}

impl SubscribeRequest {
    pub fn validate(&self) -> AppResult<Subscriber> {
        let name = required("name", &self.name, MAX_NAME_LEN)?;
        let email = normalize_email(required("email", &self.email, usize::MAX)?)?;
        Ok(Subscriber {
            name: name.to_string(),
            email,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ContactRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub subject: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug)]
pub struct ContactMessage {
    pub name: String,
    pub email: String,
    pub subject: String,
    pub message: String,
}

impl ContactRequest {
    pub fn validate(&self) -> AppResult<ContactMessage> {
        let name = required("name", &self.name, MAX_NAME_LEN)?;
        let email = normalize_email(required("email", &self.email, usize::MAX)?)?;
        let subject = required("subject", &self.subject, MAX_SUBJECT_LEN)?;
        // the subject ends up in a mail header
        if subject.chars().any(char::is_control) {
            return Err(AppError::validation("subject must be a single line"));
        }
        let message = required("message", &self.message, MAX_MESSAGE_LEN)?;
        Ok(ContactMessage {
            name: name.to_string(),
            email,
            subject: subject.to_string(),
            message: message.to_string(),
        })
    }
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct FormResponse {
    pub status: &'static str,
    pub message: &'static str,
}
