use serde::{Deserialize, Serialize};

use super::repo::{PublicUser, UserProfile};
use crate::access::Role;

/// Body of `PUT /profile`. Absent fields keep their stored value.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateProfileRequest {
    pub bio: Option<String>,
    pub age: Option<i32>,
    pub gender: Option<String>,
    pub location: Option<String>,
    pub fitness_level: Option<String>,
    pub goals: Option<String>,
    pub preferences: Option<String>,
    pub timezone: Option<String>,
    pub contact_number: Option<String>,
    pub emergency_contact: Option<String>,
    pub health_conditions: Option<String>,
    pub height: Option<f64>,
    pub weight: Option<f64>,
    pub activity_level: Option<String>,
    pub workout_preferences: Option<String>,
    pub dietary_preferences: Option<String>,
    pub allergies: Option<String>,
    pub injury_history: Option<String>,
}

impl UpdateProfileRequest {
    pub fn changed_fields(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        macro_rules! track {
            ($($f:ident),*) => { $( if self.$f.is_some() { out.push(stringify!($f)); } )* };
        }
        track!(
            bio, age, gender, location, fitness_level, goals, preferences, timezone,
            contact_number, emergency_contact, health_conditions, height, weight,
            activity_level, workout_preferences, dietary_preferences, allergies, injury_history
        );
        out
    }
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub message: &'static str,
    pub profile: UserProfile,
}

/// Body of `PUT /user`.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateUserRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub profile_image_url: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub message: &'static str,
    pub user: PublicUser,
}

/// Body of `PUT /admin/users/:id`.
#[derive(Debug, Default, Deserialize)]
pub struct AdminUpdateUserRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub user_type: Option<Role>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Inactive,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: AccountStatus,
}

#[derive(Debug, Deserialize)]
pub struct InviteRequest {
    pub email: String,
    #[serde(default = "default_invite_role")]
    pub user_type: Role,
}

fn default_invite_role() -> Role {
    Role::User
}

#[derive(Debug, Serialize)]
pub struct InviteView {
    pub email: String,
    pub user_type: Role,
    pub token: String,
    pub invite_url: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: time::OffsetDateTime,
    pub email_sent: bool,
}

#[derive(Debug, Serialize)]
pub struct InviteResponse {
    pub message: &'static str,
    pub invite: InviteView,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}
