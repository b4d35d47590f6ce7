use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo::{AssignmentView, ClientRow, CoachClient, CoachProfile};
use crate::{
    error::{AppError, AppResult},
    meal_plans::repo::MealPlanAssignment,
    progress::repo::BodyMetric,
    training::repo::PlanAssignment,
    users::repo::UserProfile,
};

#[derive(Debug, Default, Deserialize)]
pub struct UpdateCoachProfile {
    pub specializations: Option<String>,
    pub experience_years: Option<i32>,
    pub bio: Option<String>,
}

impl UpdateCoachProfile {
    pub fn validate(&self) -> AppResult<()> {
        if let Some(years) = self.experience_years {
            if !(0..=80).contains(&years) {
                return Err(AppError::validation("experience years must be between 0 and 80"));
            }
        }
        if let Some(spec) = &self.specializations {
            if spec.trim().is_empty() {
                return Err(AppError::validation("specializations cannot be empty"));
            }
        }
        if self.bio.as_ref().is_some_and(|b| b.chars().count() > 2000) {
            return Err(AppError::validation("bio must be at most 2000 characters"));
        }
        Ok(())
    }

    pub fn changed_fields(&self) -> Vec<&'static str> {
        [
            ("specializations", self.specializations.is_some()),
            ("experience_years", self.experience_years.is_some()),
            ("bio", self.bio.is_some()),
        ]
        .into_iter()
        .filter_map(|(name, set)| set.then_some(name))
        .collect()
    }
}

/// Admin edit of a coach profile; unlike the coach's own edit it may set
/// the rating.
#[derive(Debug, Default, Deserialize)]
pub struct AdminCoachProfileUpdate {
    #[serde(flatten)]
    pub profile: UpdateCoachProfile,
    pub rating: Option<f64>,
}

impl AdminCoachProfileUpdate {
    pub fn validate(&self) -> AppResult<()> {
        self.profile.validate()?;
        if let Some(rating) = self.rating {
            if !(0.0..=5.0).contains(&rating) {
                return Err(AppError::validation("rating must be between 0 and 5"));
            }
        }
        Ok(())
    }

    pub fn changed_fields(&self) -> Vec<&'static str> {
        let mut fields = self.profile.changed_fields();
        if self.rating.is_some() {
            fields.push("rating");
        }
        fields
    }
}

/// Readable `field: old -> new` lines for the settings fields that differ.
pub fn settings_changes(old: &CoachProfile, new: &CoachProfile) -> Vec<String> {
    let mut out = Vec::new();
    if old.specializations != new.specializations {
        out.push(format!("specializations: {} -> {}", old.specializations, new.specializations));
    }
    if old.experience_years != new.experience_years {
        out.push(format!(
            "experience_years: {} -> {}",
            old.experience_years, new.experience_years
        ));
    }
    if old.bio != new.bio {
        out.push(format!("bio: {} -> {}", old.bio, new.bio));
    }
    out
}

#[derive(Debug, Serialize)]
pub struct CoachProfileResponse {
    pub message: &'static str,
    pub profile: CoachProfile,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoachStats {
    pub total_clients: i64,
    pub active_programs: i64,
    pub average_rating: f64,
    #[serde(rename = "experience_years")]
    pub experience_years: i32,
    pub specializations: Vec<String>,
}

/// Splits the stored comma-separated list, dropping blanks.
pub fn split_specializations(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[derive(Debug, Serialize)]
pub struct ClientSummary {
    pub id: i64,
    pub client_id: i64,
    pub first_name: String,
    pub last_name: String,
    pub full_name: String,
    pub email: String,
    pub profile_image_url: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub assigned_at: OffsetDateTime,
    pub status: String,
    pub profile: Option<UserProfile>,
    pub assigned_plan_id: Option<i64>,
    pub latest_metrics: Option<BodyMetric>,
}

impl ClientSummary {
    pub fn new(
        row: ClientRow,
        profile: Option<UserProfile>,
        assigned_plan_id: Option<i64>,
        latest_metrics: Option<BodyMetric>,
    ) -> Self {
        Self {
            id: row.id,
            client_id: row.client_id,
            full_name: format!("{} {}", row.first_name, row.last_name),
            first_name: row.first_name,
            last_name: row.last_name,
            email: row.email,
            profile_image_url: row.profile_image_url,
            assigned_at: row.assigned_at,
            status: row.status,
            profile,
            assigned_plan_id,
            latest_metrics,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ClientList {
    pub clients: Vec<ClientSummary>,
    pub total_count: usize,
}

#[derive(Debug, Serialize)]
pub struct ClientInfo {
    pub client_id: i64,
    pub name: String,
    pub email: String,
    pub profile_image_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ClientInfoResponse {
    pub client: ClientInfo,
}

#[derive(Debug, Deserialize)]
pub struct AssignPlanRequest {
    /// `None` removes the current assignment.
    pub plan_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct AssignPlanResponse {
    pub message: &'static str,
    pub assignment: Option<PlanAssignment>,
}

#[derive(Debug, Deserialize)]
pub struct AssignMealPlanRequest {
    pub meal_plan_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct AssignMealPlanResponse {
    pub message: &'static str,
    pub assignment: MealPlanAssignment,
}

#[derive(Debug, Deserialize)]
pub struct AssignClientRequest {
    /// User id of the coach.
    pub coach_id: i64,
    pub client_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct DeactivateRequest {
    pub client_id: i64,
}

#[derive(Debug, Serialize)]
pub struct AssignmentResponse {
    pub message: &'static str,
    pub assignment: CoachClient,
}

#[derive(Debug, Serialize)]
pub struct AssignmentList {
    pub assignments: Vec<AssignmentView>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn specializations_are_split_and_trimmed() {
        assert_eq!(
            split_specializations("Strength, Mobility ,,HIIT"),
            vec!["Strength", "Mobility", "HIIT"]
        );
        assert!(split_specializations("  ").is_empty());
    }

    #[test]
    fn stats_keep_snake_case_experience_key() {
        let stats = CoachStats {
            total_clients: 3,
            active_programs: 2,
            average_rating: 4.5,
            experience_years: 7,
            specializations: vec!["Yoga".into()],
        };
        let v = serde_json::to_value(&stats).unwrap();
        assert_eq!(v["totalClients"], 3);
        assert_eq!(v["activePrograms"], 2);
        assert_eq!(v["experience_years"], 7);
    }

    fn profile(spec: &str, years: i32, bio: &str) -> CoachProfile {
        let now = OffsetDateTime::now_utc();
        CoachProfile {
            profile_id: 1,
            user_id: 2,
            specializations: spec.into(),
            experience_years: years,
            rating: 0.0,
            bio: bio.into(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn settings_changes_list_only_what_moved() {
        let old = profile("Yoga", 3, "");
        assert!(settings_changes(&old, &old.clone()).is_empty());

        let new = profile("Yoga, Pilates", 3, "Hi");
        assert_eq!(
            settings_changes(&old, &new),
            vec!["specializations: Yoga -> Yoga, Pilates", "bio:  -> Hi"]
        );
    }

    #[test]
    fn admin_edit_may_set_rating() {
        let req: AdminCoachProfileUpdate =
            serde_json::from_str(r#"{"bio": "Coach", "rating": 4.5}"#).unwrap();
        assert!(req.validate().is_ok());
        assert_eq!(req.changed_fields(), vec!["bio", "rating"]);

        for bad in [r#"{"rating": 5.5}"#, r#"{"rating": -1}"#, r#"{"experience_years": 81}"#] {
            let req: AdminCoachProfileUpdate = serde_json::from_str(bad).unwrap();
            assert!(req.validate().is_err(), "{bad}");
        }
    }

    #[test]
    fn coach_profile_rules() {
        assert!(UpdateCoachProfile { experience_years: Some(12), ..Default::default() }
            .validate()
            .is_ok());
        for bad in [
            UpdateCoachProfile { experience_years: Some(-1), ..Default::default() },
            UpdateCoachProfile { specializations: Some(" ".into()), ..Default::default() },
            UpdateCoachProfile { bio: Some("x".repeat(2001)), ..Default::default() },
        ] {
            assert!(bad.validate().is_err(), "{bad:?}");
        }
        let req = UpdateCoachProfile {
            bio: Some("hi".into()),
            ..Default::default()
        };
        assert_eq!(req.changed_fields(), vec!["bio"]);
    }
}
