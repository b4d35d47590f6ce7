use serde::{Deserialize, Serialize};

use super::repo::{Exercise, PlanAssignment, TrainingPlan};
use crate::error::{AppError, AppResult};

const MAX_TITLE_LEN: usize = 255;
const MAX_MEDIA_URL_LEN: usize = 512;

fn check_title(field: &str, value: &str) -> AppResult<()> {
    let len = value.trim().chars().count();
    if len == 0 || len > MAX_TITLE_LEN {
        return Err(AppError::validation(format!(
            "{field} must be between 1 and {MAX_TITLE_LEN} characters"
        )));
    }
    Ok(())
}

fn check_positive(field: &str, value: Option<i32>) -> AppResult<()> {
    match value {
        Some(v) if v < 1 => Err(AppError::validation(format!("{field} must be positive"))),
        _ => Ok(()),
    }
}

fn check_url(field: &str, value: Option<&str>) -> AppResult<()> {
    match value.filter(|u| !u.is_empty()) {
        Some(u) if !(u.starts_with("http://") || u.starts_with("https://")) => {
            Err(AppError::validation(format!("invalid {field}")))
        }
        Some(u) if u.len() > MAX_MEDIA_URL_LEN => Err(AppError::validation(format!(
            "{field} must be at most {MAX_MEDIA_URL_LEN} characters"
        ))),
        _ => Ok(()),
    }
}

/// Body of plan create and update. On update, absent fields are kept.
#[derive(Debug, Default, Deserialize)]
pub struct PlanRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub difficulty_level: Option<String>,
    pub duration_weeks: Option<i32>,
    pub training_frequency: Option<i32>,
    pub training_objective: Option<String>,
    pub focus_areas: Option<String>,
    pub exercise_types: Option<String>,
    pub specific_instructions: Option<String>,
}

impl PlanRequest {
    pub fn validate(&self) -> AppResult<()> {
        if let Some(title) = &self.title {
            check_title("title", title)?;
        }
        if self.difficulty_level.as_ref().is_some_and(|d| d.chars().count() > 50) {
            return Err(AppError::validation(
                "difficulty_level must be at most 50 characters",
            ));
        }
        check_positive("duration_weeks", self.duration_weeks)?;
        if let Some(freq) = self.training_frequency {
            if !(1..=7).contains(&freq) {
                return Err(AppError::validation(
                    "training_frequency must be between 1 and 7 sessions per week",
                ));
            }
        }
        Ok(())
    }

    /// Title for a new plan; required on create.
    pub fn required_title(&self) -> AppResult<&str> {
        self.validate()?;
        self.title
            .as_deref()
            .map(str::trim)
            .ok_or_else(|| AppError::validation("title is required"))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ExerciseRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub sets: Option<String>,
    pub reps: Option<String>,
    pub intensity: Option<String>,
    pub rest_period: Option<String>,
    pub special_instructions: Option<String>,
    pub week_number: Option<i32>,
    pub day_number: Option<i32>,
    pub order_in_day: Option<i32>,
    pub video_url: Option<String>,
    pub image_url: Option<String>,
}

impl ExerciseRequest {
    pub fn validate(&self) -> AppResult<()> {
        if let Some(name) = &self.name {
            check_title("name", name)?;
        }
        check_positive("week_number", self.week_number)?;
        if let Some(day) = self.day_number {
            if !(1..=7).contains(&day) {
                return Err(AppError::validation("day_number must be between 1 and 7"));
            }
        }
        check_positive("order_in_day", self.order_in_day)?;
        check_url("video_url", self.video_url.as_deref())?;
        check_url("image_url", self.image_url.as_deref())?;
        Ok(())
    }

    pub fn required_name(&self) -> AppResult<&str> {
        self.validate()?;
        self.name
            .as_deref()
            .map(str::trim)
            .ok_or_else(|| AppError::validation("name is required"))
    }
}

#[derive(Debug, Serialize)]
pub struct PlanDetails {
    #[serde(flatten)]
    pub plan: TrainingPlan,
    pub exercises: Vec<Exercise>,
}

/// Response of `GET /user/training-plan`.
#[derive(Debug, Serialize)]
pub struct CurrentPlanResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
    pub training_plan: Option<TrainingPlan>,
    pub assignment: Option<PlanAssignment>,
    pub exercises: Vec<Exercise>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_urls_fit_their_columns() {
        let long = format!("https://v.example.com/{}", "x".repeat(MAX_MEDIA_URL_LEN));
        let req = ExerciseRequest {
            video_url: Some(long),
            ..Default::default()
        };
        assert!(req.validate().is_err());

        let req = PlanRequest {
            difficulty_level: Some("d".repeat(51)),
            ..Default::default()
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn create_needs_a_title() {
        let req: PlanRequest = serde_json::from_str(r#"{"description": "x"}"#).unwrap();
        assert!(req.required_title().is_err());

        let req: PlanRequest =
            serde_json::from_str(r#"{"title": "  Strength Block ", "duration_weeks": 8}"#).unwrap();
        assert_eq!(req.required_title().unwrap(), "Strength Block");
    }

    #[test]
    fn plan_numbers_are_bounded() {
        let bad = PlanRequest {
            training_frequency: Some(9),
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let bad = PlanRequest {
            duration_weeks: Some(0),
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn exercise_rules() {
        let ok = ExerciseRequest {
            name: Some("Squat".into()),
            day_number: Some(3),
            video_url: Some("https://videos.example.com/squat".into()),
            ..Default::default()
        };
        assert_eq!(ok.required_name().unwrap(), "Squat");

        let bad_day = ExerciseRequest {
            day_number: Some(8),
            ..Default::default()
        };
        assert!(bad_day.validate().is_err());

        let bad_url = ExerciseRequest {
            image_url: Some("javascript:alert(1)".into()),
            ..Default::default()
        };
        assert!(bad_url.validate().is_err());
    }
}
