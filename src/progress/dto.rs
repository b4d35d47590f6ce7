use serde::{Deserialize, Serialize};

use super::repo::{BodyMetric, ProgressEntry, ProgressRecord};
use crate::error::{AppError, AppResult};

#[derive(Debug, Default, Deserialize)]
pub struct ProgressRequest {
    pub exercise_id: Option<i64>,
    pub sets_completed: Option<i32>,
    pub reps_completed: Option<i32>,
    pub weight_used: Option<f64>,
    pub duration_minutes: Option<i32>,
    pub notes: Option<String>,
    pub rating: Option<i32>,
}

impl ProgressRequest {
    pub fn validate(&self) -> AppResult<()> {
        if self.sets_completed.is_some_and(|s| s < 0) {
            return Err(AppError::validation("sets completed cannot be negative"));
        }
        if self.reps_completed.is_some_and(|r| r < 0) {
            return Err(AppError::validation("reps completed cannot be negative"));
        }
        if self.weight_used.is_some_and(|w| w < 0.0) {
            return Err(AppError::validation("weight used cannot be negative"));
        }
        if self.duration_minutes.is_some_and(|d| d < 0) {
            return Err(AppError::validation("duration cannot be negative"));
        }
        if let Some(rating) = self.rating {
            if !(1..=5).contains(&rating) {
                return Err(AppError::validation("rating must be between 1 and 5"));
            }
        }
        Ok(())
    }

    /// Fields a new record cannot do without: exercise, sets and reps.
    pub fn required(&self) -> AppResult<(i64, i32, i32)> {
        match (self.exercise_id, self.sets_completed, self.reps_completed) {
            (Some(exercise), Some(sets), Some(reps)) => Ok((exercise, sets, reps)),
            _ => Err(AppError::validation(
                "exercise id, sets completed and reps completed are required",
            )),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct BodyMetricsRequest {
    pub weight: Option<f64>,
    pub body_fat: Option<f64>,
    pub muscle_mass: Option<f64>,
    pub notes: Option<String>,
}

impl BodyMetricsRequest {
    pub fn validate(&self) -> AppResult<()> {
        if let Some(weight) = self.weight {
            if !(30.0..=300.0).contains(&weight) {
                return Err(AppError::validation("weight must be between 30 and 300 kg"));
            }
        }
        if let Some(fat) = self.body_fat {
            if !(0.0..=100.0).contains(&fat) {
                return Err(AppError::validation("body fat must be between 0 and 100 percent"));
            }
        }
        if self.muscle_mass.is_some_and(|m| m < 0.0) {
            return Err(AppError::validation("muscle mass cannot be negative"));
        }
        Ok(())
    }
}

/// Body mass index from kilograms and centimetres, rounded to two places.
/// Values past the column's range are rejected.
pub fn bmi(weight_kg: f64, height_cm: f64) -> AppResult<f64> {
    let metres = height_cm / 100.0;
    let value = ((weight_kg / (metres * metres)) * 100.0).round() / 100.0;
    if !value.is_finite() || value > 99.99 {
        return Err(AppError::validation("calculated BMI is out of range"));
    }
    Ok(value)
}

#[derive(Debug, Serialize)]
pub struct ProgressList {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
    pub progress_records: Vec<ProgressEntry>,
}

#[derive(Debug, Serialize)]
pub struct ProgressResponse {
    pub message: &'static str,
    pub progress: ProgressRecord,
}

#[derive(Debug, Serialize)]
pub struct BodyMetricsList {
    pub body_metrics: Vec<BodyMetric>,
}

#[derive(Debug, Serialize)]
pub struct BodyMetricsResponse {
    pub message: &'static str,
    pub body_metrics: BodyMetric,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bmi_is_rounded_to_two_places() {
        assert_eq!(bmi(80.0, 180.0).unwrap(), 24.69);
        assert_eq!(bmi(50.0, 160.0).unwrap(), 19.53);
    }

    #[test]
    fn bmi_outside_column_range_is_rejected() {
        assert!(bmi(300.0, 51.0).is_err());
        assert!(bmi(80.0, 0.0).is_err());
    }

    #[test]
    fn progress_rules() {
        let ok = ProgressRequest {
            exercise_id: Some(3),
            sets_completed: Some(4),
            reps_completed: Some(0),
            rating: Some(5),
            ..Default::default()
        };
        assert!(ok.validate().is_ok());
        assert_eq!(ok.required().unwrap(), (3, 4, 0));

        for bad in [
            ProgressRequest { sets_completed: Some(-1), ..Default::default() },
            ProgressRequest { reps_completed: Some(-2), ..Default::default() },
            ProgressRequest { rating: Some(0), ..Default::default() },
            ProgressRequest { rating: Some(6), ..Default::default() },
        ] {
            assert!(bad.validate().is_err(), "{bad:?}");
        }

        let missing_reps = ProgressRequest {
            exercise_id: Some(3),
            sets_completed: Some(4),
            ..Default::default()
        };
        assert!(missing_reps.required().is_err());
    }

    #[test]
    fn body_metric_ranges() {
        let ok = BodyMetricsRequest {
            weight: Some(72.5),
            body_fat: Some(18.0),
            muscle_mass: Some(0.0),
            notes: None,
        };
        assert!(ok.validate().is_ok());

        for bad in [
            BodyMetricsRequest { weight: Some(29.9), ..Default::default() },
            BodyMetricsRequest { weight: Some(300.1), ..Default::default() },
            BodyMetricsRequest { body_fat: Some(-0.5), ..Default::default() },
            BodyMetricsRequest { body_fat: Some(100.5), ..Default::default() },
            BodyMetricsRequest { muscle_mass: Some(-1.0), ..Default::default() },
        ] {
            assert!(bad.validate().is_err(), "{bad:?}");
        }
    }
}
