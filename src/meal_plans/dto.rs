use serde::{Deserialize, Serialize};

use super::repo::{Meal, MealPlan, MealPlanAssignment};
use crate::error::{AppError, AppResult};

const DAYS: [&str; 7] = [
    "monday", "tuesday", "wednesday", "thursday", "friday", "saturday", "sunday",
];

fn check_text(field: &str, value: &str, max: usize) -> AppResult<()> {
    let len = value.trim().chars().count();
    if len == 0 || len > max {
        return Err(AppError::validation(format!(
            "{field} must be between 1 and {max} characters"
        )));
    }
    Ok(())
}

fn check_amount(field: &str, value: Option<i32>) -> AppResult<()> {
    match value {
        Some(v) if v < 0 => Err(AppError::validation(format!("{field} cannot be negative"))),
        _ => Ok(()),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct MealPlanRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub total_calories: Option<i32>,
    pub total_protein: Option<i32>,
    pub total_carbs: Option<i32>,
    pub total_fats: Option<i32>,
    pub dietary_preferences: Option<String>,
}

impl MealPlanRequest {
    pub fn validate(&self) -> AppResult<()> {
        if let Some(name) = &self.name {
            check_text("name", name, 255)?;
        }
        check_amount("total_calories", self.total_calories)?;
        check_amount("total_protein", self.total_protein)?;
        check_amount("total_carbs", self.total_carbs)?;
        check_amount("total_fats", self.total_fats)?;
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

#[derive(Debug, Default, Deserialize)]
pub struct MealRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub ingredients: Option<String>,
    #[serde(alias = "instructions")]
    pub cooking_instructions: Option<String>,
    pub calories: Option<i32>,
    pub protein: Option<i32>,
    pub carbs: Option<i32>,
    pub fats: Option<i32>,
    pub meal_type: Option<String>,
    pub day_of_week: Option<String>,
    pub meal_time: Option<String>,
}

/// Columns a new meal cannot go without.
#[derive(Debug, Clone, Copy)]
pub struct RequiredMealFields<'a> {
    pub name: &'a str,
    pub meal_type: &'a str,
    pub day_of_week: &'a str,
}

impl MealRequest {
    pub fn validate(&self) -> AppResult<()> {
        if let Some(name) = &self.name {
            check_text("name", name, 255)?;
        }
        if let Some(kind) = &self.meal_type {
            check_text("meal_type", kind, 50)?;
        }
        if self.meal_time.as_ref().is_some_and(|t| t.chars().count() > 20) {
            return Err(AppError::validation("meal_time must be at most 20 characters"));
        }
        if let Some(day) = &self.day_of_week {
            if !DAYS.contains(&day.trim().to_ascii_lowercase().as_str()) {
                return Err(AppError::validation("day_of_week must be a weekday name"));
            }
        }
        check_amount("calories", self.calories)?;
        check_amount("protein", self.protein)?;
        check_amount("carbs", self.carbs)?;
        check_amount("fats", self.fats)?;
        Ok(())
    }

    pub fn required(&self) -> AppResult<RequiredMealFields<'_>> {
        self.validate()?;
        match (&self.name, &self.meal_type, &self.day_of_week) {
            (Some(name), Some(meal_type), Some(day)) => Ok(RequiredMealFields {
                name: name.trim(),
                meal_type: meal_type.trim(),
                day_of_week: day.trim(),
            }),
            _ => Err(AppError::validation(
                "name, meal_type and day_of_week are required",
            )),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MealPlanDetails {
    #[serde(flatten)]
    pub plan: MealPlan,
    pub meals: Vec<Meal>,
}

#[derive(Debug, Serialize)]
pub struct AssignedMealPlan {
    pub message: &'static str,
    pub assignment: MealPlanAssignment,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}
