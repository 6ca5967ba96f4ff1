//! Meal plan generation
//!
//! Thin glue around an OpenAI-compatible chat completions API. The model is
//! asked for a JSON object keyed by weekday; its reply is cleaned up and
//! normalized before it reaches the client.

mod client;
mod parse;

pub use client::{MealPlanError, MealPlanner};
pub use parse::{clean_to_json, coerce_days, DayPlan, DAY_NAMES};

use serde::Deserialize;

pub const MAX_DAYS: u8 = 7;

fn default_diet_type() -> String {
    "Balanced".to_string()
}

fn default_calories() -> u32 {
    2000
}

fn default_days() -> i64 {
    MAX_DAYS as i64
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MealPlanRequest {
    #[serde(default = "default_diet_type")]
    pub diet_type: String,
    #[serde(default = "default_calories")]
    pub calories: u32,
    #[serde(default)]
    pub allergies: String,
    #[serde(default)]
    pub cuisine: String,
    #[serde(default)]
    pub snacks: bool,
    #[serde(default = "default_days")]
    pub days: i64,
}

impl Default for MealPlanRequest {
    fn default() -> Self {
        Self {
            diet_type: default_diet_type(),
            calories: default_calories(),
            allergies: String::new(),
            cuisine: String::new(),
            snacks: false,
            days: default_days(),
        }
    }
}

impl MealPlanRequest {
    /// Requested day count, clamped to 1..=7.
    pub fn day_count(&self) -> usize {
        self.days.clamp(1, MAX_DAYS as i64) as usize
    }

    pub fn prompt(&self) -> String {
        let days = self.day_count();
        let keys = DAY_NAMES[..days]
            .iter()
            .map(|d| format!("- \"{d}\""))
            .collect::<Vec<_>>()
            .join("\n");
        let allergies = if self.allergies.trim().is_empty() {
            "none"
        } else {
            self.allergies.trim()
        };
        let cuisine = if self.cuisine.trim().is_empty() {
            "no preference"
        } else {
            self.cuisine.trim()
        };
        let meals = if self.snacks {
            "- \"Breakfast\"\n- \"Lunch\"\n- \"Dinner\"\n- \"Snacks\""
        } else {
            "- \"Breakfast\"\n- \"Lunch\"\n- \"Dinner\""
        };

        format!(
            "You are a professional nutritionist.\n\n\
             Create a {days}-day meal plan for a person following a \"{diet}\" diet, targeting {calories} calories/day.\n\
             Allergies/restrictions: {allergies}.\n\
             Preferred cuisine: {cuisine}.\n\
             Include snacks: {snacks}.\n\n\
             Return a STRICT JSON object (no markdown, no comments, no prose) with exactly these keys:\n\
             {keys}\n\n\
             Each day must contain (string values):\n\
             {meals}\n\n\
             Output ONLY valid JSON, no code fences.",
            diet = self.diet_type,
            calories = self.calories,
            snacks = if self.snacks { "yes" } else { "no" },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults() {
        let request: MealPlanRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(request.diet_type, "Balanced");
        assert_eq!(request.calories, 2000);
        assert!(!request.snacks);
        assert_eq!(request.day_count(), 7);
    }

    #[test]
    fn test_days_are_clamped() {
        for (days, expected) in [(0, 1), (-4, 1), (3, 3), (7, 7), (30, 7)] {
            let request = MealPlanRequest {
                days,
                ..Default::default()
            };
            assert_eq!(request.day_count(), expected, "days = {days}");
        }
    }

    #[test]
    fn test_prompt_lists_requested_days_only() {
        let request = MealPlanRequest {
            days: 2,
            snacks: true,
            allergies: "peanuts".into(),
            ..Default::default()
        };
        let prompt = request.prompt();
        assert!(prompt.contains("- \"Monday\"\n- \"Tuesday\""));
        assert!(!prompt.contains("Wednesday"));
        assert!(prompt.contains("- \"Snacks\""));
        assert!(prompt.contains("Allergies/restrictions: peanuts."));
        assert!(prompt.contains("Preferred cuisine: no preference."));
    }
}
