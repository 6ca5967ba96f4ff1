//! Chat completions client

use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use super::parse::{clean_to_json, coerce_days, DayPlan};
use super::MealPlanRequest;
use crate::config::OpenAiConfig;
use crate::error::ApiError;

const TEMPERATURE: f32 = 0.5;
const MAX_TOKENS: u32 = 1400;

#[derive(Debug, Error)]
pub enum MealPlanError {
    #[error("Model returned non-JSON. Please try again.")]
    NonJson,
    #[error("{0}")]
    Upstream(String),
    #[error("Model request failed: {0}")]
    Request(#[from] reqwest::Error),
}

impl From<MealPlanError> for ApiError {
    fn from(err: MealPlanError) -> Self {
        tracing::error!(error = %err, "Meal plan generation failed");
        ApiError::Upstream(err.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Clone)]
pub struct MealPlanner {
    http: Client,
    config: OpenAiConfig,
}

impl MealPlanner {
    pub fn new(http: Client, config: OpenAiConfig) -> Self {
        Self { http, config }
    }

    pub async fn generate(&self, request: &MealPlanRequest) -> Result<Vec<DayPlan>, MealPlanError> {
        let body = json!({
            "model": self.config.model,
            "messages": [{ "role": "user", "content": request.prompt() }],
            "temperature": TEMPERATURE,
            "max_tokens": MAX_TOKENS,
            "response_format": { "type": "json_object" },
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&text)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| format!("Model API returned {status}"));
            return Err(MealPlanError::Upstream(message));
        }

        let completion: CompletionResponse = response.json().await?;
        let raw = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        let value: Value = serde_json::from_str(&clean_to_json(&raw)).map_err(|e| {
            tracing::warn!(error = %e, "Model reply was not JSON");
            MealPlanError::NonJson
        })?;

        Ok(coerce_days(&value, request.day_count()))
    }
}
