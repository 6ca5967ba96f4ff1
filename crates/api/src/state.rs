//! Application state

use std::sync::Arc;
use std::time::Duration;

use mealplan_billing::BillingService;
use reqwest::Client;

use crate::{
    auth::{AuthState, JwtManager},
    config::Config,
    mealplan::MealPlanner,
};

const MODEL_TIMEOUT: Duration = Duration::from_secs(60);

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub jwt_manager: JwtManager,
    pub billing: Arc<BillingService>,
    /// `None` when no model API key is configured
    pub meal_planner: Option<MealPlanner>,
}

impl AppState {
    pub fn new(config: Config, billing: BillingService) -> Self {
        let jwt_manager = JwtManager::new(&config.auth_jwt_secret);

        let meal_planner = match &config.openai {
            Some(openai) => {
                let http = Client::builder()
                    .timeout(MODEL_TIMEOUT)
                    .build()
                    .unwrap_or_else(|e| {
                        tracing::warn!(error = %e, "Falling back to default HTTP client");
                        Client::new()
                    });
                tracing::info!(model = %openai.model, "Meal plan generation enabled");
                Some(MealPlanner::new(http, openai.clone()))
            }
            None => {
                tracing::warn!("Meal plan generation not configured (missing OPENAI_API_KEY)");
                None
            }
        };

        Self {
            config,
            jwt_manager,
            billing: Arc::new(billing),
            meal_planner,
        }
    }

    pub fn auth_state(&self) -> AuthState {
        AuthState {
            jwt_manager: self.jwt_manager.clone(),
        }
    }
}
