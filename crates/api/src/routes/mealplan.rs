use axum::{
    extract::{Extension, State},
    Json,
};
use serde::Serialize;

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    mealplan::{DayPlan, MealPlanRequest},
    state::AppState,
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MealPlanResponse {
    pub meal_plan: Vec<DayPlan>,
}

/// Generate a meal plan; subscribers only
pub async fn generate_mealplan(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<MealPlanRequest>,
) -> ApiResult<Json<MealPlanResponse>> {
    let resolution = state
        .billing
        .status
        .resolve(&auth_user.user_id, auth_user.email.as_deref())
        .await?;
    if !resolution.is_active() {
        return Err(ApiError::PaymentRequired);
    }

    let planner = state.meal_planner.as_ref().ok_or_else(|| {
        ApiError::Unavailable("Meal plan generation is not configured.".to_string())
    })?;

    let meal_plan = planner.generate(&req).await?;
    tracing::info!(
        user_id = %auth_user.user_id,
        days = meal_plan.len(),
        "Meal plan generated"
    );

    Ok(Json(MealPlanResponse { meal_plan }))
}
