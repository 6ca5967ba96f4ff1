//! Profile and subscription management routes

use axum::{
    extract::{Extension, State},
    Json,
};
use mealplan_billing::SubscriptionSummary;
use mealplan_shared::{PlanKey, Profile};
use serde::{Deserialize, Serialize};

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    state::AppState,
};

#[derive(Debug, Serialize)]
pub struct CreateProfileResponse {
    pub ok: bool,
    pub profile: Profile,
}

/// Create the caller's profile if it does not exist yet
pub async fn create_profile(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<CreateProfileResponse>> {
    let profile = state
        .billing
        .profiles
        .ensure_profile(&auth_user.user_id, auth_user.email.as_deref())
        .await?;

    Ok(Json(CreateProfileResponse { ok: true, profile }))
}

#[derive(Debug, Serialize)]
pub struct SubscriptionStatusResponse {
    pub subscription: Option<SubscriptionSummary>,
}

pub async fn subscription_status(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<SubscriptionStatusResponse>> {
    let resolution = state
        .billing
        .status
        .resolve(&auth_user.user_id, auth_user.email.as_deref())
        .await?;

    tracing::debug!(
        user_id = %auth_user.user_id,
        source = ?resolution.source,
        active = resolution.is_active(),
        "Subscription status resolved"
    );

    Ok(Json(SubscriptionStatusResponse {
        subscription: resolution.subscription,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePlanRequest {
    #[serde(default)]
    pub plan_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChangePlanResponse {
    pub ok: bool,
    pub plan: PlanKey,
}

pub async fn change_plan(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<ChangePlanRequest>,
) -> ApiResult<Json<ChangePlanResponse>> {
    let plan_type = req
        .plan_type
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| ApiError::Validation("Plan type is required.".to_string()))?;

    let result = state
        .billing
        .subscriptions
        .change_plan(&auth_user.user_id, &plan_type)
        .await?;

    Ok(Json(ChangePlanResponse {
        ok: true,
        plan: result.plan,
    }))
}

#[derive(Debug, Serialize)]
pub struct UnsubscribeResponse {
    pub ok: bool,
    /// Nothing was on file to cancel
    pub already: bool,
}

pub async fn unsubscribe(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<UnsubscribeResponse>> {
    let result = state
        .billing
        .subscriptions
        .unsubscribe(&auth_user.user_id)
        .await?;

    Ok(Json(UnsubscribeResponse {
        ok: true,
        already: result.already_inactive,
    }))
}
