//! Checkout and Stripe webhook routes

use axum::{
    body::Bytes,
    extract::{Extension, State},
    http::HeaderMap,
    Json,
};
use mealplan_billing::{CheckoutRequest, CheckoutSessionCreated, SIGNATURE_HEADER};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    state::AppState,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCheckoutRequest {
    #[serde(default)]
    pub plan_type: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// Start a subscription checkout for the signed-in user
pub async fn create_checkout(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<CreateCheckoutRequest>,
) -> ApiResult<Json<CheckoutSessionCreated>> {
    let email = req
        .email
        .filter(|e| !e.trim().is_empty())
        .or_else(|| auth_user.email.clone());

    let created = state
        .billing
        .checkout
        .create_checkout_session(CheckoutRequest {
            plan_type: req.plan_type,
            user_id: Some(auth_user.user_id),
            email,
        })
        .await?;

    Ok(Json(created))
}

/// Receive a Stripe webhook delivery
///
/// Anything that passes signature verification is acknowledged, even when
/// applying it failed; the outcome is only logged.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let payload = std::str::from_utf8(&body)
        .map_err(|_| ApiError::Validation("Webhook body is not valid UTF-8".to_string()))?;
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok());

    let outcome = state
        .billing
        .webhooks
        .process(payload, signature)
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, "Rejected webhook delivery");
            ApiError::from(e)
        })?;

    tracing::debug!(outcome = ?outcome, "Webhook delivery handled");
    Ok(Json(json!({ "received": true })))
}
