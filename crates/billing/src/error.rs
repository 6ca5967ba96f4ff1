//! Billing error types

use mealplan_shared::PlanKey;
use thiserror::Error;

pub type BillingResult<T> = Result<T, BillingError>;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Plan type, user id, and email are required.")]
    MissingFields,

    #[error("Invalid plan type: {0}")]
    InvalidPlan(String),

    #[error("Server misconfigured pricing: no price configured for plan '{0}'")]
    PriceNotConfigured(PlanKey),

    #[error("No active subscription found")]
    NoActiveSubscription,

    #[error("Subscription item not found")]
    SubscriptionItemNotFound,

    #[error("Invalid webhook signature")]
    WebhookSignatureInvalid,

    #[error("Invalid webhook payload: {0}")]
    WebhookPayload(String),

    #[error("Stripe API error: {0}")]
    StripeApi(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BillingError {
    /// Errors caused by the caller's input rather than by a collaborator.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            BillingError::MissingFields
                | BillingError::InvalidPlan(_)
                | BillingError::PriceNotConfigured(_)
                | BillingError::NoActiveSubscription
                | BillingError::SubscriptionItemNotFound
        )
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Database(err.to_string())
    }
}

impl From<stripe::StripeError> for BillingError {
    fn from(err: stripe::StripeError) -> Self {
        match err {
            stripe::StripeError::Stripe(request) => BillingError::StripeApi(
                request
                    .message
                    .unwrap_or_else(|| format!("request failed with status {}", request.http_status)),
            ),
            other => BillingError::StripeApi(other.to_string()),
        }
    }
}
