//! Stripe Checkout sessions

use std::collections::HashMap;
use std::sync::Arc;

use mealplan_shared::{PlanKey, SubscriptionTier};

use crate::client::StripeConfig;
use crate::error::{BillingError, BillingResult};
use crate::provider::{CheckoutSessionCreated, CheckoutSessionRequest, PaymentProvider};
use crate::tiers::PriceIds;

/// Metadata keys written on every checkout session and read back by the
/// `checkout.session.completed` handler.
pub const METADATA_USER_ID: &str = "user_id";
pub const METADATA_TIER: &str = "tier";
pub const METADATA_PLAN: &str = "plan";

/// Reconciliation metadata carried on a checkout session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckoutMetadata {
    pub user_id: Option<String>,
    pub tier: Option<SubscriptionTier>,
    pub plan: Option<PlanKey>,
}

impl CheckoutMetadata {
    pub fn new(user_id: &str, plan: PlanKey) -> Self {
        Self {
            user_id: Some(user_id.to_string()),
            tier: Some(plan.tier()),
            plan: Some(plan),
        }
    }

    pub fn to_map(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        if let Some(user_id) = &self.user_id {
            map.insert(METADATA_USER_ID.to_string(), user_id.clone());
        }
        if let Some(tier) = self.tier {
            map.insert(METADATA_TIER.to_string(), tier.as_str().to_string());
        }
        if let Some(plan) = self.plan {
            map.insert(METADATA_PLAN.to_string(), plan.as_str().to_string());
        }
        map
    }

    /// Lenient read: blank or unrecognized values become `None`.
    pub fn from_map(map: &HashMap<String, String>) -> Self {
        let get = |key: &str| {
            map.get(key)
                .map(|value| value.trim())
                .filter(|value| !value.is_empty())
        };
        Self {
            user_id: get(METADATA_USER_ID).map(str::to_string),
            tier: get(METADATA_TIER).and_then(|raw| raw.parse().ok()),
            plan: get(METADATA_PLAN).and_then(|raw| raw.parse().ok()),
        }
    }

    /// Tier named by the metadata, preferring the explicit tier over the plan key.
    pub fn resolved_tier(&self) -> Option<SubscriptionTier> {
        self.tier.or_else(|| self.plan.map(|plan| plan.tier()))
    }
}

/// Checkout input as received from the client; every field may be absent.
#[derive(Debug, Clone, Default)]
pub struct CheckoutRequest {
    pub plan_type: Option<String>,
    pub user_id: Option<String>,
    pub email: Option<String>,
}

/// Checkout service for creating Stripe checkout sessions
pub struct CheckoutService {
    provider: Arc<dyn PaymentProvider>,
    price_ids: PriceIds,
    app_base_url: String,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl CheckoutService {
    pub fn new(provider: Arc<dyn PaymentProvider>, config: &StripeConfig) -> Self {
        Self {
            provider,
            price_ids: config.price_ids.clone(),
            app_base_url: config.app_base_url.clone(),
        }
    }

    fn success_url(&self) -> String {
        format!(
            "{}/profile?session_id={{CHECKOUT_SESSION_ID}}",
            self.app_base_url
        )
    }

    fn cancel_url(&self) -> String {
        format!("{}/subscribe", self.app_base_url)
    }

    /// Validate the request and build the provider call. No side effects.
    pub fn prepare(&self, request: &CheckoutRequest) -> BillingResult<CheckoutSessionRequest> {
        let (Some(plan_type), Some(user_id), Some(email)) = (
            present(&request.plan_type),
            present(&request.user_id),
            present(&request.email),
        ) else {
            return Err(BillingError::MissingFields);
        };

        let plan: PlanKey = plan_type
            .parse()
            .map_err(|_| BillingError::InvalidPlan(plan_type.to_string()))?;

        let price_id = self.price_ids.price_id_for_plan(plan).ok_or_else(|| {
            tracing::error!(plan = %plan, "No Stripe price configured for plan");
            BillingError::PriceNotConfigured(plan)
        })?;

        Ok(CheckoutSessionRequest {
            price_id: price_id.to_string(),
            customer_email: email.to_string(),
            success_url: self.success_url(),
            cancel_url: self.cancel_url(),
            metadata: CheckoutMetadata::new(user_id, plan).to_map(),
        })
    }

    /// Create a subscription checkout session for a user.
    pub async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> BillingResult<CheckoutSessionCreated> {
        let session_request = self.prepare(&request)?;

        let created = self
            .provider
            .create_checkout_session(session_request)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to create checkout session");
                e
            })?;

        tracing::info!(
            user_id = ?request.user_id,
            plan = ?request.plan_type,
            session_id = %created.session_id,
            "Checkout session created"
        );

        Ok(created)
    }
}
