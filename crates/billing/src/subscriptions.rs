//! Subscription management: plan changes and cancellation
//!
//! Both operations mutate the subscription at Stripe first and then write
//! through to the profile. The webhook that follows confirms the state.

use std::sync::Arc;

use mealplan_shared::{PlanKey, ProfileUpdate, SubscriptionTier};
use serde::Serialize;

use crate::client::StripeConfig;
use crate::error::{BillingError, BillingResult};
use crate::provider::{CancellationPolicy, PaymentProvider};
use crate::store::{ProfileStore, WriteResult};
use crate::tiers::PriceIds;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanChangeResult {
    pub plan: PlanKey,
    pub tier: SubscriptionTier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsubscribeResult {
    /// Nothing was on file to cancel.
    pub already_inactive: bool,
}

pub struct SubscriptionService {
    provider: Arc<dyn PaymentProvider>,
    profiles: Arc<dyn ProfileStore>,
    price_ids: PriceIds,
    cancellation: CancellationPolicy,
}

impl SubscriptionService {
    pub fn new(
        provider: Arc<dyn PaymentProvider>,
        profiles: Arc<dyn ProfileStore>,
        config: &StripeConfig,
    ) -> Self {
        Self {
            provider,
            profiles,
            price_ids: config.price_ids.clone(),
            cancellation: config.cancellation,
        }
    }

    /// Move the user's subscription to another plan, prorating the change.
    pub async fn change_plan(
        &self,
        user_id: &str,
        plan_type: &str,
    ) -> BillingResult<PlanChangeResult> {
        let plan: PlanKey = plan_type
            .trim()
            .parse()
            .map_err(|_| BillingError::InvalidPlan(plan_type.to_string()))?;
        let price_id = self
            .price_ids
            .price_id_for_plan(plan)
            .ok_or(BillingError::PriceNotConfigured(plan))?;

        let subscription_id = self
            .profiles
            .find_by_user_id(user_id)
            .await?
            .and_then(|profile| profile.stripe_subscription_id)
            .ok_or(BillingError::NoActiveSubscription)?;

        let subscription = self.provider.retrieve_subscription(&subscription_id).await?;
        let item_id = subscription
            .item_id
            .as_deref()
            .ok_or(BillingError::SubscriptionItemNotFound)?;

        self.provider
            .update_subscription_price(&subscription_id, item_id, price_id)
            .await?;

        let tier = plan.tier();
        let update = ProfileUpdate {
            subscription_active: Some(true),
            subscription_tier: Some(Some(tier)),
            ..Default::default()
        };
        let result = self.profiles.update_by_user_id(user_id, &update).await?;
        if result != WriteResult::Updated {
            tracing::warn!(user_id = %user_id, result = ?result, "Plan change write-through did not apply");
        }

        tracing::info!(
            user_id = %user_id,
            subscription_id = %subscription_id,
            plan = %plan,
            "Subscription plan changed"
        );

        Ok(PlanChangeResult { plan, tier })
    }

    /// Cancel the user's subscription. Succeeds when there is nothing to cancel.
    pub async fn unsubscribe(&self, user_id: &str) -> BillingResult<UnsubscribeResult> {
        let subscription_id = self
            .profiles
            .find_by_user_id(user_id)
            .await?
            .and_then(|profile| profile.stripe_subscription_id);

        let Some(subscription_id) = subscription_id else {
            self.profiles
                .update_by_user_id(user_id, &ProfileUpdate::inactive())
                .await?;
            tracing::info!(user_id = %user_id, "Unsubscribe with no subscription on file");
            return Ok(UnsubscribeResult {
                already_inactive: true,
            });
        };

        self.provider
            .cancel_subscription(&subscription_id, self.cancellation)
            .await
            .map_err(|e| {
                tracing::error!(
                    user_id = %user_id,
                    subscription_id = %subscription_id,
                    error = %e,
                    "Failed to cancel subscription"
                );
                e
            })?;

        self.profiles
            .update_by_user_id(user_id, &ProfileUpdate::inactive())
            .await?;

        tracing::info!(
            user_id = %user_id,
            subscription_id = %subscription_id,
            policy = ?self.cancellation,
            "Subscription cancelled"
        );

        Ok(UnsubscribeResult {
            already_inactive: false,
        })
    }
}
