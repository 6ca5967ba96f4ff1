//! Payment provider seam
//!
//! The billing services talk to Stripe only through [`PaymentProvider`], so
//! they can run against the live client or a scripted double.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BillingResult;

/// Subscription status as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Canceled,
    Unpaid,
    Incomplete,
    IncompleteExpired,
    Paused,
    #[serde(other)]
    Unknown,
}

impl SubscriptionStatus {
    /// Only `active` and `trialing` grant access.
    pub fn is_entitled(&self) -> bool {
        matches!(self, SubscriptionStatus::Active | SubscriptionStatus::Trialing)
    }
}

/// The parts of a provider subscription reconciliation cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSubscription {
    pub id: String,
    pub status: SubscriptionStatus,
    /// Price of the first subscription item.
    pub price_id: Option<String>,
    /// Id of the first subscription item.
    pub item_id: Option<String>,
}

impl ProviderSubscription {
    pub fn is_entitled(&self) -> bool {
        self.status.is_entitled()
    }
}

/// How unsubscribe cancels at the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CancellationPolicy {
    #[default]
    Immediate,
    PeriodEnd,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSessionRequest {
    pub price_id: String,
    pub customer_email: String,
    pub success_url: String,
    pub cancel_url: String,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSessionCreated {
    pub session_id: String,
    pub url: String,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> BillingResult<CheckoutSessionCreated>;

    async fn retrieve_subscription(&self, subscription_id: &str)
        -> BillingResult<ProviderSubscription>;

    /// Swap the price on one subscription item, prorating the difference.
    async fn update_subscription_price(
        &self,
        subscription_id: &str,
        item_id: &str,
        price_id: &str,
    ) -> BillingResult<ProviderSubscription>;

    async fn cancel_subscription(
        &self,
        subscription_id: &str,
        policy: CancellationPolicy,
    ) -> BillingResult<()>;

    /// Id of the first customer with this email, if any.
    async fn find_customer_by_email(&self, email: &str) -> BillingResult<Option<String>>;

    /// Subscriptions of any status, in the order the provider returns them.
    async fn list_customer_subscriptions(
        &self,
        customer_id: &str,
        limit: u64,
    ) -> BillingResult<Vec<ProviderSubscription>>;
}
