//! Subscription status resolution
//!
//! Serves the stored profile when it is complete. Otherwise looks the user up
//! at Stripe by email and backfills the profile with what it finds.

use std::sync::Arc;

use mealplan_shared::{Profile, ProfileUpdate, SubscriptionTier};
use serde::Serialize;

use crate::client::StripeConfig;
use crate::error::BillingResult;
use crate::invariants::{check_profile, log_violations};
use crate::provider::{PaymentProvider, ProviderSubscription};
use crate::store::ProfileStore;
use crate::tiers::PriceIds;

/// How many of a customer's subscriptions the fallback inspects.
const FALLBACK_SUBSCRIPTION_LIMIT: u64 = 3;

/// An active, fully-known subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionSummary {
    pub stripe_subscription_id: String,
    pub subscription_active: bool,
    pub subscription_tier: SubscriptionTier,
}

impl SubscriptionSummary {
    fn from_profile(profile: &Profile) -> Option<Self> {
        if !profile.subscription_active {
            return None;
        }
        Some(Self {
            stripe_subscription_id: profile.stripe_subscription_id.clone()?,
            subscription_active: true,
            subscription_tier: profile.subscription_tier?,
        })
    }
}

/// Where a resolution came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionSource {
    Store,
    Provider,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionResolution {
    /// `Some` only for an active subscription with known tier and id.
    pub subscription: Option<SubscriptionSummary>,
    pub source: ResolutionSource,
}

impl SubscriptionResolution {
    fn none() -> Self {
        Self {
            subscription: None,
            source: ResolutionSource::None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.subscription.is_some()
    }
}

/// Pick the first entitled subscription, else the first listed.
fn choose_subscription(subscriptions: Vec<ProviderSubscription>) -> Option<ProviderSubscription> {
    let entitled = subscriptions.iter().position(|s| s.is_entitled());
    let index = entitled.unwrap_or(0);
    subscriptions.into_iter().nth(index)
}

pub struct StatusResolver {
    provider: Arc<dyn PaymentProvider>,
    profiles: Arc<dyn ProfileStore>,
    price_ids: PriceIds,
}

impl StatusResolver {
    pub fn new(
        provider: Arc<dyn PaymentProvider>,
        profiles: Arc<dyn ProfileStore>,
        config: &StripeConfig,
    ) -> Self {
        Self {
            provider,
            profiles,
            price_ids: config.price_ids.clone(),
        }
    }

    /// Resolve a user's subscription, falling back to Stripe when the stored
    /// profile is missing or incomplete.
    pub async fn resolve(
        &self,
        user_id: &str,
        email: Option<&str>,
    ) -> BillingResult<SubscriptionResolution> {
        let profile = self.profiles.find_by_user_id(user_id).await?;

        if let Some(profile) = &profile {
            if let Some(summary) = SubscriptionSummary::from_profile(profile) {
                return Ok(SubscriptionResolution {
                    subscription: Some(summary),
                    source: ResolutionSource::Store,
                });
            }
            log_violations(&check_profile(profile));
        }

        let email = email
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .or_else(|| {
                profile
                    .as_ref()
                    .map(|p| p.email.trim())
                    .filter(|e| !e.is_empty())
            })
            .map(str::to_string);

        let Some(email) = email else {
            tracing::debug!(user_id = %user_id, "No email available for subscription fallback");
            return Ok(SubscriptionResolution::none());
        };

        let Some(customer_id) = self.provider.find_customer_by_email(&email).await? else {
            tracing::debug!(user_id = %user_id, "No Stripe customer for email");
            return Ok(SubscriptionResolution::none());
        };

        let subscriptions = self
            .provider
            .list_customer_subscriptions(&customer_id, FALLBACK_SUBSCRIPTION_LIMIT)
            .await?;

        let Some(found) = choose_subscription(subscriptions) else {
            tracing::debug!(user_id = %user_id, customer_id = %customer_id, "Customer has no subscriptions");
            return Ok(SubscriptionResolution::none());
        };

        let tier = self.price_ids.tier_from_price_id(found.price_id.as_deref());
        let update = ProfileUpdate::subscription(&found.id, found.is_entitled(), tier);
        let backfilled = self
            .profiles
            .upsert_by_user_id(user_id, &email, &update)
            .await?;

        tracing::info!(
            user_id = %user_id,
            subscription_id = %found.id,
            status = ?found.status,
            tier = ?tier,
            "Backfilled profile from Stripe"
        );

        let resolved = match backfilled {
            Some(profile) => profile,
            None => {
                let mut profile = profile.unwrap_or_else(|| Profile::new(user_id, email));
                profile.apply(&update);
                profile
            }
        };

        Ok(SubscriptionResolution {
            subscription: SubscriptionSummary::from_profile(&resolved),
            source: ResolutionSource::Provider,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{CancellationPolicy, SubscriptionStatus};
    use crate::testing::{subscription, InMemoryProfileStore, MockPaymentProvider, ProviderCall};

    fn config() -> StripeConfig {
        StripeConfig {
            secret_key: "sk_test".into(),
            webhook_secret: "whsec_test".into(),
            price_ids: PriceIds {
                weekly: Some("price_week".into()),
                monthly: Some("price_month".into()),
                yearly: Some("price_year".into()),
            },
            app_base_url: "http://localhost:3000".into(),
            cancellation: CancellationPolicy::Immediate,
            webhook_tolerance_secs: 300,
        }
    }

    fn resolver(
        store: InMemoryProfileStore,
        provider: MockPaymentProvider,
    ) -> (StatusResolver, Arc<InMemoryProfileStore>, Arc<MockPaymentProvider>) {
        let store = Arc::new(store);
        let provider = Arc::new(provider);
        (
            StatusResolver::new(provider.clone(), store.clone(), &config()),
            store,
            provider,
        )
    }

    #[tokio::test]
    async fn test_complete_profile_served_from_store() {
        let profile = Profile {
            subscription_active: true,
            subscription_tier: Some(SubscriptionTier::Weekly),
            stripe_subscription_id: Some("sub_1".into()),
            ..Profile::new("user_1", "a@example.com")
        };
        let (resolver, _, provider) =
            resolver(InMemoryProfileStore::new().with_profile(profile), MockPaymentProvider::new());

        let resolution = resolver.resolve("user_1", None).await.unwrap();
        assert_eq!(resolution.source, ResolutionSource::Store);
        assert_eq!(
            resolution.subscription.unwrap().subscription_tier,
            SubscriptionTier::Weekly
        );
        assert!(provider.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_fallback_backfills_null_tier() {
        let profile = Profile {
            subscription_active: true,
            stripe_subscription_id: Some("sub_1".into()),
            ..Profile::new("user_1", "")
        };
        let (resolver, store, _) = resolver(
            InMemoryProfileStore::new().with_profile(profile),
            MockPaymentProvider::new().with_customer(
                "a@example.com",
                "cus_1",
                vec![subscription("sub_1", SubscriptionStatus::Active, "price_month")],
            ),
        );

        let resolution = resolver
            .resolve("user_1", Some("a@example.com"))
            .await
            .unwrap();
        assert_eq!(resolution.source, ResolutionSource::Provider);
        let summary = resolution.subscription.unwrap();
        assert!(summary.subscription_active);
        assert_eq!(summary.subscription_tier, SubscriptionTier::Monthly);

        let stored = store.get("user_1").await.unwrap();
        assert!(stored.has_complete_subscription());
        assert_eq!(stored.subscription_tier, Some(SubscriptionTier::Monthly));
    }

    #[tokio::test]
    async fn test_fallback_creates_missing_profile() {
        let (resolver, store, _) = resolver(
            InMemoryProfileStore::new(),
            MockPaymentProvider::new().with_customer(
                "a@example.com",
                "cus_1",
                vec![subscription("sub_1", SubscriptionStatus::Trialing, "price_year")],
            ),
        );

        let resolution = resolver
            .resolve("user_1", Some("a@example.com"))
            .await
            .unwrap();
        assert!(resolution.is_active());

        let stored = store.get("user_1").await.unwrap();
        assert_eq!(stored.email, "a@example.com");
        assert_eq!(stored.subscription_tier, Some(SubscriptionTier::Yearly));
    }

    #[tokio::test]
    async fn test_fallback_uses_profile_email_and_prefers_entitled() {
        let (resolver, store, provider) = resolver(
            InMemoryProfileStore::new().with_profile(Profile::new("user_1", "b@example.com")),
            MockPaymentProvider::new().with_customer(
                "b@example.com",
                "cus_2",
                vec![
                    subscription("sub_old", SubscriptionStatus::Canceled, "price_week"),
                    subscription("sub_new", SubscriptionStatus::Active, "price_month"),
                ],
            ),
        );

        let resolution = resolver.resolve("user_1", None).await.unwrap();
        assert_eq!(
            resolution.subscription.unwrap().stripe_subscription_id,
            "sub_new"
        );
        assert_eq!(
            provider.calls().await,
            vec![
                ProviderCall::FindCustomer("b@example.com".into()),
                ProviderCall::ListSubscriptions("cus_2".into()),
            ]
        );
        assert_eq!(
            store.get("user_1").await.unwrap().stripe_subscription_id.as_deref(),
            Some("sub_new")
        );
    }

    #[tokio::test]
    async fn test_fallback_inactive_subscription_is_backfilled_but_not_active() {
        let (resolver, store, _) = resolver(
            InMemoryProfileStore::new().with_profile(Profile::new("user_1", "a@example.com")),
            MockPaymentProvider::new().with_customer(
                "a@example.com",
                "cus_1",
                vec![subscription("sub_1", SubscriptionStatus::PastDue, "price_week")],
            ),
        );

        let resolution = resolver.resolve("user_1", None).await.unwrap();
        assert_eq!(resolution.source, ResolutionSource::Provider);
        assert!(resolution.subscription.is_none());

        let stored = store.get("user_1").await.unwrap();
        assert!(!stored.subscription_active);
        assert_eq!(stored.stripe_subscription_id.as_deref(), Some("sub_1"));
    }

    #[tokio::test]
    async fn test_nothing_anywhere_is_no_subscription() {
        let (resolver, store, provider) =
            resolver(InMemoryProfileStore::new(), MockPaymentProvider::new());

        let resolution = resolver
            .resolve("user_1", Some("nobody@example.com"))
            .await
            .unwrap();
        assert_eq!(resolution, SubscriptionResolution::none());
        assert!(store.get("user_1").await.is_none());
        assert_eq!(provider.calls().await.len(), 1);
    }

    #[tokio::test]
    async fn test_no_email_skips_provider() {
        let (resolver, _, provider) = resolver(
            InMemoryProfileStore::new().with_profile(Profile::new("user_1", "")),
            MockPaymentProvider::new(),
        );

        let resolution = resolver.resolve("user_1", Some("  ")).await.unwrap();
        assert_eq!(resolution.source, ResolutionSource::None);
        assert!(provider.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_provider_failure_surfaces() {
        let (resolver, _, _) = resolver(
            InMemoryProfileStore::new(),
            MockPaymentProvider::new().failing("rate limited"),
        );
        assert!(resolver.resolve("user_1", Some("a@example.com")).await.is_err());
    }

    #[test]
    fn test_choose_subscription() {
        assert_eq!(choose_subscription(vec![]), None);
        let chosen = choose_subscription(vec![
            subscription("sub_a", SubscriptionStatus::Unpaid, "p"),
            subscription("sub_b", SubscriptionStatus::Canceled, "p"),
        ]);
        assert_eq!(chosen.unwrap().id, "sub_a");
    }
}
