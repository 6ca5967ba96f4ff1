//! Stripe webhook handling
//!
//! Applies subscription lifecycle events to local profiles. Every handler is
//! idempotent and keyed by Stripe ids, so duplicate and reordered deliveries
//! converge on the same state.

use std::sync::Arc;

use mealplan_shared::ProfileUpdate;
use time::OffsetDateTime;

use crate::checkout::CheckoutMetadata;
use crate::client::StripeConfig;
use crate::error::BillingResult;
use crate::events::{parse_event, CheckoutCompleted, EventPayload, InvoiceFailed, WebhookEvent};
use crate::provider::{PaymentProvider, ProviderSubscription};
use crate::signature::verify_signature;
use crate::store::{ProcessingResult, ProfileStore, WebhookEventStore, WriteResult};
use crate::tiers::PriceIds;

/// What happened to a verified delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Applied,
    /// The profile has already seen a newer event.
    Stale,
    Ignored(String),
    Duplicate,
    Failed(String),
}

impl WebhookOutcome {
    fn from_write(result: WriteResult, missing: &str) -> Self {
        match result {
            WriteResult::Updated => WebhookOutcome::Applied,
            WriteResult::Stale => WebhookOutcome::Stale,
            WriteResult::NotFound => WebhookOutcome::Ignored(missing.to_string()),
        }
    }
}

/// Webhook handler for Stripe events
pub struct WebhookHandler {
    provider: Arc<dyn PaymentProvider>,
    profiles: Arc<dyn ProfileStore>,
    ledger: Arc<dyn WebhookEventStore>,
    price_ids: PriceIds,
    webhook_secret: String,
    tolerance_secs: i64,
}

impl WebhookHandler {
    pub fn new(
        provider: Arc<dyn PaymentProvider>,
        profiles: Arc<dyn ProfileStore>,
        ledger: Arc<dyn WebhookEventStore>,
        config: &StripeConfig,
    ) -> Self {
        Self {
            provider,
            profiles,
            ledger,
            price_ids: config.price_ids.clone(),
            webhook_secret: config.webhook_secret.clone(),
            tolerance_secs: config.webhook_tolerance_secs,
        }
    }

    /// Verify the signature, then decode the event. Touches no storage.
    pub fn verify_event(&self, payload: &str, signature: Option<&str>) -> BillingResult<WebhookEvent> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        verify_signature(
            payload,
            signature,
            &self.webhook_secret,
            now,
            self.tolerance_secs,
        )?;

        let event = parse_event(payload).map_err(|e| {
            tracing::error!(error = %e, "Failed to parse verified webhook payload");
            e
        })?;

        tracing::info!(
            event_id = %event.id,
            event_type = %event.event_type,
            "Webhook signature verified"
        );
        Ok(event)
    }

    /// Verify and handle a raw delivery.
    pub async fn process(
        &self,
        payload: &str,
        signature: Option<&str>,
    ) -> BillingResult<WebhookOutcome> {
        let event = self.verify_event(payload, signature)?;
        Ok(self.handle_event(event).await)
    }

    /// Handle a verified event. Never fails: errors are logged, recorded in
    /// the ledger and reported as [`WebhookOutcome::Failed`].
    pub async fn handle_event(&self, event: WebhookEvent) -> WebhookOutcome {
        match self.ledger.claim(&event).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    "Duplicate webhook event, already processed"
                );
                return WebhookOutcome::Duplicate;
            }
            Err(e) => {
                tracing::warn!(
                    event_id = %event.id,
                    error = %e,
                    "Webhook ledger unavailable, processing without deduplication"
                );
            }
        }

        let outcome = match self.dispatch(&event).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    error = %e,
                    "Failed to apply webhook event"
                );
                WebhookOutcome::Failed(e.to_string())
            }
        };

        let (result, error) = match &outcome {
            WebhookOutcome::Failed(message) => (ProcessingResult::Error, Some(message.as_str())),
            _ => (ProcessingResult::Success, None),
        };
        if let Err(e) = self.ledger.finish(&event.id, result, error).await {
            tracing::warn!(
                event_id = %event.id,
                error = %e,
                "Failed to record webhook processing result"
            );
        }

        tracing::info!(
            event_id = %event.id,
            event_type = %event.event_type,
            outcome = ?outcome,
            "Webhook event handled"
        );
        outcome
    }

    async fn dispatch(&self, event: &WebhookEvent) -> BillingResult<WebhookOutcome> {
        match &event.payload {
            EventPayload::CheckoutSessionCompleted(session) => {
                self.handle_checkout_completed(session, event.created).await
            }
            EventPayload::SubscriptionUpdated(subscription) => {
                self.handle_subscription_updated(subscription, event.created)
                    .await
            }
            EventPayload::SubscriptionDeleted(subscription) => {
                self.handle_subscription_deleted(subscription, event.created)
                    .await
            }
            EventPayload::InvoicePaymentFailed(invoice) => {
                self.handle_payment_failed(invoice, event.created).await
            }
            EventPayload::Other(event_type) => {
                tracing::debug!(event_type = %event_type, "Unhandled webhook event type");
                Ok(WebhookOutcome::Ignored(format!("unhandled event type {event_type}")))
            }
        }
    }

    async fn handle_checkout_completed(
        &self,
        session: &CheckoutCompleted,
        created: OffsetDateTime,
    ) -> BillingResult<WebhookOutcome> {
        let metadata = CheckoutMetadata::from_map(&session.metadata);

        let Some(user_id) = metadata.user_id.as_deref() else {
            tracing::warn!(session_id = %session.session_id, "Checkout session without user_id metadata");
            return Ok(WebhookOutcome::Ignored("missing user_id metadata".into()));
        };
        let Some(subscription_id) = session.subscription_id.as_deref() else {
            tracing::warn!(session_id = %session.session_id, "Checkout session without subscription");
            return Ok(WebhookOutcome::Ignored("missing subscription".into()));
        };

        let tier = match metadata.resolved_tier() {
            Some(tier) => Some(tier),
            None => match self.provider.retrieve_subscription(subscription_id).await {
                Ok(subscription) => self
                    .price_ids
                    .tier_from_price_id(subscription.price_id.as_deref()),
                Err(e) => {
                    tracing::warn!(
                        subscription_id = %subscription_id,
                        error = %e,
                        "Could not retrieve subscription to derive tier"
                    );
                    None
                }
            },
        };

        let update = ProfileUpdate::subscription(subscription_id, true, tier).observed_at(created);
        let result = self.profiles.update_by_user_id(user_id, &update).await?;

        tracing::info!(
            user_id = %user_id,
            subscription_id = %subscription_id,
            tier = ?tier,
            result = ?result,
            "Checkout completed"
        );
        Ok(WebhookOutcome::from_write(result, "no profile for user"))
    }

    async fn handle_subscription_updated(
        &self,
        subscription: &ProviderSubscription,
        created: OffsetDateTime,
    ) -> BillingResult<WebhookOutcome> {
        let Some(profile) = self.profiles.find_by_subscription_id(&subscription.id).await? else {
            tracing::info!(subscription_id = %subscription.id, "No profile for updated subscription");
            return Ok(WebhookOutcome::Ignored("no profile for subscription".into()));
        };

        let tier = self
            .price_ids
            .tier_from_price_id(subscription.price_id.as_deref());
        let update = ProfileUpdate {
            subscription_active: Some(subscription.is_entitled()),
            subscription_tier: Some(tier),
            ..Default::default()
        }
        .observed_at(created);

        let result = self
            .profiles
            .update_by_user_id(&profile.user_id, &update)
            .await?;

        tracing::info!(
            user_id = %profile.user_id,
            subscription_id = %subscription.id,
            status = ?subscription.status,
            tier = ?tier,
            result = ?result,
            "Subscription updated"
        );
        Ok(WebhookOutcome::from_write(result, "profile disappeared"))
    }

    async fn handle_subscription_deleted(
        &self,
        subscription: &ProviderSubscription,
        created: OffsetDateTime,
    ) -> BillingResult<WebhookOutcome> {
        let Some(profile) = self.profiles.find_by_subscription_id(&subscription.id).await? else {
            tracing::info!(subscription_id = %subscription.id, "No profile for deleted subscription");
            return Ok(WebhookOutcome::Ignored("no profile for subscription".into()));
        };

        let result = self
            .profiles
            .update_by_user_id(&profile.user_id, &ProfileUpdate::inactive().observed_at(created))
            .await?;

        tracing::info!(
            user_id = %profile.user_id,
            subscription_id = %subscription.id,
            result = ?result,
            "Subscription deleted"
        );
        Ok(WebhookOutcome::from_write(result, "profile disappeared"))
    }

    async fn handle_payment_failed(
        &self,
        invoice: &InvoiceFailed,
        created: OffsetDateTime,
    ) -> BillingResult<WebhookOutcome> {
        let Some(subscription_id) = invoice.subscription_id.as_deref() else {
            return Ok(WebhookOutcome::Ignored("invoice without subscription".into()));
        };
        let Some(profile) = self.profiles.find_by_subscription_id(subscription_id).await? else {
            tracing::info!(subscription_id = %subscription_id, "No profile for failed invoice");
            return Ok(WebhookOutcome::Ignored("no profile for subscription".into()));
        };

        let update = ProfileUpdate {
            subscription_active: Some(false),
            ..Default::default()
        }
        .observed_at(created);
        let result = self
            .profiles
            .update_by_user_id(&profile.user_id, &update)
            .await?;

        tracing::warn!(
            user_id = %profile.user_id,
            subscription_id = %subscription_id,
            invoice_id = %invoice.invoice_id,
            result = ?result,
            "Invoice payment failed, subscription deactivated"
        );
        Ok(WebhookOutcome::from_write(result, "profile disappeared"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BillingError;
    use crate::provider::{CancellationPolicy, SubscriptionStatus};
    use crate::testing::{
        sign_payload, subscription, InMemoryProfileStore, InMemoryWebhookEventStore,
        MockPaymentProvider, ProviderCall,
    };
    use mealplan_shared::{Profile, SubscriptionTier};
    use serde_json::json;

    const SECRET: &str = "whsec_test";

    fn config() -> StripeConfig {
        StripeConfig {
            secret_key: "sk_test".into(),
            webhook_secret: SECRET.into(),
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

    struct Fixture {
        handler: WebhookHandler,
        store: Arc<InMemoryProfileStore>,
        provider: Arc<MockPaymentProvider>,
        ledger: Arc<InMemoryWebhookEventStore>,
    }

    fn fixture(store: InMemoryProfileStore, provider: MockPaymentProvider) -> Fixture {
        let store = Arc::new(store);
        let provider = Arc::new(provider);
        let ledger = Arc::new(InMemoryWebhookEventStore::new());
        let handler = WebhookHandler::new(provider.clone(), store.clone(), ledger.clone(), &config());
        Fixture {
            handler,
            store,
            provider,
            ledger,
        }
    }

    fn event(id: &str, created: i64, payload: EventPayload) -> WebhookEvent {
        WebhookEvent {
            id: id.into(),
            event_type: "test".into(),
            created: OffsetDateTime::from_unix_timestamp(created).unwrap(),
            payload,
        }
    }

    fn checkout(metadata: &[(&str, &str)], subscription_id: Option<&str>) -> EventPayload {
        EventPayload::CheckoutSessionCompleted(CheckoutCompleted {
            session_id: "cs_1".into(),
            subscription_id: subscription_id.map(str::to_string),
            metadata: metadata
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        })
    }

    fn subscribed_profile() -> Profile {
        Profile {
            subscription_active: true,
            subscription_tier: Some(SubscriptionTier::Monthly),
            stripe_subscription_id: Some("sub_1".into()),
            ..Profile::new("user_1", "a@example.com")
        }
    }

    #[tokio::test]
    async fn test_checkout_completed_activates_profile() {
        let f = fixture(
            InMemoryProfileStore::new().with_profile(Profile::new("user_1", "")),
            MockPaymentProvider::new(),
        );
        let outcome = f
            .handler
            .handle_event(event(
                "evt_1",
                100,
                checkout(&[("user_id", "user_1"), ("tier", "MONTHLY")], Some("sub_1")),
            ))
            .await;
        assert_eq!(outcome, WebhookOutcome::Applied);

        let profile = f.store.get("user_1").await.unwrap();
        assert!(profile.subscription_active);
        assert_eq!(profile.subscription_tier, Some(SubscriptionTier::Monthly));
        assert_eq!(profile.stripe_subscription_id.as_deref(), Some("sub_1"));
        assert!(f.provider.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_checkout_completed_derives_tier_from_subscription() {
        let f = fixture(
            InMemoryProfileStore::new().with_profile(Profile::new("user_1", "")),
            MockPaymentProvider::new().with_subscription(subscription(
                "sub_1",
                SubscriptionStatus::Active,
                "price_year",
            )),
        );
        f.handler
            .handle_event(event("evt_1", 100, checkout(&[("user_id", "user_1")], Some("sub_1"))))
            .await;

        let profile = f.store.get("user_1").await.unwrap();
        assert_eq!(profile.subscription_tier, Some(SubscriptionTier::Yearly));
        assert_eq!(
            f.provider.calls().await,
            vec![ProviderCall::RetrieveSubscription("sub_1".into())]
        );
    }

    #[tokio::test]
    async fn test_checkout_completed_retrieval_failure_leaves_tier_null() {
        let f = fixture(
            InMemoryProfileStore::new().with_profile(Profile::new("user_1", "")),
            MockPaymentProvider::new().failing("api down"),
        );
        let outcome = f
            .handler
            .handle_event(event("evt_1", 100, checkout(&[("user_id", "user_1")], Some("sub_1"))))
            .await;
        assert_eq!(outcome, WebhookOutcome::Applied);

        let profile = f.store.get("user_1").await.unwrap();
        assert!(profile.subscription_active);
        assert_eq!(profile.subscription_tier, None);
    }

    #[tokio::test]
    async fn test_checkout_completed_without_user_or_subscription_is_noop() {
        let f = fixture(
            InMemoryProfileStore::new().with_profile(Profile::new("user_1", "")),
            MockPaymentProvider::new(),
        );
        let outcome = f
            .handler
            .handle_event(event("evt_1", 100, checkout(&[("tier", "WEEKLY")], Some("sub_1"))))
            .await;
        assert!(matches!(outcome, WebhookOutcome::Ignored(_)));

        let outcome = f
            .handler
            .handle_event(event("evt_2", 100, checkout(&[("user_id", "user_1")], None)))
            .await;
        assert!(matches!(outcome, WebhookOutcome::Ignored(_)));
        assert_eq!(f.store.get("user_1").await.unwrap(), Profile::new("user_1", ""));
    }

    #[tokio::test]
    async fn test_checkout_completed_without_profile_row_is_noop() {
        let f = fixture(InMemoryProfileStore::new(), MockPaymentProvider::new());
        let outcome = f
            .handler
            .handle_event(event(
                "evt_1",
                100,
                checkout(&[("user_id", "ghost"), ("plan", "week")], Some("sub_1")),
            ))
            .await;
        assert!(matches!(outcome, WebhookOutcome::Ignored(_)));
        assert!(f.store.get("ghost").await.is_none());
    }

    #[tokio::test]
    async fn test_subscription_updated_sets_status_and_tier() {
        let f = fixture(
            InMemoryProfileStore::new().with_profile(subscribed_profile()),
            MockPaymentProvider::new(),
        );
        let outcome = f
            .handler
            .handle_event(event(
                "evt_1",
                100,
                EventPayload::SubscriptionUpdated(subscription(
                    "sub_1",
                    SubscriptionStatus::PastDue,
                    "price_week",
                )),
            ))
            .await;
        assert_eq!(outcome, WebhookOutcome::Applied);

        let profile = f.store.get("user_1").await.unwrap();
        assert!(!profile.subscription_active);
        assert_eq!(profile.subscription_tier, Some(SubscriptionTier::Weekly));
        assert_eq!(profile.stripe_subscription_id.as_deref(), Some("sub_1"));
    }

    #[tokio::test]
    async fn test_subscription_updated_unknown_price_clears_tier() {
        let f = fixture(
            InMemoryProfileStore::new().with_profile(subscribed_profile()),
            MockPaymentProvider::new(),
        );
        f.handler
            .handle_event(event(
                "evt_1",
                100,
                EventPayload::SubscriptionUpdated(subscription(
                    "sub_1",
                    SubscriptionStatus::Trialing,
                    "price_legacy",
                )),
            ))
            .await;

        let profile = f.store.get("user_1").await.unwrap();
        assert!(profile.subscription_active);
        assert_eq!(profile.subscription_tier, None);
    }

    #[tokio::test]
    async fn test_subscription_deleted_clears_profile() {
        let f = fixture(
            InMemoryProfileStore::new().with_profile(subscribed_profile()),
            MockPaymentProvider::new(),
        );
        let outcome = f
            .handler
            .handle_event(event(
                "evt_1",
                100,
                EventPayload::SubscriptionDeleted(subscription(
                    "sub_1",
                    SubscriptionStatus::Canceled,
                    "price_month",
                )),
            ))
            .await;
        assert_eq!(outcome, WebhookOutcome::Applied);

        let profile = f.store.get("user_1").await.unwrap();
        assert!(!profile.subscription_active);
        assert_eq!(profile.subscription_tier, None);
        assert_eq!(profile.stripe_subscription_id, None);
    }

    #[tokio::test]
    async fn test_payment_failed_only_deactivates() {
        let f = fixture(
            InMemoryProfileStore::new().with_profile(subscribed_profile()),
            MockPaymentProvider::new(),
        );
        f.handler
            .handle_event(event(
                "evt_1",
                100,
                EventPayload::InvoicePaymentFailed(InvoiceFailed {
                    invoice_id: "in_1".into(),
                    subscription_id: Some("sub_1".into()),
                }),
            ))
            .await;

        let profile = f.store.get("user_1").await.unwrap();
        assert!(!profile.subscription_active);
        assert_eq!(profile.subscription_tier, Some(SubscriptionTier::Monthly));
        assert_eq!(profile.stripe_subscription_id.as_deref(), Some("sub_1"));
    }

    #[tokio::test]
    async fn test_unmatched_subscription_events_are_ignored() {
        let f = fixture(
            InMemoryProfileStore::new().with_profile(subscribed_profile()),
            MockPaymentProvider::new(),
        );
        let outcome = f
            .handler
            .handle_event(event(
                "evt_1",
                100,
                EventPayload::SubscriptionDeleted(subscription(
                    "sub_other",
                    SubscriptionStatus::Canceled,
                    "price_month",
                )),
            ))
            .await;
        assert!(matches!(outcome, WebhookOutcome::Ignored(_)));

        let outcome = f
            .handler
            .handle_event(event(
                "evt_2",
                100,
                EventPayload::InvoicePaymentFailed(InvoiceFailed {
                    invoice_id: "in_1".into(),
                    subscription_id: None,
                }),
            ))
            .await;
        assert!(matches!(outcome, WebhookOutcome::Ignored(_)));
        assert_eq!(f.store.get("user_1").await.unwrap(), subscribed_profile());
    }

    #[tokio::test]
    async fn test_duplicate_delivery_is_acknowledged_once() {
        let f = fixture(
            InMemoryProfileStore::new().with_profile(subscribed_profile()),
            MockPaymentProvider::new(),
        );
        let deleted = event(
            "evt_1",
            100,
            EventPayload::SubscriptionDeleted(subscription(
                "sub_1",
                SubscriptionStatus::Canceled,
                "price_month",
            )),
        );
        assert_eq!(f.handler.handle_event(deleted.clone()).await, WebhookOutcome::Applied);
        let calls_after_first = f.store.call_count();

        assert_eq!(f.handler.handle_event(deleted).await, WebhookOutcome::Duplicate);
        assert_eq!(f.store.call_count(), calls_after_first);
        assert_eq!(
            f.ledger.result_for("evt_1").await,
            Some((ProcessingResult::Success, None))
        );
    }

    #[tokio::test]
    async fn test_persistence_failure_is_swallowed_and_recorded() {
        let f = fixture(
            InMemoryProfileStore::new().with_profile(subscribed_profile()),
            MockPaymentProvider::new(),
        );
        f.store.set_failing(true);

        let outcome = f
            .handler
            .handle_event(event(
                "evt_1",
                100,
                EventPayload::SubscriptionDeleted(subscription(
                    "sub_1",
                    SubscriptionStatus::Canceled,
                    "price_month",
                )),
            ))
            .await;
        assert!(matches!(outcome, WebhookOutcome::Failed(_)));

        let (result, error) = f.ledger.result_for("evt_1").await.unwrap();
        assert_eq!(result, ProcessingResult::Error);
        assert!(error.unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_failed_delivery_can_be_retried() {
        let f = fixture(
            InMemoryProfileStore::new().with_profile(subscribed_profile()),
            MockPaymentProvider::new(),
        );
        let deleted = event(
            "evt_1",
            100,
            EventPayload::SubscriptionDeleted(subscription(
                "sub_1",
                SubscriptionStatus::Canceled,
                "price_month",
            )),
        );

        f.store.set_failing(true);
        assert!(matches!(
            f.handler.handle_event(deleted.clone()).await,
            WebhookOutcome::Failed(_)
        ));

        f.store.set_failing(false);
        assert_eq!(f.handler.handle_event(deleted).await, WebhookOutcome::Applied);
        assert!(!f.store.get("user_1").await.unwrap().subscription_active);
    }

    #[tokio::test]
    async fn test_process_rejects_bad_signature_before_storage() {
        let f = fixture(
            InMemoryProfileStore::new().with_profile(subscribed_profile()),
            MockPaymentProvider::new(),
        );
        let body = json!({
            "id": "evt_1",
            "type": "customer.subscription.deleted",
            "created": OffsetDateTime::now_utc().unix_timestamp(),
            "data": { "object": { "id": "sub_1", "status": "canceled" } }
        })
        .to_string();
        let header = sign_payload(&body, "whsec_wrong", OffsetDateTime::now_utc().unix_timestamp());

        let err = f.handler.process(&body, Some(&header)).await.unwrap_err();
        assert!(matches!(err, BillingError::WebhookSignatureInvalid));
        let err = f.handler.process(&body, None).await.unwrap_err();
        assert!(matches!(err, BillingError::WebhookSignatureInvalid));
        assert_eq!(f.store.call_count(), 0);
    }

    #[tokio::test]
    async fn test_process_signed_delivery() {
        let f = fixture(
            InMemoryProfileStore::new().with_profile(subscribed_profile()),
            MockPaymentProvider::new(),
        );
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let body = json!({
            "id": "evt_1",
            "type": "customer.subscription.deleted",
            "created": now,
            "data": { "object": { "id": "sub_1", "status": "canceled" } }
        })
        .to_string();
        let header = sign_payload(&body, SECRET, now);

        let outcome = f.handler.process(&body, Some(&header)).await.unwrap();
        assert_eq!(outcome, WebhookOutcome::Applied);
        assert_eq!(f.store.get("user_1").await.unwrap().stripe_subscription_id, None);
    }

    #[tokio::test]
    async fn test_process_rejects_unparseable_verified_body() {
        let f = fixture(InMemoryProfileStore::new(), MockPaymentProvider::new());
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let body = "{\"not\":\"an event\"}";
        let header = sign_payload(body, SECRET, now);

        let err = f.handler.process(body, Some(&header)).await.unwrap_err();
        assert!(matches!(err, BillingError::WebhookPayload(_)));
        assert_eq!(f.store.call_count(), 0);
    }
}
