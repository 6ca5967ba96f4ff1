//! In-memory collaborators for tests
//!
//! Enabled for this crate's tests and, through the `test-utils` feature,
//! for downstream crates.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use mealplan_shared::{Profile, ProfileUpdate};
use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;

use crate::error::{BillingError, BillingResult};
use crate::events::WebhookEvent;
use crate::provider::{
    CancellationPolicy, CheckoutSessionCreated, CheckoutSessionRequest, PaymentProvider,
    ProviderSubscription, SubscriptionStatus,
};
use crate::signature::compute_signature;
use crate::store::{
    ProcessingResult, ProfileStore, WebhookEventStore, WriteResult, CLAIM_TIMEOUT_SECS,
};

/// Profile store backed by a map. Counts every call so tests can assert
/// that a code path never touched persistence.
#[derive(Default)]
pub struct InMemoryProfileStore {
    profiles: Mutex<HashMap<String, Profile>>,
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(mut self, profile: Profile) -> Self {
        self.profiles
            .get_mut()
            .insert(profile.user_id.clone(), profile);
        self
    }

    /// Make every subsequent call fail with a database error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn get(&self, user_id: &str) -> Option<Profile> {
        self.profiles.lock().await.get(user_id).cloned()
    }

    fn enter(&self) -> BillingResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(BillingError::Database("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn find_by_user_id(&self, user_id: &str) -> BillingResult<Option<Profile>> {
        self.enter()?;
        Ok(self.get(user_id).await)
    }

    async fn find_by_subscription_id(
        &self,
        subscription_id: &str,
    ) -> BillingResult<Option<Profile>> {
        self.enter()?;
        Ok(self
            .profiles
            .lock()
            .await
            .values()
            .find(|p| p.stripe_subscription_id.as_deref() == Some(subscription_id))
            .cloned())
    }

    async fn upsert_by_user_id(
        &self,
        user_id: &str,
        email: &str,
        update: &ProfileUpdate,
    ) -> BillingResult<Option<Profile>> {
        self.enter()?;
        let mut profiles = self.profiles.lock().await;
        let profile = profiles
            .entry(user_id.to_string())
            .or_insert_with(|| Profile::new(user_id, email));
        if !profile.accepts(update.observed_at) {
            return Ok(None);
        }
        profile.apply(update);
        Ok(Some(profile.clone()))
    }

    async fn update_by_user_id(
        &self,
        user_id: &str,
        update: &ProfileUpdate,
    ) -> BillingResult<WriteResult> {
        self.enter()?;
        let mut profiles = self.profiles.lock().await;
        let Some(profile) = profiles.get_mut(user_id) else {
            return Ok(WriteResult::NotFound);
        };
        if !profile.accepts(update.observed_at) {
            return Ok(WriteResult::Stale);
        }
        profile.apply(update);
        Ok(WriteResult::Updated)
    }

    async fn ping(&self) -> BillingResult<()> {
        self.enter()
    }
}

struct LedgerEntry {
    result: ProcessingResult,
    error: Option<String>,
    claimed_at: OffsetDateTime,
}

/// Webhook ledger backed by a map of event id to result.
pub struct InMemoryWebhookEventStore {
    events: Mutex<HashMap<String, LedgerEntry>>,
    failing: AtomicBool,
    claim_timeout: Duration,
}

impl Default for InMemoryWebhookEventStore {
    fn default() -> Self {
        Self {
            events: Mutex::default(),
            failing: AtomicBool::new(false),
            claim_timeout: Duration::seconds(CLAIM_TIMEOUT_SECS),
        }
    }
}

impl InMemoryWebhookEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A ledger whose every call errors.
    pub fn failing() -> Self {
        let store = Self::default();
        store.failing.store(true, Ordering::SeqCst);
        store
    }

    /// Age after which an unfinished claim counts as abandoned.
    pub fn with_claim_timeout(mut self, timeout: Duration) -> Self {
        self.claim_timeout = timeout;
        self
    }

    pub async fn result_for(&self, event_id: &str) -> Option<(ProcessingResult, Option<String>)> {
        self.events
            .lock()
            .await
            .get(event_id)
            .map(|entry| (entry.result, entry.error.clone()))
    }

    fn check(&self) -> BillingResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(BillingError::Database("ledger unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl WebhookEventStore for InMemoryWebhookEventStore {
    async fn claim(&self, event: &WebhookEvent) -> BillingResult<bool> {
        self.check()?;
        let now = OffsetDateTime::now_utc();
        let mut events = self.events.lock().await;
        let claimable = match events.get(&event.id) {
            None => true,
            Some(entry) => match entry.result {
                ProcessingResult::Error => true,
                ProcessingResult::Processing => now - entry.claimed_at >= self.claim_timeout,
                ProcessingResult::Success => false,
            },
        };
        if claimable {
            events.insert(
                event.id.clone(),
                LedgerEntry {
                    result: ProcessingResult::Processing,
                    error: None,
                    claimed_at: now,
                },
            );
        }
        Ok(claimable)
    }

    async fn finish(
        &self,
        event_id: &str,
        result: ProcessingResult,
        error: Option<&str>,
    ) -> BillingResult<()> {
        self.check()?;
        let mut events = self.events.lock().await;
        let claimed_at = events
            .get(event_id)
            .map(|entry| entry.claimed_at)
            .unwrap_or_else(OffsetDateTime::now_utc);
        events.insert(
            event_id.to_string(),
            LedgerEntry {
                result,
                error: error.map(str::to_string),
                claimed_at,
            },
        );
        Ok(())
    }
}

/// A call received by [`MockPaymentProvider`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCall {
    CreateCheckout(CheckoutSessionRequest),
    RetrieveSubscription(String),
    UpdatePrice {
        subscription_id: String,
        item_id: String,
        price_id: String,
    },
    Cancel {
        subscription_id: String,
        policy: CancellationPolicy,
    },
    FindCustomer(String),
    ListSubscriptions(String),
}

/// Scripted payment provider that records every call.
#[derive(Default)]
pub struct MockPaymentProvider {
    subscriptions: Mutex<HashMap<String, ProviderSubscription>>,
    customers: Mutex<HashMap<String, String>>,
    customer_subscriptions: Mutex<HashMap<String, Vec<ProviderSubscription>>>,
    failure: Option<String>,
    calls: Mutex<Vec<ProviderCall>>,
    sessions: AtomicUsize,
}

impl MockPaymentProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call fails with a provider error carrying `message`.
    pub fn failing(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }

    pub fn with_subscription(mut self, subscription: ProviderSubscription) -> Self {
        self.subscriptions
            .get_mut()
            .insert(subscription.id.clone(), subscription);
        self
    }

    /// Register a customer and the subscriptions listed for it, newest first.
    pub fn with_customer(
        mut self,
        email: &str,
        customer_id: &str,
        subscriptions: Vec<ProviderSubscription>,
    ) -> Self {
        self.customers
            .get_mut()
            .insert(email.to_string(), customer_id.to_string());
        for subscription in &subscriptions {
            self.subscriptions
                .get_mut()
                .insert(subscription.id.clone(), subscription.clone());
        }
        self.customer_subscriptions
            .get_mut()
            .insert(customer_id.to_string(), subscriptions);
        self
    }

    pub async fn calls(&self) -> Vec<ProviderCall> {
        self.calls.lock().await.clone()
    }

    pub async fn subscription(&self, id: &str) -> Option<ProviderSubscription> {
        self.subscriptions.lock().await.get(id).cloned()
    }

    async fn record(&self, call: ProviderCall) -> BillingResult<()> {
        self.calls.lock().await.push(call);
        match &self.failure {
            Some(message) => Err(BillingError::StripeApi(message.clone())),
            None => Ok(()),
        }
    }

    async fn lookup(&self, subscription_id: &str) -> BillingResult<ProviderSubscription> {
        self.subscription(subscription_id).await.ok_or_else(|| {
            BillingError::StripeApi(format!("No such subscription: '{subscription_id}'"))
        })
    }
}

/// Shorthand for a single-item subscription.
pub fn subscription(
    id: &str,
    status: SubscriptionStatus,
    price_id: &str,
) -> ProviderSubscription {
    ProviderSubscription {
        id: id.to_string(),
        status,
        price_id: Some(price_id.to_string()),
        item_id: Some(format!("si_{id}")),
    }
}

#[async_trait]
impl PaymentProvider for MockPaymentProvider {
    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> BillingResult<CheckoutSessionCreated> {
        self.record(ProviderCall::CreateCheckout(request)).await?;
        let n = self.sessions.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(CheckoutSessionCreated {
            session_id: format!("cs_test_{n}"),
            url: format!("https://checkout.stripe.test/c/pay/cs_test_{n}"),
        })
    }

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> BillingResult<ProviderSubscription> {
        self.record(ProviderCall::RetrieveSubscription(subscription_id.to_string()))
            .await?;
        self.lookup(subscription_id).await
    }

    async fn update_subscription_price(
        &self,
        subscription_id: &str,
        item_id: &str,
        price_id: &str,
    ) -> BillingResult<ProviderSubscription> {
        self.record(ProviderCall::UpdatePrice {
            subscription_id: subscription_id.to_string(),
            item_id: item_id.to_string(),
            price_id: price_id.to_string(),
        })
        .await?;

        let mut subscriptions = self.subscriptions.lock().await;
        let subscription = subscriptions.get_mut(subscription_id).ok_or_else(|| {
            BillingError::StripeApi(format!("No such subscription: '{subscription_id}'"))
        })?;
        subscription.price_id = Some(price_id.to_string());
        Ok(subscription.clone())
    }

    async fn cancel_subscription(
        &self,
        subscription_id: &str,
        policy: CancellationPolicy,
    ) -> BillingResult<()> {
        self.record(ProviderCall::Cancel {
            subscription_id: subscription_id.to_string(),
            policy,
        })
        .await?;

        if policy == CancellationPolicy::Immediate {
            if let Some(subscription) = self.subscriptions.lock().await.get_mut(subscription_id) {
                subscription.status = SubscriptionStatus::Canceled;
            }
        }
        Ok(())
    }

    async fn find_customer_by_email(&self, email: &str) -> BillingResult<Option<String>> {
        self.record(ProviderCall::FindCustomer(email.to_string()))
            .await?;
        Ok(self.customers.lock().await.get(email).cloned())
    }

    async fn list_customer_subscriptions(
        &self,
        customer_id: &str,
        limit: u64,
    ) -> BillingResult<Vec<ProviderSubscription>> {
        self.record(ProviderCall::ListSubscriptions(customer_id.to_string()))
            .await?;
        Ok(self
            .customer_subscriptions
            .lock()
            .await
            .get(customer_id)
            .map(|subs| subs.iter().take(limit as usize).cloned().collect())
            .unwrap_or_default())
    }
}

/// A valid `stripe-signature` header for `payload` signed at `timestamp`.
pub fn sign_payload(payload: &str, secret: &str, timestamp: i64) -> String {
    match compute_signature(payload, timestamp, secret) {
        Ok(signature) => format!("t={timestamp},v1={signature}"),
        Err(_) => format!("t={timestamp},v1="),
    }
}
