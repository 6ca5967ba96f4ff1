//! Stripe client and configuration

use async_trait::async_trait;
use stripe::{
    CancelSubscription, CheckoutSession, CheckoutSessionMode, Client, CreateCheckoutSession,
    CreateCheckoutSessionLineItems, Customer, CustomerId, ListCustomers, ListSubscriptions,
    StripeError, Subscription, SubscriptionId, SubscriptionStatusFilter, UpdateSubscription,
    UpdateSubscriptionItems,
};
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use crate::error::{BillingError, BillingResult};
use crate::provider::{
    CancellationPolicy, CheckoutSessionCreated, CheckoutSessionRequest, PaymentProvider,
    ProviderSubscription, SubscriptionStatus,
};
use crate::tiers::PriceIds;

const DEFAULT_APP_BASE_URL: &str = "http://localhost:3000";
const DEFAULT_WEBHOOK_TOLERANCE_SECS: i64 = 300;
const READ_ATTEMPTS: usize = 3;
const SUBSCRIPTION_EXPAND: &[&str] = &["items.data.price"];

/// Stripe configuration
#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub price_ids: PriceIds,
    /// Base URL used for checkout success and cancel redirects
    pub app_base_url: String,
    pub cancellation: CancellationPolicy,
    pub webhook_tolerance_secs: i64,
}

impl StripeConfig {
    pub fn from_env() -> BillingResult<Self> {
        let secret_key = std::env::var("STRIPE_SECRET_KEY")
            .map_err(|_| BillingError::Config("STRIPE_SECRET_KEY not set".to_string()))?;
        let webhook_secret = std::env::var("STRIPE_WEBHOOK_SECRET")
            .map_err(|_| BillingError::Config("STRIPE_WEBHOOK_SECRET not set".to_string()))?;

        let app_base_url = std::env::var("APP_BASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_APP_BASE_URL.to_string());

        let cancellation = match std::env::var("STRIPE_CANCEL_AT_PERIOD_END").as_deref() {
            Ok("true") | Ok("1") => CancellationPolicy::PeriodEnd,
            _ => CancellationPolicy::Immediate,
        };

        let webhook_tolerance_secs = match std::env::var("STRIPE_WEBHOOK_TOLERANCE_SECS") {
            Ok(raw) => raw.parse().map_err(|_| {
                BillingError::Config(format!("STRIPE_WEBHOOK_TOLERANCE_SECS invalid: {raw}"))
            })?,
            Err(_) => DEFAULT_WEBHOOK_TOLERANCE_SECS,
        };

        let price_ids = PriceIds::from_env();
        let missing = price_ids.missing();
        if !missing.is_empty() {
            tracing::warn!(plans = ?missing, "Stripe price ids not configured for some plans");
        }

        Ok(Self {
            secret_key,
            webhook_secret,
            price_ids,
            app_base_url: app_base_url.trim_end_matches('/').to_string(),
            cancellation,
            webhook_tolerance_secs,
        })
    }
}

/// Wrapper around the async-stripe client
#[derive(Clone)]
pub struct StripeClient {
    client: Client,
}

impl StripeClient {
    pub fn new(config: &StripeConfig) -> Self {
        Self {
            client: Client::new(config.secret_key.clone()),
        }
    }

    /// Run an idempotent read, retrying transient failures with jittered backoff.
    async fn read<T, F, Fut>(&self, operation: &'static str, call: F) -> BillingResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, StripeError>>,
    {
        let strategy = ExponentialBackoff::from_millis(100)
            .map(jitter)
            .take(READ_ATTEMPTS - 1);

        RetryIf::start(strategy, call, |err: &StripeError| {
            let retry = is_transient(err);
            if retry {
                tracing::warn!(operation, error = %err, "Retrying Stripe read after transient error");
            }
            retry
        })
        .await
        .map_err(BillingError::from)
    }
}

fn is_transient(err: &StripeError) -> bool {
    match err {
        StripeError::Stripe(request) => {
            request.http_status == 429 || (500..600).contains(&request.http_status)
        }
        StripeError::Timeout | StripeError::ClientError(_) => true,
        _ => false,
    }
}

fn parse_subscription_id(id: &str) -> BillingResult<SubscriptionId> {
    id.parse()
        .map_err(|e| BillingError::StripeApi(format!("Invalid subscription ID: {}", e)))
}

fn parse_customer_id(id: &str) -> BillingResult<CustomerId> {
    id.parse()
        .map_err(|e| BillingError::StripeApi(format!("Invalid customer ID: {}", e)))
}

fn map_status(status: stripe::SubscriptionStatus) -> SubscriptionStatus {
    match status {
        stripe::SubscriptionStatus::Active => SubscriptionStatus::Active,
        stripe::SubscriptionStatus::Canceled => SubscriptionStatus::Canceled,
        stripe::SubscriptionStatus::Incomplete => SubscriptionStatus::Incomplete,
        stripe::SubscriptionStatus::IncompleteExpired => SubscriptionStatus::IncompleteExpired,
        stripe::SubscriptionStatus::PastDue => SubscriptionStatus::PastDue,
        stripe::SubscriptionStatus::Paused => SubscriptionStatus::Paused,
        stripe::SubscriptionStatus::Trialing => SubscriptionStatus::Trialing,
        stripe::SubscriptionStatus::Unpaid => SubscriptionStatus::Unpaid,
    }
}

fn map_subscription(subscription: &Subscription) -> ProviderSubscription {
    let first_item = subscription.items.data.first();
    ProviderSubscription {
        id: subscription.id.to_string(),
        status: map_status(subscription.status),
        price_id: first_item
            .and_then(|item| item.price.as_ref())
            .map(|price| price.id.to_string()),
        item_id: first_item.map(|item| item.id.to_string()),
    }
}

#[async_trait]
impl PaymentProvider for StripeClient {
    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> BillingResult<CheckoutSessionCreated> {
        let mut params = CreateCheckoutSession::new();
        params.mode = Some(CheckoutSessionMode::Subscription);
        params.customer_email = Some(&request.customer_email);
        params.success_url = Some(&request.success_url);
        params.cancel_url = Some(&request.cancel_url);
        params.line_items = Some(vec![CreateCheckoutSessionLineItems {
            price: Some(request.price_id.clone()),
            quantity: Some(1),
            ..Default::default()
        }]);
        params.metadata = Some(request.metadata.clone());

        let session = CheckoutSession::create(&self.client, params).await?;

        tracing::info!(session_id = %session.id, "Created Stripe checkout session");

        Ok(CheckoutSessionCreated {
            session_id: session.id.to_string(),
            url: session.url.ok_or_else(|| {
                BillingError::StripeApi("Checkout session URL missing".to_string())
            })?,
        })
    }

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> BillingResult<ProviderSubscription> {
        let id = parse_subscription_id(subscription_id)?;
        let client = &self.client;
        let id = &id;
        let subscription = self
            .read("retrieve_subscription", || async move {
                Subscription::retrieve(client, id, SUBSCRIPTION_EXPAND).await
            })
            .await?;
        Ok(map_subscription(&subscription))
    }

    async fn update_subscription_price(
        &self,
        subscription_id: &str,
        item_id: &str,
        price_id: &str,
    ) -> BillingResult<ProviderSubscription> {
        use stripe::generated::billing::subscription::SubscriptionProrationBehavior;

        let id = parse_subscription_id(subscription_id)?;
        let mut params = UpdateSubscription::new();
        params.items = Some(vec![UpdateSubscriptionItems {
            id: Some(item_id.to_string()),
            price: Some(price_id.to_string()),
            ..Default::default()
        }]);
        params.proration_behavior = Some(SubscriptionProrationBehavior::CreateProrations);
        params.expand = SUBSCRIPTION_EXPAND;

        let subscription = Subscription::update(&self.client, &id, params).await?;

        tracing::info!(
            subscription_id = %subscription_id,
            price_id = %price_id,
            "Updated Stripe subscription price"
        );

        Ok(map_subscription(&subscription))
    }

    async fn cancel_subscription(
        &self,
        subscription_id: &str,
        policy: CancellationPolicy,
    ) -> BillingResult<()> {
        let id = parse_subscription_id(subscription_id)?;
        match policy {
            CancellationPolicy::Immediate => {
                Subscription::cancel(&self.client, &id, CancelSubscription::default()).await?;
            }
            CancellationPolicy::PeriodEnd => {
                let mut params = UpdateSubscription::new();
                params.cancel_at_period_end = Some(true);
                Subscription::update(&self.client, &id, params).await?;
            }
        }

        tracing::info!(subscription_id = %subscription_id, policy = ?policy, "Cancelled Stripe subscription");
        Ok(())
    }

    async fn find_customer_by_email(&self, email: &str) -> BillingResult<Option<String>> {
        let client = &self.client;
        let customers = self
            .read("find_customer_by_email", || async move {
                let mut params = ListCustomers::new();
                params.email = Some(email);
                params.limit = Some(1);
                Customer::list(client, &params).await
            })
            .await?;

        Ok(customers.data.first().map(|customer| customer.id.to_string()))
    }

    async fn list_customer_subscriptions(
        &self,
        customer_id: &str,
        limit: u64,
    ) -> BillingResult<Vec<ProviderSubscription>> {
        let customer = parse_customer_id(customer_id)?;
        let client = &self.client;
        let customer = &customer;
        let subscriptions = self
            .read("list_customer_subscriptions", || async move {
                let mut params = ListSubscriptions::new();
                params.customer = Some(customer.clone());
                params.status = Some(SubscriptionStatusFilter::All);
                params.limit = Some(limit);
                params.expand = &["data.items.data.price"];
                Subscription::list(client, &params).await
            })
            .await?;

        Ok(subscriptions.data.iter().map(map_subscription).collect())
    }
}
