// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Mealplan Billing Module
//!
//! Keeps each user's local profile in agreement with their Stripe subscription.
//!
//! ## Features
//!
//! - **Checkout**: Create subscription checkout sessions carrying reconciliation metadata
//! - **Webhooks**: Verify and apply Stripe events idempotently, with a delivery ledger
//! - **Status**: Serve subscription state, falling back to a live Stripe lookup
//! - **Subscriptions**: Change plans with proration, cancel subscriptions
//! - **Invariants**: Consistency checks for stored profiles

pub mod checkout;
pub mod client;
pub mod error;
pub mod events;
pub mod invariants;
pub mod profiles;
pub mod provider;
pub mod signature;
pub mod status;
pub mod store;
pub mod subscriptions;
pub mod tiers;
pub mod webhooks;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;


use std::sync::Arc;

// Checkout
pub use checkout::{CheckoutMetadata, CheckoutRequest, CheckoutService};

// Client
pub use client::{StripeClient, StripeConfig};

// Error
pub use error::{BillingError, BillingResult};

// Events
pub use events::{EventPayload, WebhookEvent};

// Invariants
pub use invariants::{check_profile, InvariantViolation, ViolationSeverity};

// Profiles
pub use profiles::ProfileService;

// Provider
pub use provider::{
    CancellationPolicy, CheckoutSessionCreated, PaymentProvider, ProviderSubscription,
    SubscriptionStatus,
};

// Signature
pub use signature::{verify_signature, SIGNATURE_HEADER};

// Status
pub use status::{ResolutionSource, StatusResolver, SubscriptionResolution, SubscriptionSummary};

// Store
pub use store::{PgProfileStore, PgWebhookEventStore, ProfileStore, WebhookEventStore, WriteResult};

// Subscriptions
pub use subscriptions::{PlanChangeResult, SubscriptionService, UnsubscribeResult};

// Tiers
pub use tiers::PriceIds;

// Webhooks
pub use webhooks::{WebhookHandler, WebhookOutcome};

use sqlx::PgPool;

/// Main billing service that combines all billing functionality
pub struct BillingService {
    pub checkout: CheckoutService,
    pub status: StatusResolver,
    pub subscriptions: SubscriptionService,
    pub webhooks: WebhookHandler,
    pub profiles: ProfileService,
}

impl BillingService {
    /// Create a new billing service from environment variables
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        let config = StripeConfig::from_env()?;
        let provider = Arc::new(StripeClient::new(&config));
        let store = Arc::new(PgProfileStore::new(pool.clone()));
        let ledger = Arc::new(PgWebhookEventStore::new(pool));

        Ok(Self::new(&config, provider, store, ledger))
    }

    /// Create a new billing service with explicit collaborators
    pub fn new(
        config: &StripeConfig,
        provider: Arc<dyn PaymentProvider>,
        store: Arc<dyn ProfileStore>,
        ledger: Arc<dyn WebhookEventStore>,
    ) -> Self {
        Self {
            checkout: CheckoutService::new(provider.clone(), config),
            status: StatusResolver::new(provider.clone(), store.clone(), config),
            subscriptions: SubscriptionService::new(provider.clone(), store.clone(), config),
            webhooks: WebhookHandler::new(provider, store.clone(), ledger, config),
            profiles: ProfileService::new(store),
        }
    }
}
