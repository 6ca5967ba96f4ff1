//! The local Profile record mirroring a user's subscription state.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::tier::SubscriptionTier;

/// One row per user identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub user_id: String,
    /// Best-effort; only used to find the provider customer on fallback lookups.
    pub email: String,
    pub subscription_active: bool,
    pub subscription_tier: Option<SubscriptionTier>,
    pub stripe_subscription_id: Option<String>,
    /// Creation time of the newest webhook event applied to this row.
    #[serde(skip)]
    pub last_event_at: Option<OffsetDateTime>,
}

impl Profile {
    /// A fresh profile with subscription fields at their defaults.
    pub fn new(user_id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email: email.into(),
            subscription_active: false,
            subscription_tier: None,
            stripe_subscription_id: None,
            last_event_at: None,
        }
    }

    /// True when the subscription id, the active flag and the tier are all set.
    pub fn has_complete_subscription(&self) -> bool {
        self.subscription_active
            && self.subscription_tier.is_some()
            && self.stripe_subscription_id.is_some()
    }

    /// Whether a write observed at `observed_at` may overwrite this row.
    ///
    /// Writes without a timestamp always apply.
    pub fn accepts(&self, observed_at: Option<OffsetDateTime>) -> bool {
        match (observed_at, self.last_event_at) {
            (Some(incoming), Some(stored)) => incoming >= stored,
            _ => true,
        }
    }

    /// Apply a partial update in place. Does not check ordering.
    pub fn apply(&mut self, update: &ProfileUpdate) {
        if let Some(email) = &update.email {
            self.email = email.clone();
        }
        if let Some(active) = update.subscription_active {
            self.subscription_active = active;
        }
        if let Some(tier) = update.subscription_tier {
            self.subscription_tier = tier;
        }
        if let Some(subscription_id) = &update.stripe_subscription_id {
            self.stripe_subscription_id = subscription_id.clone();
        }
        if let Some(observed_at) = update.observed_at {
            self.last_event_at = Some(observed_at);
        }
    }
}

/// Partial update of a Profile.
///
/// `None` leaves a field untouched; `Some(None)` clears a nullable field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub email: Option<String>,
    pub subscription_active: Option<bool>,
    pub subscription_tier: Option<Option<SubscriptionTier>>,
    pub stripe_subscription_id: Option<Option<String>>,
    /// Provider event time; set only by webhook-driven writes.
    pub observed_at: Option<OffsetDateTime>,
}

impl ProfileUpdate {
    /// The cancelled state: inactive, no tier, no subscription id.
    pub fn inactive() -> Self {
        Self {
            subscription_active: Some(false),
            subscription_tier: Some(None),
            stripe_subscription_id: Some(None),
            ..Default::default()
        }
    }

    /// Full subscription state as reported by the provider.
    pub fn subscription(
        subscription_id: impl Into<String>,
        active: bool,
        tier: Option<SubscriptionTier>,
    ) -> Self {
        Self {
            subscription_active: Some(active),
            subscription_tier: Some(tier),
            stripe_subscription_id: Some(Some(subscription_id.into())),
            ..Default::default()
        }
    }

    pub fn email(email: impl Into<String>) -> Self {
        Self {
            email: Some(email.into()),
            ..Default::default()
        }
    }

    pub fn observed_at(mut self, at: OffsetDateTime) -> Self {
        self.observed_at = Some(at);
        self
    }
}
