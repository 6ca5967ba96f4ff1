//! Price table and tier mapping
//!
//! Maps Stripe price ids and client plan keys onto [`SubscriptionTier`].
//! Every lookup is total: unknown input yields `None`.

use mealplan_shared::{PlanKey, SubscriptionTier};

/// Stripe price ids for the three plans. Unset entries are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PriceIds {
    pub weekly: Option<String>,
    pub monthly: Option<String>,
    pub yearly: Option<String>,
}

impl PriceIds {
    /// Load from `STRIPE_PRICE_WEEKLY`, `STRIPE_PRICE_MONTHLY`, `STRIPE_PRICE_YEARLY`.
    pub fn from_env() -> Self {
        let read = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());
        Self {
            weekly: read("STRIPE_PRICE_WEEKLY"),
            monthly: read("STRIPE_PRICE_MONTHLY"),
            yearly: read("STRIPE_PRICE_YEARLY"),
        }
    }

    pub fn price_id_for_plan(&self, plan: PlanKey) -> Option<&str> {
        match plan {
            PlanKey::Week => self.weekly.as_deref(),
            PlanKey::Month => self.monthly.as_deref(),
            PlanKey::Year => self.yearly.as_deref(),
        }
    }

    pub fn tier_from_price_id(&self, price_id: Option<&str>) -> Option<SubscriptionTier> {
        let price_id = price_id?;
        PlanKey::ALL
            .into_iter()
            .find(|plan| self.price_id_for_plan(*plan) == Some(price_id))
            .map(|plan| plan.tier())
    }

    /// Plans that have no configured price.
    pub fn missing(&self) -> Vec<PlanKey> {
        PlanKey::ALL
            .into_iter()
            .filter(|plan| self.price_id_for_plan(*plan).is_none())
            .collect()
    }
}
