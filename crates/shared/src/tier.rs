//! Subscription tiers and the client-facing plan keys that select them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Internal subscription plan classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionTier {
    Weekly,
    Monthly,
    Yearly,
}

impl SubscriptionTier {
    pub const ALL: [SubscriptionTier; 3] = [Self::Weekly, Self::Monthly, Self::Yearly];

    /// Canonical name, as stored in the database and in checkout metadata.
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionTier::Weekly => "WEEKLY",
            SubscriptionTier::Monthly => "MONTHLY",
            SubscriptionTier::Yearly => "YEARLY",
        }
    }

    pub fn plan_key(&self) -> PlanKey {
        match self {
            SubscriptionTier::Weekly => PlanKey::Week,
            SubscriptionTier::Monthly => PlanKey::Month,
            SubscriptionTier::Yearly => PlanKey::Year,
        }
    }
}

impl fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when a string is not a known tier or plan key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown value: {0}")]
pub struct UnknownValue(pub String);

impl FromStr for SubscriptionTier {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "WEEKLY" => Ok(SubscriptionTier::Weekly),
            "MONTHLY" => Ok(SubscriptionTier::Monthly),
            "YEARLY" => Ok(SubscriptionTier::Yearly),
            _ => Err(UnknownValue(s.to_string())),
        }
    }
}

/// Billing interval a client asks for: the closed set `week`, `month`, `year`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanKey {
    Week,
    Month,
    Year,
}

impl PlanKey {
    pub const ALL: [PlanKey; 3] = [Self::Week, Self::Month, Self::Year];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanKey::Week => "week",
            PlanKey::Month => "month",
            PlanKey::Year => "year",
        }
    }

    pub fn tier(&self) -> SubscriptionTier {
        match self {
            PlanKey::Week => SubscriptionTier::Weekly,
            PlanKey::Month => SubscriptionTier::Monthly,
            PlanKey::Year => SubscriptionTier::Yearly,
        }
    }
}

impl fmt::Display for PlanKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PlanKey {
    type Err = UnknownValue;

    /// Exact match only; "Month" or "monthly" are not plan keys.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "week" => Ok(PlanKey::Week),
            "month" => Ok(PlanKey::Month),
            "year" => Ok(PlanKey::Year),
            _ => Err(UnknownValue(s.to_string())),
        }
    }
}

/// Map a plan key to its tier. Unknown keys map to `None`.
pub fn tier_from_plan_key(plan_key: &str) -> Option<SubscriptionTier> {
    plan_key.parse::<PlanKey>().ok().map(|key| key.tier())
}
