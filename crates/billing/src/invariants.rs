//! Profile Invariants
//!
//! Consistency checks for a stored profile. The writers do not enforce these
//! atomically, so a row can briefly violate them between a write-through and
//! the confirming webhook. The status resolver treats a violating row as
//! stale and reconciles it against Stripe.
//!
//! Checks only read; they never repair.

use mealplan_shared::Profile;
use serde::{Deserialize, Serialize};

/// Result of a single invariant check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvariantViolation {
    /// Which invariant was violated
    pub invariant: String,
    pub user_id: String,
    /// Human-readable description of the violation
    pub description: String,
    pub severity: ViolationSeverity,
}

/// Severity of an invariant violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// Access decisions may be wrong
    Critical,
    /// Inconsistent but harmless until the next reconciliation
    Warning,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::Warning => write!(f, "WARNING"),
        }
    }
}

fn violation(
    profile: &Profile,
    invariant: &str,
    description: &str,
    severity: ViolationSeverity,
) -> InvariantViolation {
    InvariantViolation {
        invariant: invariant.to_string(),
        user_id: profile.user_id.clone(),
        description: description.to_string(),
        severity,
    }
}

/// Run every profile invariant and return the violations found.
pub fn check_profile(profile: &Profile) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();

    if profile.subscription_active && profile.subscription_tier.is_none() {
        violations.push(violation(
            profile,
            "active_without_tier",
            "Profile is active but has no subscription tier",
            ViolationSeverity::Critical,
        ));
    }

    if profile.subscription_active && profile.stripe_subscription_id.is_none() {
        violations.push(violation(
            profile,
            "active_without_subscription_id",
            "Profile is active but has no Stripe subscription id",
            ViolationSeverity::Critical,
        ));
    }

    if profile.subscription_tier.is_some() && profile.stripe_subscription_id.is_none() {
        violations.push(violation(
            profile,
            "tier_without_subscription_id",
            "Profile has a tier but no Stripe subscription id",
            ViolationSeverity::Warning,
        ));
    }

    violations
}

pub fn log_violations(violations: &[InvariantViolation]) {
    for v in violations {
        match v.severity {
            ViolationSeverity::Critical => tracing::error!(
                invariant = %v.invariant,
                user_id = %v.user_id,
                severity = %v.severity,
                "{}",
                v.description
            ),
            ViolationSeverity::Warning => tracing::warn!(
                invariant = %v.invariant,
                user_id = %v.user_id,
                severity = %v.severity,
                "{}",
                v.description
            ),
        }
    }
}
