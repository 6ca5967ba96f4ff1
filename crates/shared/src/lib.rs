#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Mealplan shared types
//!
//! Domain vocabulary used by both the billing core and the API server.

pub mod db;
pub mod profile;
pub mod tier;

pub use db::{create_pool, run_migrations};
pub use profile::{Profile, ProfileUpdate};
pub use tier::{tier_from_plan_key, PlanKey, SubscriptionTier, UnknownValue};
