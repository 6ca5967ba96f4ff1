// Test code patterns:
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Mealplan API Library
//!
//! HTTP surface for the subscription-gated meal plan service.

pub mod auth;
pub mod config;
pub mod error;
pub mod mealplan;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
