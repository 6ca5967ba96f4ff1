//! HTTP routes

mod billing;
mod health;
mod mealplan;
mod profile;


use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::{auth::require_auth, state::AppState};

pub fn create_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/checkout", post(billing::create_checkout))
        .route("/api/create-profile", post(profile::create_profile))
        .route(
            "/api/profile/subscription-status",
            get(profile::subscription_status),
        )
        .route("/api/profile/change-plan", post(profile::change_plan))
        .route("/api/profile/unsubscribe", post(profile::unsubscribe))
        .route("/api/mealplan", post(mealplan::generate_mealplan))
        .layer(middleware::from_fn_with_state(
            state.auth_state(),
            require_auth,
        ));

    // Stripe signs webhooks itself; health is polled by the platform
    let public = Router::new()
        .route("/api/webhook", post(billing::stripe_webhook))
        .route("/api/db-health", get(health::db_health));

    Router::new()
        .merge(public)
        .merge(protected)
        .with_state(state)
}
