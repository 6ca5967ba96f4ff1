//! Profile provisioning

use std::sync::Arc;

use mealplan_shared::{Profile, ProfileUpdate};

use crate::error::{BillingError, BillingResult};
use crate::store::ProfileStore;

pub struct ProfileService {
    store: Arc<dyn ProfileStore>,
}

impl ProfileService {
    pub fn new(store: Arc<dyn ProfileStore>) -> Self {
        Self { store }
    }

    /// Create the user's profile if missing. An existing row only has its
    /// email refreshed, and only when a non-empty email is supplied.
    pub async fn ensure_profile(&self, user_id: &str, email: Option<&str>) -> BillingResult<Profile> {
        let email = email.map(str::trim).filter(|e| !e.is_empty());
        let update = match email {
            Some(email) => ProfileUpdate::email(email),
            None => ProfileUpdate::default(),
        };

        let profile = self
            .store
            .upsert_by_user_id(user_id, email.unwrap_or_default(), &update)
            .await?;

        // untimestamped writes are never rejected as stale
        profile.ok_or_else(|| BillingError::Internal("profile upsert was rejected".to_string()))
    }

    pub async fn ping(&self) -> BillingResult<()> {
        self.store.ping().await
    }
}
