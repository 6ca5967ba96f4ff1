//! Persistence seams for profiles and the webhook delivery ledger

use async_trait::async_trait;
use mealplan_shared::{Profile, ProfileUpdate, SubscriptionTier};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::events::WebhookEvent;

/// A `processing` claim older than this is treated as abandoned (the worker
/// died before `finish`) and may be taken by a redelivery.
pub const CLAIM_TIMEOUT_SECS: i64 = 120;

/// Outcome of a conditional profile update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteResult {
    Updated,
    /// The row has already seen a newer webhook event.
    Stale,
    NotFound,
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn find_by_user_id(&self, user_id: &str) -> BillingResult<Option<Profile>>;

    async fn find_by_subscription_id(&self, subscription_id: &str)
        -> BillingResult<Option<Profile>>;

    /// Create the row if absent, then apply `update`.
    ///
    /// A new row starts from defaults with `email`. Returns `None` when the
    /// ordering guard rejected the update.
    async fn upsert_by_user_id(
        &self,
        user_id: &str,
        email: &str,
        update: &ProfileUpdate,
    ) -> BillingResult<Option<Profile>>;

    async fn update_by_user_id(
        &self,
        user_id: &str,
        update: &ProfileUpdate,
    ) -> BillingResult<WriteResult>;

    async fn ping(&self) -> BillingResult<()>;
}

/// Final state recorded for a webhook delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingResult {
    Processing,
    Success,
    Error,
}

impl ProcessingResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingResult::Processing => "processing",
            ProcessingResult::Success => "success",
            ProcessingResult::Error => "error",
        }
    }
}

#[async_trait]
pub trait WebhookEventStore: Send + Sync {
    /// Claim exclusive processing of an event. `false` means it was already
    /// claimed. Deliveries that ended in `error`, and `processing` claims older
    /// than the claim timeout, can be claimed again.
    async fn claim(&self, event: &WebhookEvent) -> BillingResult<bool>;

    async fn finish(
        &self,
        event_id: &str,
        result: ProcessingResult,
        error: Option<&str>,
    ) -> BillingResult<()>;
}

#[derive(Debug, sqlx::FromRow)]
struct ProfileRow {
    user_id: String,
    email: String,
    subscription_active: bool,
    subscription_tier: Option<String>,
    stripe_subscription_id: Option<String>,
    last_event_at: Option<OffsetDateTime>,
}

impl From<ProfileRow> for Profile {
    fn from(row: ProfileRow) -> Self {
        let subscription_tier = row.subscription_tier.as_deref().and_then(|raw| {
            raw.parse::<SubscriptionTier>()
                .map_err(|_| {
                    tracing::warn!(user_id = %row.user_id, tier = %raw, "Unknown tier stored on profile");
                })
                .ok()
        });
        Profile {
            user_id: row.user_id,
            email: row.email,
            subscription_active: row.subscription_active,
            subscription_tier,
            stripe_subscription_id: row.stripe_subscription_id,
            last_event_at: row.last_event_at,
        }
    }
}

const PROFILE_COLUMNS: &str =
    "user_id, email, subscription_active, subscription_tier, stripe_subscription_id, last_event_at";

/// Bind values for a [`ProfileUpdate`]. Nullable fields carry a "set" flag
/// so that `Some(None)` can clear a column.
struct UpdateBinds {
    email: Option<String>,
    active: Option<bool>,
    set_tier: bool,
    tier: Option<&'static str>,
    set_subscription_id: bool,
    subscription_id: Option<String>,
    observed_at: Option<OffsetDateTime>,
}

impl From<&ProfileUpdate> for UpdateBinds {
    fn from(update: &ProfileUpdate) -> Self {
        Self {
            email: update.email.clone(),
            active: update.subscription_active,
            set_tier: update.subscription_tier.is_some(),
            tier: update.subscription_tier.flatten().map(|tier| tier.as_str()),
            set_subscription_id: update.stripe_subscription_id.is_some(),
            subscription_id: update.stripe_subscription_id.clone().flatten(),
            observed_at: update.observed_at,
        }
    }
}

/// Postgres-backed profile store
#[derive(Clone)]
pub struct PgProfileStore {
    pool: PgPool,
}

impl PgProfileStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProfileStore for PgProfileStore {
    async fn find_by_user_id(&self, user_id: &str) -> BillingResult<Option<Profile>> {
        let row: Option<ProfileRow> = sqlx::query_as(&format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles WHERE user_id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Profile::from))
    }

    async fn find_by_subscription_id(
        &self,
        subscription_id: &str,
    ) -> BillingResult<Option<Profile>> {
        let row: Option<ProfileRow> = sqlx::query_as(&format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles WHERE stripe_subscription_id = $1"
        ))
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Profile::from))
    }

    async fn upsert_by_user_id(
        &self,
        user_id: &str,
        email: &str,
        update: &ProfileUpdate,
    ) -> BillingResult<Option<Profile>> {
        let binds = UpdateBinds::from(update);

        let row: Option<ProfileRow> = sqlx::query_as(&format!(
            r#"
            INSERT INTO profiles
                (id, user_id, email, subscription_active, subscription_tier,
                 stripe_subscription_id, last_event_at)
            VALUES (
                $1, $2,
                COALESCE($4::text, $3::text),
                COALESCE($5::boolean, FALSE),
                CASE WHEN $6::boolean THEN $7::text ELSE NULL END,
                CASE WHEN $8::boolean THEN $9::text ELSE NULL END,
                $10::timestamptz
            )
            ON CONFLICT (user_id) DO UPDATE SET
                email = COALESCE($4::text, profiles.email),
                subscription_active = COALESCE($5::boolean, profiles.subscription_active),
                subscription_tier = CASE WHEN $6::boolean THEN $7::text
                                         ELSE profiles.subscription_tier END,
                stripe_subscription_id = CASE WHEN $8::boolean THEN $9::text
                                              ELSE profiles.stripe_subscription_id END,
                last_event_at = COALESCE($10::timestamptz, profiles.last_event_at),
                updated_at = NOW()
            WHERE $10::timestamptz IS NULL
               OR profiles.last_event_at IS NULL
               OR profiles.last_event_at <= $10::timestamptz
            RETURNING {PROFILE_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(email)
        .bind(binds.email)
        .bind(binds.active)
        .bind(binds.set_tier)
        .bind(binds.tier)
        .bind(binds.set_subscription_id)
        .bind(binds.subscription_id)
        .bind(binds.observed_at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Profile::from))
    }

    async fn update_by_user_id(
        &self,
        user_id: &str,
        update: &ProfileUpdate,
    ) -> BillingResult<WriteResult> {
        let binds = UpdateBinds::from(update);

        let updated: Option<(String,)> = sqlx::query_as(
            r#"
            UPDATE profiles SET
                email = COALESCE($2::text, email),
                subscription_active = COALESCE($3::boolean, subscription_active),
                subscription_tier = CASE WHEN $4::boolean THEN $5::text ELSE subscription_tier END,
                stripe_subscription_id = CASE WHEN $6::boolean THEN $7::text
                                              ELSE stripe_subscription_id END,
                last_event_at = COALESCE($8::timestamptz, last_event_at),
                updated_at = NOW()
            WHERE user_id = $1
              AND ($8::timestamptz IS NULL
                   OR last_event_at IS NULL
                   OR last_event_at <= $8::timestamptz)
            RETURNING user_id
            "#,
        )
        .bind(user_id)
        .bind(binds.email)
        .bind(binds.active)
        .bind(binds.set_tier)
        .bind(binds.tier)
        .bind(binds.set_subscription_id)
        .bind(binds.subscription_id)
        .bind(binds.observed_at)
        .fetch_optional(&self.pool)
        .await?;

        if updated.is_some() {
            return Ok(WriteResult::Updated);
        }

        let (exists,): (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM profiles WHERE user_id = $1)")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(if exists {
            WriteResult::Stale
        } else {
            WriteResult::NotFound
        })
    }

    async fn ping(&self) -> BillingResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Postgres-backed webhook delivery ledger
#[derive(Clone)]
pub struct PgWebhookEventStore {
    pool: PgPool,
    claim_timeout_secs: i64,
}

impl PgWebhookEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            claim_timeout_secs: CLAIM_TIMEOUT_SECS,
        }
    }
}

#[async_trait]
impl WebhookEventStore for PgWebhookEventStore {
    async fn claim(&self, event: &WebhookEvent) -> BillingResult<bool> {
        // INSERT ... ON CONFLICT ... RETURNING gives exactly one concurrent
        // delivery the claim.
        let claimed: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO stripe_webhook_events
                (id, stripe_event_id, event_type, event_timestamp, processing_result, claimed_at)
            VALUES ($1, $2, $3, $4, 'processing', NOW())
            ON CONFLICT (stripe_event_id) DO UPDATE SET
                processing_result = 'processing',
                error_message = NULL,
                claimed_at = NOW()
            WHERE stripe_webhook_events.processing_result = 'error'
               OR (stripe_webhook_events.processing_result = 'processing'
                   AND stripe_webhook_events.claimed_at < NOW() - make_interval(secs => $5::double precision))
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&event.id)
        .bind(&event.event_type)
        .bind(event.created)
        .bind(self.claim_timeout_secs as f64)
        .fetch_optional(&self.pool)
        .await?;

        Ok(claimed.is_some())
    }

    async fn finish(
        &self,
        event_id: &str,
        result: ProcessingResult,
        error: Option<&str>,
    ) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE stripe_webhook_events
            SET processing_result = $1, error_message = $2
            WHERE stripe_event_id = $3
            "#,
        )
        .bind(result.as_str())
        .bind(error)
        .bind(event_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_binds_distinguish_clear_from_untouched() {
        let clear = UpdateBinds::from(&ProfileUpdate::inactive());
        assert!(clear.set_tier);
        assert!(clear.tier.is_none());
        assert!(clear.set_subscription_id);
        assert!(clear.subscription_id.is_none());
        assert_eq!(clear.active, Some(false));

        let untouched = UpdateBinds::from(&ProfileUpdate::email("a@example.com"));
        assert!(!untouched.set_tier);
        assert!(!untouched.set_subscription_id);
        assert_eq!(untouched.active, None);
    }

    #[test]
    fn test_update_binds_tier_uses_canonical_name() {
        let binds = UpdateBinds::from(&ProfileUpdate::subscription(
            "sub_1",
            true,
            Some(SubscriptionTier::Yearly),
        ));
        assert_eq!(binds.tier, Some("YEARLY"));
        assert_eq!(binds.subscription_id.as_deref(), Some("sub_1"));
    }

    #[test]
    fn test_row_with_unknown_tier_maps_to_none() {
        let profile = Profile::from(ProfileRow {
            user_id: "user_1".into(),
            email: String::new(),
            subscription_active: true,
            subscription_tier: Some("PLATINUM".into()),
            stripe_subscription_id: Some("sub_1".into()),
            last_event_at: None,
        });
        assert_eq!(profile.subscription_tier, None);
    }

    #[test]
    fn test_processing_result_names() {
        assert_eq!(ProcessingResult::Success.as_str(), "success");
        assert_eq!(ProcessingResult::Error.as_str(), "error");
    }
}
