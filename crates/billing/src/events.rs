//! Webhook event model
//!
//! Stripe deliveries are decoded into [`WebhookEvent`], a tagged union over
//! the event types reconciliation handles. Everything else is `Other`.

use std::collections::HashMap;

use serde::Deserialize;
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};
use crate::provider::{ProviderSubscription, SubscriptionStatus};

pub const CHECKOUT_SESSION_COMPLETED: &str = "checkout.session.completed";
pub const SUBSCRIPTION_UPDATED: &str = "customer.subscription.updated";
pub const SUBSCRIPTION_DELETED: &str = "customer.subscription.deleted";
pub const INVOICE_PAYMENT_FAILED: &str = "invoice.payment_failed";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookEvent {
    pub id: String,
    pub event_type: String,
    pub created: OffsetDateTime,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    CheckoutSessionCompleted(CheckoutCompleted),
    SubscriptionUpdated(ProviderSubscription),
    SubscriptionDeleted(ProviderSubscription),
    InvoicePaymentFailed(InvoiceFailed),
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutCompleted {
    pub session_id: String,
    pub subscription_id: Option<String>,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceFailed {
    pub invoice_id: String,
    pub subscription_id: Option<String>,
}

// Wire format

#[derive(Deserialize)]
struct Envelope {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    created: i64,
    data: EnvelopeData,
}

#[derive(Deserialize)]
struct EnvelopeData {
    object: serde_json::Value,
}

/// A reference that Stripe sends either as a bare id or as an expanded object.
#[derive(Deserialize)]
#[serde(untagged)]
enum Expandable {
    Id(String),
    Object { id: String },
}

impl Expandable {
    fn into_id(self) -> String {
        match self {
            Expandable::Id(id) | Expandable::Object { id } => id,
        }
    }
}

#[derive(Deserialize)]
struct WireCheckoutSession {
    id: String,
    #[serde(default)]
    subscription: Option<Expandable>,
    #[serde(default)]
    metadata: Option<HashMap<String, String>>,
}

#[derive(Deserialize)]
struct WireSubscription {
    id: String,
    status: SubscriptionStatus,
    #[serde(default)]
    items: Option<WireList<WireSubscriptionItem>>,
}

#[derive(Deserialize)]
struct WireList<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Deserialize)]
struct WireSubscriptionItem {
    id: String,
    #[serde(default)]
    price: Option<Expandable>,
}

#[derive(Deserialize)]
struct WireInvoice {
    id: String,
    #[serde(default)]
    subscription: Option<Expandable>,
    #[serde(default)]
    parent: Option<WireInvoiceParent>,
}

#[derive(Deserialize)]
struct WireInvoiceParent {
    #[serde(default)]
    subscription_details: Option<WireSubscriptionDetails>,
}

#[derive(Deserialize)]
struct WireSubscriptionDetails {
    #[serde(default)]
    subscription: Option<Expandable>,
}

impl From<WireSubscription> for ProviderSubscription {
    fn from(wire: WireSubscription) -> Self {
        let first = wire.items.and_then(|items| items.data.into_iter().next());
        let (item_id, price_id) = match first {
            Some(item) => (Some(item.id), item.price.map(Expandable::into_id)),
            None => (None, None),
        };
        ProviderSubscription {
            id: wire.id,
            status: wire.status,
            price_id,
            item_id,
        }
    }
}

impl WireInvoice {
    fn subscription_id(self) -> Option<String> {
        self.subscription.map(Expandable::into_id).or_else(|| {
            self.parent
                .and_then(|parent| parent.subscription_details)
                .and_then(|details| details.subscription)
                .map(Expandable::into_id)
        })
    }
}

fn object<T: serde::de::DeserializeOwned>(event_type: &str, value: serde_json::Value) -> BillingResult<T> {
    serde_json::from_value(value).map_err(|e| {
        BillingError::WebhookPayload(format!("{event_type} object: {e}"))
    })
}

/// Decode a verified webhook body.
pub fn parse_event(payload: &str) -> BillingResult<WebhookEvent> {
    let envelope: Envelope = serde_json::from_str(payload)
        .map_err(|e| BillingError::WebhookPayload(e.to_string()))?;

    let created = OffsetDateTime::from_unix_timestamp(envelope.created)
        .map_err(|e| BillingError::WebhookPayload(format!("invalid created timestamp: {e}")))?;

    let object_value = envelope.data.object;
    let event_type = envelope.event_type;

    let payload = match event_type.as_str() {
        CHECKOUT_SESSION_COMPLETED => {
            let session: WireCheckoutSession = object(&event_type, object_value)?;
            EventPayload::CheckoutSessionCompleted(CheckoutCompleted {
                session_id: session.id,
                subscription_id: session.subscription.map(Expandable::into_id),
                metadata: session.metadata.unwrap_or_default(),
            })
        }
        SUBSCRIPTION_UPDATED => {
            let subscription: WireSubscription = object(&event_type, object_value)?;
            EventPayload::SubscriptionUpdated(subscription.into())
        }
        SUBSCRIPTION_DELETED => {
            let subscription: WireSubscription = object(&event_type, object_value)?;
            EventPayload::SubscriptionDeleted(subscription.into())
        }
        INVOICE_PAYMENT_FAILED => {
            let invoice: WireInvoice = object(&event_type, object_value)?;
            EventPayload::InvoicePaymentFailed(InvoiceFailed {
                invoice_id: invoice.id.clone(),
                subscription_id: invoice.subscription_id(),
            })
        }
        other => EventPayload::Other(other.to_string()),
    };

    Ok(WebhookEvent {
        id: envelope.id,
        event_type,
        created,
        payload,
    })
}
