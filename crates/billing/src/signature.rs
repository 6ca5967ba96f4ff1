//! Stripe webhook signature verification
//!
//! Header format: `t=<unix seconds>,v1=<hex hmac>[,v1=<hex hmac>...]`.
//! The signed message is `"{t}.{raw body}"`, keyed with the endpoint secret.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{BillingError, BillingResult};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

struct ParsedHeader<'a> {
    timestamp: i64,
    signatures: Vec<&'a str>,
}

fn parse_header(header: &str) -> Option<ParsedHeader<'_>> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse().ok(),
            "v1" => signatures.push(value),
            _ => {}
        }
    }

    match (timestamp, signatures.is_empty()) {
        (Some(timestamp), false) => Some(ParsedHeader {
            timestamp,
            signatures,
        }),
        _ => None,
    }
}

/// Hex HMAC-SHA256 of `"{timestamp}.{payload}"`.
pub fn compute_signature(payload: &str, timestamp: i64, secret: &str) -> BillingResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| BillingError::Internal("Invalid webhook secret key".to_string()))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a webhook delivery against the `stripe-signature` header.
///
/// `now` is the current unix time; deliveries whose timestamp differs from it
/// by more than `tolerance_secs` are rejected.
pub fn verify_signature(
    payload: &str,
    header: Option<&str>,
    secret: &str,
    now: i64,
    tolerance_secs: i64,
) -> BillingResult<()> {
    let header = header.ok_or_else(|| {
        tracing::warn!("Webhook delivery without signature header");
        BillingError::WebhookSignatureInvalid
    })?;

    let parsed = parse_header(header).ok_or_else(|| {
        tracing::warn!("Malformed webhook signature header");
        BillingError::WebhookSignatureInvalid
    })?;

    // the header timestamp is untrusted; any i64 is possible
    let age = now.abs_diff(parsed.timestamp);
    if age > tolerance_secs.max(0).unsigned_abs() {
        tracing::warn!(
            timestamp = parsed.timestamp,
            now,
            age,
            "Webhook timestamp outside tolerance"
        );
        return Err(BillingError::WebhookSignatureInvalid);
    }

    let expected = compute_signature(payload, parsed.timestamp, secret)?;
    let matched = parsed
        .signatures
        .iter()
        .any(|candidate| bool::from(expected.as_bytes().ct_eq(candidate.as_bytes())));

    if !matched {
        tracing::warn!("Webhook signature mismatch");
        return Err(BillingError::WebhookSignatureInvalid);
    }

    Ok(())
}
