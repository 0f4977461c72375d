//! Webhook authenticity and event translation.
//!
//! Signature header: `t=<unix seconds>,v1=<hex hmac-sha256>` where the MAC is
//! computed over `"<t>.<raw body>"` with the endpoint's signing secret. Several
//! `v1` entries may be present during secret rotation.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use uuid::Uuid;

use super::{from_minor_units, PaymentEvent, PaymentOutcome, WebhookEvent};
use crate::errors::ServiceError;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Verifies `header` against `payload`. `now` is unix seconds.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance_secs: u64,
    now: i64,
) -> Result<(), ServiceError> {
    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<&str> = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp
        .ok_or_else(|| ServiceError::InvalidSignature("missing timestamp".to_string()))?;
    if signatures.is_empty() {
        return Err(ServiceError::InvalidSignature(
            "missing v1 signature".to_string(),
        ));
    }

    if now.abs_diff(timestamp) > tolerance_secs {
        return Err(ServiceError::InvalidSignature(
            "timestamp outside tolerance window".to_string(),
        ));
    }

    let matched = signatures.iter().any(|candidate| {
        let Ok(expected) = hex::decode(candidate) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
            return false;
        };
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        // constant-time comparison
        mac.verify_slice(&expected).is_ok()
    });

    if matched {
        Ok(())
    } else {
        Err(ServiceError::InvalidSignature(
            "signature mismatch".to_string(),
        ))
    }
}

/// Builds a signature header for `payload`; the processor side of
/// `verify_signature`, used by local tooling and tests.
pub fn sign_payload(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return format!("t={}", timestamp),
    };
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    format!(
        "t={},v1={}",
        timestamp,
        hex::encode(mac.finalize().into_bytes())
    )
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: RawEventData,
}

#[derive(Debug, Deserialize)]
struct RawEventData {
    object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct IntentObject {
    id: String,
    amount: i64,
    #[serde(default)]
    amount_received: Option<i64>,
    currency: String,
    #[serde(default)]
    metadata: HashMap<String, String>,
    #[serde(default)]
    payment_method: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChargeObject {
    id: String,
    amount_refunded: i64,
    currency: String,
    #[serde(default)]
    payment_intent: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
    #[serde(default)]
    payment_method: Option<serde_json::Value>,
}

/// Translates a verified payload. Event types outside the mapping table are
/// returned as `Ignored`.
pub fn parse_event(payload: &[u8]) -> Result<WebhookEvent, ServiceError> {
    let full: serde_json::Value = serde_json::from_slice(payload)
        .map_err(|e| ServiceError::MalformedPayload(format!("invalid JSON: {}", e)))?;
    let raw: RawEvent = serde_json::from_value(full.clone())
        .map_err(|e| ServiceError::MalformedPayload(format!("not an event: {}", e)))?;

    let outcome = match raw.event_type.as_str() {
        "payment_intent.succeeded" => PaymentOutcome::Succeeded,
        "payment_intent.payment_failed" => PaymentOutcome::Failed,
        "payment_intent.canceled" => PaymentOutcome::Canceled,
        "charge.refunded" => PaymentOutcome::Refunded,
        _ => {
            return Ok(WebhookEvent::Ignored {
                event_id: raw.id,
                event_type: raw.event_type,
            })
        }
    };

    let event = if outcome == PaymentOutcome::Refunded {
        let charge: ChargeObject = serde_json::from_value(raw.data.object)
            .map_err(|e| ServiceError::MalformedPayload(format!("invalid charge: {}", e)))?;
        PaymentEvent {
            event_id: raw.id,
            event_type: raw.event_type,
            outcome,
            order_id: order_id_from(&charge.metadata)?,
            processor_reference: charge.id,
            payment_intent: charge.payment_intent,
            amount: from_minor_units(charge.amount_refunded),
            currency: charge.currency,
            payment_method: method_id(charge.payment_method),
            payload: full,
        }
    } else {
        let intent: IntentObject = serde_json::from_value(raw.data.object).map_err(|e| {
            ServiceError::MalformedPayload(format!("invalid payment intent: {}", e))
        })?;
        let minor = match outcome {
            PaymentOutcome::Succeeded => intent
                .amount_received
                .filter(|received| *received > 0)
                .unwrap_or(intent.amount),
            _ => intent.amount,
        };
        PaymentEvent {
            event_id: raw.id,
            event_type: raw.event_type,
            outcome,
            order_id: order_id_from(&intent.metadata)?,
            payment_intent: Some(intent.id.clone()),
            processor_reference: intent.id,
            amount: from_minor_units(minor),
            currency: intent.currency,
            payment_method: method_id(intent.payment_method),
            payload: full,
        }
    };

    Ok(WebhookEvent::Payment(event))
}

fn order_id_from(metadata: &HashMap<String, String>) -> Result<Option<Uuid>, ServiceError> {
    match metadata.get("order_id").map(|raw| raw.trim()) {
        None | Some("") => Ok(None),
        Some(raw) => Uuid::parse_str(raw).map(Some).map_err(|_| {
            ServiceError::MalformedPayload(format!("metadata.order_id {:?} is not a UUID", raw))
        }),
    }
}

// Expanded objects carry the id in an `id` field.
fn method_id(value: Option<serde_json::Value>) -> Option<String> {
    match value? {
        serde_json::Value::String(id) => Some(id),
        serde_json::Value::Object(map) => map.get("id").and_then(|v| v.as_str()).map(String::from),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;
    use serde_json::json;

    const SECRET: &str = "whsec_test_secret";

    #[test]
    fn accepts_valid_signature() {
        let body = br#"{"id":"evt_1"}"#;
        let header = sign_payload(body, SECRET, 1_700_000_000);
        assert!(verify_signature(body, &header, SECRET, 300, 1_700_000_100).is_ok());
    }

    #[test]
    fn rejects_tampered_body() {
        let header = sign_payload(br#"{"amount":100}"#, SECRET, 1_700_000_000);
        assert_matches!(
            verify_signature(br#"{"amount":1}"#, &header, SECRET, 300, 1_700_000_000),
            Err(ServiceError::InvalidSignature(_))
        );
    }

    #[test]
    fn rejects_stale_timestamp() {
        let body = b"{}";
        let header = sign_payload(body, SECRET, 1_700_000_000);
        assert_matches!(
            verify_signature(body, &header, SECRET, 300, 1_700_000_301),
            Err(ServiceError::InvalidSignature(msg)) if msg.contains("tolerance")
        );
    }

    #[test]
    fn accepts_any_matching_v1_entry() {
        let body = b"{}";
        let good = sign_payload(body, SECRET, 1_700_000_000);
        let v1 = good.split_once(",v1=").unwrap().1;
        let header = format!("t=1700000000,v1={},v1={}", "00".repeat(32), v1);
        assert!(verify_signature(body, &header, SECRET, 300, 1_700_000_000).is_ok());
    }

    #[test]
    fn rejects_header_without_parts() {
        assert_matches!(
            verify_signature(b"{}", "garbage", SECRET, 300, 0),
            Err(ServiceError::InvalidSignature(_))
        );
    }

    #[test]
    fn maps_succeeded_intent() {
        let order_id = Uuid::new_v4();
        let payload = json!({
            "id": "evt_1",
            "type": "payment_intent.succeeded",
            "data": {"object": {
                "id": "pi_123",
                "amount": 2635,
                "amount_received": 2635,
                "currency": "usd",
                "payment_method": "pm_card_visa",
                "metadata": {"order_id": order_id.to_string(), "order_number": "ORD-ABCDEFGH"}
            }}
        });

        let event = parse_event(payload.to_string().as_bytes()).unwrap();
        let WebhookEvent::Payment(event) = event else {
            panic!("expected payment event");
        };
        assert_eq!(event.outcome, PaymentOutcome::Succeeded);
        assert_eq!(event.order_id, Some(order_id));
        assert_eq!(event.processor_reference, "pi_123");
        assert_eq!(event.amount, dec!(26.35));
        assert_eq!(event.payment_method.as_deref(), Some("pm_card_visa"));
    }

    #[test]
    fn maps_refund_to_charge_reference() {
        let payload = json!({
            "id": "evt_2",
            "type": "charge.refunded",
            "data": {"object": {
                "id": "ch_9",
                "amount_refunded": 1000,
                "currency": "usd",
                "payment_intent": "pi_123",
                "metadata": {}
            }}
        });

        let WebhookEvent::Payment(event) = parse_event(payload.to_string().as_bytes()).unwrap()
        else {
            panic!("expected payment event");
        };
        assert_eq!(event.outcome, PaymentOutcome::Refunded);
        assert_eq!(event.processor_reference, "ch_9");
        assert_eq!(event.payment_intent.as_deref(), Some("pi_123"));
        assert_eq!(event.order_id, None);
        assert_eq!(event.amount, dec!(10.00));
    }

    #[test]
    fn unmapped_types_are_ignored() {
        let payload = json!({"id": "evt_3", "type": "charge.succeeded", "data": {"object": {}}});
        assert_matches!(
            parse_event(payload.to_string().as_bytes()),
            Ok(WebhookEvent::Ignored { event_type, .. }) if event_type == "charge.succeeded"
        );
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        assert_matches!(parse_event(b"not json"), Err(ServiceError::MalformedPayload(_)));

        let bad_metadata = json!({
            "id": "evt_4",
            "type": "payment_intent.succeeded",
            "data": {"object": {"id": "pi", "amount": 1, "currency": "usd", "metadata": {"order_id": "nope"}}}
        });
        assert_matches!(
            parse_event(bad_metadata.to_string().as_bytes()),
            Err(ServiceError::MalformedPayload(_))
        );
    }
}
