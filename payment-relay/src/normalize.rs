//! Canonical payload shaping shared by every webhook branch and the refund proxy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::warn;

use crate::events::PaymentIntentSnapshot;

/// Downstream destination selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Quote,
    Terminal,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Quote => "quote",
            Channel::Terminal => "terminal",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Quote,
    Order,
}

/// The fields of free-form processor metadata the relay cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaymentMetadata {
    pub quote_id: Option<String>,
    pub order_id: Option<String>,
    pub payment_type: Option<String>,
    pub payment_mode: Option<String>,
    pub attempt_number: Option<String>,
}

impl PaymentMetadata {
    pub fn from_map(map: &HashMap<String, String>) -> Self {
        let field = |key: &str| {
            map.get(key)
                .map(|value| value.trim())
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };
        Self {
            quote_id: field("quote_id"),
            order_id: field("order_id"),
            payment_type: field("payment_type"),
            payment_mode: field("payment_mode"),
            attempt_number: field("attempt_number"),
        }
    }

    /// Keeps every field already set and fills the rest from `fallback`.
    pub fn or(self, fallback: PaymentMetadata) -> Self {
        Self {
            quote_id: self.quote_id.or(fallback.quote_id),
            order_id: self.order_id.or(fallback.order_id),
            payment_type: self.payment_type.or(fallback.payment_type),
            payment_mode: self.payment_mode.or(fallback.payment_mode),
            attempt_number: self.attempt_number.or(fallback.attempt_number),
        }
    }

    pub fn attempt(&self) -> i64 {
        self.attempt_number
            .as_deref()
            .and_then(|raw| raw.parse::<i64>().ok())
            .unwrap_or(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundDetails {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    pub reason: Option<String>,
    pub receipt_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    Failed { reason: String, code: String },
    Canceled,
    Refunded(RefundDetails),
    /// Checkout completion whose intent has not settled; carries the raw status.
    Pending(String),
}

impl Outcome {
    /// Maps the status of an intent retrieved after a checkout completion.
    pub fn from_intent(snapshot: &PaymentIntentSnapshot) -> Self {
        match snapshot.status.as_str() {
            "succeeded" => Outcome::Succeeded,
            "canceled" => Outcome::Canceled,
            other => Outcome::Pending(other.to_string()),
        }
    }

    pub fn failed(reason: Option<&str>, code: Option<&str>) -> Self {
        Outcome::Failed {
            reason: reason.unwrap_or("Unknown reason").to_string(),
            code: code.unwrap_or("unknown_error").to_string(),
        }
    }

    /// Failure taken from the intent's `last_payment_error`.
    pub fn failed_from(snapshot: &PaymentIntentSnapshot) -> Self {
        let error = snapshot.last_payment_error.as_ref();
        Self::failed(
            error.and_then(|e| e.message.as_deref()),
            error.and_then(|e| e.code.as_deref()),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForwardPayload {
    pub status: String,
    pub paid: bool,
    pub currency: String,
    pub amount_paid: i64,
    pub receipt_url: Option<String>,
    pub payment_intent_id: String,
    pub payment_type: String,
    pub attempt_number: i64,
    pub source: Source,
    pub quote_id: Option<String>,
    pub order_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refund_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stripe_refund_id: Option<String>,
}

/// `order_id` wins over `quote_id`; with neither present the channel decides.
fn resolve_source(metadata: &PaymentMetadata, channel: Channel, payment_intent_id: &str) -> Source {
    match (&metadata.order_id, &metadata.quote_id) {
        (Some(order_id), Some(quote_id)) => {
            warn!(
                payment_intent_id,
                order_id = %order_id,
                quote_id = %quote_id,
                "Metadata carries both order_id and quote_id; treating as order"
            );
            Source::Order
        }
        (Some(_), None) => Source::Order,
        (None, Some(_)) => Source::Quote,
        (None, None) => match channel {
            Channel::Quote => Source::Quote,
            Channel::Terminal => Source::Order,
        },
    }
}

pub fn normalize(
    outcome: &Outcome,
    snapshot: &PaymentIntentSnapshot,
    metadata: &PaymentMetadata,
    channel: Channel,
    now: DateTime<Utc>,
) -> ForwardPayload {
    let source = resolve_source(metadata, channel, &snapshot.id);
    let default_payment_type = match (outcome, source) {
        (Outcome::Refunded(_), _) | (_, Source::Order) => "terminal",
        (_, Source::Quote) => "full",
    };
    let payment_type = metadata
        .payment_type
        .clone()
        .or_else(|| metadata.payment_mode.clone())
        .unwrap_or_else(|| default_payment_type.to_string());

    let mut payload = ForwardPayload {
        status: String::new(),
        paid: false,
        currency: snapshot.currency.clone(),
        amount_paid: 0,
        receipt_url: None,
        payment_intent_id: snapshot.id.clone(),
        payment_type,
        attempt_number: metadata.attempt(),
        source,
        quote_id: metadata.quote_id.clone(),
        order_id: metadata.order_id.clone(),
        timestamp: now,
        failure_reason: None,
        failure_code: None,
        refund_reason: None,
        stripe_refund_id: None,
    };

    match outcome {
        Outcome::Succeeded => {
            payload.status = "succeeded".to_string();
            payload.paid = true;
            payload.amount_paid = snapshot.amount_received;
            payload.receipt_url = snapshot.receipt_url().map(str::to_string);
        }
        Outcome::Pending(status) => {
            payload.status = status.clone();
            payload.amount_paid = snapshot.amount_received;
            payload.receipt_url = snapshot.receipt_url().map(str::to_string);
        }
        Outcome::Failed { reason, code } => {
            payload.status = "failed".to_string();
            payload.failure_reason = Some(reason.clone());
            payload.failure_code = Some(code.clone());
        }
        Outcome::Canceled => {
            payload.status = "canceled".to_string();
        }
        Outcome::Refunded(refund) => {
            payload.status = "refunded".to_string();
            payload.amount_paid = -refund.amount.abs();
            payload.receipt_url = refund.receipt_url.clone();
            if !refund.currency.is_empty() {
                payload.currency = refund.currency.clone();
            }
            payload.refund_reason = Some(
                refund
                    .reason
                    .clone()
                    .unwrap_or_else(|| "unspecified".to_string()),
            );
            payload.stripe_refund_id = Some(refund.id.clone());
        }
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(value: serde_json::Value) -> PaymentIntentSnapshot {
        serde_json::from_value(value).unwrap()
    }

    fn meta(pairs: &[(&str, &str)]) -> PaymentMetadata {
        let map = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        PaymentMetadata::from_map(&map)
    }

    #[test]
    fn quote_checkout_scenario() {
        let intent = snapshot(json!({
            "id": "pi_123",
            "amount_received": 32500,
            "currency": "aud",
            "status": "succeeded",
            "charges": { "data": [{ "receipt_url": "https://x/receipt/pi_123" }] }
        }));
        let metadata = meta(&[("quote_id", "quote_abc123"), ("payment_mode", "full")]);
        let now = Utc::now();
        let payload = normalize(&Outcome::from_intent(&intent), &intent, &metadata, Channel::Quote, now);

        assert_eq!(payload.quote_id.as_deref(), Some("quote_abc123"));
        assert_eq!(payload.payment_intent_id, "pi_123");
        assert_eq!(payload.amount_paid, 32500);
        assert_eq!(payload.currency, "aud");
        assert!(payload.paid);
        assert_eq!(payload.payment_type, "full");
        assert_eq!(payload.status, "succeeded");
        assert_eq!(payload.receipt_url.as_deref(), Some("https://x/receipt/pi_123"));
        assert_eq!(payload.source, Source::Quote);
        assert_eq!(payload.attempt_number, 1);
        assert_eq!(payload.timestamp, now);
    }

    #[test]
    fn unsettled_checkout_is_not_paid() {
        let intent = snapshot(json!({ "id": "pi_1", "status": "processing", "amount_received": 0 }));
        let payload = normalize(
            &Outcome::from_intent(&intent),
            &intent,
            &PaymentMetadata::default(),
            Channel::Quote,
            Utc::now(),
        );
        assert_eq!(payload.status, "processing");
        assert!(!payload.paid);
    }

    #[test]
    fn failure_zeroes_amount_and_reports_reason() {
        let intent = snapshot(json!({
            "id": "pi_2",
            "currency": "aud",
            "amount_received": 1200,
            "charges": { "data": [{ "receipt_url": "https://x/r" }] },
            "last_payment_error": { "message": "Your card was declined." }
        }));
        let metadata = meta(&[("order_id", "ord_9"), ("attempt_number", "3")]);
        let payload = normalize(&Outcome::failed_from(&intent), &intent, &metadata, Channel::Terminal, Utc::now());

        assert_eq!(payload.status, "failed");
        assert_eq!(payload.amount_paid, 0);
        assert!(payload.receipt_url.is_none());
        assert_eq!(payload.failure_reason.as_deref(), Some("Your card was declined."));
        assert_eq!(payload.failure_code.as_deref(), Some("unknown_error"));
        assert_eq!(payload.payment_type, "terminal");
        assert_eq!(payload.attempt_number, 3);
        assert_eq!(payload.source, Source::Order);
    }

    #[test]
    fn refund_amount_is_negative() {
        let intent = snapshot(json!({ "id": "pi_3", "currency": "aud" }));
        let metadata = meta(&[("quote_id", "q_1")]);
        for amount in [500, -500] {
            let refund = RefundDetails {
                id: "re_1".into(),
                amount,
                currency: "aud".into(),
                reason: None,
                receipt_url: None,
            };
            let payload = normalize(&Outcome::Refunded(refund), &intent, &metadata, Channel::Terminal, Utc::now());
            assert_eq!(payload.amount_paid, -500);
            assert_eq!(payload.status, "refunded");
            assert!(!payload.paid);
            assert_eq!(payload.refund_reason.as_deref(), Some("unspecified"));
            assert_eq!(payload.stripe_refund_id.as_deref(), Some("re_1"));
            assert_eq!(payload.payment_type, "terminal");
            assert_eq!(payload.source, Source::Quote);
        }
    }

    #[test]
    fn order_wins_when_both_ids_present() {
        let intent = snapshot(json!({ "id": "pi_4", "status": "succeeded" }));
        let metadata = meta(&[("quote_id", "q_1"), ("order_id", "o_1")]);
        let payload = normalize(&Outcome::Succeeded, &intent, &metadata, Channel::Quote, Utc::now());
        assert_eq!(payload.source, Source::Order);
        assert_eq!(payload.quote_id.as_deref(), Some("q_1"));
        assert_eq!(payload.order_id.as_deref(), Some("o_1"));
    }

    #[test]
    fn source_falls_back_to_channel() {
        let intent = snapshot(json!({ "id": "pi_5", "status": "canceled" }));
        let empty = meta(&[("quote_id", "  "), ("attempt_number", "two")]);
        let terminal = normalize(&Outcome::Canceled, &intent, &empty, Channel::Terminal, Utc::now());
        assert_eq!(terminal.source, Source::Order);
        assert_eq!(terminal.payment_type, "terminal");
        assert_eq!(terminal.attempt_number, 1);
        assert!(terminal.quote_id.is_none());

        let quote = normalize(&Outcome::Canceled, &intent, &empty, Channel::Quote, Utc::now());
        assert_eq!(quote.source, Source::Quote);
        assert_eq!(quote.payment_type, "full");
    }

    #[test]
    fn optional_fields_are_omitted_from_json() {
        let intent = snapshot(json!({ "id": "pi_6", "status": "succeeded" }));
        let payload = normalize(&Outcome::Succeeded, &intent, &PaymentMetadata::default(), Channel::Quote, Utc::now());
        let value = serde_json::to_value(&payload).unwrap();
        assert!(value.get("failure_reason").is_none());
        assert!(value.get("stripe_refund_id").is_none());
        assert!(value.get("receipt_url").unwrap().is_null());
        assert_eq!(value["source"], "quote");
    }

    #[test]
    fn session_metadata_is_filled_from_intent() {
        let session = meta(&[("quote_id", "q_1")]);
        let intent = meta(&[("quote_id", "q_other"), ("attempt_number", "2")]);
        let merged = session.or(intent);
        assert_eq!(merged.quote_id.as_deref(), Some("q_1"));
        assert_eq!(merged.attempt(), 2);
    }
}
