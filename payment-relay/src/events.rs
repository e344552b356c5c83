use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

pub const CHECKOUT_SESSION_COMPLETED: &str = "checkout.session.completed";
pub const PAYMENT_INTENT_SUCCEEDED: &str = "payment_intent.succeeded";
pub const PAYMENT_INTENT_FAILED: &str = "payment_intent.payment_failed";
pub const PAYMENT_INTENT_CANCELED: &str = "payment_intent.canceled";
pub const READER_ACTION_FAILED: &str = "terminal.reader.action_failed";

/// Verified webhook envelope. `data.object` stays untyped until classified.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeEvent {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Charge {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub receipt_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChargeList {
    #[serde(default)]
    pub data: Vec<Charge>,
}

/// `latest_charge` is a bare id unless the request asked for it to be expanded.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum LatestCharge {
    Id(String),
    Expanded(Charge),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LastPaymentError {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaymentIntentSnapshot {
    pub id: String,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub amount: i64,
    #[serde(default)]
    pub amount_received: i64,
    #[serde(default)]
    pub status: String,
    #[serde(default, deserialize_with = "nullable_map")]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub charges: Option<ChargeList>,
    #[serde(default)]
    pub latest_charge: Option<LatestCharge>,
    #[serde(default)]
    pub last_payment_error: Option<LastPaymentError>,
}

impl PaymentIntentSnapshot {
    /// Receipt of the first legacy charge, falling back to an expanded `latest_charge`.
    pub fn receipt_url(&self) -> Option<&str> {
        let legacy = self
            .charges
            .as_ref()
            .and_then(|charges| charges.data.first())
            .and_then(|charge| charge.receipt_url.as_deref());
        legacy.or_else(|| match &self.latest_charge {
            Some(LatestCharge::Expanded(charge)) => charge.receipt_url.as_deref(),
            _ => None,
        })
    }
}

#[derive(Debug, Deserialize)]
struct CheckoutSessionObject {
    #[serde(default)]
    payment_intent: Option<String>,
    #[serde(default, deserialize_with = "nullable_map")]
    metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ReaderObject {
    id: String,
    #[serde(default)]
    action: Option<ReaderAction>,
}

#[derive(Debug, Default, Deserialize)]
struct ReaderAction {
    #[serde(default)]
    failure_code: Option<String>,
    #[serde(default)]
    failure_message: Option<String>,
    #[serde(default)]
    process_payment_intent: Option<ProcessPaymentIntentAction>,
}

#[derive(Debug, Deserialize)]
struct ProcessPaymentIntentAction {
    #[serde(default)]
    payment_intent: Option<String>,
}

#[derive(Debug, Clone)]
pub enum ClassifiedEvent {
    CheckoutCompleted {
        payment_intent_id: String,
        metadata: HashMap<String, String>,
    },
    PaymentSucceeded(PaymentIntentSnapshot),
    PaymentFailed(PaymentIntentSnapshot),
    PaymentCanceled(PaymentIntentSnapshot),
    ReaderActionFailed {
        reader_id: String,
        payment_intent_id: Option<String>,
        failure_code: Option<String>,
        failure_message: Option<String>,
    },
    Unrecognized(String),
}

impl ClassifiedEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ClassifiedEvent::CheckoutCompleted { .. } => "checkout_completed",
            ClassifiedEvent::PaymentSucceeded(_) => "payment_succeeded",
            ClassifiedEvent::PaymentFailed(_) => "payment_failed",
            ClassifiedEvent::PaymentCanceled(_) => "payment_canceled",
            ClassifiedEvent::ReaderActionFailed { .. } => "reader_action_failed",
            ClassifiedEvent::Unrecognized(_) => "unrecognized",
        }
    }
}

/// A recognized event whose object does not carry what its type promises.
#[derive(Debug, Error)]
pub enum ContractError {
    #[error("{event_type} is missing required field `{field}`")]
    MissingField {
        event_type: String,
        field: &'static str,
    },
    #[error("{event_type} object has an unexpected shape: {source}")]
    Shape {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },
}

pub fn classify(event: &StripeEvent) -> Result<ClassifiedEvent, ContractError> {
    let event_type = event.event_type.as_str();
    let classified = match event_type {
        CHECKOUT_SESSION_COMPLETED => {
            let session: CheckoutSessionObject = decode(event)?;
            let payment_intent_id = session
                .payment_intent
                .filter(|id| !id.is_empty())
                .ok_or_else(|| missing(event_type, "payment_intent"))?;
            ClassifiedEvent::CheckoutCompleted {
                payment_intent_id,
                metadata: session.metadata,
            }
        }
        PAYMENT_INTENT_SUCCEEDED => ClassifiedEvent::PaymentSucceeded(decode(event)?),
        PAYMENT_INTENT_FAILED => {
            let snapshot: PaymentIntentSnapshot = decode(event)?;
            if snapshot.last_payment_error.is_none() {
                return Err(missing(event_type, "last_payment_error"));
            }
            ClassifiedEvent::PaymentFailed(snapshot)
        }
        PAYMENT_INTENT_CANCELED => ClassifiedEvent::PaymentCanceled(decode(event)?),
        READER_ACTION_FAILED => {
            let reader: ReaderObject = decode(event)?;
            let action = reader.action.unwrap_or_default();
            ClassifiedEvent::ReaderActionFailed {
                reader_id: reader.id,
                payment_intent_id: action
                    .process_payment_intent
                    .and_then(|process| process.payment_intent)
                    .filter(|id| !id.is_empty()),
                failure_code: action.failure_code,
                failure_message: action.failure_message,
            }
        }
        other => ClassifiedEvent::Unrecognized(other.to_string()),
    };
    Ok(classified)
}

fn decode<T: serde::de::DeserializeOwned>(event: &StripeEvent) -> Result<T, ContractError> {
    T::deserialize(&event.data.object).map_err(|source| ContractError::Shape {
        event_type: event.event_type.clone(),
        source,
    })
}

fn missing(event_type: &str, field: &'static str) -> ContractError {
    ContractError::MissingField {
        event_type: event_type.to_string(),
        field,
    }
}

fn nullable_map<'de, D>(deserializer: D) -> Result<HashMap<String, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<HashMap<String, String>>::deserialize(deserializer)?.unwrap_or_default())
}
