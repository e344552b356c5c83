#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, Response, StatusCode};
use axum::Router;
use chrono::Utc;
use payment_relay::events::PaymentIntentSnapshot;
use payment_relay::processor::{
    CheckoutSession, ConnectionToken, CreatedPaymentIntent, NewCheckoutSession, NewPaymentIntent, Refund,
};
use payment_relay::signature::signature_header;
use payment_relay::{
    build_router, AppState, Channel, DeliveryError, ForwardPayload, Forwarder, IdempotencyGuard, PaymentProcessor,
    ProcessorError, RelayConfig,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

pub const QUOTES_SECRET: &str = "whsec_quotes";
pub const TERMINAL_SECRET: &str = "whsec_terminal";
pub const SHARED_SECRET: &str = "glide-shared";

#[derive(Default)]
pub struct FakeProcessor {
    intents: Mutex<HashMap<String, PaymentIntentSnapshot>>,
    calls: Mutex<Vec<String>>,
    created: Mutex<Vec<NewPaymentIntent>>,
    pub fail_lookups: AtomicBool,
    pub fail_writes: AtomicBool,
}

impl FakeProcessor {
    pub fn insert_intent(&self, value: Value) {
        let snapshot: PaymentIntentSnapshot = serde_json::from_value(value).expect("snapshot");
        self.intents.lock().unwrap().insert(snapshot.id.clone(), snapshot);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn created_intents(&self) -> Vec<NewPaymentIntent> {
        self.created.lock().unwrap().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn write_result(&self) -> Result<(), ProcessorError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ProcessorError::Api {
                status: 400,
                message: "Reader is offline".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentProcessor for FakeProcessor {
    async fn retrieve_payment_intent(&self, id: &str) -> Result<PaymentIntentSnapshot, ProcessorError> {
        self.record(format!("retrieve:{id}"));
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(ProcessorError::Api {
                status: 500,
                message: "Stripe failure".to_string(),
            });
        }
        self.intents
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| ProcessorError::Api {
                status: 404,
                message: format!("No such payment_intent: '{id}'"),
            })
    }

    async fn create_payment_intent(&self, request: &NewPaymentIntent) -> Result<CreatedPaymentIntent, ProcessorError> {
        self.record("create_payment_intent");
        self.write_result()?;
        self.created.lock().unwrap().push(request.clone());
        Ok(CreatedPaymentIntent {
            id: "pi_created".to_string(),
            client_secret: Some("pi_created_secret".to_string()),
        })
    }

    async fn process_payment_intent(&self, reader_id: &str, payment_intent_id: &str) -> Result<Value, ProcessorError> {
        self.record(format!("process:{reader_id}:{payment_intent_id}"));
        self.write_result()?;
        Ok(json!({ "id": reader_id, "status": "online", "action": { "status": "in_progress" } }))
    }

    async fn cancel_reader_action(&self, reader_id: &str) -> Result<Value, ProcessorError> {
        self.record(format!("cancel:{reader_id}"));
        self.write_result()?;
        Ok(json!({ "id": reader_id, "action": null }))
    }

    async fn create_refund(&self, payment_intent_id: &str, amount: i64) -> Result<Refund, ProcessorError> {
        self.record(format!("refund:{payment_intent_id}:{amount}"));
        self.write_result()?;
        Ok(Refund {
            id: "re_1".to_string(),
            amount,
            currency: "aud".to_string(),
            reason: None,
            receipt_url: None,
            payment_intent: Some(payment_intent_id.to_string()),
        })
    }

    async fn create_connection_token(&self) -> Result<ConnectionToken, ProcessorError> {
        self.record("connection_token");
        self.write_result()?;
        Ok(ConnectionToken {
            secret: "pst_test_secret".to_string(),
        })
    }

    async fn create_checkout_session(&self, request: &NewCheckoutSession) -> Result<CheckoutSession, ProcessorError> {
        self.record(format!("checkout:{}:{}:{}", request.quote_id, request.product_name, request.unit_amount));
        self.write_result()?;
        Ok(CheckoutSession {
            id: "cs_1".to_string(),
            url: Some("https://checkout.example/cs_1".to_string()),
        })
    }
}

#[derive(Default)]
pub struct RecordingForwarder {
    sent: Mutex<Vec<(ForwardPayload, Channel)>>,
    pub fail: AtomicBool,
}

impl RecordingForwarder {
    pub fn sent(&self) -> Vec<(ForwardPayload, Channel)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Forwarder for RecordingForwarder {
    async fn forward(&self, payload: &ForwardPayload, channel: Channel) -> Result<(), DeliveryError> {
        self.sent.lock().unwrap().push((payload.clone(), channel));
        if self.fail.load(Ordering::SeqCst) {
            return Err(DeliveryError::Status {
                status: 502,
                body: "bad gateway".to_string(),
            });
        }
        Ok(())
    }
}

pub fn test_config() -> RelayConfig {
    let vars: HashMap<&str, &str> = HashMap::from([
        ("STRIPE_SECRET_KEY", "sk_test_123"),
        ("STRIPE_WEBHOOK_SECRET", QUOTES_SECRET),
        ("STRIPE_TERMINAL_WEBHOOK_SECRET", TERMINAL_SECRET),
        ("GLIDE_QUOTE_WEBHOOK_URL", "http://platform.invalid/quote"),
        ("GLIDE_QUOTE_WEBHOOK_TOKEN", "quote-token"),
        ("GLIDE_TERMINAL_WEBHOOK_URL", "http://platform.invalid/terminal"),
        ("GLIDE_TERMINAL_WEBHOOK_TOKEN", "terminal-token"),
        ("GLIDE_SHARED_SECRET", SHARED_SECRET),
        ("CHECKOUT_RETURN_URL", "https://app.example/quotes?id={quote_id}"),
    ]);
    RelayConfig::from_lookup(|key| vars.get(key).map(|value| value.to_string())).expect("config")
}

pub fn state_with(processor: Arc<FakeProcessor>, forwarder: Arc<dyn Forwarder>) -> AppState {
    AppState::new(test_config(), processor, forwarder, IdempotencyGuard::in_memory()).expect("state")
}

pub async fn send_to(state: &AppState, request: Request<Body>) -> Response<Body> {
    build_router(state.clone()).oneshot(request).await.expect("response")
}

pub struct Harness {
    pub state: AppState,
    pub processor: Arc<FakeProcessor>,
    pub forwarder: Arc<RecordingForwarder>,
}

impl Harness {
    pub fn new() -> Self {
        let processor = Arc::new(FakeProcessor::default());
        let forwarder = Arc::new(RecordingForwarder::default());
        let state = state_with(processor.clone(), forwarder.clone());
        Self {
            state,
            processor,
            forwarder,
        }
    }

    pub fn app(&self) -> Router {
        build_router(self.state.clone())
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        send_to(&self.state, request).await
    }
}

pub fn signed_webhook(path: &str, secret: &str, body: &Value) -> Request<Body> {
    let raw = serde_json::to_vec(body).expect("body");
    let header = signature_header(secret, Utc::now().timestamp(), &raw);
    Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .header("stripe-signature", header)
        .body(Body::from(raw))
        .expect("request")
}

pub fn json_request(path: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).expect("body")))
        .expect("request")
}

pub fn stripe_event(id: &str, event_type: &str, object: Value) -> Value {
    json!({ "id": id, "object": "event", "type": event_type, "data": { "object": object } })
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = to_bytes(response.into_body(), 64 * 1024).await.expect("body");
    String::from_utf8(bytes.to_vec()).expect("utf8")
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = to_bytes(response.into_body(), 64 * 1024).await.expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

pub fn assert_status(response: &Response<Body>, expected: StatusCode) {
    assert_eq!(response.status(), expected, "unexpected status");
}
