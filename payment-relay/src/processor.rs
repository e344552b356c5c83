use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::events::PaymentIntentSnapshot;

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("processor request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("{message}")]
    Api { status: u16, message: String },
    #[error("unexpected processor response: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, Default)]
pub struct NewPaymentIntent {
    pub amount: i64,
    pub currency: String,
    pub description: Option<String>,
    pub capture_method: Option<String>,
    pub metadata: Vec<(String, String)>,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CreatedPaymentIntent {
    pub id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Refund {
    pub id: String,
    #[serde(default)]
    pub amount: i64,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub receipt_url: Option<String>,
    #[serde(default)]
    pub payment_intent: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionToken {
    pub secret: String,
}

#[derive(Debug, Clone)]
pub struct NewCheckoutSession {
    pub quote_id: String,
    pub payment_mode: String,
    pub product_name: String,
    pub unit_amount: i64,
    pub currency: String,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CheckoutSession {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
}

/// The processor operations the relay depends on. Reader operations return
/// the processor's reader object untouched.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn retrieve_payment_intent(&self, id: &str) -> Result<PaymentIntentSnapshot, ProcessorError>;
    async fn create_payment_intent(
        &self,
        request: &NewPaymentIntent,
    ) -> Result<CreatedPaymentIntent, ProcessorError>;
    async fn process_payment_intent(
        &self,
        reader_id: &str,
        payment_intent_id: &str,
    ) -> Result<Value, ProcessorError>;
    async fn cancel_reader_action(&self, reader_id: &str) -> Result<Value, ProcessorError>;
    async fn create_refund(&self, payment_intent_id: &str, amount: i64) -> Result<Refund, ProcessorError>;
    async fn create_connection_token(&self) -> Result<ConnectionToken, ProcessorError>;
    async fn create_checkout_session(
        &self,
        request: &NewCheckoutSession,
    ) -> Result<CheckoutSession, ProcessorError>;
}

#[derive(Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    message: Option<String>,
}

/// Stripe REST client: form-encoded requests, secret key as basic-auth user.
#[derive(Clone)]
pub struct StripeClient {
    http: Client,
    secret_key: String,
    api_base: String,
}

impl StripeClient {
    pub fn new(secret_key: impl Into<String>, api_base: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build processor HTTP client")?;
        Ok(Self {
            http,
            secret_key: secret_key.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ProcessorError> {
        let response = request
            .basic_auth(&self.secret_key, Option::<&str>::None)
            .send()
            .await
            .map_err(ProcessorError::Transport)?;
        let status = response.status();
        let body = response.text().await.map_err(ProcessorError::Transport)?;
        if !status.is_success() {
            let message = serde_json::from_str::<ApiErrorEnvelope>(&body)
                .ok()
                .and_then(|envelope| envelope.error.message)
                .unwrap_or_else(|| format!("Stripe API returned status {}", status.as_u16()));
            return Err(ProcessorError::Api {
                status: status.as_u16(),
                message,
            });
        }
        serde_json::from_str(&body).map_err(|e| ProcessorError::Decode(e.to_string()))
    }
}

#[async_trait]
impl PaymentProcessor for StripeClient {
    async fn retrieve_payment_intent(&self, id: &str) -> Result<PaymentIntentSnapshot, ProcessorError> {
        let request = self
            .http
            .get(self.url(&format!("/v1/payment_intents/{id}")))
            .query(&[("expand[]", "latest_charge")]);
        self.send(request).await
    }

    async fn create_payment_intent(
        &self,
        request: &NewPaymentIntent,
    ) -> Result<CreatedPaymentIntent, ProcessorError> {
        let mut params = vec![
            ("amount".to_string(), request.amount.to_string()),
            ("currency".to_string(), request.currency.clone()),
            ("payment_method_types[]".to_string(), "card_present".to_string()),
        ];
        if let Some(capture) = &request.capture_method {
            params.push(("capture_method".to_string(), capture.clone()));
        }
        if let Some(description) = &request.description {
            params.push(("description".to_string(), description.clone()));
        }
        for (key, value) in &request.metadata {
            params.push((format!("metadata[{key}]"), value.clone()));
        }

        let mut builder = self.http.post(self.url("/v1/payment_intents")).form(&params);
        if let Some(key) = &request.idempotency_key {
            builder = builder.header("Idempotency-Key", key);
        }
        self.send(builder).await
    }

    async fn process_payment_intent(
        &self,
        reader_id: &str,
        payment_intent_id: &str,
    ) -> Result<Value, ProcessorError> {
        let request = self
            .http
            .post(self.url(&format!("/v1/terminal/readers/{reader_id}/process_payment_intent")))
            .form(&[("payment_intent", payment_intent_id)]);
        self.send(request).await
    }

    async fn cancel_reader_action(&self, reader_id: &str) -> Result<Value, ProcessorError> {
        let request = self
            .http
            .post(self.url(&format!("/v1/terminal/readers/{reader_id}/cancel_action")));
        self.send(request).await
    }

    async fn create_refund(&self, payment_intent_id: &str, amount: i64) -> Result<Refund, ProcessorError> {
        let amount = amount.to_string();
        let request = self
            .http
            .post(self.url("/v1/refunds"))
            .form(&[("payment_intent", payment_intent_id), ("amount", amount.as_str())]);
        self.send(request).await
    }

    async fn create_connection_token(&self) -> Result<ConnectionToken, ProcessorError> {
        let request = self.http.post(self.url("/v1/terminal/connection_tokens"));
        self.send(request).await
    }

    async fn create_checkout_session(
        &self,
        request: &NewCheckoutSession,
    ) -> Result<CheckoutSession, ProcessorError> {
        let params = [
            ("payment_method_types[0]", "card".to_string()),
            ("mode", "payment".to_string()),
            ("line_items[0][quantity]", "1".to_string()),
            ("line_items[0][price_data][currency]", request.currency.clone()),
            (
                "line_items[0][price_data][product_data][name]",
                request.product_name.clone(),
            ),
            (
                "line_items[0][price_data][unit_amount]",
                request.unit_amount.to_string(),
            ),
            ("metadata[quote_id]", request.quote_id.clone()),
            ("metadata[payment_mode]", request.payment_mode.clone()),
            ("success_url", request.success_url.clone()),
            ("cancel_url", request.cancel_url.clone()),
        ];
        let builder = self.http.post(self.url("/v1/checkout/sessions")).form(&params);
        self.send(builder).await
    }
}
