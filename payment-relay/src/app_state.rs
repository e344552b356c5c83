use anyhow::Result;
use axum::http::{
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    HeaderName, HeaderValue, Method, StatusCode,
};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{middleware, Router};
use common_http_errors::{ApiError, ApiResult};
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{error, info};

use crate::checkout_handlers::{connection_token, create_payment_intent, pay};
use crate::config::RelayConfig;
use crate::forwarder::{Forwarder, HttpForwarder};
use crate::idempotency::IdempotencyGuard;
use crate::logging::log_requests;
use crate::metrics::RelayMetrics;
use crate::processor::{PaymentProcessor, ProcessorError, StripeClient};
use crate::relay::Relay;
use crate::terminal_handlers::{refund_stripe, terminal_cancel, terminal_charge};
use crate::webhook_handlers::{webhook_quotes, webhook_terminal};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RelayConfig>,
    pub processor: Arc<dyn PaymentProcessor>,
    pub relay: Relay,
    pub metrics: Arc<RelayMetrics>,
}

impl AppState {
    pub fn new(
        config: RelayConfig,
        processor: Arc<dyn PaymentProcessor>,
        forwarder: Arc<dyn Forwarder>,
        guard: IdempotencyGuard,
    ) -> Result<Self> {
        let metrics = Arc::new(RelayMetrics::new()?);
        let relay = Relay::new(processor.clone(), forwarder, guard, metrics.clone());
        Ok(Self {
            config: Arc::new(config),
            processor,
            relay,
            metrics,
        })
    }

    /// Production wiring: Stripe client, HTTP forwarder and the configured
    /// processed-event store.
    pub async fn from_config(config: RelayConfig) -> Result<Self> {
        let processor = StripeClient::new(
            config.stripe_secret_key.clone(),
            config.stripe_api_base.clone(),
            config.processor_timeout,
        )?;
        let forwarder = HttpForwarder::new(config.destinations.clone(), config.forward_timeout)?;
        let guard = match &config.processed_events_redis {
            Some(redis) => {
                info!(prefix = %redis.prefix, retention_secs = redis.retention_secs, "Using Redis processed-event store");
                IdempotencyGuard::redis(&redis.url, redis.retention_secs, redis.prefix.clone()).await?
            }
            None => {
                info!("Using in-memory processed-event store");
                IdempotencyGuard::in_memory()
            }
        };
        Self::new(config, Arc::new(processor), Arc::new(forwarder), guard)
    }

    /// Awaits a processor call, counting it and mapping failure to `upstream_error`.
    pub async fn call_processor<T, F>(&self, operation: &'static str, call: F) -> ApiResult<T>
    where
        F: Future<Output = Result<T, ProcessorError>>,
    {
        let result = call.await;
        self.metrics.record_processor_call(operation, result.is_ok());
        result.map_err(|err| {
            error!(operation, error = %err, "Payment processor call failed");
            ApiError::upstream(err)
        })
    }
}

async fn ping() -> &'static str {
    "OK"
}

async fn health() -> &'static str {
    "ok"
}

async fn metrics_endpoint(axum::extract::State(state): axum::extract::State<AppState>) -> Response {
    match state.metrics.render() {
        Ok(response) => response,
        Err(err) => {
            error!(error = %err, "Failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.is_empty() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            origins
                .iter()
                .filter_map(|origin| origin.parse::<HeaderValue>().ok())
                .collect::<Vec<_>>(),
        )
    };
    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            ACCEPT,
            CONTENT_TYPE,
            AUTHORIZATION,
            HeaderName::from_static("stripe-signature"),
        ])
}

pub fn build_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/webhook-quotes", post(webhook_quotes))
        .route("/webhook-terminal", post(webhook_terminal))
        .route("/terminal-charge", post(terminal_charge))
        .route("/terminal-cancel", post(terminal_cancel))
        .route("/refund-stripe", post(refund_stripe))
        .route("/connection-token", post(connection_token))
        .route("/create-payment-intent", post(create_payment_intent))
        .route("/ping", get(ping))
        .route("/healthz", get(health))
        .route("/metrics", get(metrics_endpoint));
    if state.config.checkout_return_url.is_some() {
        router = router.route("/pay", get(pay));
    }
    let cors = cors_layer(&state.config.cors_allowed_origins);
    router
        .layer(middleware::from_fn(log_requests))
        .layer(cors)
        .with_state(state)
}
