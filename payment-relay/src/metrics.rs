use anyhow::Result;
use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct RelayMetrics {
    registry: Registry,
    webhook_events: IntCounterVec,
    forwards: IntCounterVec,
    processor_calls: IntCounterVec,
}

impl RelayMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let webhook_events = IntCounterVec::new(
            Opts::new(
                "relay_webhook_events_total",
                "Webhook deliveries grouped by route and outcome",
            ),
            &["route", "outcome"],
        )?;
        let forwards = IntCounterVec::new(
            Opts::new(
                "relay_forwards_total",
                "Platform forwards grouped by channel and result",
            ),
            &["channel", "result"],
        )?;
        let processor_calls = IntCounterVec::new(
            Opts::new(
                "relay_processor_calls_total",
                "Payment processor API calls grouped by operation and result",
            ),
            &["operation", "result"],
        )?;
        registry.register(Box::new(webhook_events.clone()))?;
        registry.register(Box::new(forwards.clone()))?;
        registry.register(Box::new(processor_calls.clone()))?;
        Ok(Self {
            registry,
            webhook_events,
            forwards,
            processor_calls,
        })
    }

    pub fn record_webhook(&self, route: &str, outcome: &str) {
        self.webhook_events.with_label_values(&[route, outcome]).inc();
    }

    pub fn record_forward(&self, channel: &str, delivered: bool) {
        let result = if delivered { "delivered" } else { "failed" };
        self.forwards.with_label_values(&[channel, result]).inc();
    }

    pub fn record_processor_call(&self, operation: &str, ok: bool) {
        let result = if ok { "ok" } else { "error" };
        self.processor_calls.with_label_values(&[operation, result]).inc();
    }

    pub fn webhook_count(&self, route: &str, outcome: &str) -> u64 {
        self.webhook_events.with_label_values(&[route, outcome]).get()
    }

    pub fn forward_count(&self, channel: &str, delivered: bool) -> u64 {
        let result = if delivered { "delivered" } else { "failed" };
        self.forwards.with_label_values(&[channel, result]).get()
    }

    pub fn render(&self) -> Result<Response> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        let response = Response::builder()
            .status(StatusCode::OK)
            .header(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            )
            .body(Body::from(buffer))?;
        Ok(response)
    }
}
