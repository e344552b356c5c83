use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use chrono::Utc;
use tracing::{error, info, warn};

use crate::app_state::AppState;
use crate::relay::RelayOutcome;
use crate::signature::{verify_event, SIGNATURE_HEADER};

#[derive(Debug, Clone, Copy)]
enum WebhookRoute {
    Quotes,
    Terminal,
}

impl WebhookRoute {
    fn as_str(&self) -> &'static str {
        match self {
            WebhookRoute::Quotes => "quotes",
            WebhookRoute::Terminal => "terminal",
        }
    }
}

pub async fn webhook_quotes(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    handle_webhook(&state, WebhookRoute::Quotes, &headers, &body).await
}

pub async fn webhook_terminal(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    handle_webhook(&state, WebhookRoute::Terminal, &headers, &body).await
}

async fn handle_webhook(state: &AppState, route: WebhookRoute, headers: &HeaderMap, body: &Bytes) -> Response {
    let secret = match route {
        WebhookRoute::Quotes => &state.config.quotes_webhook_secret,
        WebhookRoute::Terminal => &state.config.terminal_webhook_secret,
    };
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    let event = match verify_event(
        body,
        signature,
        secret,
        state.config.webhook_tolerance_secs,
        Utc::now().timestamp(),
    ) {
        Ok(event) => event,
        Err(err) => {
            warn!(route = route.as_str(), error = %err, "Webhook signature verification failed");
            state.metrics.record_webhook(route.as_str(), "rejected");
            return (StatusCode::BAD_REQUEST, format!("Webhook Error: {err}")).into_response();
        }
    };
    info!(
        route = route.as_str(),
        event_id = %event.id,
        event_type = %event.event_type,
        "Received webhook event"
    );

    let result = match route {
        WebhookRoute::Quotes => state.relay.handle_quote_event(&event).await,
        WebhookRoute::Terminal => state.relay.handle_terminal_event(&event).await,
    };

    match result {
        Ok(outcome) => {
            state.metrics.record_webhook(route.as_str(), outcome.as_str());
            let body = match outcome {
                RelayOutcome::Forwarded | RelayOutcome::DeliveryFailed => "Webhook processed",
                RelayOutcome::Duplicate => "Duplicate event ignored",
                RelayOutcome::Ignored => "Event ignored",
            };
            (StatusCode::OK, body).into_response()
        }
        Err(err) => {
            error!(
                route = route.as_str(),
                event_id = %event.id,
                event_type = %event.event_type,
                error = %err,
                "Failed to process webhook event"
            );
            state.metrics.record_webhook(route.as_str(), "error");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response()
        }
    }
}
