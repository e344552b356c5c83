use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::Json;
use bytes::Bytes;
use common_http_errors::{ApiError, ApiResult};
use serde::Deserialize;
use serde_json::{json, Value};
use subtle::ConstantTimeEq;
use tracing::{error, info, warn};

use crate::app_state::AppState;
use crate::processor::NewPaymentIntent;
use crate::validation::{flexible_i64, flexible_text, lenient_json, parse_body, positive, ValidationError};

const CHARGE_FIELDS: &str = "Missing order_id, amount, reader_id, or attempt_number";
const CANCEL_FIELDS: &str = "Missing reader_id";
const REFUND_FIELDS: &str = "Missing payment_intent_id or refund_amount";

#[derive(Debug, Deserialize)]
struct TerminalChargeRequest {
    #[serde(default, deserialize_with = "flexible_text")]
    order_id: Option<String>,
    #[serde(default, deserialize_with = "flexible_i64")]
    amount: Option<i64>,
    #[serde(default, deserialize_with = "flexible_text")]
    reader_id: Option<String>,
    #[serde(default, deserialize_with = "flexible_i64")]
    attempt_number: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct TerminalCancelRequest {
    #[serde(default, deserialize_with = "flexible_text")]
    reader_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefundRequest {
    #[serde(default, deserialize_with = "flexible_text")]
    payment_intent_id: Option<String>,
    #[serde(default, deserialize_with = "flexible_i64")]
    refund_amount: Option<i64>,
    #[serde(default, deserialize_with = "flexible_text")]
    refund_reason: Option<String>,
}

/// Shared secret from the body's `session_patch_id`, else from a bearer token.
fn authorize(secret: &str, headers: &HeaderMap, body: &Value) -> ApiResult<()> {
    let from_body = body
        .get("session_patch_id")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty());
    let from_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| raw.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|value| !value.is_empty());

    let Some(presented) = from_body.or(from_header) else {
        warn!("Terminal proxy request without credentials");
        return Err(ApiError::Unauthorized {
            code: "missing_credentials",
        });
    };
    if bool::from(presented.as_bytes().ct_eq(secret.as_bytes())) {
        Ok(())
    } else {
        warn!("Terminal proxy request with invalid shared secret");
        Err(ApiError::Forbidden {
            code: "invalid_secret",
        })
    }
}

pub async fn terminal_charge(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let body = lenient_json(&body);
    authorize(&state.config.shared_secret, &headers, &body)?;
    let request: TerminalChargeRequest = parse_body(body, CHARGE_FIELDS)?;
    let (Some(order_id), Some(amount), Some(reader_id), Some(attempt_number)) = (
        request.order_id,
        positive(request.amount),
        request.reader_id,
        positive(request.attempt_number),
    ) else {
        return Err(ValidationError::MissingFields(CHARGE_FIELDS).into());
    };

    let intent = state
        .call_processor(
            "create_payment_intent",
            state.processor.create_payment_intent(&NewPaymentIntent {
                amount,
                currency: state.config.currency.clone(),
                description: None,
                capture_method: Some("automatic".to_string()),
                metadata: vec![
                    ("order_id".to_string(), order_id.clone()),
                    ("attempt_number".to_string(), attempt_number.to_string()),
                    ("payment_type".to_string(), "terminal".to_string()),
                ],
                idempotency_key: Some(format!("terminal-charge-{order_id}-{attempt_number}")),
            }),
        )
        .await?;
    info!(order_id = %order_id, attempt_number, payment_intent_id = %intent.id, "Created terminal payment intent");

    let result = state
        .call_processor(
            "process_payment_intent",
            state.processor.process_payment_intent(&reader_id, &intent.id),
        )
        .await?;
    info!(reader_id = %reader_id, payment_intent_id = %intent.id, "Sent payment intent to reader");

    Ok(Json(json!({ "paymentIntentId": intent.id, "result": result })))
}

pub async fn terminal_cancel(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let body = lenient_json(&body);
    authorize(&state.config.shared_secret, &headers, &body)?;
    let request: TerminalCancelRequest = parse_body(body, CANCEL_FIELDS)?;
    let reader_id = request
        .reader_id
        .ok_or(ValidationError::MissingFields(CANCEL_FIELDS))?;

    let result = state
        .call_processor("cancel_reader_action", state.processor.cancel_reader_action(&reader_id))
        .await?;
    info!(reader_id = %reader_id, "Canceled reader action");
    Ok(Json(json!({ "success": true, "result": result })))
}

pub async fn refund_stripe(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let body = lenient_json(&body);
    authorize(&state.config.shared_secret, &headers, &body)?;
    let request: RefundRequest = parse_body(body, REFUND_FIELDS)?;
    let (Some(payment_intent_id), Some(amount)) =
        (request.payment_intent_id, positive(request.refund_amount))
    else {
        return Err(ValidationError::MissingFields(REFUND_FIELDS).into());
    };

    let refund = state
        .call_processor("create_refund", state.processor.create_refund(&payment_intent_id, amount))
        .await?;
    info!(payment_intent_id = %payment_intent_id, refund_id = %refund.id, amount = refund.amount, "Created refund");

    // The refund already happened; later failures only affect the platform notification.
    let lookup = state.processor.retrieve_payment_intent(&payment_intent_id).await;
    state
        .metrics
        .record_processor_call("retrieve_payment_intent", lookup.is_ok());
    let forwarded = match lookup {
        Ok(snapshot) => {
            state
                .relay
                .forward_refund(&refund, &snapshot, request.refund_reason)
                .await
        }
        Err(err) => {
            error!(
                payment_intent_id = %payment_intent_id,
                refund_id = %refund.id,
                error = %err,
                "Refund created but payment intent lookup failed; platform not notified"
            );
            false
        }
    };

    Ok(Json(json!({
        "success": true,
        "refund_id": refund.id,
        "forwarded": forwarded,
    })))
}
