use axum::extract::{Query, State};
use axum::response::Redirect;
use axum::Json;
use bytes::Bytes;
use common_http_errors::{ApiError, ApiResult};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::app_state::AppState;
use crate::processor::{NewCheckoutSession, NewPaymentIntent};
use crate::validation::{flexible_i64, flexible_text, lenient_json, parse_body, positive, ValidationError};

const PAY_FIELDS: &str = "Missing required parameters";
const INTENT_FIELDS: &str = "Missing amount";

#[derive(Debug, Deserialize)]
pub struct PayParams {
    pub quote_id: Option<String>,
    pub amount: Option<String>,
    pub mode: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreateIntentRequest {
    #[serde(default, deserialize_with = "flexible_i64")]
    amount: Option<i64>,
    #[serde(default, deserialize_with = "flexible_text")]
    currency: Option<String>,
    #[serde(default, deserialize_with = "flexible_text")]
    description: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Hosted checkout for a quote; redirects the browser to the session page.
pub async fn pay(State(state): State<AppState>, Query(params): Query<PayParams>) -> ApiResult<Redirect> {
    let (Some(quote_id), Some(amount), Some(mode)) = (
        non_empty(params.quote_id),
        positive(non_empty(params.amount).and_then(|raw| raw.parse::<i64>().ok())),
        non_empty(params.mode),
    ) else {
        return Err(ValidationError::MissingFields(PAY_FIELDS).into());
    };
    let Some(template) = state.config.checkout_return_url.as_deref() else {
        return Err(ApiError::internal("Checkout return URL is not configured"));
    };
    let return_url = template.replace("{quote_id}", &quote_id);
    let product_name = if mode == "deposit" {
        "Deposit Payment"
    } else {
        "Full Catering Payment"
    };

    let session = state
        .call_processor(
            "create_checkout_session",
            state.processor.create_checkout_session(&NewCheckoutSession {
                quote_id: quote_id.clone(),
                payment_mode: mode,
                product_name: product_name.to_string(),
                unit_amount: amount,
                currency: state.config.currency.clone(),
                success_url: return_url.clone(),
                cancel_url: return_url,
            }),
        )
        .await?;
    let url = session
        .url
        .ok_or_else(|| ApiError::upstream("Checkout session has no redirect URL"))?;
    info!(quote_id = %quote_id, session_id = %session.id, "Created checkout session");
    Ok(Redirect::to(&url))
}

pub async fn connection_token(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let token = state
        .call_processor("create_connection_token", state.processor.create_connection_token())
        .await?;
    Ok(Json(json!({ "secret": token.secret })))
}

pub async fn create_payment_intent(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<Value>> {
    let request: CreateIntentRequest = parse_body(lenient_json(&body), INTENT_FIELDS)?;
    let amount = positive(request.amount).ok_or(ValidationError::MissingFields(INTENT_FIELDS))?;
    let currency = request
        .currency
        .map(|c| c.to_ascii_lowercase())
        .unwrap_or_else(|| state.config.currency.clone());

    let intent = state
        .call_processor(
            "create_payment_intent",
            state.processor.create_payment_intent(&NewPaymentIntent {
                amount,
                currency,
                description: request.description,
                ..NewPaymentIntent::default()
            }),
        )
        .await?;
    Ok(Json(json!({
        "paymentIntentId": intent.id,
        "clientSecret": intent.client_secret,
    })))
}
