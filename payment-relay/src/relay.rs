use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::events::{classify, ClassifiedEvent, ContractError, PaymentIntentSnapshot, StripeEvent};
use crate::forwarder::Forwarder;
use crate::idempotency::IdempotencyGuard;
use crate::metrics::RelayMetrics;
use crate::normalize::{normalize, Channel, ForwardPayload, Outcome, PaymentMetadata, RefundDetails};
use crate::processor::{PaymentProcessor, ProcessorError, Refund};

/// What happened to a verified webhook event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    Forwarded,
    /// Claimed and attempted, but the platform did not accept it.
    DeliveryFailed,
    Duplicate,
    Ignored,
}

impl RelayOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayOutcome::Forwarded => "forwarded",
            RelayOutcome::DeliveryFailed => "delivery_failed",
            RelayOutcome::Duplicate => "duplicate",
            RelayOutcome::Ignored => "ignored",
        }
    }
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Contract(#[from] ContractError),
    #[error("payment intent lookup failed: {0}")]
    Upstream(#[from] ProcessorError),
    #[error("processed-event store failed: {0:#}")]
    Store(anyhow::Error),
}

/// Claims are scoped per channel: a payment intent may reach each
/// destination once.
fn claim_key(channel: Channel, payment_intent_id: &str) -> String {
    format!("{channel}:{payment_intent_id}")
}

/// Drives verified events through classification, lookup, normalization and
/// forwarding, claiming each payment intent before its single forward.
#[derive(Clone)]
pub struct Relay {
    processor: Arc<dyn PaymentProcessor>,
    forwarder: Arc<dyn Forwarder>,
    guard: IdempotencyGuard,
    metrics: Arc<RelayMetrics>,
}

impl Relay {
    pub fn new(
        processor: Arc<dyn PaymentProcessor>,
        forwarder: Arc<dyn Forwarder>,
        guard: IdempotencyGuard,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        Self {
            processor,
            forwarder,
            guard,
            metrics,
        }
    }

    /// Online checkout route: only completed checkout sessions are relayed.
    pub async fn handle_quote_event(&self, event: &StripeEvent) -> Result<RelayOutcome, RelayError> {
        match classify(event)? {
            ClassifiedEvent::CheckoutCompleted {
                payment_intent_id,
                metadata,
            } => {
                if self.already_forwarded(Channel::Quote, &payment_intent_id).await? {
                    return Ok(RelayOutcome::Duplicate);
                }
                let snapshot = self.lookup(&payment_intent_id).await?;
                let metadata =
                    PaymentMetadata::from_map(&metadata).or(PaymentMetadata::from_map(&snapshot.metadata));
                let outcome = Outcome::from_intent(&snapshot);
                self.claim_and_forward(&payment_intent_id, &outcome, &snapshot, &metadata, Channel::Quote)
                    .await
            }
            other => {
                info!(event_id = %event.id, event_type = %event.event_type, kind = other.kind(), "Ignoring event on quotes route");
                Ok(RelayOutcome::Ignored)
            }
        }
    }

    /// In-person terminal route.
    pub async fn handle_terminal_event(&self, event: &StripeEvent) -> Result<RelayOutcome, RelayError> {
        let (snapshot, outcome) = match classify(event)? {
            ClassifiedEvent::PaymentSucceeded(snapshot) => (snapshot, Outcome::Succeeded),
            ClassifiedEvent::PaymentFailed(snapshot) => {
                let outcome = Outcome::failed_from(&snapshot);
                (snapshot, outcome)
            }
            ClassifiedEvent::PaymentCanceled(snapshot) => (snapshot, Outcome::Canceled),
            ClassifiedEvent::ReaderActionFailed {
                reader_id,
                payment_intent_id,
                failure_code,
                failure_message,
            } => {
                warn!(
                    event_id = %event.id,
                    reader_id = %reader_id,
                    failure_code = failure_code.as_deref().unwrap_or("unknown_error"),
                    failure_message = failure_message.as_deref().unwrap_or("Unknown error"),
                    "Terminal reader action failed"
                );
                let Some(payment_intent_id) = payment_intent_id else {
                    warn!(event_id = %event.id, "Reader failure carries no payment intent; nothing to forward");
                    return Ok(RelayOutcome::Ignored);
                };
                if self.already_forwarded(Channel::Terminal, &payment_intent_id).await? {
                    return Ok(RelayOutcome::Duplicate);
                }
                let snapshot = self.lookup(&payment_intent_id).await?;
                let error = snapshot.last_payment_error.as_ref();
                let outcome = Outcome::failed(
                    error.and_then(|e| e.message.as_deref()).or(failure_message.as_deref()),
                    error.and_then(|e| e.code.as_deref()).or(failure_code.as_deref()),
                );
                (snapshot, outcome)
            }
            other => {
                info!(event_id = %event.id, event_type = %event.event_type, kind = other.kind(), "Ignoring event on terminal route");
                return Ok(RelayOutcome::Ignored);
            }
        };

        let metadata = PaymentMetadata::from_map(&snapshot.metadata);
        let payment_intent_id = snapshot.id.clone();
        self.claim_and_forward(&payment_intent_id, &outcome, &snapshot, &metadata, Channel::Terminal)
            .await
    }

    /// Normalizes a completed refund and forwards it on the terminal channel.
    /// Refunds are not deduplicated. Returns whether the platform accepted it.
    pub async fn forward_refund(
        &self,
        refund: &Refund,
        snapshot: &PaymentIntentSnapshot,
        refund_reason: Option<String>,
    ) -> bool {
        let outcome = Outcome::Refunded(RefundDetails {
            id: refund.id.clone(),
            amount: refund.amount,
            currency: refund.currency.clone(),
            reason: refund_reason.or_else(|| refund.reason.clone()),
            receipt_url: refund.receipt_url.clone(),
        });
        let metadata = PaymentMetadata::from_map(&snapshot.metadata);
        let payload = normalize(&outcome, snapshot, &metadata, Channel::Terminal, Utc::now());
        self.deliver(&payload, Channel::Terminal).await
    }

    async fn already_forwarded(&self, channel: Channel, payment_intent_id: &str) -> Result<bool, RelayError> {
        let seen = self
            .guard
            .has(&claim_key(channel, payment_intent_id))
            .await
            .map_err(RelayError::Store)?;
        if seen {
            info!(payment_intent_id, %channel, "Duplicate payment intent; skipping forward");
        }
        Ok(seen)
    }

    async fn lookup(&self, payment_intent_id: &str) -> Result<PaymentIntentSnapshot, RelayError> {
        let result = self.processor.retrieve_payment_intent(payment_intent_id).await;
        self.metrics
            .record_processor_call("retrieve_payment_intent", result.is_ok());
        Ok(result?)
    }

    async fn claim_and_forward(
        &self,
        payment_intent_id: &str,
        outcome: &Outcome,
        snapshot: &PaymentIntentSnapshot,
        metadata: &PaymentMetadata,
        channel: Channel,
    ) -> Result<RelayOutcome, RelayError> {
        let payload = normalize(outcome, snapshot, metadata, channel, Utc::now());
        let claimed = self
            .guard
            .mark_forwarded(&claim_key(channel, payment_intent_id))
            .await
            .map_err(RelayError::Store)?;
        if !claimed {
            info!(payment_intent_id, %channel, "Payment intent claimed by a concurrent delivery");
            return Ok(RelayOutcome::Duplicate);
        }
        if self.deliver(&payload, channel).await {
            Ok(RelayOutcome::Forwarded)
        } else {
            Ok(RelayOutcome::DeliveryFailed)
        }
    }

    async fn deliver(&self, payload: &ForwardPayload, channel: Channel) -> bool {
        match self.forwarder.forward(payload, channel).await {
            Ok(()) => {
                self.metrics.record_forward(channel.as_str(), true);
                true
            }
            Err(err) => {
                self.metrics.record_forward(channel.as_str(), false);
                warn!(
                    error = %err,
                    %channel,
                    payment_intent_id = %payload.payment_intent_id,
                    status = %payload.status,
                    "Failed to forward payment payload"
                );
                false
            }
        }
    }
}
