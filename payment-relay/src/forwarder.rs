use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::normalize::{Channel, ForwardPayload};

const MAX_LOGGED_BODY: usize = 512;

#[derive(Clone)]
pub struct Destination {
    pub url: String,
    pub token: String,
}

impl fmt::Debug for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Destination")
            .field("url", &self.url)
            .field("token", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, Debug)]
pub struct Destinations {
    pub quote: Destination,
    pub terminal: Destination,
}

impl Destinations {
    pub fn get(&self, channel: Channel) -> &Destination {
        match channel {
            Channel::Quote => &self.quote,
            Channel::Terminal => &self.terminal,
        }
    }
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("forward request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("downstream returned status {status}: {body}")]
    Status { status: u16, body: String },
}

#[async_trait]
pub trait Forwarder: Send + Sync {
    /// Single delivery attempt; never retries.
    async fn forward(&self, payload: &ForwardPayload, channel: Channel) -> Result<(), DeliveryError>;
}

/// Posts payloads to the platform webhook for the payload's channel.
#[derive(Clone)]
pub struct HttpForwarder {
    client: Client,
    destinations: Destinations,
}

impl HttpForwarder {
    pub fn new(destinations: Destinations, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build forwarder HTTP client")?;
        Ok(Self {
            client,
            destinations,
        })
    }
}

#[async_trait]
impl Forwarder for HttpForwarder {
    async fn forward(&self, payload: &ForwardPayload, channel: Channel) -> Result<(), DeliveryError> {
        let destination = self.destinations.get(channel);
        let idempotency_key = Uuid::new_v4();

        let response = self
            .client
            .post(&destination.url)
            .bearer_auth(&destination.token)
            .header("Idempotency-Key", idempotency_key.to_string())
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body: String = response
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(MAX_LOGGED_BODY)
                .collect();
            warn!(
                %channel,
                payment_intent_id = %payload.payment_intent_id,
                status = status.as_u16(),
                body = %body,
                "Platform webhook returned failure status"
            );
            return Err(DeliveryError::Status {
                status: status.as_u16(),
                body,
            });
        }

        info!(
            %channel,
            payment_intent_id = %payload.payment_intent_id,
            payload_status = %payload.status,
            %idempotency_key,
            "Forwarded payment payload"
        );
        Ok(())
    }
}
