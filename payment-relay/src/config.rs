use anyhow::{anyhow, Result};
use std::env;
use std::fmt;
use std::time::Duration;

use crate::forwarder::{Destination, Destinations};
use crate::signature::DEFAULT_TOLERANCE_SECS;

const REQUIRED_VARS: &[&str] = &[
    "STRIPE_SECRET_KEY",
    "STRIPE_WEBHOOK_SECRET",
    "STRIPE_TERMINAL_WEBHOOK_SECRET",
    "GLIDE_QUOTE_WEBHOOK_URL",
    "GLIDE_QUOTE_WEBHOOK_TOKEN",
    "GLIDE_TERMINAL_WEBHOOK_URL",
    "GLIDE_TERMINAL_WEBHOOK_TOKEN",
];

/// Either name is accepted for the proxy shared secret; the first one set wins.
const SHARED_SECRET_VARS: &[&str] = &["RELAY_SHARED_SECRET", "GLIDE_SHARED_SECRET"];

#[derive(Clone)]
pub struct RedisStoreConfig {
    pub url: String,
    pub prefix: String,
    pub retention_secs: u64,
}

#[derive(Clone)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
    pub stripe_secret_key: String,
    pub stripe_api_base: String,
    pub quotes_webhook_secret: String,
    pub terminal_webhook_secret: String,
    pub webhook_tolerance_secs: i64,
    pub destinations: Destinations,
    pub shared_secret: String,
    pub processor_timeout: Duration,
    pub forward_timeout: Duration,
    pub currency: String,
    pub checkout_return_url: Option<String>,
    pub processed_events_redis: Option<RedisStoreConfig>,
    pub cors_allowed_origins: Vec<String>,
}

impl RelayConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup. Every required
    /// key is checked before returning so the error names all missing keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).and_then(|value| normalize_optional(&value));

        let mut missing: Vec<&str> = REQUIRED_VARS
            .iter()
            .copied()
            .filter(|key| get(*key).is_none())
            .collect();
        let shared_secret = SHARED_SECRET_VARS.iter().find_map(|key| get(*key));
        if shared_secret.is_none() {
            missing.push("GLIDE_SHARED_SECRET");
        }
        if !missing.is_empty() {
            return Err(anyhow!(
                "Missing required environment variables: {}",
                missing.join(", ")
            ));
        }
        let required = |key: &str| get(key).ok_or_else(|| anyhow!("{key} must be set"));

        let destinations = Destinations {
            quote: Destination {
                url: required("GLIDE_QUOTE_WEBHOOK_URL")?,
                token: required("GLIDE_QUOTE_WEBHOOK_TOKEN")?,
            },
            terminal: Destination {
                url: required("GLIDE_TERMINAL_WEBHOOK_URL")?,
                token: required("GLIDE_TERMINAL_WEBHOOK_TOKEN")?,
            },
        };

        let parse_u64 = |key: &str, default: u64| {
            get(key)
                .and_then(|value| value.parse::<u64>().ok())
                .unwrap_or(default)
        };

        let webhook_tolerance_secs = match get("STRIPE_WEBHOOK_TOLERANCE_SECS")
            .and_then(|value| value.parse::<u64>().ok())
        {
            Some(secs) => i64::try_from(secs)
                .map_err(|_| anyhow!("STRIPE_WEBHOOK_TOLERANCE_SECS is out of range: {secs}"))?,
            None => DEFAULT_TOLERANCE_SECS,
        };

        let processed_events_redis = get("PROCESSED_EVENTS_REDIS_URL").map(|url| RedisStoreConfig {
            url,
            prefix: get("PROCESSED_EVENTS_REDIS_PREFIX")
                .unwrap_or_else(|| "payment-relay:processed".to_string()),
            retention_secs: parse_u64("PROCESSED_EVENTS_RETENTION_SECS", 30 * 24 * 3600).max(60),
        });

        let cors_allowed_origins = get("CORS_ALLOWED_ORIGINS")
            .map(|value| {
                value
                    .split(',')
                    .filter_map(normalize_optional)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        Ok(Self {
            host: get("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: get("PORT")
                .and_then(|value| value.parse::<u16>().ok())
                .unwrap_or(3000),
            stripe_secret_key: required("STRIPE_SECRET_KEY")?,
            stripe_api_base: get("STRIPE_API_BASE")
                .map(|base| base.trim_end_matches('/').to_string())
                .unwrap_or_else(|| "https://api.stripe.com".to_string()),
            quotes_webhook_secret: required("STRIPE_WEBHOOK_SECRET")?,
            terminal_webhook_secret: required("STRIPE_TERMINAL_WEBHOOK_SECRET")?,
            webhook_tolerance_secs,
            destinations,
            shared_secret: shared_secret.unwrap_or_default(),
            processor_timeout: Duration::from_secs(parse_u64("PROCESSOR_TIMEOUT_SECS", 10).max(1)),
            forward_timeout: Duration::from_secs(parse_u64("FORWARD_TIMEOUT_SECS", 10).max(1)),
            currency: get("PAYMENT_CURRENCY")
                .map(|value| value.to_ascii_lowercase())
                .unwrap_or_else(|| "aud".to_string()),
            checkout_return_url: get("CHECKOUT_RETURN_URL"),
            processed_events_redis,
            cors_allowed_origins,
        })
    }
}

impl fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("stripe_api_base", &self.stripe_api_base)
            .field("webhook_tolerance_secs", &self.webhook_tolerance_secs)
            .field("quote_url", &self.destinations.quote.url)
            .field("terminal_url", &self.destinations.terminal.url)
            .field("processor_timeout", &self.processor_timeout)
            .field("forward_timeout", &self.forward_timeout)
            .field("currency", &self.currency)
            .field("checkout_return_url", &self.checkout_return_url)
            .field(
                "processed_events_redis",
                &self.processed_events_redis.as_ref().map(|redis| &redis.prefix),
            )
            .field("cors_allowed_origins", &self.cors_allowed_origins)
            .finish_non_exhaustive()
    }
}

fn normalize_optional(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
