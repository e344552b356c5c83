pub mod app_state;
pub mod checkout_handlers;
pub mod config;
pub mod events;
pub mod forwarder;
pub mod idempotency;
pub mod logging;
pub mod metrics;
pub mod normalize;
pub mod processor;
pub mod relay;
pub mod signature;
pub mod terminal_handlers;
pub mod validation;
pub mod webhook_handlers;

// Re-export key types for tests
pub use crate::app_state::{build_router, AppState};
pub use crate::config::RelayConfig;
pub use crate::forwarder::{DeliveryError, Destination, Destinations, Forwarder, HttpForwarder};
pub use crate::idempotency::{IdempotencyGuard, InMemoryProcessedStore, ProcessedEventStore};
pub use crate::metrics::RelayMetrics;
pub use crate::normalize::{Channel, ForwardPayload, Source};
pub use crate::processor::{PaymentProcessor, ProcessorError, StripeClient};
pub use crate::relay::{Relay, RelayError, RelayOutcome};
