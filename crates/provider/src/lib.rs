//! HTTP client provider for the Fortum client crates
//!
//! The authenticator and the data client never construct HTTP clients on
//! their own. They ask an injected `HttpClientFactory` for one, so the host
//! decides timeouts, TLS, proxies and default headers. `ReqwestClientFactory`
//! is the standard implementation used by the poller service and the tests.

pub mod factory;

pub use factory::{HeaderInjection, ReqwestClientFactory};

use std::time::Duration;

/// Browser identity presented to the Fortum portal and SSO.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:135.0) Gecko/20100101 Firefox/135.0";

/// Default per-request timeout (the integration's 30 second budget).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors from building HTTP clients.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("failed to build HTTP client: {0}")]
    Build(String),

    #[error("invalid header {name}: {reason}")]
    InvalidHeader { name: String, reason: String },
}

/// Result alias for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Host capability that hands out configured HTTP clients.
///
/// Implementations must return clients that do NOT follow redirects: the
/// login sequencer walks redirect chains itself to capture authorization
/// codes and cookies. Each call returns a client with a fresh cookie jar,
/// so one login sequence never leaks cookies into the next.
pub trait HttpClientFactory: Send + Sync {
    /// Provider identifier for logging.
    fn id(&self) -> &str;

    /// Build a new client with an empty cookie store.
    fn build_client(&self) -> Result<reqwest::Client>;

    /// Timeout applied to every request made by built clients.
    fn request_timeout(&self) -> Duration;
}
