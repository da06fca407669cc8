//! Error types for the transport library.

use thiserror::Error;

/// Errors raised while building or configuring the instrumented client.
///
/// Failures coming from the network itself are never wrapped in this type;
/// they reach the caller as `reqwest_middleware::Error::Reqwest` exactly as
/// the underlying client produced them.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    /// The proxy configured in the environment could not be parsed, even
    /// after retrying with an `http://` prefix.
    #[error("invalid proxy address {value:?}: {source}")]
    InvalidProxy {
        /// The raw value read from `http_proxy` / `HTTP_PROXY`.
        value: String,
        /// Parse error from the first attempt.
        source: url::ParseError,
    },

    /// The test host override is not an absolute URL with a host.
    #[error("invalid test host {value:?}: {reason}")]
    InvalidTestHost {
        /// The raw override value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A request URL could not be rewritten onto the override target.
    #[error("cannot retarget {url} to {target}")]
    Retarget {
        /// The URL of the outgoing request.
        url: String,
        /// The override target.
        target: String,
    },

    /// A request kept being redirected past the hop limit.
    #[error("stopped after {limit} redirects, next was {url}")]
    TooManyRedirects {
        /// The Location the last redirect pointed at.
        url: String,
        /// How many redirects were followed.
        limit: usize,
    },

    /// The underlying HTTP client failed to build.
    #[error("Client build error: {0}")]
    Build(#[from] reqwest::Error),
}

impl TransportError {
    /// Check if this error comes from proxy configuration.
    pub const fn is_proxy_error(&self) -> bool {
        matches!(self, Self::InvalidProxy { .. })
    }
}
