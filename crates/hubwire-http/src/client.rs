//! Client construction.
//!
//! Builds a `ClientWithMiddleware` whose only layer is [`VerboseTransport`],
//! on top of a `reqwest::Client` that discovers its proxy through
//! [`ProxyResolver`] instead of reqwest's built-in environment lookup.

use std::sync::Arc;
use std::time::Duration;

use log::debug;
use reqwest_middleware::ClientWithMiddleware;
use url::Url;

use crate::error::TransportError;
use crate::proxy::{Environment, ProcessEnv, ProxyResolver};
use crate::trace::{StderrSink, TraceSink, Tracer};
use crate::transport::VerboseTransport;

/// Default `User-Agent` sent with every request.
pub const DEFAULT_USER_AGENT: &str = concat!("hubwire/", env!("CARGO_PKG_VERSION"));

/// Configuration for [`ClientConfig::build`].
///
/// # Examples
///
/// ```
/// use hubwire_http::ClientConfig;
///
/// let client = ClientConfig::new()
///     .with_verbose(true)
///     .with_test_host("http://localhost:9999")
///     .build()?;
/// # Ok::<(), hubwire_http::TransportError>(())
/// ```
#[derive(Clone)]
pub struct ClientConfig {
    /// Scheme and host every request is redirected to. Empty means none.
    pub test_host: Option<String>,
    /// Print a redacted trace of every request and response.
    pub verbose: bool,
    /// Where proxy variables are read from.
    pub environment: Arc<dyn Environment>,
    /// Where the trace is written.
    pub trace_sink: Arc<dyn TraceSink>,
    /// Total request timeout. `None` leaves reqwest's default (no timeout).
    pub timeout: Option<Duration>,
    /// `User-Agent` header value.
    pub user_agent: String,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("test_host", &self.test_host)
            .field("verbose", &self.verbose)
            .field("timeout", &self.timeout)
            .field("user_agent", &self.user_agent)
            .finish_non_exhaustive()
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            test_host: None,
            verbose: false,
            environment: Arc::new(ProcessEnv),
            trace_sink: Arc::new(StderrSink),
            timeout: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl ClientConfig {
    /// Creates a configuration with production defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Redirects every request to `host` (e.g. `http://localhost:9999`).
    /// An empty string clears the override.
    #[must_use]
    pub fn with_test_host(mut self, host: impl Into<String>) -> Self {
        let host = host.into();
        self.test_host = (!host.is_empty()).then_some(host);
        self
    }

    /// Enables or disables the request trace.
    #[must_use]
    pub const fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Reads proxy variables from `environment` instead of the process.
    #[must_use]
    pub fn with_environment(mut self, environment: Arc<dyn Environment>) -> Self {
        self.environment = environment;
        self
    }

    /// Writes the trace to `sink` instead of stderr.
    #[must_use]
    pub fn with_trace_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.trace_sink = sink;
        self
    }

    /// Sets a total request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the `User-Agent` header.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Builds the client.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidTestHost`] if the test host is not an
    /// absolute URL with a host, or [`TransportError::Build`] if reqwest
    /// cannot create the underlying client.
    pub fn build(self) -> Result<ClientWithMiddleware, TransportError> {
        let override_url = self.test_host.as_deref().map(parse_test_host).transpose()?;
        let resolver = ProxyResolver::new(self.environment);

        // Redirects are followed by the transport so every hop is traced
        // and retargeted.
        let mut builder = reqwest::Client::builder()
            .user_agent(self.user_agent)
            .redirect(reqwest::redirect::Policy::none())
            .proxy(resolver.clone().into_proxy());
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        let base = builder.build()?;

        let mut transport = VerboseTransport::new(resolver);
        if self.verbose {
            transport = transport.with_tracer(Tracer::new(self.trace_sink));
        }
        if let Some(target) = override_url {
            debug!("Redirecting all requests to {target}");
            transport = transport.with_override(target);
        }

        Ok(reqwest_middleware::ClientBuilder::new(base)
            .with(transport)
            .build())
    }
}

/// Builds a client reading proxies from the process environment and
/// tracing to stderr.
///
/// `test_host` may be empty, meaning requests go where they are addressed.
///
/// # Errors
///
/// See [`ClientConfig::build`].
pub fn new_http_client(
    test_host: &str,
    verbose: bool,
) -> Result<ClientWithMiddleware, TransportError> {
    ClientConfig::new()
        .with_test_host(test_host)
        .with_verbose(verbose)
        .build()
}

/// Parses an override target. Only scheme, host and port are used.
fn parse_test_host(value: &str) -> Result<Url, TransportError> {
    let invalid = |reason: String| TransportError::InvalidTestHost {
        value: value.to_string(),
        reason,
    };

    let url = Url::parse(value).map_err(|e| invalid(e.to_string()))?;
    if url.host_str().is_none_or(str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    Ok(url)
}
