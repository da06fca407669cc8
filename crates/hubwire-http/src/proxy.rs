//! Environment-driven proxy discovery.
//!
//! Reads `http_proxy`, falling back to `HTTP_PROXY`, and accepts values
//! written without a scheme (`myproxy:8080`), which a plain URL parse would
//! either reject or misread as a URL with scheme `myproxy`.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, warn};
use url::Url;

use crate::error::TransportError;

/// Lowercase proxy variable, checked first.
pub const HTTP_PROXY_LOWER: &str = "http_proxy";

/// Uppercase proxy variable, checked when the lowercase one is unset or empty.
pub const HTTP_PROXY_UPPER: &str = "HTTP_PROXY";

/// Source of environment variables.
///
/// Production code uses [`ProcessEnv`]. Tests supply a `HashMap` so proxy
/// behaviour can be exercised without touching process-wide state.
pub trait Environment: Send + Sync {
    /// Returns the value of `key`, or `None` when it is not set.
    fn var(&self, key: &str) -> Option<String>;
}

/// Reads the real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl Environment for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl Environment for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// Resolves the proxy to use from `env`.
///
/// Returns `Ok(None)` when no proxy variable is set. A value whose scheme
/// is missing or does not start with `http` is re-parsed with `http://`
/// prepended; when that succeeds the prefixed URL wins.
///
/// # Errors
///
/// Returns [`TransportError::InvalidProxy`] when the value cannot be parsed
/// either as given or with the `http://` prefix.
pub fn resolve_proxy(env: &dyn Environment) -> Result<Option<Url>, TransportError> {
    let Some(value) = env
        .var(HTTP_PROXY_LOWER)
        .filter(|v| !v.is_empty())
        .or_else(|| env.var(HTTP_PROXY_UPPER))
        .filter(|v| !v.is_empty())
    else {
        return Ok(None);
    };

    let parsed = Url::parse(&value);
    let needs_scheme = !parsed
        .as_ref()
        .is_ok_and(|url| url.scheme().starts_with("http"));

    if needs_scheme && let Ok(url) = Url::parse(&format!("http://{value}")) {
        return Ok(Some(url));
    }

    match parsed {
        Ok(url) => Ok(Some(url)),
        Err(source) => Err(TransportError::InvalidProxy { value, source }),
    }
}

/// Shareable handle on an [`Environment`] that resolves the proxy per request.
#[derive(Clone)]
pub struct ProxyResolver {
    env: Arc<dyn Environment>,
}

impl std::fmt::Debug for ProxyResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyResolver").finish_non_exhaustive()
    }
}

impl Default for ProxyResolver {
    fn default() -> Self {
        Self::new(Arc::new(ProcessEnv))
    }
}

impl ProxyResolver {
    /// Creates a resolver reading from `env`.
    pub fn new(env: Arc<dyn Environment>) -> Self {
        Self { env }
    }

    /// Resolves the proxy from the current environment.
    ///
    /// # Errors
    ///
    /// See [`resolve_proxy`].
    pub fn resolve(&self) -> Result<Option<Url>, TransportError> {
        resolve_proxy(self.env.as_ref())
    }

    /// Converts this resolver into a `reqwest` proxy hook consulted for every
    /// outgoing connection.
    ///
    /// The hook has no error channel, so an invalid proxy routes directly.
    /// [`crate::VerboseTransport`] checks the same resolution first and fails
    /// the request before it gets here.
    pub fn into_proxy(self) -> reqwest::Proxy {
        reqwest::Proxy::custom(move |target| match self.resolve() {
            Ok(Some(proxy)) => {
                debug!("Routing {target} through proxy {proxy}");
                Some(proxy)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Ignoring proxy for {target}: {e}");
                None
            }
        })
    }
}
