//! The instrumented transport.
//!
//! [`VerboseTransport`] is a `reqwest_middleware` layer sitting directly in
//! front of the proxy-aware `reqwest::Client`. The base client does not
//! follow redirects; this layer does, so every hop goes through the same
//! steps:
//!
//! 1. trace the outbound request, when a [`Tracer`] is installed;
//! 2. fail the request if the environment proxy cannot be parsed;
//! 3. rewrite the destination onto the override target, when one is set;
//! 4. delegate, and trace the response on success.
//!
//! Errors from the wrapped client are returned untouched.

use async_trait::async_trait;
use http::Extensions;
use log::debug;
use reqwest::header::{self, HeaderName, HeaderValue};
use reqwest::{Method, Request, Response, StatusCode};
use reqwest_middleware::{Middleware, Next};
use url::Url;

use crate::error::TransportError;
use crate::proxy::ProxyResolver;
use crate::trace::Tracer;

/// Header carrying the scheme a request had before it was retargeted.
pub const ORIGINAL_SCHEME_HEADER: &str = "X-Original-Scheme";

/// Redirects followed before a request fails, same as reqwest's default.
pub const MAX_REDIRECTS: usize = 10;

/// Request tracing and destination override around a base HTTP client.
///
/// All fields are fixed at construction, so one instance can serve any
/// number of concurrent requests.
#[derive(Debug, Clone, Default)]
pub struct VerboseTransport {
    proxy: ProxyResolver,
    tracer: Option<Tracer>,
    override_url: Option<Url>,
}

impl VerboseTransport {
    /// Creates a transport that checks proxy configuration through `proxy`
    /// and otherwise passes requests through unchanged.
    pub const fn new(proxy: ProxyResolver) -> Self {
        Self {
            proxy,
            tracer: None,
            override_url: None,
        }
    }

    /// Enables tracing through `tracer`.
    #[must_use]
    pub fn with_tracer(mut self, tracer: Tracer) -> Self {
        self.tracer = Some(tracer);
        self
    }

    /// Sends every request to `target`'s scheme, host and port instead of
    /// its own.
    #[must_use]
    pub fn with_override(mut self, target: Url) -> Self {
        self.override_url = Some(target);
        self
    }

    /// Whether requests are traced.
    pub const fn is_verbose(&self) -> bool {
        self.tracer.is_some()
    }

    /// The override target, if any.
    pub const fn override_url(&self) -> Option<&Url> {
        self.override_url.as_ref()
    }
}

/// Builds a copy of `original` aimed at `target`.
///
/// The copy gets its own URL and header map; `original` is only read. Path,
/// query, fragment, method, version and timeout carry over, and
/// [`ORIGINAL_SCHEME_HEADER`] records the scheme being replaced. The body is
/// not copied: the caller moves it across.
///
/// # Errors
///
/// Returns [`TransportError::Retarget`] if the URL cannot take the target's
/// scheme or host.
pub fn retarget(original: &Request, target: &Url) -> Result<Request, TransportError> {
    let retarget_error = || TransportError::Retarget {
        url: original.url().to_string(),
        target: target.to_string(),
    };

    let mut url = original.url().clone();
    url.set_scheme(target.scheme()).map_err(|()| retarget_error())?;
    url.set_host(target.host_str()).map_err(|_| retarget_error())?;
    url.set_port(target.port()).map_err(|()| retarget_error())?;

    let scheme = HeaderValue::from_str(original.url().scheme()).map_err(|_| retarget_error())?;
    let mut headers = original.headers().clone();
    headers.insert(HeaderName::from_static("x-original-scheme"), scheme);

    let mut dup = Request::new(original.method().clone(), url);
    *dup.headers_mut() = headers;
    *dup.version_mut() = original.version();
    *dup.timeout_mut() = original.timeout().copied();
    Ok(dup)
}

impl VerboseTransport {
    /// Runs one hop: trace, proxy check, override, delegate, trace.
    async fn round_trip(
        &self,
        mut req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<(Response, Hop)> {
        if let Some(tracer) = &self.tracer {
            tracer.trace_request(&mut req).await;
        }

        self.proxy
            .resolve()
            .map_err(reqwest_middleware::Error::middleware)?;

        let hop = Hop::capture(&req);

        let req = match &self.override_url {
            Some(target) => {
                let body = req.body_mut().take();
                let mut dup =
                    retarget(&req, target).map_err(reqwest_middleware::Error::middleware)?;
                *dup.body_mut() = body;
                debug!("Retargeted {} to {}", req.url(), dup.url());
                dup
            }
            None => req,
        };

        let response = next.run(req, extensions).await?;

        let response = match &self.tracer {
            Some(tracer) => tracer.trace_response(response).await,
            None => response,
        };
        Ok((response, hop))
    }
}

#[async_trait]
impl Middleware for VerboseTransport {
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<Response> {
        let mut followed = 0;
        loop {
            let (response, hop) = self.round_trip(req, extensions, next.clone()).await?;
            let Some(follow) = hop.redirect(&response) else {
                return Ok(response);
            };
            if followed == MAX_REDIRECTS {
                return Err(reqwest_middleware::Error::middleware(
                    TransportError::TooManyRedirects {
                        url: follow.url().to_string(),
                        limit: MAX_REDIRECTS,
                    },
                ));
            }
            followed += 1;
            debug!(
                "Following {} from {} to {}",
                response.status(),
                hop.url(),
                follow.url()
            );
            req = follow;
        }
    }
}

/// What one hop sent, addressed the way the caller addressed it.
///
/// Redirect targets resolve against this URL rather than the override, so a
/// relative `Location` keeps the original host and the next hop is
/// retargeted again.
struct Hop {
    skeleton: Request,
    replay: Option<Request>,
}

impl Hop {
    fn capture(req: &Request) -> Self {
        let mut skeleton = Request::new(req.method().clone(), req.url().clone());
        *skeleton.headers_mut() = req.headers().clone();
        *skeleton.version_mut() = req.version();
        *skeleton.timeout_mut() = req.timeout().copied();
        Self {
            skeleton,
            replay: req.try_clone(),
        }
    }

    fn url(&self) -> &Url {
        self.skeleton.url()
    }

    /// The next request to send if `response` is a redirect to follow.
    ///
    /// 301, 302 and 303 turn anything but GET/HEAD into a bodiless GET. 307
    /// and 308 resend method and body, and are returned to the caller as-is
    /// when the body was a stream that cannot be replayed.
    fn redirect(&self, response: &Response) -> Option<Request> {
        let location = response
            .headers()
            .get(header::LOCATION)?
            .to_str()
            .ok()
            .filter(|v| !v.is_empty())?;
        let target = self.url().join(location).ok()?;
        if !matches!(target.scheme(), "http" | "https") {
            return None;
        }

        let mut next = match response.status() {
            StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND | StatusCode::SEE_OTHER => {
                let mut req = self.skeleton.try_clone()?;
                if req.method() != Method::GET && req.method() != Method::HEAD {
                    *req.method_mut() = Method::GET;
                    for name in [
                        header::CONTENT_TYPE,
                        header::CONTENT_LENGTH,
                        header::TRANSFER_ENCODING,
                    ] {
                        req.headers_mut().remove(name);
                    }
                }
                req
            }
            StatusCode::TEMPORARY_REDIRECT | StatusCode::PERMANENT_REDIRECT => {
                self.replay.as_ref()?.try_clone()?
            }
            _ => return None,
        };

        if !same_origin(self.url(), &target) {
            for name in [
                header::AUTHORIZATION,
                header::COOKIE,
                header::PROXY_AUTHORIZATION,
                header::WWW_AUTHENTICATE,
            ] {
                next.headers_mut().remove(name);
            }
        }
        *next.url_mut() = target;
        Some(next)
    }
}

fn same_origin(a: &Url, b: &Url) -> bool {
    a.host_str() == b.host_str() && a.port_or_known_default() == b.port_or_known_default()
}
