//! # hubwire-http
//!
//! Instrumented HTTP transport for command-line API clients.
//!
//! The client built by this crate behaves exactly like a plain `reqwest`
//! client, with two debugging aids layered on top:
//! - **Verbose tracing**: a redacted dump of every request and response to
//!   stderr (or any [`TraceSink`]).
//! - **Test host override**: every request is sent to a fixed scheme and
//!   host, typically a local fake server, with the original scheme kept in
//!   the `X-Original-Scheme` header.
//!
//! Proxies come from `http_proxy` / `HTTP_PROXY`, and values without a
//! scheme such as `myproxy:8080` are accepted.
//!
//! ## Example
//!
//! ```no_run
//! use hubwire_http::new_http_client;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let client = new_http_client("", true)?;
//! let response = client.get("https://api.github.com/zen").send().await?;
//! println!("{}", response.text().await?);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod proxy;
pub mod trace;
pub mod transport;

pub use client::{ClientConfig, DEFAULT_USER_AGENT, new_http_client};
pub use error::TransportError;
pub use proxy::{Environment, ProcessEnv, ProxyResolver, resolve_proxy};
pub use trace::{BufferSink, StderrSink, TraceSink, Tracer};
pub use transport::{MAX_REDIRECTS, ORIGINAL_SCHEME_HEADER, VerboseTransport, retarget};

pub use reqwest_middleware::ClientWithMiddleware;
