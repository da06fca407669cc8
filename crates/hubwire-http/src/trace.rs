//! Human-readable request/response tracing.
//!
//! Each request produces two blocks on the trace sink: one for the outbound
//! side (`> ` lines) and one for the inbound side (`< ` lines). Only the
//! headers in [`TRACED_HEADERS`] are printed and credentials in them are
//! masked. Bodies are read fully into memory, printed, and handed back as an
//! equivalent in-memory body so callers see exactly what the server sent.
//!
//! ```text
//! > POST https://api.github.com/repos/owner/repo/issues
//! > Authorization: token [REDACTED]
//! {"title":"bug"}
//! < HTTP 201
//! < Location: https://api.github.com/repos/owner/repo/issues/7
//! {"number":7}
//! ```

use std::borrow::Cow;
use std::io::{IsTerminal, Write};
use std::sync::{Arc, LazyLock, Mutex};

use bytes::Bytes;
use http_body_util::BodyExt;
use log::error;
use regex::Regex;
use reqwest::header::{HeaderMap, LOCATION};
use reqwest::{Body, Request, Response, ResponseBuilderExt};
use url::Url;

/// Headers echoed in the trace, in print order.
///
/// `Localtion` is intentionally misspelled: existing trace consumers match on
/// this exact list. The real `Location` header is printed on the status line.
pub const TRACED_HEADERS: [&str; 3] = ["Authorization", "X-GitHub-OTP", "Localtion"];

const CYAN: &str = "\x1b[36m";
const RESET: &str = "\x1b[m";

#[allow(clippy::expect_used)]
static CREDENTIAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(basic|token)\s+.+").expect("credential pattern is valid"));

/// Masks the credential in a `basic …` or `token …` header value.
///
/// The scheme word keeps its original casing; anything else passes through
/// untouched.
///
/// # Examples
///
/// ```
/// use hubwire_http::trace::redact;
///
/// assert_eq!(redact("Basic dXNlcjpwYXNz"), "Basic [REDACTED]");
/// assert_eq!(redact("token abc123"), "token [REDACTED]");
/// assert_eq!(redact("Bearer abc123"), "Bearer abc123");
/// ```
pub fn redact(value: &str) -> Cow<'_, str> {
    CREDENTIAL.replace(value, "$1 [REDACTED]")
}

/// Destination for trace output.
pub trait TraceSink: Send + Sync {
    /// Writes one complete block of trace text.
    fn write_block(&self, block: &str);

    /// Whether the sink is an interactive terminal, which enables coloring.
    fn is_terminal(&self) -> bool {
        false
    }
}

/// Writes trace blocks to the process's standard error.
#[derive(Debug, Clone, Copy, Default)]
pub struct StderrSink;

impl TraceSink for StderrSink {
    fn write_block(&self, block: &str) {
        let mut stderr = std::io::stderr().lock();
        // Trace output is best effort, a closed stderr must not fail the request.
        let _ = stderr.write_all(block.as_bytes());
        let _ = stderr.flush();
    }

    fn is_terminal(&self) -> bool {
        std::io::stderr().is_terminal()
    }
}

/// Collects trace blocks in memory.
///
/// Useful for embedding applications that want to show the trace themselves,
/// and for tests.
#[derive(Debug, Default)]
pub struct BufferSink {
    blocks: Mutex<Vec<String>>,
}

impl BufferSink {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every block written so far, in order.
    pub fn blocks(&self) -> Vec<String> {
        self.blocks
            .lock()
            .map(|blocks| blocks.clone())
            .unwrap_or_default()
    }

    /// Returns the whole trace as a single string.
    pub fn contents(&self) -> String {
        self.blocks().concat()
    }
}

impl TraceSink for BufferSink {
    fn write_block(&self, block: &str) {
        if let Ok(mut blocks) = self.blocks.lock() {
            blocks.push(block.to_string());
        }
    }
}

/// Formats and emits trace blocks for requests and responses.
#[derive(Clone)]
pub struct Tracer {
    sink: Arc<dyn TraceSink>,
    colorize: bool,
}

impl std::fmt::Debug for Tracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracer")
            .field("colorize", &self.colorize)
            .finish_non_exhaustive()
    }
}

impl Default for Tracer {
    fn default() -> Self {
        Self::new(Arc::new(StderrSink))
    }
}

impl Tracer {
    /// Creates a tracer writing to `sink`.
    ///
    /// Coloring is decided once, here, from [`TraceSink::is_terminal`].
    pub fn new(sink: Arc<dyn TraceSink>) -> Self {
        let colorize = sink.is_terminal();
        Self { sink, colorize }
    }

    /// Emits the outbound block for `req`.
    ///
    /// A streaming body is drained and replaced with a buffered copy, so the
    /// request can still be sent afterwards.
    pub async fn trace_request(&self, req: &mut Request) {
        let mut block = TraceBlock::new(self.colorize);
        block.line(&request_line(req));
        block.headers(req.headers(), '>');

        let buffered = req.body().and_then(Body::as_bytes).map(Bytes::copy_from_slice);
        let body = match buffered {
            Some(bytes) => Some(bytes),
            None => match req.body_mut().take() {
                Some(body) => {
                    let bytes = drain(body).await;
                    *req.body_mut() = Some(Body::from(bytes.clone()));
                    Some(bytes)
                }
                None => None,
            },
        };
        if let Some(bytes) = body {
            block.body(&bytes);
        }

        self.sink.write_block(&block.finish());
    }

    /// Emits the inbound block for `response` and returns an equivalent
    /// response whose body has already been read into memory.
    ///
    /// Status, version, headers, extensions and the final URL are preserved.
    pub async fn trace_response(&self, response: Response) -> Response {
        let mut block = TraceBlock::new(self.colorize);
        block.line(&format!("< HTTP {}", response.status().as_u16()));
        if let Some(location) = location(&response) {
            block.line(&format!("< Location: {location}"));
        }
        block.headers(response.headers(), '<');

        let url = response.url().clone();
        let (parts, body) = http::Response::<Body>::from(response).into_parts();
        let bytes = drain(body).await;
        block.body(&bytes);
        self.sink.write_block(&block.finish());

        let mut rebuilt = http::Response::from_parts(parts, bytes);
        // Carries the final URL over; reqwest keeps it in a private extension.
        if let Ok(marker) = http::Response::builder().url(url).body(()) {
            rebuilt.extensions_mut().extend(marker.into_parts().0.extensions);
        }
        Response::from(rebuilt)
    }
}

/// `> METHOD scheme://host[:port]/path`
fn request_line(req: &Request) -> String {
    let url = req.url();
    let host = url.host_str().unwrap_or_default();
    let port = url.port().map(|p| format!(":{p}")).unwrap_or_default();
    format!(
        "> {} {}://{host}{port}{}",
        req.method(),
        url.scheme(),
        url.path()
    )
}

/// The response's `Location` header resolved against its URL, if it parses.
fn location(response: &Response) -> Option<Url> {
    let value = response
        .headers()
        .get(LOCATION)?
        .to_str()
        .ok()
        .filter(|v| !v.is_empty())?;
    response.url().join(value).ok()
}

/// Reads `body` to the end.
///
/// A read failure here terminates the process: tracing is a debugging aid
/// and there is no sensible way to hand a half-read body back to the caller.
async fn drain(body: Body) -> Bytes {
    match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => fatal(&e),
    }
}

fn fatal(err: &dyn std::fmt::Display) -> ! {
    error!("Failed to read body for trace: {err}");
    eprintln!("hubwire: failed to read body for trace: {err}");
    std::process::exit(1)
}

struct TraceBlock {
    out: String,
    colorize: bool,
}

impl TraceBlock {
    const fn new(colorize: bool) -> Self {
        Self {
            out: String::new(),
            colorize,
        }
    }

    fn line(&mut self, msg: &str) {
        if self.colorize {
            self.out.push_str(CYAN);
            self.out.push_str(msg);
            self.out.push_str(RESET);
        } else {
            self.out.push_str(msg);
        }
        self.out.push('\n');
    }

    fn headers(&mut self, headers: &HeaderMap, indent: char) {
        for name in TRACED_HEADERS {
            let Some(value) = headers.get(name) else {
                continue;
            };
            let value = String::from_utf8_lossy(value.as_bytes());
            if value.is_empty() {
                continue;
            }
            self.line(&format!("{indent} {name}: {}", redact(&value)));
        }
    }

    fn body(&mut self, bytes: &[u8]) {
        if !bytes.is_empty() {
            self.line(&String::from_utf8_lossy(bytes));
        }
    }

    fn finish(self) -> String {
        self.out
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]

    use super::*;
    use reqwest::Method;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct TerminalSink(BufferSink);

    impl TraceSink for TerminalSink {
        fn write_block(&self, block: &str) {
            self.0.write_block(block);
        }

        fn is_terminal(&self) -> bool {
            true
        }
    }

    fn direct_client() -> reqwest::Client {
        reqwest::Client::builder().no_proxy().build().unwrap()
    }

    fn request(method: Method, url: &str) -> Request {
        Request::new(method, Url::parse(url).unwrap())
    }

    #[test]
    fn test_redact_basic_credentials() {
        let redacted = redact("Basic dXNlcjpwYXNz");
        assert_eq!(redacted, "Basic [REDACTED]");
        assert!(!redacted.contains("dXNlcjpwYXNz"));
    }

    #[test]
    fn test_redact_token_keeps_prefix_case() {
        assert_eq!(redact("token abc123"), "token [REDACTED]");
        assert_eq!(redact("TOKEN abc123"), "TOKEN [REDACTED]");
        assert_eq!(redact("bAsIc   abc"), "bAsIc [REDACTED]");
    }

    #[test]
    fn test_redact_leaves_other_values() {
        assert_eq!(redact("Bearer abc123"), "Bearer abc123");
        assert_eq!(redact("123456"), "123456");
        assert_eq!(redact("token"), "token");
        assert_eq!(redact("tokenabc"), "tokenabc");
    }

    #[test]
    fn test_request_line_includes_port_and_path() {
        let req = request(Method::GET, "http://localhost:8080/repos/a/b?page=2");
        assert_eq!(request_line(&req), "> GET http://localhost:8080/repos/a/b");

        let req = request(Method::DELETE, "https://api.github.com/user");
        assert_eq!(request_line(&req), "> DELETE https://api.github.com/user");
    }

    #[test]
    fn test_only_listed_headers_printed() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "token secret".parse().unwrap());
        headers.insert("x-github-otp", "123456".parse().unwrap());
        headers.insert("cookie", "session=abc".parse().unwrap());
        headers.insert("user-agent", "hubwire".parse().unwrap());

        let mut block = TraceBlock::new(false);
        block.headers(&headers, '>');
        let out = block.finish();

        assert_eq!(
            out,
            "> Authorization: token [REDACTED]\n> X-GitHub-OTP: 123456\n"
        );
    }

    #[test]
    fn test_empty_header_skipped() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "".parse().unwrap());

        let mut block = TraceBlock::new(false);
        block.headers(&headers, '<');
        assert!(block.finish().is_empty());
    }

    #[test]
    fn test_colorized_lines() {
        let mut block = TraceBlock::new(true);
        block.line("< HTTP 200");
        assert_eq!(block.finish(), "\x1b[36m< HTTP 200\x1b[m\n");
    }

    #[tokio::test]
    async fn test_trace_request_with_buffered_body() {
        let sink = Arc::new(BufferSink::new());
        let tracer = Tracer::new(sink.clone());

        let mut req = request(Method::POST, "https://api.github.com/repos/o/r/issues");
        req.headers_mut()
            .insert("authorization", "Basic dXNlcjpwYXNz".parse().unwrap());
        *req.body_mut() = Some(Body::from(r#"{"title":"bug"}"#));

        tracer.trace_request(&mut req).await;

        assert_eq!(
            sink.contents(),
            "> POST https://api.github.com/repos/o/r/issues\n\
             > Authorization: Basic [REDACTED]\n\
             {\"title\":\"bug\"}\n"
        );
        assert_eq!(
            req.body().and_then(Body::as_bytes),
            Some(br#"{"title":"bug"}"#.as_slice())
        );
    }

    #[tokio::test]
    async fn test_trace_request_without_body() {
        let sink = Arc::new(BufferSink::new());
        let tracer = Tracer::new(sink.clone());

        let mut req = request(Method::GET, "https://api.github.com/user");
        tracer.trace_request(&mut req).await;

        assert_eq!(sink.contents(), "> GET https://api.github.com/user\n");
        assert!(req.body().is_none());
    }

    #[tokio::test]
    async fn test_trace_request_drains_streaming_body() {
        let sink = Arc::new(BufferSink::new());
        let tracer = Tracer::new(sink.clone());

        let chunks: Vec<Result<&'static str, std::io::Error>> = vec![Ok("hello "), Ok("world")];
        let mut req = request(Method::PUT, "https://api.github.com/gists/1");
        *req.body_mut() = Some(Body::wrap_stream(futures::stream::iter(chunks)));

        tracer.trace_request(&mut req).await;

        assert!(sink.contents().ends_with("hello world\n"));
        assert_eq!(
            req.body().and_then(Body::as_bytes),
            Some(b"hello world".as_slice())
        );
    }

    #[tokio::test]
    async fn test_trace_response_preserves_body_and_status() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("Location", "/user/7")
                    .insert_header("X-RateLimit-Remaining", "42")
                    .set_body_string(r#"{"login":"octocat"}"#),
            )
            .mount(&mock_server)
            .await;

        let response = direct_client()
            .get(format!("{}/user", mock_server.uri()))
            .send()
            .await
            .unwrap();

        let sink = Arc::new(BufferSink::new());
        let tracer = Tracer::new(sink.clone());
        let response = tracer.trace_response(response).await;

        assert_eq!(response.status().as_u16(), 201);
        assert_eq!(
            response.url().as_str(),
            format!("{}/user", mock_server.uri())
        );
        assert_eq!(
            response
                .headers()
                .get("x-ratelimit-remaining")
                .map(|v| v.to_str().unwrap()),
            Some("42")
        );

        let trace = sink.contents();
        assert!(trace.starts_with("< HTTP 201\n"));
        assert!(trace.contains(&format!("< Location: {}/user/7\n", mock_server.uri())));
        assert!(trace.ends_with("{\"login\":\"octocat\"}\n"));
        assert!(!trace.contains("X-RateLimit-Remaining"));

        assert_eq!(response.text().await.unwrap(), r#"{"login":"octocat"}"#);
    }

    #[tokio::test]
    async fn test_trace_response_empty_body_prints_no_body_line() {
        let mock_server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&mock_server)
            .await;

        let response = direct_client()
            .delete(format!("{}/gists/1", mock_server.uri()))
            .send()
            .await
            .unwrap();

        let sink = Arc::new(BufferSink::new());
        let response = Tracer::new(sink.clone()).trace_response(response).await;

        assert_eq!(sink.contents(), "< HTTP 204\n");
        assert!(response.bytes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unparseable_location_is_omitted() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("Location", "http://[::1")
                    .set_body_string("created"),
            )
            .mount(&mock_server)
            .await;

        let response = direct_client()
            .post(format!("{}/repos", mock_server.uri()))
            .send()
            .await
            .unwrap();

        let sink = Arc::new(BufferSink::new());
        let response = Tracer::new(sink.clone()).trace_response(response).await;

        assert_eq!(sink.contents(), "< HTTP 201\ncreated\n");
        assert_eq!(
            response.headers().get("location").map(|v| v.to_str().unwrap()),
            Some("http://[::1")
        );
    }

    #[tokio::test]
    async fn test_terminal_sink_colors_every_line() {
        let sink = Arc::new(TerminalSink(BufferSink::new()));
        let tracer = Tracer::new(sink.clone());

        let mut req = request(Method::GET, "https://api.github.com/user");
        req.headers_mut()
            .insert("x-github-otp", "123456".parse().unwrap());
        tracer.trace_request(&mut req).await;

        assert_eq!(
            sink.0.contents(),
            "\x1b[36m> GET https://api.github.com/user\x1b[m\n\
             \x1b[36m> X-GitHub-OTP: 123456\x1b[m\n"
        );
    }
}
