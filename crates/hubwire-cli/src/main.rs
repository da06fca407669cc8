//! hubwire - issue one API request through the instrumented transport.
//!
//! Handy for reproducing what an API client sends: `--verbose` prints the
//! redacted request/response trace on stderr while the response body goes
//! to stdout, and `--test-host` points every request at a local server.
use std::io::Write;
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::Parser;
use colored::Colorize;
use log::{debug, warn};
use reqwest::Method;

use hubwire_http::ClientConfig;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// URL to request
    url: String,

    /// HTTP method
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,

    /// Extra request header as "Name: value" (repeatable)
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Request body
    #[arg(short, long)]
    data: Option<String>,

    /// Print a redacted trace of the request and response on stderr
    #[arg(short, long, env = "HUB_VERBOSE")]
    verbose: bool,

    /// Send every request to this scheme and host instead (e.g. http://localhost:9999)
    #[arg(long, env = "HUB_TEST_HOST", default_value = "")]
    test_host: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {e:#}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<ExitCode> {
    let client = ClientConfig::new()
        .with_verbose(args.verbose)
        .with_test_host(args.test_host)
        .build()
        .context("Failed to build HTTP client")?;

    let method = parse_method(&args.method)?;
    let mut request = client.request(method, &args.url);
    for raw in &args.headers {
        let (name, value) = parse_header(raw)?;
        request = request.header(name, value);
    }
    if let Some(data) = args.data {
        request = request.body(data);
    }

    let response = request
        .send()
        .await
        .with_context(|| format!("Request to {} failed", args.url))?;
    let status = response.status();
    debug!("{} responded with {status}", args.url);

    let body = response
        .bytes()
        .await
        .context("Failed to read response body")?;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&body)?;
    stdout.flush()?;

    if status.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        warn!("Request returned {status}");
        Ok(ExitCode::FAILURE)
    }
}

fn parse_method(raw: &str) -> Result<Method> {
    Method::from_bytes(raw.to_ascii_uppercase().as_bytes())
        .with_context(|| format!("Invalid HTTP method '{raw}'"))
}

/// Splits `"Name: value"` into its trimmed parts.
fn parse_header(raw: &str) -> Result<(String, String)> {
    let Some((name, value)) = raw.split_once(':') else {
        bail!("Invalid header '{raw}', expected \"Name: value\"");
    };
    let name = name.trim();
    if name.is_empty() {
        bail!("Invalid header '{raw}', name is empty");
    }
    Ok((name.to_string(), value.trim().to_string()))
}
