//! `wiretap probe`: one GET request with timing, for poking at servers.

use std::fmt;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::Args;
use tracing::debug;

/// Arguments for `wiretap probe`.
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct ProbeArgs {
    /// URL to fetch.
    pub url: String,

    /// Extra request header, `Name: value`. Repeatable.
    #[arg(short = 'H', long = "header", value_name = "HEADER")]
    pub headers: Vec<String>,

    /// Whole-request timeout in seconds.
    #[arg(long, default_value_t = 10)]
    pub timeout: u64,
}

/// Split `Name: value` into its parts.
pub fn parse_header(raw: &str) -> Result<(String, String)> {
    let Some((name, value)) = raw.split_once(':') else {
        bail!("header '{raw}' must look like 'Name: value'");
    };
    let name = name.trim();
    if name.is_empty() {
        bail!("header '{raw}' has an empty name");
    }
    Ok((name.to_string(), value.trim().to_string()))
}

/// What a probe observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    /// Requested URL.
    pub url: String,
    /// Numeric status code.
    pub status: u16,
    /// Canonical reason phrase, if known.
    pub reason: Option<String>,
    /// Negotiated HTTP version.
    pub version: String,
    /// Time until the response head arrived.
    pub time_to_headers: Duration,
    /// Time until the body was fully read.
    pub total: Duration,
    /// Response headers in arrival order.
    pub headers: Vec<(String, String)>,
    /// Body size in bytes.
    pub body_len: usize,
}

impl fmt::Display for ProbeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "GET {}", self.url)?;
        match &self.reason {
            Some(reason) => writeln!(f, "status:          {} {reason}", self.status)?,
            None => writeln!(f, "status:          {}", self.status)?,
        }
        writeln!(f, "version:         {}", self.version)?;
        writeln!(f, "time to headers: {:?}", self.time_to_headers)?;
        writeln!(f, "total time:      {:?}", self.total)?;
        writeln!(f, "headers:")?;
        for (name, value) in &self.headers {
            writeln!(f, "  {name}: {value}")?;
        }
        write!(f, "body:            {} bytes", self.body_len)
    }
}

/// Run the probe and print its report to stdout.
pub async fn run(args: &ProbeArgs) -> Result<()> {
    let report = probe(args).await?;
    println!("{report}");
    Ok(())
}

async fn probe(args: &ProbeArgs) -> Result<ProbeReport> {
    let headers = args
        .headers
        .iter()
        .map(|h| parse_header(h))
        .collect::<Result<Vec<_>>>()?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(args.timeout))
        .build()
        .context("failed to build HTTP client")?;
    let mut request = client.get(&args.url);
    for (name, value) in &headers {
        request = request.header(name.as_str(), value.as_str());
    }

    debug!(url = %args.url, headers = headers.len(), "sending probe");
    let started = Instant::now();
    let response = request
        .send()
        .await
        .with_context(|| format!("request to {} failed", args.url))?;
    let time_to_headers = started.elapsed();

    let status = response.status();
    let version = format!("{:?}", response.version());
    let response_headers = response
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();
    let body = response
        .bytes()
        .await
        .context("failed to read response body")?;

    Ok(ProbeReport {
        url: args.url.clone(),
        status: status.as_u16(),
        reason: status.canonical_reason().map(str::to_string),
        version,
        time_to_headers,
        total: started.elapsed(),
        headers: response_headers,
        body_len: body.len(),
    })
}
