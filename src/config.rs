//! Drive-side configuration and startup validation.
//!
//! The synthetic endpoint's query contract lives here too, since both
//! halves of the tool have to agree on it: `bsiz` and `dlay` are log2
//! exponents, valid in `[MIN, MAX)`, out-of-range values fall back to the
//! default.

use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use url::Url;

/// Request header naming the quota a request charges.
pub const QUOTA_HEADER: &str = "x-quotabench-quota";

/// Valid range for the `bsiz` body-size exponent (bytes = 2^bsiz).
pub const BSIZE_MIN: u32 = 10;
pub const BSIZE_MAX: u32 = 21;
pub const BSIZE_DEFAULT: u32 = BSIZE_MIN;

/// Valid range for the `dlay` delay exponent (milliseconds = 2^dlay).
pub const DELAY_MIN: u32 = 1;
pub const DELAY_MAX: u32 = 14;
pub const DELAY_DEFAULT: u32 = DELAY_MIN;

const PARALLEL_MIN: i64 = 1;
const PARALLEL_MAX: i64 = 100_000;
const PARALLEL_DEFAULT: usize = 1;

/// Startup validation failure.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("URLs cannot be empty")]
    NoUrls,
    #[error("invalid URL '{url}': {source}")]
    BadUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("--pause cannot be negative")]
    NegativePause,
    #[error("malformed header '{0}': expected NAME:VALUE")]
    MalformedHeader(String),
    #[error("failed to read '{path}': {source}")]
    File {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// How a query term is chosen per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shaping {
    /// Term is omitted; the server uses its default.
    Off,
    Fixed(u32),
    /// A fresh draw from the valid range on every request.
    Random,
}

impl Shaping {
    /// Interpret a raw CLI value: absent or zero is off, negative is
    /// random, positive is fixed.
    pub fn from_flag(flag: Option<i32>) -> Self {
        match flag {
            None | Some(0) => Shaping::Off,
            Some(n) if n < 0 => Shaping::Random,
            Some(n) => Shaping::Fixed(n as u32),
        }
    }

    /// The term to send, drawing from `[lo, hi)` when randomized.
    pub fn sample(&self, lo: u32, hi: u32) -> Option<u32> {
        match self {
            Shaping::Off => None,
            Shaping::Fixed(n) => Some(*n),
            Shaping::Random => Some(rand::thread_rng().gen_range(lo..hi)),
        }
    }
}

/// Validated configuration shared by every drive worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Target pool, walked in order once per pass.
    pub urls: Vec<String>,
    pub parallel: usize,
    /// Passes per worker; zero means unlimited.
    pub limit: u64,
    /// Pause between passes.
    pub pause: Duration,
    pub keepalive: bool,
    pub bsize: Shaping,
    pub delay: Shaping,
    /// HTTP proxy as HOST[:PORT], no scheme.
    pub proxy: Option<String>,
    pub headers: Vec<(String, String)>,
    /// Quota-name pool; one is drawn uniformly per request.
    pub quotas: Vec<String>,
    /// Extra header that mirrors the chosen quota name.
    pub quota_selector: Option<String>,
}

impl WorkerConfig {
    /// Validate the raw URL list: non-empty and individually parseable.
    pub fn check_urls(urls: &[String]) -> Result<(), ConfigError> {
        if urls.is_empty() {
            return Err(ConfigError::NoUrls);
        }
        for url in urls {
            Url::parse(url).map_err(|source| ConfigError::BadUrl {
                url: url.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// Worker count with out-of-range values falling back to the default.
    pub fn effective_parallel(raw: i64) -> usize {
        if (PARALLEL_MIN..=PARALLEL_MAX).contains(&raw) {
            raw as usize
        } else {
            PARALLEL_DEFAULT
        }
    }

    /// Proxy target as a URL for the HTTP client, when configured.
    pub fn proxy_url(&self) -> Option<String> {
        self.proxy.as_ref().map(|hostport| format!("http://{hostport}"))
    }

    /// One quota name drawn uniformly from the pool, if any.
    pub fn pick_quota(&self) -> Option<&str> {
        if self.quotas.is_empty() {
            return None;
        }
        let index = rand::thread_rng().gen_range(0..self.quotas.len());
        Some(self.quotas[index].as_str())
    }

    /// Render the configuration back as the equivalent command line.
    pub fn to_command_line(&self) -> String {
        let mut out = String::new();
        if self.keepalive {
            out.push_str(" -A");
        }
        if self.parallel != PARALLEL_DEFAULT {
            out.push_str(&format!(" -p {}", self.parallel));
        }
        if self.limit > 0 {
            out.push_str(&format!(" -l {}", self.limit));
        }
        for url in &self.urls {
            out.push_str(&format!(" -u {url}"));
        }
        if let Some(proxy) = &self.proxy {
            out.push_str(&format!(" -P {proxy}"));
        }
        if !self.pause.is_zero() {
            out.push_str(&format!(" -z {}", self.pause.as_millis()));
        }
        for (name, value) in &self.headers {
            out.push_str(&format!(" -H {name}:{value}"));
        }
        match self.delay {
            Shaping::Off => {}
            Shaping::Fixed(n) => out.push_str(&format!(" -D {n}")),
            Shaping::Random => out.push_str(" -D -1"),
        }
        match self.bsize {
            Shaping::Off => {}
            Shaping::Fixed(n) => out.push_str(&format!(" -B {n}")),
            Shaping::Random => out.push_str(" -B -1"),
        }
        if let Some(selector) = &self.quota_selector {
            out.push_str(&format!(" -S {selector}"));
        }
        for quota in &self.quotas {
            out.push_str(&format!(" -Q {quota}"));
        }
        out
    }
}

/// Split a `NAME:VALUE` option into its parts.
pub fn parse_header(raw: &str) -> Result<(String, String), ConfigError> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| ConfigError::MalformedHeader(raw.to_string()))?;
    if name.is_empty() {
        return Err(ConfigError::MalformedHeader(raw.to_string()));
    }
    Ok((name.to_string(), value.trim_start().to_string()))
}

/// Expand `@FILE` values into the file's non-empty lines; other values pass
/// through unchanged.
pub fn expand_at_args(values: &[String]) -> Result<Vec<String>, ConfigError> {
    let mut out = Vec::new();
    for value in values {
        match value.strip_prefix('@') {
            Some(path) => {
                let contents =
                    std::fs::read_to_string(path).map_err(|source| ConfigError::File {
                        path: path.to_string(),
                        source,
                    })?;
                out.extend(
                    contents
                        .lines()
                        .map(str::trim)
                        .filter(|line| !line.is_empty())
                        .map(String::from),
                );
            }
            None => out.push(value.clone()),
        }
    }
    Ok(out)
}
