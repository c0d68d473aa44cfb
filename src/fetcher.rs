use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, REFERER, USER_AGENT};
use reqwest::{redirect, Client, StatusCode};
use std::borrow::Cow;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;

use crate::config::FetcherConfig;
use crate::utils::error::{AppError, FetchFailure, FetchFailureKind, Result};

const USER_AGENT_POOL: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:123.0) Gecko/20100101 Firefox/123.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.3 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36 Edg/122.0.0.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36",
];

const DEFAULT_HEADERS: &[(&str, &str)] = &[
    (
        "accept",
        "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
    ),
    ("accept-language", "en-US,en;q=0.9"),
    ("dnt", "1"),
    ("upgrade-insecure-requests", "1"),
    ("sec-fetch-dest", "document"),
    ("sec-fetch-mode", "navigate"),
    ("sec-fetch-site", "none"),
    ("sec-fetch-user", "?1"),
    ("cache-control", "max-age=0"),
];

const RETRY_REFERER: &str = "https://www.google.com/";

/// Lowercased fragments that identify an anti-bot interstitial instead of
/// the requested page.
const CAPTCHA_SIGNATURES: &[&str] = &[
    "robot check",
    "validatecaptcha",
    "enter the characters you see below",
    "are you a robot",
    "captcha-delivery.com",
    "cf-chl-",
    "please verify you are a human",
];

/// Page content as received, after redirects.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPage {
    pub content: Vec<u8>,
    pub final_url: Url,
    pub status: u16,
}

impl RawPage {
    pub fn new(content: impl Into<Vec<u8>>, final_url: Url, status: u16) -> Self {
        Self {
            content: content.into(),
            final_url,
            status,
        }
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.content)
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> std::result::Result<RawPage, FetchFailure>;
}

/// How a single attempt ended.
#[derive(Debug)]
enum Attempt {
    Done(RawPage),
    Transient(FetchFailureKind, String),
    Permanent(FetchFailureKind, String),
}

/// Status-only verdict, before the body has been looked at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    Retryable,
    Blocked,
    NotFound,
    Failed,
}

pub fn classify_status(status: StatusCode) -> StatusClass {
    match status.as_u16() {
        200..=299 => StatusClass::Success,
        429 | 502 | 503 | 504 => StatusClass::Retryable,
        403 | 451 => StatusClass::Blocked,
        404 | 410 => StatusClass::NotFound,
        _ => StatusClass::Failed,
    }
}

pub fn looks_like_captcha(body: &str) -> bool {
    let lower = body.to_lowercase();
    CAPTCHA_SIGNATURES.iter().any(|sig| lower.contains(sig))
}

/// Upper bound of the wait before retry number `retry` (0-based):
/// `min(base * 2^retry, cap)`.
pub fn backoff_ceiling(retry: u32, base: Duration, cap: Duration) -> Duration {
    let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(cap).min(cap)
}

fn jittered(ceiling: Duration) -> Duration {
    let half = ceiling / 2;
    if ceiling <= half {
        return ceiling;
    }
    rand::thread_rng().gen_range(half..=ceiling)
}

pub struct HttpFetcher {
    client: Client,
    user_agents: Vec<String>,
    header_overrides: HeaderMap,
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl HttpFetcher {
    pub fn new(config: &FetcherConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .redirect(redirect::Policy::limited(config.max_redirects))
            .gzip(true)
            .brotli(true)
            .build()?;

        let user_agents = if config.user_agents.is_empty() {
            USER_AGENT_POOL.iter().map(|ua| ua.to_string()).collect()
        } else {
            config.user_agents.clone()
        };

        let mut header_overrides = HeaderMap::new();
        for (name, value) in &config.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| AppError::Validation(format!("Invalid header name '{}': {}", name, e)))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|e| AppError::Validation(format!("Invalid value for header '{}': {}", name, e)))?;
            header_overrides.insert(header_name, header_value);
        }

        Ok(Self {
            client,
            user_agents,
            header_overrides,
            max_attempts: config.retry_attempts.max(1),
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
        })
    }

    fn headers_for_attempt(&self, attempt: u32) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for &(name, value) in DEFAULT_HEADERS {
            headers.insert(name, HeaderValue::from_static(value));
        }

        let user_agent = self
            .user_agents
            .choose(&mut rand::thread_rng())
            .map(String::as_str)
            .unwrap_or(USER_AGENT_POOL[0]);
        if let Ok(value) = HeaderValue::from_str(user_agent) {
            headers.insert(USER_AGENT, value);
        }

        if attempt > 1 {
            headers.insert(REFERER, HeaderValue::from_static(RETRY_REFERER));
        }

        for (name, value) in &self.header_overrides {
            headers.insert(name.clone(), value.clone());
        }
        headers
    }

    async fn attempt(&self, url: &Url, attempt: u32) -> Attempt {
        let response = match self
            .client
            .get(url.clone())
            .headers(self.headers_for_attempt(attempt))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return classify_transport_error(&e),
        };

        let status = response.status();
        let final_url = response.url().clone();

        match classify_status(status) {
            StatusClass::Blocked => {
                return Attempt::Permanent(FetchFailureKind::Blocked, format!("HTTP {}", status));
            }
            StatusClass::NotFound => {
                return Attempt::Permanent(FetchFailureKind::NotFound, format!("HTTP {}", status));
            }
            _ => {}
        }

        let content = match response.bytes().await {
            Ok(bytes) => bytes.to_vec(),
            Err(e) => return classify_transport_error(&e),
        };

        let page = RawPage::new(content, final_url, status.as_u16());
        if looks_like_captcha(&page.text()) {
            return Attempt::Permanent(
                FetchFailureKind::Blocked,
                format!("captcha challenge served with HTTP {}", status),
            );
        }

        match classify_status(status) {
            StatusClass::Success => Attempt::Done(page),
            StatusClass::Retryable => {
                Attempt::Transient(FetchFailureKind::NetworkError, format!("HTTP {}", status))
            }
            _ => Attempt::Permanent(FetchFailureKind::NetworkError, format!("HTTP {}", status)),
        }
    }
}

fn classify_transport_error(error: &reqwest::Error) -> Attempt {
    if error.is_timeout() {
        Attempt::Transient(FetchFailureKind::Timeout, error.to_string())
    } else if error.is_redirect() || error.is_builder() {
        Attempt::Permanent(FetchFailureKind::NetworkError, error.to_string())
    } else {
        Attempt::Transient(FetchFailureKind::NetworkError, error.to_string())
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> std::result::Result<RawPage, FetchFailure> {
        let started = Instant::now();
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!("Fetching {} (attempt {}/{})", url, attempt, self.max_attempts);

            match self.attempt(url, attempt).await {
                Attempt::Done(page) => {
                    debug!(
                        "Fetched {} ({} bytes, HTTP {}) in {:?}",
                        page.final_url,
                        page.content.len(),
                        page.status,
                        started.elapsed()
                    );
                    return Ok(page);
                }
                Attempt::Permanent(kind, message) => {
                    warn!("Fetch of {} failed permanently: {:?} {}", url, kind, message);
                    return Err(FetchFailure::new(kind, attempt, message));
                }
                Attempt::Transient(kind, message) => {
                    if attempt >= self.max_attempts {
                        warn!("Giving up on {} after {} attempts: {}", url, attempt, message);
                        return Err(FetchFailure::new(kind, attempt, message));
                    }
                    let delay = jittered(backoff_ceiling(attempt - 1, self.base_delay, self.max_delay));
                    warn!(
                        "Transient failure fetching {} ({:?}: {}), retrying in {:?}",
                        url, kind, message, delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
