//! HTTP transport and persisted sync state for the assignment mirror.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::{HeaderMap, LINK, RETRY_AFTER};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

pub use reqwest::Method;

pub const CRATE_NAME: &str = "cns-storage";

/// Longest `Retry-After` we are willing to honour.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum WatermarkError {
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed watermark {raw:?} in {path}")]
    Malformed { path: String, raw: String },
}

/// The instant of the last successful run, stored as one RFC 3339 UTC line.
#[derive(Debug, Clone)]
pub struct WatermarkStore {
    path: PathBuf,
}

impl WatermarkStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> Result<Option<DateTime<Utc>>, WatermarkError> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(WatermarkError::Io {
                    path: self.path.display().to_string(),
                    source,
                })
            }
        };
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        DateTime::parse_from_rfc3339(trimmed)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|_| WatermarkError::Malformed {
                path: self.path.display().to_string(),
                raw: trimmed.to_string(),
            })
    }

    /// Overwrite atomically using a temp file in the same directory and a rename.
    pub async fn store(&self, instant: DateTime<Utc>) -> anyhow::Result<()> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("creating watermark directory {}", parent.display()))?;

        let temp_path = parent.join(format!(".{}.watermark.tmp", Uuid::new_v4()));
        let line = format!("{}\n", instant.to_rfc3339_opts(SecondsFormat::Secs, true));

        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp watermark file {}", temp_path.display()))?;
        file.write_all(line.as_bytes())
            .await
            .with_context(|| format!("writing temp watermark file {}", temp_path.display()))?;
        file.sync_all()
            .await
            .with_context(|| format!("syncing temp watermark file {}", temp_path.display()))?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, &self.path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err).with_context(|| {
                format!(
                    "atomically renaming watermark {} -> {}",
                    temp_path.display(),
                    self.path.display()
                )
            });
        }
        Ok(())
    }

    pub async fn clear(&self) -> anyhow::Result<bool> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err).with_context(|| format!("removing {}", self.path.display())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub global_concurrency: usize,
    pub per_scope_concurrency: usize,
    pub backoff: BackoffPolicy,
    pub token_bucket: Option<TokenBucketConfig>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: None,
            global_concurrency: 8,
            per_scope_concurrency: 2,
            backoff: BackoffPolicy::default(),
            token_bucket: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TokenBucketConfig {
    pub capacity: u32,
    pub refill_every: Duration,
}

#[derive(Debug)]
pub struct SimpleTokenBucket {
    capacity: u32,
    refill_every: Duration,
    state: Mutex<TokenBucketState>,
}

#[derive(Debug, Clone, Copy)]
struct TokenBucketState {
    tokens: u32,
    last_refill: Instant,
}

impl SimpleTokenBucket {
    pub fn new(capacity: u32, refill_every: Duration) -> Self {
        Self {
            capacity,
            refill_every,
            state: Mutex::new(TokenBucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub async fn take(&self) {
        loop {
            let mut state = self.state.lock().await;
            let elapsed = state.last_refill.elapsed();
            if elapsed >= self.refill_every && self.refill_every.as_millis() > 0 {
                let refills = (elapsed.as_millis() / self.refill_every.as_millis()) as u32;
                state.tokens = (state.tokens.saturating_add(refills)).min(self.capacity);
                state.last_refill = Instant::now();
            }

            if state.tokens > 0 {
                state.tokens -= 1;
                return;
            }

            let sleep_for = self.refill_every;
            drop(state);
            tokio::time::sleep(sleep_for).await;
        }
    }
}

/// One outbound API call. Rebuilt for every retry attempt.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub bearer: Option<String>,
    pub headers: Vec<(&'static str, String)>,
    pub query: Vec<(String, String)>,
    pub json: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            bearer: None,
            headers: Vec::new(),
            query: Vec::new(),
            json: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.json = Some(body);
        self
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    /// `rel="next"` target from the `Link` header, if any.
    pub next_link: Option<String>,
    pub body: Vec<u8>,
}

impl FetchedResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, FetchError> {
        serde_json::from_slice(&self.body).map_err(|source| FetchError::Decode {
            url: self.final_url.clone(),
            source,
        })
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}: {body}")]
    HttpStatus {
        status: u16,
        url: String,
        body: String,
    },
    #[error("decoding response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

impl FetchError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            Self::Request(err) => err.status().map(|s| s.as_u16()),
            Self::Decode { .. } => None,
        }
    }
}

/// Extract the `rel="next"` URL from a `Link` header value.
pub fn parse_next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|part| {
        let mut segments = part.split(';');
        let target = segments.next()?.trim();
        let is_next = segments.any(|param| {
            let param = param.trim();
            param == "rel=\"next\"" || param == "rel=next"
        });
        if !is_next {
            return None;
        }
        let url = target.strip_prefix('<')?.strip_suffix('>')?;
        Some(url.to_string())
    })
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(|secs| Duration::from_secs(secs).min(MAX_RETRY_AFTER))
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    global_limit: Arc<Semaphore>,
    per_scope_limit: usize,
    per_scope: Mutex<HashMap<String, Arc<Semaphore>>>,
    token_bucket: Option<Arc<SimpleTokenBucket>>,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        let token_bucket = config
            .token_bucket
            .map(|c| Arc::new(SimpleTokenBucket::new(c.capacity, c.refill_every)));

        Ok(Self {
            client,
            global_limit: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
            per_scope_limit: config.per_scope_concurrency.max(1),
            per_scope: Mutex::new(HashMap::new()),
            token_bucket,
            backoff: config.backoff,
        })
    }

    async fn per_scope_semaphore(&self, scope: &str) -> Arc<Semaphore> {
        let mut map = self.per_scope.lock().await;
        map.entry(scope.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_scope_limit)))
            .clone()
    }

    fn build(&self, request: &ApiRequest) -> reqwest::RequestBuilder {
        let mut builder = self.client.request(request.method.clone(), &request.url);
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        for (name, value) in &request.headers {
            builder = builder.header(*name, value);
        }
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.json {
            builder = builder.json(body);
        }
        builder
    }

    /// Send `request`, retrying transient failures with capped backoff.
    ///
    /// `scope` names the remote system; calls within one scope share a
    /// concurrency limit.
    pub async fn send(
        &self,
        scope: &str,
        request: &ApiRequest,
    ) -> Result<FetchedResponse, FetchError> {
        let _global = self
            .global_limit
            .acquire()
            .await
            .expect("semaphore not closed");
        let per_scope = self.per_scope_semaphore(scope).await;
        let _scope = per_scope.acquire().await.expect("semaphore not closed");

        let span = info_span!("http_call", scope, method = %request.method, url = %request.url);
        self.send_with_retries(request).instrument(span).await
    }

    async fn send_with_retries(&self, request: &ApiRequest) -> Result<FetchedResponse, FetchError> {
        let mut last_request_error: Option<reqwest::Error> = None;

        for attempt in 0..=self.backoff.max_retries {
            if let Some(bucket) = &self.token_bucket {
                bucket.take().await;
            }

            match self.build(request).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();
                    let next_link = resp
                        .headers()
                        .get(LINK)
                        .and_then(|v| v.to_str().ok())
                        .and_then(parse_next_link);

                    if status.is_success() {
                        let body = resp.bytes().await?.to_vec();
                        return Ok(FetchedResponse {
                            status,
                            final_url,
                            next_link,
                            body,
                        });
                    }

                    let disposition = classify_status(status);
                    if disposition == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        let delay = if status == StatusCode::TOO_MANY_REQUESTS {
                            retry_after(resp.headers())
                                .unwrap_or_else(|| self.backoff.delay_for_attempt(attempt))
                        } else {
                            self.backoff.delay_for_attempt(attempt)
                        };
                        warn!(
                            status = status.as_u16(),
                            attempt,
                            ?delay,
                            "retrying after transient status"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    let body = resp.text().await.unwrap_or_default();
                    return Err(FetchError::HttpStatus {
                        status: status.as_u16(),
                        url: final_url,
                        body,
                    });
                }
                Err(err) => {
                    let disposition = classify_reqwest_error(&err);
                    if disposition == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        debug!(error = %err, attempt, "retrying after transport error");
                        last_request_error = Some(err);
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(FetchError::Request(err));
                }
            }
        }

        Err(FetchError::Request(
            last_request_error.expect("retry loop should capture a request error"),
        ))
    }
}
