//! Seen-offer storage + shared HTTP fetch utilities for flatwatch.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use flatwatch_core::Listing;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tracing::{debug, info_span, Instrument};

pub const CRATE_NAME: &str = "flatwatch-storage";

/// Record of listing links that were already processed in an earlier cycle.
#[async_trait]
pub trait SeenStore: Send + Sync {
    fn contains(&self, listing: &Listing) -> bool;

    async fn append_many(&mut self, listings: &[Listing]) -> anyhow::Result<()>;

    /// True when nothing has ever been recorded.
    fn is_empty(&self) -> bool;
}

/// Append-only text file with one listing link per line, mirrored in memory.
#[derive(Debug)]
pub struct FileSeenStore {
    path: PathBuf,
    links: HashSet<String>,
}

impl FileSeenStore {
    pub async fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let links = if fs::try_exists(&path)
            .await
            .with_context(|| format!("checking seen store {}", path.display()))?
        {
            let text = fs::read_to_string(&path)
                .await
                .with_context(|| format!("reading seen store {}", path.display()))?;
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(ToString::to_string)
                .collect()
        } else {
            HashSet::new()
        };
        debug!(path = %path.display(), known = links.len(), "opened seen store");
        Ok(Self { path, links })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }
}

#[async_trait]
impl SeenStore for FileSeenStore {
    fn contains(&self, listing: &Listing) -> bool {
        self.links.contains(&listing.link)
    }

    async fn append_many(&mut self, listings: &[Listing]) -> anyhow::Result<()> {
        let mut buf = String::new();
        for listing in listings {
            if self.links.insert(listing.link.clone()) {
                buf.push_str(&listing.link);
                buf.push('\n');
            }
        }
        if buf.is_empty() {
            return Ok(());
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating seen store directory {}", parent.display()))?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("opening seen store {}", self.path.display()))?;
        file.write_all(buf.as_bytes())
            .await
            .with_context(|| format!("appending to seen store {}", self.path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing seen store {}", self.path.display()))?;
        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

/// In-process seen store, useful for previews and tests.
#[derive(Debug, Default, Clone)]
pub struct MemorySeenStore {
    links: HashSet<String>,
    appended_batches: usize,
}

impl MemorySeenStore {
    pub fn with_links<I, S>(links: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            links: links.into_iter().map(Into::into).collect(),
            appended_batches: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn appended_batches(&self) -> usize {
        self.appended_batches
    }
}

#[async_trait]
impl SeenStore for MemorySeenStore {
    fn contains(&self, listing: &Listing) -> bool {
        self.links.contains(&listing.link)
    }

    async fn append_many(&mut self, listings: &[Listing]) -> anyhow::Result<()> {
        self.appended_batches += 1;
        self.links
            .extend(listings.iter().map(|listing| listing.link.clone()));
        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.links.is_empty()
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
    if err.is_timeout() || err.is_connect() || err.is_request() {
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
            max_retries: 2,
            base_delay: Duration::from_millis(500),
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

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/111.0.0.0 Safari/537.36";

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: String,
    pub global_concurrency: usize,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            global_concurrency: 16,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Shared outbound HTTP capability. Read-only once built, so it is shared behind an `Arc`
/// by every concurrent fetch branch.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    global_limit: Arc<Semaphore>,
    backoff: BackoffPolicy,
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("invalid JSON from {url}: {source}")]
    Json {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .context("building reqwest client")?;

        Ok(Self {
            client,
            global_limit: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
            backoff: config.backoff,
        })
    }

    pub async fn fetch_bytes(&self, source: &str, url: &str) -> Result<FetchedResponse, FetchError> {
        self.send_with_retries(source, url, || self.client.get(url))
            .await
    }

    pub async fn get_text(&self, source: &str, url: &str) -> Result<String, FetchError> {
        let response = self.fetch_bytes(source, url).await?;
        Ok(String::from_utf8_lossy(&response.body).into_owned())
    }

    /// POST a JSON body and decode a JSON response. Used for search APIs whose queries
    /// are safe to repeat.
    pub async fn post_json<B, T>(&self, source: &str, url: &str, body: &B) -> Result<T, FetchError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .send_with_retries(source, url, || self.client.post(url).json(body))
            .await?;
        serde_json::from_slice(&response.body).map_err(|source| FetchError::Json {
            url: response.final_url,
            source,
        })
    }

    async fn send_with_retries<F>(
        &self,
        source: &str,
        url: &str,
        build: F,
    ) -> Result<FetchedResponse, FetchError>
    where
        F: Fn() -> RequestBuilder,
    {
        let _permit = self
            .global_limit
            .acquire()
            .await
            .expect("semaphore not closed");

        let span = info_span!("http_fetch", source, url);
        self.send_loop(build).instrument(span).await
    }

    async fn send_loop<F>(&self, build: F) -> Result<FetchedResponse, FetchError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            match build().send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();

                    if status.is_success() {
                        let body = resp.bytes().await?.to_vec();
                        return Ok(FetchedResponse {
                            status,
                            final_url,
                            body,
                        });
                    }

                    if classify_status(status) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }

                    return Err(FetchError::HttpStatus {
                        status: status.as_u16(),
                        url: final_url,
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        debug!(error = %err, attempt, "retrying request");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(FetchError::Request(err));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flatwatch_core::{Price, SourceIdentity};
    use tempfile::tempdir;

    fn listing(link: &str) -> Listing {
        let source = Arc::new(SourceIdentity::new("test", 0, ""));
        Listing::new(source, link, "Byt 2+kk", "Brno", Price::Amount(15_000), None)
    }

    #[tokio::test]
    async fn file_store_persists_links_across_reopen() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("found_offers.txt");

        let mut store = FileSeenStore::open(&path).await.expect("open");
        assert!(store.is_empty());
        store
            .append_many(&[listing("https://a"), listing("https://b")])
            .await
            .expect("append");
        store
            .append_many(&[listing("https://b"), listing("https://c")])
            .await
            .expect("append again");

        let reopened = FileSeenStore::open(&path).await.expect("reopen");
        assert_eq!(reopened.len(), 3);
        assert!(reopened.contains(&listing("https://a")));
        assert!(reopened.contains(&listing("https://c")));
        assert!(!reopened.contains(&listing("https://d")));

        let text = std::fs::read_to_string(&path).expect("read");
        assert_eq!(text.lines().count(), 3);
    }

    #[tokio::test]
    async fn memory_store_tracks_appends() {
        let mut store = MemorySeenStore::with_links(["https://old"]);
        assert!(store.contains(&listing("https://old")));
        store.append_many(&[listing("https://new")]).await.unwrap();
        assert!(store.contains(&listing("https://new")));
        assert_eq!(store.len(), 2);
        assert_eq!(store.appended_batches(), 1);
    }

    #[test]
    fn server_errors_and_rate_limits_are_retryable() {
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY), RetryDisposition::Retryable);
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            RetryDisposition::Retryable
        );
        assert_eq!(classify_status(StatusCode::NOT_FOUND), RetryDisposition::NonRetryable);
    }

    #[test]
    fn backoff_logic_is_exponential_and_capped() {
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(350));
    }
}
