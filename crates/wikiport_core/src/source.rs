use std::thread::sleep;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use tracing::debug;

use crate::client::{env_value_u64, env_value_usize, is_retryable_error, is_retryable_status};
use crate::config::PortConfig;
use crate::error::MigrateError;

/// Read access to the source documentation site.
pub trait SourceSite {
    /// HTML of the landing page, which carries the sidebar.
    fn fetch_landing(&mut self) -> Result<String>;
    /// Page body at `path` rendered in `format` (e.g. `text` for the raw markup).
    fn fetch_page(&mut self, path: &str, format: &str) -> Result<String>;
    fn fetch_raw(&mut self, url: &str) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone)]
pub struct SourceClientConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub retries: usize,
    pub retry_delay_ms: u64,
    pub min_interval_ms: u64,
}

impl SourceClientConfig {
    pub fn from_config(config: &PortConfig) -> Self {
        Self {
            base_url: config.source_url(),
            user_agent: config.user_agent(),
            timeout_ms: env_value_u64("WIKI_HTTP_TIMEOUT_MS", 30_000),
            retries: env_value_usize("WIKI_HTTP_RETRIES", 2),
            retry_delay_ms: env_value_u64("WIKI_HTTP_RETRY_DELAY_MS", 350),
            min_interval_ms: env_value_u64("WIKIPORT_SOURCE_INTERVAL_MS", 100),
        }
    }
}

pub struct FacepunchClient {
    client: Client,
    config: SourceClientConfig,
    last_request_at: Option<Instant>,
}

impl FacepunchClient {
    pub fn new(config: SourceClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build source HTTP client")?;
        Ok(Self {
            client,
            config,
            last_request_at: None,
        })
    }

    pub fn page_url(&self, path: &str, format: &str) -> String {
        format!("{}{}?format={}", self.config.base_url, path, format)
    }

    fn get_bytes(&mut self, url: &str) -> Result<Vec<u8>> {
        let mut last_error = String::from("request not attempted");
        for attempt in 0..=self.config.retries {
            self.wait_min_interval();
            let response = self
                .client
                .get(url)
                .header("User-Agent", self.config.user_agent.clone())
                .send();
            self.last_request_at = Some(Instant::now());

            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let bytes = response.bytes().map_err(|error| {
                            MigrateError::upstream(url, format!("failed to read body: {error}"))
                        })?;
                        debug!(url, bytes = bytes.len(), "fetched source resource");
                        return Ok(bytes.to_vec());
                    }
                    last_error = format!("HTTP {}", status.as_u16());
                    if attempt < self.config.retries && is_retryable_status(status) {
                        self.wait_before_retry(attempt);
                        continue;
                    }
                    break;
                }
                Err(error) => {
                    last_error = error.to_string();
                    if attempt < self.config.retries && is_retryable_error(&error) {
                        self.wait_before_retry(attempt);
                        continue;
                    }
                    break;
                }
            }
        }
        Err(MigrateError::upstream(url, last_error).into())
    }

    fn get_text(&mut self, url: &str) -> Result<String> {
        let bytes = self.get_bytes(url)?;
        String::from_utf8(bytes)
            .map_err(|error| MigrateError::upstream(url, format!("body is not UTF-8: {error}")).into())
    }

    fn wait_min_interval(&self) {
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            let min_delay = Duration::from_millis(self.config.min_interval_ms);
            if elapsed < min_delay {
                sleep(min_delay - elapsed);
            }
        }
    }

    fn wait_before_retry(&self, attempt: usize) {
        sleep(Duration::from_millis(
            self.config
                .retry_delay_ms
                .saturating_mul(attempt as u64 + 1),
        ));
    }
}

impl SourceSite for FacepunchClient {
    fn fetch_landing(&mut self) -> Result<String> {
        let url = self.config.base_url.clone();
        self.get_text(&url)
    }

    fn fetch_page(&mut self, path: &str, format: &str) -> Result<String> {
        let url = self.page_url(path, format);
        self.get_text(&url)
    }

    fn fetch_raw(&mut self, url: &str) -> Result<Vec<u8>> {
        self.get_bytes(url)
    }
}
