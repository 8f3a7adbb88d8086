use std::env;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::{Client, Response};
use reqwest::cookie::Jar;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::config::PortConfig;
use crate::cookies::CookieMap;
use crate::error::MigrateError;

pub const NS_MAIN: i32 = 0;

/// Destination wiki operations used by the migration.
pub trait WikiApi {
    fn login_with_cookies(&mut self, cookies: &CookieMap) -> Result<()>;
    fn list_all_pages(&mut self) -> Result<Vec<String>>;
    fn edit_page(&mut self, title: &str, content: &str, summary: &str) -> Result<()>;
    fn delete_page(&mut self, title: &str, reason: &str) -> Result<()>;
    fn upload_file(&mut self, path: &Path, dest_name: &str, comment: &str) -> Result<()>;
    fn request_count(&self) -> usize;
}

#[derive(Debug, Clone)]
pub struct MediaWikiClientConfig {
    pub api_url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub rate_limit_read_ms: u64,
    pub rate_limit_write_ms: u64,
    pub max_retries: usize,
    pub max_write_retries: usize,
    pub retry_delay_ms: u64,
}

impl MediaWikiClientConfig {
    pub fn from_config(config: &PortConfig) -> Result<Self> {
        let api_url = config.api_url().ok_or_else(|| {
            MigrateError::configuration(
                "destination API URL is not configured (set WIKI_API_URL or [target].api_url)",
            )
        })?;
        Ok(Self {
            api_url,
            user_agent: config.user_agent(),
            timeout_ms: env_value_u64("WIKI_HTTP_TIMEOUT_MS", 30_000),
            rate_limit_read_ms: env_value_u64("WIKI_RATE_LIMIT_READ", 300),
            rate_limit_write_ms: env_value_u64("WIKI_RATE_LIMIT_WRITE", 1_000),
            max_retries: env_value_usize("WIKI_HTTP_RETRIES", 2),
            max_write_retries: env_value_usize("WIKI_HTTP_WRITE_RETRIES", 1),
            retry_delay_ms: env_value_u64("WIKI_HTTP_RETRY_DELAY_MS", 500),
        })
    }
}

pub struct MediaWikiClient {
    client: Client,
    jar: Arc<Jar>,
    api_url: Url,
    config: MediaWikiClientConfig,
    last_request_at: Option<Instant>,
    request_count: usize,
    csrf_token: Option<String>,
}

impl MediaWikiClient {
    pub fn new(config: MediaWikiClientConfig) -> Result<Self> {
        let api_url = Url::parse(&config.api_url).map_err(|error| {
            MigrateError::configuration(format!("invalid API URL {}: {error}", config.api_url))
        })?;
        let jar = Arc::new(Jar::default());
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .cookie_provider(Arc::clone(&jar))
            .build()
            .context("failed to build MediaWiki HTTP client")?;

        Ok(Self {
            client,
            jar,
            api_url,
            config,
            last_request_at: None,
            request_count: 0,
            csrf_token: None,
        })
    }

    fn request_json_get(&mut self, params: &[(&str, String)]) -> Result<Value> {
        let pairs = api_pairs(params);

        for attempt in 0..=self.config.max_retries {
            self.apply_rate_limit(false);
            let response = self
                .client
                .get(self.api_url.clone())
                .header("User-Agent", self.config.user_agent.clone())
                .query(&pairs)
                .send();

            match response {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < self.config.max_retries && is_retryable_status(status) {
                            self.wait_before_retry(attempt, false);
                            continue;
                        }
                        bail!("MediaWiki API request failed with HTTP {status}");
                    }
                    return read_api_payload(response);
                }
                Err(error) => {
                    if attempt < self.config.max_retries && is_retryable_error(&error) {
                        self.wait_before_retry(attempt, false);
                        continue;
                    }
                    return Err(error).context("failed to call MediaWiki API");
                }
            }
        }

        bail!("MediaWiki API request exhausted retry budget")
    }

    fn request_json_post(&mut self, params: &[(&str, String)]) -> Result<Value> {
        let max_retries = self.config.max_write_retries;
        let pairs = api_pairs(params);

        for attempt in 0..=max_retries {
            self.apply_rate_limit(true);
            let response = self
                .client
                .post(self.api_url.clone())
                .header("User-Agent", self.config.user_agent.clone())
                .form(&pairs)
                .send();

            match response {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < max_retries && is_retryable_status(status) {
                            self.wait_before_retry(attempt, true);
                            continue;
                        }
                        bail!("MediaWiki API request failed with HTTP {status}");
                    }
                    return read_api_payload(response);
                }
                Err(error) => {
                    if attempt < max_retries && is_retryable_error(&error) {
                        self.wait_before_retry(attempt, true);
                        continue;
                    }
                    return Err(error).context("failed to call MediaWiki API");
                }
            }
        }

        bail!("MediaWiki API request exhausted retry budget")
    }

    fn request_multipart(
        &mut self,
        params: &[(&str, String)],
        file_name: &str,
        bytes: &[u8],
    ) -> Result<Value> {
        let max_retries = self.config.max_write_retries;
        let pairs = api_pairs(params);

        for attempt in 0..=max_retries {
            self.apply_rate_limit(true);
            let mut form = Form::new();
            for (key, value) in &pairs {
                form = form.text(key.clone(), value.clone());
            }
            let part = Part::bytes(bytes.to_vec()).file_name(file_name.to_string());
            form = form.part("file", part);

            let response = self
                .client
                .post(self.api_url.clone())
                .header("User-Agent", self.config.user_agent.clone())
                .multipart(form)
                .send();

            match response {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < max_retries && is_retryable_status(status) {
                            self.wait_before_retry(attempt, true);
                            continue;
                        }
                        bail!("MediaWiki upload failed with HTTP {status}");
                    }
                    return read_api_payload(response);
                }
                Err(error) => {
                    if attempt < max_retries && is_retryable_error(&error) {
                        self.wait_before_retry(attempt, true);
                        continue;
                    }
                    return Err(error).context("failed to upload to MediaWiki API");
                }
            }
        }

        bail!("MediaWiki upload exhausted retry budget")
    }

    fn apply_rate_limit(&mut self, is_write: bool) {
        let delay = if is_write {
            Duration::from_millis(self.config.rate_limit_write_ms)
        } else {
            Duration::from_millis(self.config.rate_limit_read_ms)
        };
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
        self.request_count += 1;
    }

    fn wait_before_retry(&self, attempt: usize, is_write: bool) {
        let exponent = u32::try_from(attempt).unwrap_or(16);
        let base = self
            .config
            .retry_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent));
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| u64::from(duration.subsec_millis() % 100))
            .unwrap_or(0);
        let multiplier = if is_write { 2u64 } else { 1u64 };
        sleep(Duration::from_millis(
            base.saturating_mul(multiplier).saturating_add(jitter),
        ));
    }

    fn ensure_csrf_token(&mut self) -> Result<String> {
        if let Some(token) = &self.csrf_token {
            return Ok(token.clone());
        }
        let response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("meta", "tokens".to_string()),
        ])?;
        let parsed: TokenQueryResponse =
            serde_json::from_value(response).context("failed to decode csrf token response")?;
        let token = parsed
            .query
            .tokens
            .and_then(|tokens| tokens.csrftoken)
            .ok_or_else(|| anyhow::anyhow!("failed to get MediaWiki csrf token"))?;
        self.csrf_token = Some(token.clone());
        Ok(token)
    }
}

impl WikiApi for MediaWikiClient {
    fn login_with_cookies(&mut self, cookies: &CookieMap) -> Result<()> {
        for (name, value) in cookies {
            self.jar
                .add_cookie_str(&format!("{name}={value}; Path=/"), &self.api_url);
        }
        self.csrf_token = None;

        let response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("meta", "userinfo".to_string()),
        ])?;
        let parsed: UserInfoResponse =
            serde_json::from_value(response).context("failed to decode userinfo response")?;
        let user = parsed
            .query
            .userinfo
            .ok_or_else(|| anyhow::anyhow!("missing userinfo payload in API response"))?;
        if user.anon || user.id == 0 {
            bail!("MediaWiki session cookies were not accepted (still anonymous)");
        }
        debug!(user = %user.name, "logged in with session cookies");
        Ok(())
    }

    fn list_all_pages(&mut self) -> Result<Vec<String>> {
        let mut titles = Vec::new();
        let mut continue_token: Option<String> = None;

        loop {
            let mut params = vec![
                ("action", "query".to_string()),
                ("list", "allpages".to_string()),
                ("apnamespace", NS_MAIN.to_string()),
                ("aplimit", "500".to_string()),
            ];
            if let Some(token) = &continue_token {
                params.push(("apcontinue", token.clone()));
            }

            let response = self.request_json_get(&params)?;
            let parsed: AllPagesResponse = serde_json::from_value(response)
                .context("failed to decode allpages API response")?;

            for item in parsed.query.allpages {
                titles.push(item.title);
            }

            continue_token = parsed.continuation.and_then(|cont| cont.apcontinue);
            if continue_token.is_none() {
                break;
            }
        }

        Ok(titles)
    }

    fn edit_page(&mut self, title: &str, content: &str, summary: &str) -> Result<()> {
        let token = self.ensure_csrf_token()?;
        let response = self.request_json_post(&[
            ("action", "edit".to_string()),
            ("title", title.to_string()),
            ("text", content.to_string()),
            ("summary", summary.to_string()),
            ("bot", "1".to_string()),
            ("token", token),
        ])?;
        let edit_payload: EditResponse =
            serde_json::from_value(response).context("failed to decode edit response")?;
        let edit = edit_payload
            .edit
            .ok_or_else(|| anyhow::anyhow!("missing edit payload in API response"))?;
        if edit.result.as_deref() != Some("Success") {
            bail!(
                "MediaWiki edit failed for {}: {}",
                title,
                edit.result.unwrap_or_else(|| "unknown".to_string())
            );
        }
        Ok(())
    }

    fn delete_page(&mut self, title: &str, reason: &str) -> Result<()> {
        let token = self.ensure_csrf_token()?;
        let response = self.request_json_post(&[
            ("action", "delete".to_string()),
            ("title", title.to_string()),
            ("reason", reason.to_string()),
            ("token", token),
        ]);

        match response {
            Ok(_) => Ok(()),
            Err(error) => {
                if error.to_string().contains("missingtitle") {
                    return Ok(());
                }
                Err(error)
            }
        }
    }

    fn upload_file(&mut self, path: &Path, dest_name: &str, comment: &str) -> Result<()> {
        let bytes =
            fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let token = self.ensure_csrf_token()?;
        let response = self.request_multipart(
            &[
                ("action", "upload".to_string()),
                ("filename", dest_name.to_string()),
                ("comment", comment.to_string()),
                ("ignorewarnings", "1".to_string()),
                ("token", token),
            ],
            dest_name,
            &bytes,
        );

        let payload = match response {
            Ok(payload) => payload,
            // Same bytes already hosted under this name.
            Err(error) if error.to_string().contains("fileexists-no-change") => return Ok(()),
            Err(error) => return Err(error),
        };
        let upload: UploadResponse =
            serde_json::from_value(payload).context("failed to decode upload response")?;
        match upload.upload.and_then(|upload| upload.result).as_deref() {
            Some("Success") => Ok(()),
            other => bail!(
                "MediaWiki upload failed for {dest_name}: {}",
                other.unwrap_or("unknown")
            ),
        }
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

/// Stand-in for runs that must not touch the destination wiki. Every call
/// other than `request_count` fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineWiki;

impl OfflineWiki {
    fn refuse(operation: &str) -> Result<()> {
        bail!("{operation} is not available without a destination wiki session")
    }
}

impl WikiApi for OfflineWiki {
    fn login_with_cookies(&mut self, _cookies: &CookieMap) -> Result<()> {
        Self::refuse("login")
    }

    fn list_all_pages(&mut self) -> Result<Vec<String>> {
        bail!("page listing is not available without a destination wiki session")
    }

    fn edit_page(&mut self, title: &str, _content: &str, _summary: &str) -> Result<()> {
        Self::refuse(&format!("editing {title}"))
    }

    fn delete_page(&mut self, title: &str, _reason: &str) -> Result<()> {
        Self::refuse(&format!("deleting {title}"))
    }

    fn upload_file(&mut self, _path: &Path, dest_name: &str, _comment: &str) -> Result<()> {
        Self::refuse(&format!("uploading {dest_name}"))
    }

    fn request_count(&self) -> usize {
        0
    }
}

fn api_pairs(params: &[(&str, String)]) -> Vec<(String, String)> {
    let mut pairs = Vec::with_capacity(params.len() + 2);
    pairs.push(("format".to_string(), "json".to_string()));
    pairs.push(("formatversion".to_string(), "2".to_string()));
    for (key, value) in params {
        if !value.is_empty() {
            pairs.push(((*key).to_string(), value.clone()));
        }
    }
    pairs
}

fn read_api_payload(response: Response) -> Result<Value> {
    let payload: Value = response
        .json()
        .context("failed to decode MediaWiki API JSON response")?;
    check_api_error(payload)
}

fn check_api_error(payload: Value) -> Result<Value> {
    if let Some(error) = payload.get("error") {
        let code = error
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error");
        let info = error
            .get("info")
            .and_then(Value::as_str)
            .unwrap_or("unknown info");
        bail!("MediaWiki API error [{code}]: {info}");
    }
    Ok(payload)
}

pub(crate) fn env_value_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

pub(crate) fn env_value_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

pub(crate) fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

pub(crate) fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

#[derive(Debug, Deserialize, Default)]
struct AllPagesResponse {
    #[serde(default)]
    query: AllPagesPayload,
    #[serde(default, rename = "continue")]
    continuation: Option<ContinuationPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct AllPagesPayload {
    #[serde(default)]
    allpages: Vec<TitleQueryItem>,
}

#[derive(Debug, Deserialize, Default)]
struct ContinuationPayload {
    apcontinue: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TitleQueryItem {
    title: String,
}

#[derive(Debug, Deserialize, Default)]
struct UserInfoResponse {
    #[serde(default)]
    query: UserInfoQuery,
}

#[derive(Debug, Deserialize, Default)]
struct UserInfoQuery {
    userinfo: Option<UserInfoPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct UserInfoPayload {
    #[serde(default)]
    id: i64,
    #[serde(default)]
    name: String,
    #[serde(default)]
    anon: bool,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryResponse {
    #[serde(default)]
    query: TokenQueryPayload,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryPayload {
    tokens: Option<TokenPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct TokenPayload {
    csrftoken: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct EditResponse {
    edit: Option<EditPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct EditPayload {
    result: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct UploadResponse {
    upload: Option<UploadPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct UploadPayload {
    result: Option<String>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn offline_wiki_refuses_every_write() {
        let mut wiki = OfflineWiki;
        let error = wiki.edit_page("Foo", "x", "s").expect_err("edit must fail");
        assert!(error.to_string().contains("editing Foo"));
        assert!(wiki.list_all_pages().is_err());
        assert!(wiki.upload_file(Path::new("a.png"), "A.png", "c").is_err());
        assert_eq!(wiki.request_count(), 0);
    }

    #[test]
    fn api_pairs_prepend_format_and_drop_empty_values() {
        let pairs = api_pairs(&[
            ("action", "query".to_string()),
            ("apcontinue", String::new()),
        ]);
        assert_eq!(
            pairs,
            vec![
                ("format".to_string(), "json".to_string()),
                ("formatversion".to_string(), "2".to_string()),
                ("action".to_string(), "query".to_string()),
            ]
        );
    }

    #[test]
    fn api_error_payload_is_surfaced() {
        let error = check_api_error(json!({
            "error": {"code": "missingtitle", "info": "The page you specified doesn't exist."}
        }))
        .expect_err("must fail");
        assert!(error.to_string().contains("[missingtitle]"));

        let payload = check_api_error(json!({"edit": {"result": "Success"}})).expect("ok");
        assert!(payload.get("edit").is_some());
    }

    #[test]
    fn anonymous_userinfo_decodes() {
        let parsed: UserInfoResponse = serde_json::from_value(json!({
            "batchcomplete": true,
            "query": {"userinfo": {"id": 0, "name": "127.0.0.1", "anon": true}}
        }))
        .expect("decode");
        let user = parsed.query.userinfo.expect("userinfo");
        assert!(user.anon);
        assert_eq!(user.id, 0);
    }

    #[test]
    fn allpages_continuation_decodes() {
        let parsed: AllPagesResponse = serde_json::from_value(json!({
            "continue": {"apcontinue": "Beta", "continue": "-||"},
            "query": {"allpages": [{"pageid": 1, "ns": 0, "title": "Alpha"}]}
        }))
        .expect("decode");
        assert_eq!(parsed.query.allpages[0].title, "Alpha");
        assert_eq!(
            parsed.continuation.and_then(|cont| cont.apcontinue).as_deref(),
            Some("Beta")
        );
    }

    #[test]
    fn retryable_statuses_are_transient_only() {
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(StatusCode::BAD_GATEWAY));
        assert!(!is_retryable_status(StatusCode::NOT_FOUND));
        assert!(!is_retryable_status(StatusCode::FORBIDDEN));
    }

    #[test]
    fn missing_api_url_is_configuration_error() {
        let config = PortConfig::default();
        if std::env::var("WIKI_API_URL").is_ok() {
            return;
        }
        let error = MediaWikiClientConfig::from_config(&config).expect_err("must fail");
        assert!(matches!(
            error.downcast_ref::<MigrateError>(),
            Some(MigrateError::Configuration(_))
        ));
    }
}
