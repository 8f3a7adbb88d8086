//! Session credentials for the destination wiki.
//!
//! The destination exposes no password login for bots, so the session is a
//! browser cookie (`SESSDATA`). Pulling it out of a browser profile is left
//! to an external export step; this module only loads the exported
//! `{name: value}` map and validates it.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::error::MigrateError;

pub const SESSION_COOKIE_NAME: &str = "SESSDATA";

pub type CookieMap = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Browser {
    Edge,
    Chrome,
}

impl Browser {
    pub fn parse(value: &str) -> Result<Self> {
        let normalized = value.trim();
        if normalized.eq_ignore_ascii_case("edge") {
            return Ok(Self::Edge);
        }
        if normalized.eq_ignore_ascii_case("chrome") {
            return Ok(Self::Chrome);
        }
        Err(MigrateError::configuration(format!(
            "unsupported browser: {normalized} (expected edge|chrome)"
        ))
        .into())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Edge => "edge",
            Self::Chrome => "chrome",
        }
    }
}

pub trait CookieProvider {
    fn session_cookies(&self, browser: &str) -> Result<CookieMap>;
}

/// Reads `<auth_dir>/<browser>.json`, a flat JSON object of cookie names to values.
#[derive(Debug, Clone)]
pub struct ExportedCookieProvider {
    auth_dir: PathBuf,
}

impl ExportedCookieProvider {
    pub fn new(auth_dir: impl Into<PathBuf>) -> Self {
        Self {
            auth_dir: auth_dir.into(),
        }
    }

    pub fn export_path(&self, browser: Browser) -> PathBuf {
        self.auth_dir.join(format!("{}.json", browser.as_str()))
    }
}

impl CookieProvider for ExportedCookieProvider {
    fn session_cookies(&self, browser: &str) -> Result<CookieMap> {
        let browser = Browser::parse(browser)?;
        let path = self.export_path(browser);
        let cookies = read_cookie_export(&path)?;
        require_session_cookie(cookies, &path.display().to_string())
    }
}

/// Takes the session cookie from `WIKI_SESSDATA`, ignoring the browser argument
/// beyond validating it.
#[derive(Debug, Clone, Default)]
pub struct EnvCookieProvider;

impl CookieProvider for EnvCookieProvider {
    fn session_cookies(&self, browser: &str) -> Result<CookieMap> {
        Browser::parse(browser)?;
        let value = env::var("WIKI_SESSDATA").unwrap_or_default();
        let mut cookies = CookieMap::new();
        if !value.trim().is_empty() {
            cookies.insert(SESSION_COOKIE_NAME.to_string(), value.trim().to_string());
        }
        require_session_cookie(cookies, "WIKI_SESSDATA")
    }
}

fn read_cookie_export(path: &Path) -> Result<CookieMap> {
    let content = fs::read_to_string(path).map_err(|error| {
        MigrateError::configuration(format!(
            "failed to read cookie export {}: {error}",
            path.display()
        ))
    })?;
    let cookies: CookieMap = serde_json::from_str(&content).map_err(|error| {
        MigrateError::configuration(format!(
            "malformed cookie export {}: {error}",
            path.display()
        ))
    })?;
    Ok(cookies)
}

fn require_session_cookie(cookies: CookieMap, origin: &str) -> Result<CookieMap> {
    match cookies.get(SESSION_COOKIE_NAME) {
        Some(value) if !value.trim().is_empty() => Ok(cookies),
        _ => Err(MigrateError::configuration(format!(
            "{SESSION_COOKIE_NAME} cookie missing from {origin}"
        ))
        .into()),
    }
}
