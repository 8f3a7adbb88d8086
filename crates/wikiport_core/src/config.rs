use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_USER_AGENT: &str = "wikiport/0.1";
pub const DEFAULT_SOURCE_URL: &str = "https://wiki.facepunch.com/sbox/";
pub const DEFAULT_FILES_URL: &str = "https://files.facepunch.com/wiki/files/";
pub const DEFAULT_PAGE_FORMAT: &str = "text";
pub const DEFAULT_INDEX_PAGE: &str = "首页";
pub const DEFAULT_BROWSER: &str = "edge";
pub const DEFAULT_EDIT_SUMMARY: &str = "wikiport: migrate page from source wiki";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct PortConfig {
    #[serde(default)]
    pub source: SourceSection,
    #[serde(default)]
    pub target: TargetSection,
    #[serde(default)]
    pub auth: AuthSection,
    #[serde(default)]
    pub index: IndexSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct SourceSection {
    pub url: Option<String>,
    pub files_url: Option<String>,
    pub page_format: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct TargetSection {
    pub api_url: Option<String>,
    pub user_agent: Option<String>,
    pub index_page: Option<String>,
    pub edit_summary: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct AuthSection {
    pub browser: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct IndexSection {
    pub header_file: Option<String>,
    pub footer_file: Option<String>,
}

impl PortConfig {
    /// Source wiki base URL: env WIKIPORT_SOURCE_URL > config > default. Always ends in `/`.
    pub fn source_url(&self) -> String {
        let value = env_override("WIKIPORT_SOURCE_URL")
            .or_else(|| self.source.url.clone())
            .unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string());
        with_trailing_slash(&value)
    }

    /// Media host base URL: env WIKIPORT_FILES_URL > config > default. Always ends in `/`.
    pub fn files_url(&self) -> String {
        let value = env_override("WIKIPORT_FILES_URL")
            .or_else(|| self.source.files_url.clone())
            .unwrap_or_else(|| DEFAULT_FILES_URL.to_string());
        with_trailing_slash(&value)
    }

    pub fn page_format(&self) -> &str {
        self.source
            .page_format
            .as_deref()
            .unwrap_or(DEFAULT_PAGE_FORMAT)
    }

    /// Destination API URL: env WIKI_API_URL > config > None.
    pub fn api_url(&self) -> Option<String> {
        env_override("WIKI_API_URL").or_else(|| self.target.api_url.clone())
    }

    /// Resolve user agent: env WIKI_USER_AGENT > config > DEFAULT_USER_AGENT.
    pub fn user_agent(&self) -> String {
        env_override("WIKI_USER_AGENT")
            .or_else(|| self.target.user_agent.clone())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    pub fn index_page(&self) -> String {
        env_override("WIKIPORT_INDEX_PAGE")
            .or_else(|| self.target.index_page.clone())
            .unwrap_or_else(|| DEFAULT_INDEX_PAGE.to_string())
    }

    pub fn edit_summary(&self) -> &str {
        self.target
            .edit_summary
            .as_deref()
            .unwrap_or(DEFAULT_EDIT_SUMMARY)
    }

    pub fn browser(&self) -> String {
        env_override("WIKIPORT_BROWSER")
            .or_else(|| self.auth.browser.clone())
            .unwrap_or_else(|| DEFAULT_BROWSER.to_string())
    }
}

/// Load and parse a PortConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<PortConfig> {
    if !config_path.exists() {
        return Ok(PortConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: PortConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

fn env_override(key: &str) -> Option<String> {
    let value = env::var(key).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn with_trailing_slash(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    }
}
