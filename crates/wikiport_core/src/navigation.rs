//! Source sidebar model.
//!
//! The landing page only exposes flat, positional data: a list of section
//! headers, how many categories each section holds, how many choices each
//! category holds, and one long list of choice links. [`SidebarCounts`]
//! captures that raw shape and [`SidebarCounts::into_tree`] reconciles it
//! into a nested [`Sidebar`], refusing to build anything when the numbers
//! disagree.

use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;

use crate::error::MigrateError;

/// Page name used for the source root (`/sbox/`), which would otherwise strip to nothing.
pub const ROOT_PAGE_FALLBACK: &str = "index.php";

const SECTION_SELECTOR: &str = "body > #sidebar > div > #contents > .section";
const CHOICE_ITEM_SELECTOR: &str = "body > #sidebar > div > #contents > .section > details > ul > li";

static SBOX_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^/?sbox/").expect("valid sbox prefix regex"));

/// Strip a leading `sbox/` or `/sbox/` (any case).
pub fn remove_sbox_prefix(value: &str) -> String {
    SBOX_PREFIX_RE.replace(value, "").into_owned()
}

/// Turn a sidebar href into a destination page name.
pub fn normalize_sidebar_path(href: &str) -> String {
    let stripped = remove_sbox_prefix(href);
    if stripped.is_empty() {
        ROOT_PAGE_FALLBACK.to_string()
    } else {
        stripped
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SidebarEntry {
    pub display_name: String,
    pub relative_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SidebarCategory {
    pub name: String,
    pub choices: Vec<SidebarEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SidebarSection {
    pub name: String,
    pub categories: Vec<SidebarCategory>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Sidebar {
    pub sections: Vec<SidebarSection>,
}

/// Flat sequences scraped from the landing page, before reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SidebarCounts {
    pub section_names: Vec<String>,
    pub category_names: Vec<String>,
    /// Categories per section, parallel to `section_names`.
    pub category_counts: Vec<usize>,
    /// Choices per category, parallel to `category_names`.
    pub choice_counts: Vec<usize>,
    pub choices: Vec<SidebarEntry>,
}

impl SidebarCounts {
    pub fn into_tree(self) -> Result<Sidebar> {
        if self.section_names.len() != self.category_counts.len() {
            return Err(MigrateError::structural(format!(
                "{} section headers but {} section containers",
                self.section_names.len(),
                self.category_counts.len()
            ))
            .into());
        }
        let declared_categories: usize = self.category_counts.iter().sum();
        if declared_categories != self.category_names.len() {
            return Err(MigrateError::structural(format!(
                "sections declare {declared_categories} categories but {} category labels were found",
                self.category_names.len()
            ))
            .into());
        }
        if self.category_names.len() != self.choice_counts.len() {
            return Err(MigrateError::structural(format!(
                "{} category labels but {} choice counts",
                self.category_names.len(),
                self.choice_counts.len()
            ))
            .into());
        }
        let declared_choices: usize = self.choice_counts.iter().sum();
        if declared_choices != self.choices.len() {
            return Err(MigrateError::structural(format!(
                "categories declare {declared_choices} choices but {} choice links were found",
                self.choices.len()
            ))
            .into());
        }

        let mut categories = self.category_names.into_iter().zip(self.choice_counts);
        let mut choices = self.choices.into_iter();
        let mut sections = Vec::with_capacity(self.section_names.len());

        for (name, category_count) in self.section_names.into_iter().zip(self.category_counts) {
            let mut section = SidebarSection {
                name,
                categories: Vec::with_capacity(category_count),
            };
            for _ in 0..category_count {
                let (category_name, choice_count) = categories.next().ok_or_else(|| {
                    MigrateError::structural(format!(
                        "ran out of categories while filling section '{}'",
                        section.name
                    ))
                })?;
                let entries = choices.by_ref().take(choice_count).collect::<Vec<_>>();
                if entries.len() != choice_count {
                    return Err(MigrateError::structural(format!(
                        "category '{category_name}' declares {choice_count} choices but only {} remain",
                        entries.len()
                    ))
                    .into());
                }
                section.categories.push(SidebarCategory {
                    name: category_name,
                    choices: entries,
                });
            }
            sections.push(section);
        }

        Ok(Sidebar { sections })
    }
}

impl Sidebar {
    /// Menu markup lines in header, category, choice order. Each line carries its own
    /// leading line break so the lines can be concatenated directly.
    pub fn menu_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for section in &self.sections {
            lines.push(format!("\r={}=", section.name));
            for category in &section.categories {
                lines.push(format!("\r*{}", category.name));
                for choice in &category.choices {
                    lines.push(format!(
                        "\r#[[{}|{}]]",
                        choice.relative_path, choice.display_name
                    ));
                }
            }
        }
        lines
    }

    /// Leaf choices in source document order.
    pub fn entries(&self) -> impl Iterator<Item = &SidebarEntry> {
        self.sections
            .iter()
            .flat_map(|section| section.categories.iter())
            .flat_map(|category| category.choices.iter())
    }

    pub fn len(&self) -> usize {
        self.entries().count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().next().is_none()
    }

    pub fn contains_path(&self, name: &str) -> bool {
        self.entries().any(|entry| entry.relative_path == name)
    }
}

pub fn parse_sidebar(html: &str) -> Result<Sidebar> {
    parse_sidebar_counts(html)?.into_tree()
}

pub fn parse_sidebar_counts(html: &str) -> Result<SidebarCounts> {
    let document = Html::parse_document(html);

    let child_count = selector("span.child-count")?;
    let section = selector(SECTION_SELECTOR)?;
    let level1 = selector("details.level1")?;
    let header = selector("div.sectionheader")?;
    let choice_item = selector(CHOICE_ITEM_SELECTOR)?;
    let anchor = selector("a")?;

    let mut category_names = Vec::new();
    let mut choice_counts = Vec::new();
    for span in document.select(&child_count) {
        let raw = span.text().collect::<String>();
        let count = raw.trim().parse::<usize>().map_err(|_| {
            MigrateError::structural(format!("child-count value '{}' is not a number", raw.trim()))
        })?;
        let label = preceding_label(span).ok_or_else(|| {
            MigrateError::structural(format!("child-count {count} has no preceding category label"))
        })?;
        category_names.push(label);
        choice_counts.push(count);
    }

    let category_counts = document
        .select(&section)
        .map(|element| element.select(&level1).count())
        .collect::<Vec<_>>();

    let section_names = document
        .select(&header)
        .map(|element| first_text(element).unwrap_or_default())
        .collect::<Vec<_>>();

    let mut choices = Vec::new();
    for item in document.select(&choice_item) {
        for link in item.select(&anchor) {
            let href = link.value().attr("href").unwrap_or_default();
            choices.push(SidebarEntry {
                display_name: first_text(link).unwrap_or_default(),
                relative_path: normalize_sidebar_path(href),
            });
        }
    }

    Ok(SidebarCounts {
        section_names,
        category_names,
        category_counts,
        choice_counts,
        choices,
    })
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|error| anyhow!("invalid selector {css}: {error}"))
}

fn first_text(element: ElementRef<'_>) -> Option<String> {
    element
        .text()
        .map(str::trim)
        .find(|text| !text.is_empty())
        .map(ToString::to_string)
}

/// Text of the nearest non-blank sibling before `element`.
fn preceding_label(element: ElementRef<'_>) -> Option<String> {
    for sibling in element.prev_siblings() {
        if let Some(text) = sibling.value().as_text() {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
            continue;
        }
        if let Some(previous) = ElementRef::wrap(sibling) {
            let joined = previous.text().collect::<String>();
            let trimmed = joined.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

/// Parse a landing page already stored on disk.
pub fn parse_sidebar_file(path: &std::path::Path) -> Result<Sidebar> {
    let html = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_sidebar(&html)
}
