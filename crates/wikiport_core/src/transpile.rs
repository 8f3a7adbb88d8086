//! Source markup to destination wiki markup.
//!
//! The converter output still carries the source site's private tags. The
//! input is scanned once into [`Segment`]s and a fixed sequence of passes
//! turns each recognised segment into final [`Segment::Markup`]. Markup is
//! never scanned again, so a single pass cannot feed itself.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::error::MigrateError;
use crate::media::{AssetFormat, AssetHost, sanitise_file_name};
use crate::navigation::remove_sbox_prefix;

static UPLOAD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^<upload[^>]*?src="([^"]*)"[^>]*?size="([^"]*)"?[^>]*?name="([^"]*)"?[^>]*>"#)
        .expect("valid upload regex")
});
static FILE_EMBED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[\[File:(https[^\[\]]+)\]\]").expect("valid file embed regex"));
static PAGE_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)^<page(?:\s+text="([^"]*)")?\s*>(.*?)</page>"#).expect("valid page link regex")
});
static BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^<(title|cat)>([^</>]*)</(title|cat)>").expect("valid block regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Open,
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    /// Final output.
    Markup(String),
    Upload {
        src: String,
        size: String,
        name: String,
        raw: String,
    },
    FileEmbed {
        url: String,
        raw: String,
    },
    Key(Edge),
    /// `<title>` and `</title>` with nothing but plain text between them.
    TitleBlock(String),
    Title(Edge),
    CatBlock(String),
    Cat(Edge),
    Note(Edge),
    Warning(Edge),
    PageLink {
        text: Option<String>,
        target: String,
    },
}

impl Segment {
    fn source_text(&self) -> String {
        let edge = |edge: &Edge, tag: &str| match edge {
            Edge::Open => format!("<{tag}>"),
            Edge::Close => format!("</{tag}>"),
        };
        match self {
            Segment::Text(text) | Segment::Markup(text) => text.clone(),
            Segment::Upload { raw, .. } | Segment::FileEmbed { raw, .. } => raw.clone(),
            Segment::Key(e) => edge(e, "key"),
            Segment::TitleBlock(body) => format!("<title>{body}</title>"),
            Segment::Title(e) => edge(e, "title"),
            Segment::CatBlock(body) => format!("<cat>{body}</cat>"),
            Segment::Cat(e) => edge(e, "cat"),
            Segment::Note(e) => edge(e, "note"),
            Segment::Warning(e) => edge(e, "warning"),
            Segment::PageLink { text, target } => match text {
                Some(text) => format!("<page text=\"{text}\">{target}</page>"),
                None => format!("<page>{target}</page>"),
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TranspileReport {
    pub markup: String,
    /// Remote names of rehosted media, in document order.
    pub uploads: Vec<String>,
    /// Upload tags with an unsupported format, rendered as external links.
    pub fallback_links: usize,
    /// File embeds with an unsupported format, left as they were.
    pub skipped_embeds: usize,
}

const LITERAL_TAGS: &[(&str, Segment)] = &[
    ("<key>", Segment::Key(Edge::Open)),
    ("</key>", Segment::Key(Edge::Close)),
    ("<title>", Segment::Title(Edge::Open)),
    ("</title>", Segment::Title(Edge::Close)),
    ("<cat>", Segment::Cat(Edge::Open)),
    ("</cat>", Segment::Cat(Edge::Close)),
    ("<note>", Segment::Note(Edge::Open)),
    ("</note>", Segment::Note(Edge::Close)),
    ("<warning>", Segment::Warning(Edge::Open)),
    ("</warning>", Segment::Warning(Edge::Close)),
];

/// Split raw markup into text and recognised tags.
pub fn tokenize(raw: &str) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut text = String::new();
    let mut offset = 0;

    while offset < raw.len() {
        let rest = &raw[offset..];
        let Some(candidate) = rest.find(['<', '[']) else {
            text.push_str(rest);
            break;
        };
        if candidate > 0 {
            text.push_str(&rest[..candidate]);
            offset += candidate;
            continue;
        }

        match recognise(rest) {
            Some((_, 0)) => return Err(MigrateError::NonTermination { offset }.into()),
            Some((segment, consumed)) => {
                if !text.is_empty() {
                    segments.push(Segment::Text(std::mem::take(&mut text)));
                }
                segments.push(segment);
                offset += consumed;
            }
            None => {
                // `<` and `[` are single bytes.
                text.push_str(&rest[..1]);
                offset += 1;
            }
        }
    }

    if !text.is_empty() {
        segments.push(Segment::Text(text));
    }
    Ok(segments)
}

fn recognise(rest: &str) -> Option<(Segment, usize)> {
    if rest.starts_with('[') {
        let captures = FILE_EMBED_RE.captures(rest)?;
        let raw = captures.get(0)?.as_str();
        return Some((
            Segment::FileEmbed {
                url: captures[1].to_string(),
                raw: raw.to_string(),
            },
            raw.len(),
        ));
    }

    if let Some(captures) = UPLOAD_RE.captures(rest) {
        let raw = captures.get(0)?.as_str();
        return Some((
            Segment::Upload {
                src: captures[1].to_string(),
                size: captures[2].to_string(),
                name: captures[3].to_string(),
                raw: raw.to_string(),
            },
            raw.len(),
        ));
    }

    if let Some(captures) = PAGE_LINK_RE.captures(rest) {
        let raw = captures.get(0)?.as_str();
        return Some((
            Segment::PageLink {
                text: captures.get(1).map(|m| m.as_str().to_string()),
                target: captures[2].to_string(),
            },
            raw.len(),
        ));
    }

    if let Some(captures) = BLOCK_RE.captures(rest) {
        if captures[1] == captures[3] {
            let raw = captures.get(0)?.as_str();
            let body = captures[2].to_string();
            let segment = if &captures[1] == "title" {
                Segment::TitleBlock(body)
            } else {
                Segment::CatBlock(body)
            };
            return Some((segment, raw.len()));
        }
    }

    LITERAL_TAGS
        .iter()
        .find(|(literal, _)| rest.starts_with(literal))
        .map(|(literal, segment)| (segment.clone(), literal.len()))
}

fn map_segments(
    segments: Vec<Segment>,
    mut pass: impl FnMut(Segment) -> Result<Segment>,
) -> Result<Vec<Segment>> {
    segments.into_iter().map(&mut pass).collect()
}

/// Rewrite converter output into destination markup, rehosting media through `host`.
///
/// `files_url` is the base for relative `<upload>` sources and must end with `/`.
pub fn transpile<H: AssetHost + ?Sized>(
    raw: &str,
    files_url: &str,
    host: &mut H,
) -> Result<TranspileReport> {
    let mut report = TranspileReport::default();
    let markup = transpile_fragment(raw, files_url, host, &mut report)?;
    report.markup = markup;
    Ok(report)
}

/// Full pass chain over one piece of markup. Page link bodies come back through
/// here before the link is built, so tags inside them are resolved too.
fn transpile_fragment<H: AssetHost + ?Sized>(
    raw: &str,
    files_url: &str,
    host: &mut H,
    report: &mut TranspileReport,
) -> Result<String> {
    let segments = tokenize(raw)?;

    let segments = map_segments(segments, |segment| match segment {
        Segment::Upload { src, size, name, .. } => {
            let full_url = format!("{files_url}{src}");
            if AssetFormat::for_name(&src).is_some() {
                debug!(src = %src, size = %size, name = %name, "rehosting upload tag");
                let remote = host
                    .rehost(&full_url)
                    .with_context(|| format!("failed to rehost {full_url}"))?;
                let markup = format!("[[File:{}|thumb]]", sanitise_file_name(&src));
                report.uploads.push(remote);
                Ok(Segment::Markup(markup))
            } else {
                report.fallback_links += 1;
                Ok(Segment::Markup(format!("[{full_url} {src}]")))
            }
        }
        Segment::FileEmbed { url, raw } => {
            if AssetFormat::for_name(&url).is_some() {
                let remote = host
                    .rehost(&url)
                    .with_context(|| format!("failed to rehost {url}"))?;
                let markup = format!("[[File:{}|thumb]]", sanitise_file_name(&url));
                report.uploads.push(remote);
                Ok(Segment::Markup(markup))
            } else {
                report.skipped_embeds += 1;
                Ok(Segment::Markup(raw))
            }
        }
        other => Ok(other),
    })?;

    let segments = map_segments(segments, |segment| {
        Ok(match segment {
            Segment::Key(Edge::Open) => Segment::Markup("<kbd>".to_string()),
            Segment::Key(Edge::Close) => Segment::Markup("</kbd>".to_string()),
            other => other,
        })
    })?;

    let segments = map_segments(segments, |segment| {
        Ok(match segment {
            Segment::Title(Edge::Open) => Segment::Markup("{{DISPLAYTITLE:".to_string()),
            Segment::Title(Edge::Close) => Segment::Markup("}}".to_string()),
            Segment::Cat(Edge::Open) => Segment::Markup("[[Category:".to_string()),
            Segment::Cat(Edge::Close) => Segment::Markup("]]".to_string()),
            Segment::TitleBlock(body) if !body.trim().is_empty() => {
                Segment::Markup(format!("{{{{DISPLAYTITLE:{body}}}}}"))
            }
            Segment::CatBlock(body) if !body.trim().is_empty() => {
                Segment::Markup(format!("[[Category:{body}]]"))
            }
            other => other,
        })
    })?;

    let segments = map_segments(segments, |segment| {
        Ok(match segment {
            Segment::Note(Edge::Open) => Segment::Markup("{{提示|笔记|".to_string()),
            Segment::Note(Edge::Close) => Segment::Markup("|注意}}".to_string()),
            Segment::Warning(Edge::Open) => Segment::Markup("{{提示|警告|".to_string()),
            Segment::Warning(Edge::Close) => Segment::Markup("|警告}}".to_string()),
            other => other,
        })
    })?;

    let segments = map_segments(segments, |segment| {
        Ok(match segment {
            Segment::PageLink { text, target } => {
                let target = transpile_fragment(&target, files_url, &mut *host, &mut *report)?;
                let page = remove_sbox_prefix(target.trim());
                let text = match text.filter(|text| !text.is_empty()) {
                    Some(text) => Some(transpile_fragment(&text, files_url, &mut *host, &mut *report)?),
                    None => None,
                };
                match text {
                    Some(text) => Segment::Markup(format!("[[{page}|{text}]]")),
                    None => Segment::Markup(format!("[[{page}]]")),
                }
            }
            other => other,
        })
    })?;

    // Only blank-bodied blocks survive to here.
    let segments = map_segments(segments, |segment| {
        Ok(match segment {
            Segment::TitleBlock(_) | Segment::CatBlock(_) => Segment::Markup(String::new()),
            other => other,
        })
    })?;

    Ok(segments.iter().map(Segment::source_text).collect())
}
