use std::fs;

use anyhow::{Context, Result};
use tracing::info;

use crate::client::WikiApi;
use crate::config::PortConfig;
use crate::navigation::Sidebar;
use crate::runtime::ResolvedPaths;

/// Landing page body: header, the sidebar menu, then footer.
///
/// Menu lines carry their own leading line break, so they are joined with nothing.
pub fn build_index(header: &str, footer: &str, sidebar: &Sidebar) -> String {
    let menu = sidebar.menu_lines().concat();
    let mut content = String::with_capacity(header.len() + menu.len() + footer.len());
    content.push_str(header);
    content.push_str(&menu);
    content.push_str(footer);
    content
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexFragments {
    pub header: String,
    pub footer: String,
}

pub fn load_index_fragments(paths: &ResolvedPaths, config: &PortConfig) -> Result<IndexFragments> {
    Ok(IndexFragments {
        header: read_fragment(paths, config.index.header_file.as_deref())?,
        footer: read_fragment(paths, config.index.footer_file.as_deref())?,
    })
}

fn read_fragment(paths: &ResolvedPaths, value: Option<&str>) -> Result<String> {
    let Some(value) = value.filter(|value| !value.trim().is_empty()) else {
        return Ok(String::new());
    };
    let path = paths.project_file(value);
    fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))
}

pub fn publish_index<W: WikiApi>(wiki: &mut W, title: &str, content: &str, summary: &str) -> Result<()> {
    wiki.edit_page(title, content, summary)
        .with_context(|| format!("failed to publish index page {title}"))?;
    info!(title, bytes = content.len(), "published index page");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    use super::*;
    use crate::config::IndexSection;
    use crate::navigation::parse_sidebar;
    use crate::navigation::tests::LANDING_FIXTURE;
    use crate::runtime::{PathOverrides, ResolutionContext, resolve_paths};
    use crate::testing::MockWiki;

    fn paths_for(root: &std::path::Path) -> ResolvedPaths {
        let context = ResolutionContext {
            cwd: root.to_path_buf(),
        };
        let overrides = PathOverrides {
            project_root: Some(root.to_path_buf()),
            config: None,
        };
        resolve_paths(&context, &overrides).expect("paths")
    }

    #[test]
    fn index_wraps_menu_with_header_and_footer() {
        let sidebar = parse_sidebar(LANDING_FIXTURE).expect("sidebar");
        let content = build_index("HEAD", "FOOT", &sidebar);

        assert!(content.starts_with("HEAD\r=Getting Started=\r*Introduction\r#[[index.php|Home]]"));
        assert!(content.ends_with("\r#[[ui/razor|Razor]]FOOT"));
        assert_eq!(content.matches("\r=").count(), 2);
        assert_eq!(content.matches("\r*").count(), 3);
        assert_eq!(content.matches("\r#").count(), 6);
    }

    #[test]
    fn empty_sidebar_yields_header_and_footer_only() {
        assert_eq!(build_index("a", "b", &Sidebar::default()), "ab");
    }

    #[test]
    fn fragments_resolve_against_project_root() {
        let temp = tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join("index")).expect("mkdir");
        fs::write(temp.path().join("index/header.wiki"), "== Welcome ==\n").expect("write");
        let config = PortConfig {
            index: IndexSection {
                header_file: Some("index/header.wiki".to_string()),
                footer_file: None,
            },
            ..PortConfig::default()
        };

        let fragments = load_index_fragments(&paths_for(temp.path()), &config).expect("fragments");
        assert_eq!(fragments.header, "== Welcome ==\n");
        assert_eq!(fragments.footer, "");
    }

    #[test]
    fn missing_configured_fragment_is_an_error() {
        let temp = tempdir().expect("tempdir");
        let config = PortConfig {
            index: IndexSection {
                header_file: None,
                footer_file: Some("nope.wiki".to_string()),
            },
            ..PortConfig::default()
        };

        let error = load_index_fragments(&paths_for(temp.path()), &config).expect_err("must fail");
        assert!(error.to_string().contains("nope.wiki"));
    }

    #[test]
    fn publish_writes_the_landing_page() {
        let mut wiki = MockWiki::default();
        publish_index(&mut wiki, "首页", "content", "index").expect("publish");
        assert_eq!(wiki.edited.get("首页").map(String::as_str), Some("content"));
    }
}
