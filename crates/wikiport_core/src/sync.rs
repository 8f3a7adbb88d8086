use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::client::WikiApi;
use crate::config::PortConfig;
use crate::convert::{ConversionSpec, FormatConverter};
use crate::media::{MediaMigrator, OfflineAssetHost, UploadedAsset};
use crate::navigation::Sidebar;
use crate::runtime::ResolvedPaths;
use crate::source::SourceSite;
use crate::transpile::{TranspileReport, transpile};

/// One sidebar choice scheduled for migration, with its document-order position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageTask {
    pub index: usize,
    pub relative_path: String,
    pub display_name: String,
}

impl Sidebar {
    /// Choices with positions in `start..=end`. Bounds past the end are clamped.
    pub fn tasks(&self, start: usize, end: usize) -> Vec<PageTask> {
        self.entries()
            .enumerate()
            .skip(start)
            .take_while(|(index, _)| *index <= end)
            .map(|(index, entry)| PageTask {
                index,
                relative_path: entry.relative_path.clone(),
                display_name: entry.display_name.clone(),
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub files_url: String,
    pub page_format: String,
    pub staging_dir: PathBuf,
    pub summary: String,
    pub conversion: ConversionSpec,
}

impl SyncSettings {
    pub fn from_config(config: &PortConfig, paths: &ResolvedPaths) -> Self {
        Self {
            files_url: config.files_url(),
            page_format: config.page_format().to_string(),
            staging_dir: paths.staging_dir.clone(),
            summary: config.edit_summary().to_string(),
            conversion: ConversionSpec::default(),
        }
    }
}

pub struct SyncContext<'a, S: SourceSite, W: WikiApi, C: FormatConverter + ?Sized> {
    pub sidebar: &'a Sidebar,
    pub source: &'a mut S,
    pub wiki: &'a mut W,
    pub converter: &'a C,
    pub settings: SyncSettings,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncRangeOptions {
    pub start: usize,
    pub end: usize,
    /// Log and record a failed page instead of aborting the run.
    pub keep_going: bool,
    /// Fetch, convert and transpile without uploading or writing.
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PageSyncStatus {
    Written,
    DryRun,
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct PageSyncResult {
    pub index: usize,
    pub relative_path: String,
    pub display_name: String,
    #[serde(flatten)]
    pub status: PageSyncStatus,
    pub uploads: usize,
    pub fallback_links: usize,
    pub skipped_embeds: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub pages: Vec<PageSyncResult>,
    pub written: usize,
    pub failed: usize,
    pub uploaded_assets: Vec<UploadedAsset>,
    pub request_count: usize,
}

/// Migrate every sidebar choice in `start..=end`, in order.
///
/// Each page is written as a full overwrite. Without `keep_going` the first
/// failing page ends the run; pages before it stay written.
pub fn sync_range<S, W, C>(
    ctx: &mut SyncContext<'_, S, W, C>,
    options: SyncRangeOptions,
) -> Result<SyncReport>
where
    S: SourceSite,
    W: WikiApi,
    C: FormatConverter + ?Sized,
{
    let tasks = ctx.sidebar.tasks(options.start, options.end);
    info!(
        start = options.start,
        end = options.end,
        pages = tasks.len(),
        dry_run = options.dry_run,
        "starting sync range"
    );

    let mut report = SyncReport::default();
    for task in tasks {
        let outcome = sync_page(ctx, &task, options.dry_run)
            .with_context(|| format!("page #{} ({})", task.index, task.relative_path));

        match outcome {
            Ok((transpiled, uploaded)) => {
                let status = if options.dry_run {
                    PageSyncStatus::DryRun
                } else {
                    report.written += 1;
                    PageSyncStatus::Written
                };
                info!(index = task.index, path = %task.relative_path, uploads = transpiled.uploads.len(), "page synced");
                report.pages.push(PageSyncResult {
                    index: task.index,
                    relative_path: task.relative_path,
                    display_name: task.display_name,
                    status,
                    uploads: transpiled.uploads.len(),
                    fallback_links: transpiled.fallback_links,
                    skipped_embeds: transpiled.skipped_embeds,
                });
                report.uploaded_assets.extend(uploaded);
            }
            Err(error) if options.keep_going => {
                warn!(index = task.index, path = %task.relative_path, error = %format!("{error:#}"), "page failed, continuing");
                report.failed += 1;
                report.pages.push(PageSyncResult {
                    index: task.index,
                    relative_path: task.relative_path,
                    display_name: task.display_name,
                    status: PageSyncStatus::Failed {
                        error: format!("{error:#}"),
                    },
                    uploads: 0,
                    fallback_links: 0,
                    skipped_embeds: 0,
                });
            }
            Err(error) => return Err(error),
        }
    }

    report.request_count = ctx.wiki.request_count();
    Ok(report)
}

fn sync_page<S, W, C>(
    ctx: &mut SyncContext<'_, S, W, C>,
    task: &PageTask,
    dry_run: bool,
) -> Result<(TranspileReport, Vec<UploadedAsset>)>
where
    S: SourceSite,
    W: WikiApi,
    C: FormatConverter + ?Sized,
{
    let settings = &ctx.settings;
    let raw = ctx
        .source
        .fetch_page(&task.relative_path, &settings.page_format)?;
    let converted = settings
        .conversion
        .apply(ctx.converter, &raw)
        .context("format conversion failed")?;

    if dry_run {
        let mut host = OfflineAssetHost::default();
        let transpiled = transpile(&converted, &settings.files_url, &mut host)?;
        return Ok((transpiled, Vec::new()));
    }

    let mut migrator = MediaMigrator::new(
        &mut *ctx.source,
        &mut *ctx.wiki,
        settings.staging_dir.clone(),
        settings.summary.clone(),
    );
    let transpiled = transpile(&converted, &settings.files_url, &mut migrator)?;
    let uploaded = migrator.into_uploaded();

    ctx.wiki
        .edit_page(&task.relative_path, &transpiled.markup, &settings.summary)?;
    Ok((transpiled, uploaded))
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DeleteReport {
    pub listed: usize,
    pub deleted: Vec<String>,
    pub dry_run: bool,
    pub request_count: usize,
}

/// Delete every destination page whose name is a sidebar path.
///
/// Membership is a linear scan of the sidebar for every listed page. Both
/// sides are a few hundred names at most.
pub fn delete_migrated_pages<W: WikiApi>(
    sidebar: &Sidebar,
    wiki: &mut W,
    reason: &str,
    dry_run: bool,
) -> Result<DeleteReport> {
    let pages = wiki.list_all_pages()?;
    let mut report = DeleteReport {
        listed: pages.len(),
        dry_run,
        ..DeleteReport::default()
    };

    for page in pages {
        if !sidebar.contains_path(&page) {
            continue;
        }
        if !dry_run {
            wiki.delete_page(&page, reason)
                .with_context(|| format!("failed to delete {page}"))?;
            info!(page = %page, "deleted migrated page");
        }
        report.deleted.push(page);
    }

    report.request_count = wiki.request_count();
    Ok(report)
}
