use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;
use wikiport_core::client::{MediaWikiClient, MediaWikiClientConfig, OfflineWiki, WikiApi};
use wikiport_core::config::{PortConfig, load_config};
use wikiport_core::convert::PandocConverter;
use wikiport_core::cookies::{CookieMap, CookieProvider, EnvCookieProvider, ExportedCookieProvider};
use wikiport_core::index::{build_index, load_index_fragments, publish_index};
use wikiport_core::media::{MediaMigrator, OfflineAssetHost};
use wikiport_core::navigation::{Sidebar, parse_sidebar, parse_sidebar_file};
use wikiport_core::runtime::{
    PathOverrides, ResolutionContext, ResolvedPaths, ensure_state_layout, normalize_for_display,
    resolve_paths,
};
use wikiport_core::source::{FacepunchClient, SourceClientConfig, SourceSite};
use wikiport_core::sync::{
    PageSyncStatus, SyncContext, SyncRangeOptions, SyncReport, SyncSettings, delete_migrated_pages,
    sync_range,
};
use wikiport_core::transpile::transpile;

#[derive(Debug, Parser)]
#[command(
    name = "wikiport",
    version,
    about = "Migrate the s&box documentation wiki onto a MediaWiki site"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(short, long, global = true, help = "Log progress at info level")]
    verbose: bool,
    #[arg(long, global = true, help = "Print reports as JSON")]
    json: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    config: Option<PathBuf>,
    verbose: bool,
    json: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            config: cli.config.clone(),
            verbose: cli.verbose,
            json: cli.json,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Fetch the source landing page and show its sidebar")]
    Sidebar(SidebarArgs),
    #[command(about = "Migrate sidebar pages start..=end to the destination wiki")]
    Sync(SyncArgs),
    #[command(name = "delete-all", about = "Delete every destination page named after a sidebar path")]
    DeleteAll(DeleteAllArgs),
    #[command(about = "Rebuild the destination landing page from the sidebar")]
    Index(IndexArgs),
    #[command(about = "Transpile an already converted local file and print the result")]
    Transpile(TranspileArgs),
}

#[derive(Debug, Args)]
struct SidebarArgs {
    #[arg(long, help = "Print the generated menu lines instead of the tree")]
    menu: bool,
    #[arg(long, value_name = "PATH", help = "Parse a saved landing page instead of fetching it")]
    from_file: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct SyncArgs {
    #[arg(long, default_value_t = 0)]
    start: usize,
    #[arg(long, help = "Last page index, inclusive (defaults to the last sidebar choice)")]
    end: Option<usize>,
    #[arg(long, help = "Record failed pages and continue with the rest")]
    keep_going: bool,
    #[arg(long, help = "Fetch and transpile without uploading or writing")]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct DeleteAllArgs {
    #[arg(long, default_value = "wikiport: remove migrated page")]
    reason: String,
    #[arg(long)]
    dry_run: bool,
    #[arg(long, help = "Confirm deletion")]
    yes: bool,
}

#[derive(Debug, Args)]
struct IndexArgs {
    #[arg(long, help = "Print the page instead of publishing it")]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct TranspileArgs {
    file: PathBuf,
    #[arg(long, help = "Compute file names without fetching or uploading media")]
    offline: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(cli.verbose))
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Some(Commands::Sidebar(args)) => run_sidebar(&runtime, args),
        Some(Commands::Sync(args)) => run_sync(&runtime, args),
        Some(Commands::DeleteAll(args)) => run_delete_all(&runtime, args),
        Some(Commands::Index(args)) => run_index(&runtime, args),
        Some(Commands::Transpile(args)) => run_transpile(&runtime, args),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

/// `--verbose` enables INFO; otherwise `RUST_LOG`, falling back to WARN.
fn log_filter(verbose: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    }
}

struct Session {
    paths: ResolvedPaths,
    config: PortConfig,
}

fn open_session(runtime: &RuntimeOptions) -> Result<Session> {
    let paths = resolve_runtime_paths(runtime)?;
    let created = ensure_state_layout(&paths)?;
    for dir in created {
        info!(dir = %normalize_for_display(&dir), "created state directory");
    }
    if runtime.verbose {
        eprintln!("[diagnostics]\n{}", paths.diagnostics());
    }
    let config = load_config(&paths.config_path)?;
    Ok(Session { paths, config })
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        config: runtime.config.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let project_env = initial.project_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    resolve_paths(&context, &overrides)
}

fn source_client(session: &Session) -> Result<FacepunchClient> {
    FacepunchClient::new(SourceClientConfig::from_config(&session.config))
}

fn fetch_sidebar(source: &mut FacepunchClient) -> Result<Sidebar> {
    let html = source.fetch_landing().context("failed to fetch source landing page")?;
    parse_sidebar(&html)
}

/// Cookies come from `WIKI_SESSDATA` when set, otherwise from the exported browser file.
fn session_cookies(session: &Session) -> Result<CookieMap> {
    let browser = session.config.browser();
    let has_env_cookie = std::env::var("WIKI_SESSDATA")
        .map(|value| !value.trim().is_empty())
        .unwrap_or(false);
    if has_env_cookie {
        EnvCookieProvider.session_cookies(&browser)
    } else {
        ExportedCookieProvider::new(&session.paths.auth_dir).session_cookies(&browser)
    }
}

fn logged_in_wiki(session: &Session) -> Result<MediaWikiClient> {
    // Credentials are checked before any network activity.
    let cookies = session_cookies(session)?;
    let mut wiki = MediaWikiClient::new(MediaWikiClientConfig::from_config(&session.config)?)?;
    wiki.login_with_cookies(&cookies)?;
    Ok(wiki)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run_sidebar(runtime: &RuntimeOptions, args: SidebarArgs) -> Result<()> {
    let session = open_session(runtime)?;
    let sidebar = match &args.from_file {
        Some(path) => parse_sidebar_file(path)?,
        None => fetch_sidebar(&mut source_client(&session)?)?,
    };

    if args.menu {
        let lines = sidebar.menu_lines();
        if runtime.json {
            return print_json(&lines);
        }
        for line in lines {
            println!("{}", line.trim_start_matches('\r'));
        }
        return Ok(());
    }

    if runtime.json {
        return print_json(&sidebar);
    }
    for (index, entry) in sidebar.entries().enumerate() {
        println!("{index:>4}  {}  ({})", entry.relative_path, entry.display_name);
    }
    println!("choices: {}", sidebar.len());
    Ok(())
}

fn run_sync(runtime: &RuntimeOptions, args: SyncArgs) -> Result<()> {
    let session = open_session(runtime)?;
    let wiki = if args.dry_run {
        None
    } else {
        Some(logged_in_wiki(&session)?)
    };
    let mut source = source_client(&session)?;
    let sidebar = fetch_sidebar(&mut source)?;

    let end = args.end.unwrap_or_else(|| sidebar.len().saturating_sub(1));
    let options = SyncRangeOptions {
        start: args.start,
        end,
        keep_going: args.keep_going,
        dry_run: args.dry_run,
    };
    let report = match wiki {
        Some(mut wiki) => sync_with(&session, &sidebar, &mut source, &mut wiki, options)?,
        None => sync_with(&session, &sidebar, &mut source, &mut OfflineWiki, options)?,
    };

    if runtime.json {
        return print_json(&report);
    }
    println!("sync");
    println!("range: {}..={end}", args.start);
    println!("dry_run: {}", format_flag(args.dry_run));
    println!("pages: {}", report.pages.len());
    println!("written: {}", report.written);
    println!("failed: {}", report.failed);
    println!("uploaded_assets: {}", report.uploaded_assets.len());
    println!("request_count: {}", report.request_count);
    let failures: Vec<_> = report
        .pages
        .iter()
        .filter_map(|page| match &page.status {
            PageSyncStatus::Failed { error } => Some(error),
            _ => None,
        })
        .collect();
    if !failures.is_empty() {
        println!("failures:");
        for error in failures {
            println!("  - {error}");
        }
    }
    Ok(())
}

fn sync_with<W: WikiApi>(
    session: &Session,
    sidebar: &Sidebar,
    source: &mut FacepunchClient,
    wiki: &mut W,
    options: SyncRangeOptions,
) -> Result<SyncReport> {
    let converter = PandocConverter::default();
    let mut ctx = SyncContext {
        sidebar,
        source,
        wiki,
        converter: &converter,
        settings: SyncSettings::from_config(&session.config, &session.paths),
    };
    sync_range(&mut ctx, options)
}

fn run_delete_all(runtime: &RuntimeOptions, args: DeleteAllArgs) -> Result<()> {
    if !args.dry_run && !args.yes {
        bail!("delete-all removes every migrated page; pass --yes to confirm or --dry-run to preview");
    }
    let session = open_session(runtime)?;
    let mut wiki = logged_in_wiki(&session)?;
    let mut source = source_client(&session)?;
    let sidebar = fetch_sidebar(&mut source)?;

    let report = delete_migrated_pages(&sidebar, &mut wiki, &args.reason, args.dry_run)?;

    if runtime.json {
        return print_json(&report);
    }
    println!("delete-all");
    println!("dry_run: {}", format_flag(report.dry_run));
    println!("listed: {}", report.listed);
    println!("deleted: {}", report.deleted.len());
    for page in &report.deleted {
        println!("  - {page}");
    }
    println!("request_count: {}", report.request_count);
    Ok(())
}

fn run_index(runtime: &RuntimeOptions, args: IndexArgs) -> Result<()> {
    let session = open_session(runtime)?;
    let fragments = load_index_fragments(&session.paths, &session.config)?;
    let mut wiki = if args.dry_run {
        None
    } else {
        Some(logged_in_wiki(&session)?)
    };
    let mut source = source_client(&session)?;
    let sidebar = fetch_sidebar(&mut source)?;
    let content = build_index(&fragments.header, &fragments.footer, &sidebar);
    let title = session.config.index_page();

    let Some(wiki) = wiki.as_mut() else {
        print!("{content}");
        println!();
        return Ok(());
    };
    publish_index(wiki, &title, &content, session.config.edit_summary())?;
    println!("index");
    println!("title: {title}");
    println!("bytes: {}", content.len());
    println!("choices: {}", sidebar.len());
    Ok(())
}

fn run_transpile(runtime: &RuntimeOptions, args: TranspileArgs) -> Result<()> {
    let raw = fs::read_to_string(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    let session = open_session(runtime)?;
    let files_url = session.config.files_url();

    let report = if args.offline {
        let mut host = OfflineAssetHost::default();
        transpile(&raw, &files_url, &mut host)?
    } else {
        let mut source = source_client(&session)?;
        let mut wiki = logged_in_wiki(&session)?;
        let mut migrator = MediaMigrator::new(
            &mut source,
            &mut wiki,
            session.paths.staging_dir.clone(),
            session.config.edit_summary(),
        );
        transpile(&raw, &files_url, &mut migrator)?
    };

    if runtime.json {
        return print_json(&report);
    }
    print!("{}", report.markup);
    Ok(())
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
