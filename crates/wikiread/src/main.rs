use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use colored::{Color, Colorize};
use tracing::{debug, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use wikiread_core::config::load_config;
use wikiread_core::endpoint::{Endpoint, title_to_key};
use wikiread_core::export::{
    ExportFormat, article_base, default_export_path, render_export, write_export,
};
use wikiread_core::provider::{
    DEFAULT_TITLE_LIMIT, ProviderConfig, SearchPage, WikipediaApi, WikipediaProvider,
    unix_now,
};
use wikiread_core::runtime::{
    PathOverrides, ResolutionContext, ResolvedPaths, init_layout, inspect_runtime,
    normalize_for_display, resolve_paths,
};
use wikiread_core::store::TokenStore;

#[derive(Debug, Parser)]
#[command(
    name = "wikiread",
    version,
    about = "Search, read, summarize and export Wikipedia articles"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH", help = "SQLite file for stored tokens")]
    db: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    db: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            db: cli.db.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Search for articles on Wikipedia")]
    Search(SearchArgs),
    #[command(about = "Read an article from Wikipedia")]
    Read(TitleArgs),
    #[command(about = "Export an article from Wikipedia")]
    Export(ExportArgs),
    #[command(about = "Get a random article from Wikipedia")]
    Random,
    #[command(about = "Get a summary of an article from Wikipedia")]
    Summary(TitleArgs),
    #[command(about = "Get links from an article on Wikipedia")]
    Links(TitleArgs),
    #[command(about = "Acquire, inspect and clear OAuth2 credentials")]
    Auth(AuthArgs),
    #[command(about = "Local token database maintenance")]
    Db(DbArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SearchType {
    Articles,
    Titles,
}

#[derive(Debug, Args)]
struct SearchArgs {
    #[arg(required = true, num_args = 1..)]
    terms: Vec<String>,
    #[arg(long, value_enum, default_value_t = SearchType::Articles)]
    search_type: SearchType,
    #[arg(long, default_value_t = DEFAULT_TITLE_LIMIT)]
    limit: u32,
}

#[derive(Debug, Args)]
struct TitleArgs {
    title: String,
}

#[derive(Debug, Args)]
struct ExportArgs {
    title: String,
    #[arg(long, default_value = "text", value_parser = parse_export_format)]
    format: ExportFormat,
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct AuthArgs {
    #[command(subcommand)]
    command: AuthSubcommand,
}

#[derive(Debug, Subcommand)]
enum AuthSubcommand {
    #[command(about = "Request an access token with the client-credentials grant")]
    Token {
        #[arg(long, help = "Do not persist the acquired token")]
        no_save: bool,
    },
    Status,
    Clear,
}

#[derive(Debug, Args)]
struct DbArgs {
    #[command(subcommand)]
    command: DbSubcommand,
}

#[derive(Debug, Subcommand)]
enum DbSubcommand {
    Init {
        #[arg(long, help = "Overwrite an existing config file")]
        force: bool,
    },
    Stats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    Search,
    Read,
    Export,
    Random,
    Summary,
    Links,
}

impl Tag {
    fn label(self) -> &'static str {
        match self {
            Self::Search => "Search",
            Self::Read => "Read",
            Self::Export => "Export",
            Self::Random => "Random",
            Self::Summary => "Summary",
            Self::Links => "Links",
        }
    }

    fn color(self) -> Color {
        match self {
            Self::Search => Color::Blue,
            Self::Read => Color::Magenta,
            Self::Export => Color::Yellow,
            Self::Random => Color::Cyan,
            Self::Summary => Color::Green,
            Self::Links => Color::BrightMagenta,
        }
    }

    fn print(self, out: &mut impl Write, message: &str) -> io::Result<()> {
        let tag = format!(" {} ", self.label().to_uppercase());
        writeln!(
            out,
            "{} {}",
            tag.as_str().on_color(self.color()).bold(),
            message.color(self.color())
        )
    }
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_writer(io::stderr),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_ansi(true)
                    .with_writer(io::stderr),
            )
            .init();
    }
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);
    let runtime = RuntimeOptions::from_cli(&cli);

    let Some(command) = cli.command else {
        let mut command = Cli::command();
        command.print_help()?;
        println!();
        return Ok(());
    };

    let paths = resolve_runtime_paths(&runtime)?;
    if runtime.diagnostics {
        eprintln!("[diagnostics]\n{}", paths.diagnostics());
    }
    let store = TokenStore::new(&paths.db_path);
    let stdout = io::stdout();
    let mut out = stdout.lock();

    match command {
        Commands::Db(DbArgs { command }) => match command {
            DbSubcommand::Init { force } => run_db_init(&paths, &store, force, &mut out),
            DbSubcommand::Stats => run_db_stats(&paths, &store, &mut out),
        },
        Commands::Auth(AuthArgs { command }) => match command {
            AuthSubcommand::Token { no_save } => {
                let provider = build_provider(&paths)?;
                run_auth_token(&provider, &store, no_save, &mut out)
            }
            AuthSubcommand::Status => run_auth_status(&store, unix_now(), &mut out),
            AuthSubcommand::Clear => run_auth_clear(&store, &mut out),
        },
        command => {
            let mut provider = build_provider(&paths)?;
            attach_stored_token(&mut provider, &store, unix_now())?;
            let base = article_base(&provider.config().random_url).to_string();
            run_article_command(&provider, command, &paths.exports_dir, &base, &mut out)
        }
    }
}

fn run_article_command<A: WikipediaApi>(
    api: &A,
    command: Commands,
    exports_dir: &Path,
    article_base: &str,
    out: &mut impl Write,
) -> Result<()> {
    match command {
        Commands::Search(args) => run_search(api, &args, out),
        Commands::Read(TitleArgs { title }) => run_read(api, &title, out),
        Commands::Export(args) => run_export(api, &args, exports_dir, article_base, out),
        Commands::Random => run_random(api, out),
        Commands::Summary(TitleArgs { title }) => run_summary(api, &title, out),
        Commands::Links(TitleArgs { title }) => run_links(&title, out),
        Commands::Auth(_) | Commands::Db(_) => bail!("not an article command"),
    }
}

fn run_search<A: WikipediaApi>(api: &A, args: &SearchArgs, out: &mut impl Write) -> Result<()> {
    let terms = split_terms(&args.terms);
    let joined = terms.join(" ");
    let results = match args.search_type {
        SearchType::Articles => {
            Tag::Search.print(
                out,
                &format!(
                    "Searching for articles containing: '{joined}' and a limit of {}.",
                    args.limit
                ),
            )?;
            api.search_articles(&terms, args.limit)?
        }
        SearchType::Titles => {
            Tag::Search.print(
                out,
                &format!(
                    "Searching for article titles containing: '{joined}' and a limit of {}.",
                    args.limit
                ),
            )?;
            api.search_titles(&terms, args.limit)?
        }
    };

    writeln!(out, "results.count: {}", results.pages.len())?;
    for (index, page) in results.pages.iter().enumerate() {
        print_search_page(out, index + 1, page)?;
    }
    Ok(())
}

fn run_read<A: WikipediaApi>(api: &A, title: &str, out: &mut impl Write) -> Result<()> {
    Tag::Read.print(out, &format!("Reading article: {title}."))?;
    let page = api.get_page(&title_to_key(title))?;
    writeln!(out, "title: {}", page.title)?;
    if let Some(revision) = &page.latest {
        writeln!(out, "revision: {} ({})", revision.id, revision.timestamp)?;
    }
    writeln!(out)?;
    writeln!(out, "{}", page.source)?;
    Ok(())
}

fn run_export<A: WikipediaApi>(
    api: &A,
    args: &ExportArgs,
    exports_dir: &Path,
    article_base: &str,
    out: &mut impl Write,
) -> Result<()> {
    Tag::Export.print(
        out,
        &format!(
            "Exporting article: {} to {}.",
            args.title,
            args.format.as_str()
        ),
    )?;
    let key = title_to_key(&args.title);
    let page = api.get_page(&key)?;
    let html = if args.format.needs_html() {
        Some(api.get_page_html(&key)?)
    } else {
        None
    };
    let rendered = render_export(&page, html.as_deref(), args.format, article_base)?;
    let path = args
        .output
        .clone()
        .unwrap_or_else(|| default_export_path(exports_dir, &page.title, args.format));
    let report = write_export(&path, &rendered)?;
    writeln!(out, "path: {}", normalize_for_display(&report.path))?;
    writeln!(out, "bytes: {}", report.bytes_written)?;
    Ok(())
}

fn run_random<A: WikipediaApi>(api: &A, out: &mut impl Write) -> Result<()> {
    Tag::Random.print(out, "Getting a random article.")?;
    let resolved = api.get_random_article()?;
    writeln!(out, "{}", resolved.location)?;
    Ok(())
}

fn run_summary<A: WikipediaApi>(api: &A, title: &str, out: &mut impl Write) -> Result<()> {
    Tag::Summary.print(out, &format!("Getting summary for article: {title}."))?;
    let results = api.search_titles(&split_terms(&[title.to_string()]), 1)?;
    let Some(page) = results.pages.first() else {
        bail!("no article found for {title}");
    };
    writeln!(out, "title: {}", page.title)?;
    if let Some(description) = &page.description {
        writeln!(out, "description: {description}")?;
    }
    if let Some(excerpt) = page.plain_excerpt() {
        writeln!(out, "excerpt: {excerpt}")?;
    }
    Ok(())
}

fn run_links(title: &str, out: &mut impl Write) -> Result<()> {
    Tag::Links.print(out, &format!("Getting links for article: {title}."))?;
    Endpoint::PageLinks {
        key: title_to_key(title),
    }
    .segments()?;
    Ok(())
}

fn run_auth_token<A: WikipediaApi>(
    api: &A,
    store: &TokenStore,
    no_save: bool,
    out: &mut impl Write,
) -> Result<()> {
    let token = api.get_access_token()?;
    writeln!(out, "token_type: {}", token.token_type)?;
    writeln!(out, "expires_in: {}", token.expires_in)?;
    writeln!(out, "expires_at: {}", token.expires_at)?;
    if no_save {
        writeln!(out, "stored: no")?;
        return Ok(());
    }
    let stored = store.insert(&token.into_credential())?;
    writeln!(out, "stored: yes (id {})", stored.id)?;
    Ok(())
}

fn run_auth_status(store: &TokenStore, now_unix: i64, out: &mut impl Write) -> Result<()> {
    writeln!(out, "db_path: {}", normalize_for_display(store.db_path()))?;
    match store.latest()? {
        Some(credential) => {
            writeln!(out, "token.id: {}", credential.id)?;
            writeln!(out, "token.expires_at: {}", credential.expires_at)?;
            writeln!(
                out,
                "token.expired: {}",
                format_flag(credential.is_expired_at(now_unix))
            )?;
            writeln!(
                out,
                "token.has_refresh: {}",
                format_flag(!credential.refresh_token.is_empty())
            )?;
        }
        None => writeln!(out, "token: <none> (run `wikiread auth token`)")?,
    }
    Ok(())
}

fn run_auth_clear(store: &TokenStore, out: &mut impl Write) -> Result<()> {
    let deleted = store.delete_all()?;
    writeln!(out, "deleted_tokens: {deleted}")?;
    Ok(())
}

fn run_db_init(
    paths: &ResolvedPaths,
    store: &TokenStore,
    force: bool,
    out: &mut impl Write,
) -> Result<()> {
    let report = init_layout(paths, force)?;
    store.initialize()?;
    writeln!(out, "Initialized wikiread runtime layout")?;
    writeln!(out, "project_root: {}", normalize_for_display(&paths.project_root))?;
    writeln!(out, "db_path: {}", normalize_for_display(&paths.db_path))?;
    writeln!(out, "config_path: {}", normalize_for_display(&paths.config_path))?;
    writeln!(out, "created_dirs: {}", report.created_dirs.len())?;
    writeln!(out, "wrote_config: {}", report.wrote_config)?;
    Ok(())
}

fn run_db_stats(paths: &ResolvedPaths, store: &TokenStore, out: &mut impl Write) -> Result<()> {
    let status = inspect_runtime(paths)?;
    writeln!(out, "db stats")?;
    writeln!(out, "db_path: {}", normalize_for_display(&paths.db_path))?;
    writeln!(out, "db_exists: {}", format_flag(status.db_exists))?;
    writeln!(
        out,
        "db_size_bytes: {}",
        status
            .db_size_bytes
            .map(|size| size.to_string())
            .unwrap_or_else(|| "n/a".to_string())
    )?;
    writeln!(out, "config_exists: {}", format_flag(status.config_exists))?;
    writeln!(out, "tokens: {}", store.count()?)?;
    Ok(())
}

fn build_provider(paths: &ResolvedPaths) -> Result<WikipediaProvider> {
    let config = load_config(&paths.config_path)?;
    Ok(WikipediaProvider::new(ProviderConfig::from_config(&config)))
}

/// Use the newest stored credential as the bearer token when it has not expired.
fn attach_stored_token(
    provider: &mut WikipediaProvider,
    store: &TokenStore,
    now_unix: i64,
) -> Result<()> {
    match store.latest()? {
        Some(credential) if !credential.is_expired_at(now_unix) => {
            debug!("Using stored token {}", credential.id);
            provider.set_token(Some(credential.access_token));
        }
        Some(credential) => {
            warn!(
                "Stored token {} expired at {}; run `wikiread auth token`",
                credential.id, credential.expires_at
            );
        }
        None => {}
    }
    Ok(())
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        db_path: runtime.db.clone(),
        config: runtime.config.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let project_env = initial.project_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    resolve_paths(&context, &overrides)
}

fn print_search_page(out: &mut impl Write, rank: usize, page: &SearchPage) -> io::Result<()> {
    writeln!(out, "{rank}. {} [{}]", page.title, page.key)?;
    if let Some(description) = &page.description {
        writeln!(out, "   {description}")?;
    }
    if let Some(excerpt) = page.plain_excerpt() {
        writeln!(out, "   {excerpt}")?;
    }
    Ok(())
}

fn split_terms(raw: &[String]) -> Vec<String> {
    raw.iter()
        .flat_map(|value| value.split_whitespace())
        .map(ToString::to_string)
        .collect()
}

fn parse_export_format(value: &str) -> Result<ExportFormat, String> {
    ExportFormat::parse(value).map_err(|error| error.to_string())
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::fs;

    use serde_json::Map;
    use tempfile::tempdir;
    use wikiread_core::ProviderError;
    use wikiread_core::provider::{
        AccessTokenResponse, Page, ProviderConfig, ResolvedLocation, SearchPage, SearchResults,
        WikipediaApi, WikipediaProvider,
    };
    use wikiread_core::store::{NewCredential, TokenStore};

    use super::{
        Commands, ExportArgs, SearchArgs, SearchType, TitleArgs, attach_stored_token,
        run_article_command, run_auth_clear, run_auth_status, run_auth_token, run_db_init,
        run_db_stats, split_terms,
    };
    use wikiread_core::export::ExportFormat;
    use wikiread_core::runtime::{ResolvedPaths, ValueSource};

    const EN_BASE: &str = "https://en.wikipedia.org/wiki/";

    #[derive(Default)]
    struct MockApi {
        calls: RefCell<Vec<String>>,
        pages: Vec<SearchPage>,
    }

    impl MockApi {
        fn with_hit(title: &str) -> Self {
            Self {
                pages: vec![SearchPage {
                    id: 1,
                    key: title.replace(' ', "_"),
                    title: title.to_string(),
                    excerpt: Some(format!("<span class=\"searchmatch\">{title}</span> is a star")),
                    matched_title: None,
                    description: Some("G-type star".to_string()),
                    extra: Map::new(),
                }],
                ..Self::default()
            }
        }

        fn record(&self, call: String) {
            self.calls.borrow_mut().push(call);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.borrow().clone()
        }
    }

    impl WikipediaApi for MockApi {
        fn get_access_token(&self) -> Result<AccessTokenResponse, ProviderError> {
            self.record("token".to_string());
            Ok(AccessTokenResponse {
                access_token: "access".to_string(),
                token_type: "Bearer".to_string(),
                expires_in: 3600,
                refresh_token: String::new(),
                expires_at: 4600,
            })
        }

        fn search_articles(
            &self,
            terms: &[String],
            limit: u32,
        ) -> Result<SearchResults, ProviderError> {
            self.record(format!("articles:{}:{limit}", terms.join("+")));
            Ok(SearchResults {
                status: 200,
                pages: self.pages.clone(),
            })
        }

        fn search_titles(
            &self,
            terms: &[String],
            limit: u32,
        ) -> Result<SearchResults, ProviderError> {
            self.record(format!("titles:{}:{limit}", terms.join("+")));
            Ok(SearchResults {
                status: 200,
                pages: self.pages.clone(),
            })
        }

        fn get_random_article(&self) -> Result<ResolvedLocation, ProviderError> {
            self.record("random".to_string());
            Ok(ResolvedLocation {
                status: 302,
                location: "https://en.wikipedia.org/wiki/Hydrogen".to_string(),
            })
        }

        fn get_page(&self, key: &str) -> Result<Page, ProviderError> {
            self.record(format!("page:{key}"));
            Ok(Page {
                id: 9,
                key: key.to_string(),
                title: key.replace('_', " "),
                latest: None,
                content_model: Some("wikitext".to_string()),
                license: None,
                source: "== Overview ==\nThe [[Sun]] shines.".to_string(),
            })
        }

        fn get_page_html(&self, key: &str) -> Result<String, ProviderError> {
            self.record(format!("html:{key}"));
            Ok("<html><body>rendered</body></html>".to_string())
        }
    }

    fn output(buffer: Vec<u8>) -> String {
        String::from_utf8(buffer).expect("utf8 output")
    }

    #[test]
    fn split_terms_breaks_on_whitespace_and_keeps_order() {
        let terms = split_terms(&["solar system".to_string(), "planets".to_string()]);
        assert_eq!(terms, vec!["solar", "system", "planets"]);
    }

    #[test]
    fn search_routes_by_type_and_prints_hits() {
        let api = MockApi::with_hit("Sun");
        let temp = tempdir().expect("tempdir");
        let mut buffer = Vec::new();

        run_article_command(
            &api,
            Commands::Search(SearchArgs {
                terms: vec!["the sun".to_string()],
                search_type: SearchType::Titles,
                limit: 3,
            }),
            temp.path(),
            EN_BASE,
            &mut buffer,
        )
        .expect("search");

        assert_eq!(api.calls(), vec!["titles:the+sun:3"]);
        let text = output(buffer);
        assert!(text.contains("SEARCH"));
        assert!(text.contains("results.count: 1"));
        assert!(text.contains("1. Sun [Sun]"));
        assert!(text.contains("Sun is a star"));
    }

    #[test]
    fn export_markdown_writes_default_path() {
        let api = MockApi::default();
        let temp = tempdir().expect("tempdir");
        let exports_dir = temp.path().join("wikiread_exports");
        let mut buffer = Vec::new();

        run_article_command(
            &api,
            Commands::Export(ExportArgs {
                title: "Solar System".to_string(),
                format: ExportFormat::Markdown,
                output: None,
            }),
            &exports_dir,
            EN_BASE,
            &mut buffer,
        )
        .expect("export");

        assert_eq!(api.calls(), vec!["page:Solar_System"]);
        let written =
            fs::read_to_string(exports_dir.join("Solar-System.md")).expect("export file");
        assert!(written.contains("## Overview"));
        assert!(written.contains("[Sun](https://en.wikipedia.org/wiki/Sun)"));
        assert!(output(buffer).contains("EXPORT"));
    }

    #[test]
    fn export_html_fetches_rendered_page() {
        let api = MockApi::default();
        let temp = tempdir().expect("tempdir");
        let target = temp.path().join("out.html");
        let mut buffer = Vec::new();

        run_article_command(
            &api,
            Commands::Export(ExportArgs {
                title: "Sun".to_string(),
                format: ExportFormat::Html,
                output: Some(target.clone()),
            }),
            temp.path(),
            EN_BASE,
            &mut buffer,
        )
        .expect("export");

        assert_eq!(api.calls(), vec!["page:Sun", "html:Sun"]);
        assert!(
            fs::read_to_string(target)
                .expect("html file")
                .contains("rendered")
        );
    }

    #[test]
    fn random_prints_resolved_location() {
        let api = MockApi::default();
        let temp = tempdir().expect("tempdir");
        let mut buffer = Vec::new();
        run_article_command(&api, Commands::Random, temp.path(), EN_BASE, &mut buffer)
            .expect("random");
        assert!(output(buffer).contains("https://en.wikipedia.org/wiki/Hydrogen"));
    }

    #[test]
    fn summary_without_hits_fails() {
        let api = MockApi::default();
        let temp = tempdir().expect("tempdir");
        let mut buffer = Vec::new();
        let error = run_article_command(
            &api,
            Commands::Summary(TitleArgs {
                title: "Nothing Here".to_string(),
            }),
            temp.path(),
            EN_BASE,
            &mut buffer,
        )
        .expect_err("must fail");
        assert!(error.to_string().contains("no article found"));
        assert_eq!(api.calls(), vec!["titles:Nothing+Here:1"]);
    }

    #[test]
    fn summary_prints_description_and_plain_excerpt() {
        let api = MockApi::with_hit("Sun");
        let temp = tempdir().expect("tempdir");
        let mut buffer = Vec::new();
        run_article_command(
            &api,
            Commands::Summary(TitleArgs {
                title: "Sun".to_string(),
            }),
            temp.path(),
            EN_BASE,
            &mut buffer,
        )
        .expect("summary");
        let text = output(buffer);
        assert!(text.contains("description: G-type star"));
        assert!(text.contains("excerpt: Sun is a star"));
    }

    #[test]
    fn links_reports_unsupported_endpoint_after_tag() {
        let api = MockApi::default();
        let temp = tempdir().expect("tempdir");
        let mut buffer = Vec::new();
        let error = run_article_command(
            &api,
            Commands::Links(TitleArgs {
                title: "Sun".to_string(),
            }),
            temp.path(),
            EN_BASE,
            &mut buffer,
        )
        .expect_err("must fail");
        assert!(error.to_string().contains("not supported"));
        assert!(output(buffer).contains("LINKS"));
        assert!(api.calls().is_empty());
    }

    #[test]
    fn auth_token_persists_unless_no_save() {
        let api = MockApi::default();
        let temp = tempdir().expect("tempdir");
        let store = TokenStore::new(temp.path().join("tokens.db"));

        let mut buffer = Vec::new();
        run_auth_token(&api, &store, true, &mut buffer).expect("token");
        assert_eq!(store.count().expect("count"), 0);
        assert!(output(buffer).contains("stored: no"));

        let mut buffer = Vec::new();
        run_auth_token(&api, &store, false, &mut buffer).expect("token");
        let stored = store.latest().expect("latest").expect("row");
        assert_eq!(stored.access_token, "access");
        assert_eq!(stored.expires_at, 4600);

        let mut buffer = Vec::new();
        run_auth_status(&store, 5000, &mut buffer).expect("status");
        let text = output(buffer);
        assert!(text.contains("token.expired: yes"));
        assert!(!text.contains("access"));

        let mut buffer = Vec::new();
        run_auth_clear(&store, &mut buffer).expect("clear");
        assert!(output(buffer).contains("deleted_tokens: 1"));
        assert_eq!(store.count().expect("count"), 0);
    }

    #[test]
    fn stored_token_is_attached_only_while_valid() {
        let temp = tempdir().expect("tempdir");
        let store = TokenStore::new(temp.path().join("tokens.db"));
        let config = ProviderConfig {
            api_url: "http://127.0.0.1:9/".to_string(),
            auth_url: "http://127.0.0.1:9/token".to_string(),
            random_url: "http://127.0.0.1:9/wiki/Special:Random".to_string(),
            user_agent: "wikiread-tests".to_string(),
            client_id: None,
            client_secret: None,
            debug: false,
        };

        let mut provider = WikipediaProvider::new(config.clone());
        attach_stored_token(&mut provider, &store, 100).expect("attach");
        assert!(provider.token().is_none());

        store
            .insert(&NewCredential {
                access_token: "fresh".to_string(),
                refresh_token: String::new(),
                expires_at: 200,
            })
            .expect("insert");

        attach_stored_token(&mut provider, &store, 100).expect("attach");
        assert_eq!(provider.token(), Some("fresh"));

        let mut provider = WikipediaProvider::new(config);
        attach_stored_token(&mut provider, &store, 200).expect("attach");
        assert!(provider.token().is_none());
    }

    #[test]
    fn db_init_creates_layout_and_schema() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().to_path_buf();
        let state_dir = root.join(".wikiread");
        let paths = ResolvedPaths {
            project_root: root.clone(),
            db_path: state_dir.join("data").join("wikiread.db"),
            config_path: state_dir.join("config.toml"),
            exports_dir: root.join("wikiread_exports"),
            state_dir,
            root_source: ValueSource::Flag,
            db_source: ValueSource::Default,
            config_source: ValueSource::Default,
        };
        let store = TokenStore::new(&paths.db_path);

        let mut buffer = Vec::new();
        run_db_init(&paths, &store, false, &mut buffer).expect("init");
        assert!(output(buffer).contains("wrote_config: true"));
        assert!(paths.db_path.exists());
        assert!(paths.config_path.exists());

        let mut buffer = Vec::new();
        run_db_stats(&paths, &store, &mut buffer).expect("stats");
        let text = output(buffer);
        assert!(text.contains("db_exists: yes"));
        assert!(text.contains("tokens: 0"));
    }
}
