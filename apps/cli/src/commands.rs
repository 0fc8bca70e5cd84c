//! CLI command definitions, routing, and tracing setup.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

use threadcrawl_core::{
    CaptionBridge, ContentEnricher, CrawlProgress, CrawlState, CrawlSummary, Crawler,
    DisabledCaptioner, HttpFetcher, ImageCaptioner,
};
use threadcrawl_crawler::SlackClient;
use threadcrawl_markdown::WebpageExtractor;
use threadcrawl_shared::{AppConfig, init_config, load_config, validate_token};
use threadcrawl_storage::Storage;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// threadcrawl: index Slack threads and the content they link to.
#[derive(Parser)]
#[command(
    name = "threadcrawl",
    version,
    about = "Crawl Slack channels, enrich linked content, and search it locally.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Crawl a channel's full history into the local index.
    Crawl {
        /// Channel ID, or a name from the `[[channels]]` config table.
        channel: String,
    },

    /// Search the local index. Reads queries from stdin when none is given.
    Search {
        /// Query text.
        query: Option<String>,

        /// Maximum number of hits (defaults to `index.search_limit`).
        #[arg(short, long)]
        limit: Option<u32>,
    },

    /// Show recent crawl runs.
    Runs {
        /// Number of runs to show.
        #[arg(short, long, default_value = "10")]
        limit: u32,
    },

    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "threadcrawl=info",
        1 => "threadcrawl=debug",
        _ => "threadcrawl=trace",
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Crawl { channel } => cmd_crawl(&channel).await,
        Command::Search { query, limit } => cmd_search(query.as_deref(), limit).await,
        Command::Runs { limit } => cmd_runs(limit).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// crawl
// ---------------------------------------------------------------------------

async fn cmd_crawl(channel: &str) -> Result<()> {
    let config = load_config()?;
    let token = validate_token(&config)?;
    let channel_id = config.resolve_channel(channel);

    let storage = Arc::new(Storage::open(&config.index_path()?).await?);
    let run_id = storage.insert_crawl_run(&channel_id).await?;

    let transport =
        Arc::new(SlackClient::new(token.clone())?.with_base_url(&config.slack.api_base_url));
    let timeout = Duration::from_secs(config.enrichment.request_timeout_secs);
    let enricher = ContentEnricher::new(
        Arc::new(HttpFetcher::new(timeout)?),
        build_captioner(&config),
        Arc::new(WebpageExtractor::with_timeout(timeout)?),
    )
    .with_max_chars(config.enrichment.max_chars);

    info!(channel = %channel_id, run = %run_id, "crawling channel");

    let progress = Arc::new(CliProgress::new());
    let crawler =
        Crawler::new(transport, enricher, storage.clone(), token).with_progress(progress.clone());

    let summary = match crawler.crawl_channel(&channel_id).await {
        Ok(summary) => summary,
        Err(e) => {
            progress.spinner.abandon_with_message(format!("Crawl of {channel_id} failed"));
            let stats = serde_json::json!({ "status": "failed", "error": e.to_string() });
            if let Err(record_err) = storage.finish_crawl_run(&run_id, &stats.to_string()).await {
                warn!(error = %record_err, "could not record failed crawl run");
            }
            return Err(e).wrap_err_with(|| format!("crawl of {channel_id} failed"));
        }
    };

    let mut stats = serde_json::to_value(&summary)?;
    stats["status"] = serde_json::Value::from("completed");
    storage.finish_crawl_run(&run_id, &stats.to_string()).await?;

    print_summary(&summary);
    Ok(())
}

fn build_captioner(config: &AppConfig) -> Arc<dyn ImageCaptioner> {
    let Some(cmd) = config.enrichment.caption_cmd.as_deref() else {
        info!("no caption command configured, images will be skipped");
        return Arc::new(DisabledCaptioner);
    };

    let timeout = Duration::from_secs(config.enrichment.request_timeout_secs);
    match CaptionBridge::spawn(cmd, &config.enrichment.caption_args) {
        Ok(bridge) => Arc::new(bridge.with_timeout(timeout)),
        Err(e) => {
            warn!(error = %e, "caption bridge unavailable, images will be skipped");
            Arc::new(DisabledCaptioner)
        }
    }
}

fn print_summary(summary: &CrawlSummary) {
    println!();
    println!("  Channel crawled: {}", summary.channel);
    println!("  Pages:      {}", summary.channel_pages);
    println!("  Threads:    {}", summary.threads_listed);
    println!(
        "  Messages:   {} indexed, {} skipped",
        summary.messages_indexed, summary.messages_skipped
    );
    println!("  Replies skipped: {}", summary.replies_skipped);
    println!(
        "  Fragments:  {} ({} enrichment failures)",
        summary.fragments, summary.enrichment_failures
    );
    println!("  Documents:  {}", summary.documents_indexed);
    println!("  Time:       {:.1}s", summary.elapsed.as_secs_f64());
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// Spinner driven by crawl state transitions.
struct CliProgress {
    spinner: ProgressBar,
    messages: AtomicUsize,
    documents: AtomicUsize,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            spinner.set_style(
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
        }
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self {
            spinner,
            messages: AtomicUsize::new(0),
            documents: AtomicUsize::new(0),
        }
    }

    fn render(&self, state: CrawlState) {
        self.spinner.set_message(format!(
            "{} [{} messages, {} documents]",
            state.as_str(),
            self.messages.load(Ordering::Relaxed),
            self.documents.load(Ordering::Relaxed),
        ));
    }
}

impl CrawlProgress for CliProgress {
    fn state(&self, state: CrawlState) {
        self.render(state);
    }

    fn message_indexed(&self, _message_id: &str, documents: usize) {
        self.messages.fetch_add(1, Ordering::Relaxed);
        self.documents.fetch_add(documents, Ordering::Relaxed);
        self.render(CrawlState::ResolvingMessage);
    }

    fn done(&self, _summary: &CrawlSummary) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// search / runs
// ---------------------------------------------------------------------------

async fn cmd_search(query: Option<&str>, limit: Option<u32>) -> Result<()> {
    let config = load_config()?;
    let storage = Storage::open_readonly(&config.index_path()?).await?;
    let limit = limit.unwrap_or(config.index.search_limit);

    if let Some(q) = query {
        return print_hits(&storage, q, limit).await;
    }

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        stdout.write_all(b"query> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let q = line.trim();
        if q.is_empty() {
            continue;
        }
        print_hits(&storage, q, limit).await?;
    }
    Ok(())
}

async fn print_hits(storage: &Storage, query: &str, limit: u32) -> Result<()> {
    let hits = storage.search(query, limit).await?;
    if hits.is_empty() {
        println!("  no matches for \"{query}\"");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        let name = if hit.name.is_empty() { "(untitled)" } else { hit.name.as_str() };
        println!("{:>3}. {name}  ({:.2})", i + 1, hit.score);
        println!("     {}", hit.url);
        println!("     {}", hit.snippet.replace('\n', " "));
    }
    Ok(())
}

async fn cmd_runs(limit: u32) -> Result<()> {
    let config = load_config()?;
    let storage = Storage::open_readonly(&config.index_path()?).await?;

    let runs = storage.list_crawl_runs(limit).await?;
    if runs.is_empty() {
        println!("no crawl runs recorded");
        return Ok(());
    }

    for run in runs {
        let finished = run.finished_at.as_deref().unwrap_or("(running)");
        println!("{}  {}  {} → {}", run.id, run.channel, run.started_at, finished);
        if let Some(stats) = run.stats_json {
            println!("    {stats}");
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_crawl_with_verbosity() {
        let cli = Cli::try_parse_from(["threadcrawl", "-vv", "crawl", "#general"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Command::Crawl { ref channel } if channel == "#general"));
    }

    #[test]
    fn search_query_is_optional() {
        let cli = Cli::try_parse_from(["threadcrawl", "search"]).unwrap();
        assert!(matches!(cli.command, Command::Search { query: None, limit: None }));

        let cli =
            Cli::try_parse_from(["threadcrawl", "search", "deploy", "--limit", "3"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Search { query: Some(ref q), limit: Some(3) } if q == "deploy"
        ));
    }

    #[test]
    fn json_log_format_is_global() {
        let cli =
            Cli::try_parse_from(["threadcrawl", "config", "show", "--log-format", "json"]).unwrap();
        assert!(matches!(cli.log_format, LogFormat::Json));
    }

    #[test]
    fn crawl_requires_channel() {
        assert!(Cli::try_parse_from(["threadcrawl", "crawl"]).is_err());
    }
}
