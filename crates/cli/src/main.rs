//! sieve CLI
//!
//! Command-line front end for the privacy-aware LLM router: screen and
//! analyze text, digest web pages, and work through Chrome bookmarks
//! without leaving the terminal. `sieve serve` runs the HTTP API.
//!
//! Copyright (c) 2025 Michael A Wright

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use core_pipeline::bookmarks::{find_bookmarks_file, parse_bookmarks_file};
use core_pipeline::{AnalysisRequest, BookmarkEntry, BookmarkFilter, ContentFetcher, OutputFormat, Settings};
use llm_bridge::{CompletionRequest, DigestJob, DistillationPipeline, ProviderRegistry, RoutingEngine};
use sieve_server::{init_tracing, serve, AppState};
use std::future::Future;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "\nbuilt:  ",
    env!("BUILT_TIME_UTC"),
    "\nhost:   ",
    env!("BUILT_HOST"),
    "\ncommit: ",
    env!("BUILT_GIT_COMMIT_HASH"),
);

#[derive(Parser)]
#[command(name = "sieve")]
#[command(version, long_version = LONG_VERSION)]
#[command(about = "Screen locally, then route: privacy-aware LLM analysis and bookmark digests", long_about = None)]
struct Cli {
    /// Config file (default: ./sieve.toml, then ~/.config/sieve/sieve.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API
    Serve {
        /// Address to bind, overriding server.bind
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Screen text locally, then answer with the routed provider
    Analyze {
        /// Text to analyze; read from --file or stdin when omitted
        text: Option<String>,

        /// Read the content from a file
        #[arg(short, long, conflicts_with = "text")]
        file: Option<PathBuf>,

        /// What to do with the content; `{content}` is substituted
        #[arg(short, long)]
        prompt: Option<String>,

        /// Provider that must answer if the content is clean
        #[arg(long)]
        provider: Option<String>,

        #[command(flatten)]
        routing: RoutingArgs,

        /// Ask for a JSON answer
        #[arg(long)]
        json: bool,

        /// Print the full routing record instead of just the answer
        #[arg(long)]
        explain: bool,
    },

    /// Send a prompt straight to one provider, without screening
    Complete {
        prompt: String,

        #[arg(long)]
        system: Option<String>,

        /// Provider name (default: the local provider)
        #[arg(long)]
        provider: Option<String>,

        #[arg(long)]
        temperature: Option<f32>,

        #[arg(long)]
        max_tokens: Option<u32>,
    },

    /// Fetch a page and print its digest
    Digest {
        url: String,

        /// Title to use when the page has none
        #[arg(short, long)]
        title: Option<String>,

        #[command(flatten)]
        routing: RoutingArgs,
    },

    /// Digest many bookmarks, one JSON object per line
    Batch {
        #[command(flatten)]
        selection: SelectionArgs,

        /// Digests in flight at once (default: batch.concurrency)
        #[arg(short = 'j', long)]
        concurrency: Option<usize>,

        #[command(flatten)]
        routing: RoutingArgs,
    },

    /// Inspect the local Chrome bookmarks
    Bookmarks {
        #[command(subcommand)]
        command: BookmarkCommands,
    },

    /// Check which providers answer
    Health,
}

#[derive(Subcommand)]
enum BookmarkCommands {
    /// Show where the bookmarks file is and what it holds
    Detect,

    /// List bookmarks, newest filters first
    List {
        #[command(flatten)]
        selection: SelectionArgs,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Clone, Default)]
struct RoutingArgs {
    /// Let clean content go to the high-quality provider
    #[arg(long, conflicts_with = "local_only")]
    allow_external: bool,

    /// Keep everything on the local provider
    #[arg(long)]
    local_only: bool,
}

impl RoutingArgs {
    fn allow_external(&self, settings: &Settings) -> bool {
        if self.local_only {
            false
        } else {
            self.allow_external || settings.routing.external_by_default
        }
    }
}

#[derive(Args, Clone, Default)]
struct SelectionArgs {
    /// Only bookmarks added in the last N days
    #[arg(long)]
    since_days: Option<i64>,

    /// Case-insensitive folder path match
    #[arg(long)]
    folder: Option<String>,

    /// At most this many bookmarks
    #[arg(short, long)]
    limit: Option<usize>,

    /// Bookmarks file, overriding bookmarks.path and auto-detection
    #[arg(long)]
    bookmarks_file: Option<PathBuf>,
}

impl SelectionArgs {
    fn filter(&self, default_limit: Option<usize>) -> BookmarkFilter {
        BookmarkFilter {
            since: self
                .since_days
                .and_then(BookmarkFilter::since_days_ago),
            folder: self.folder.clone(),
            limit: self.limit.or(default_limit),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => Settings::load_from(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => Settings::load().context("failed to load config")?,
    };
    init_tracing(if cli.verbose { "debug" } else { &settings.log_level });

    match cli.command {
        Commands::Serve { bind } => {
            let mut settings = settings;
            if let Some(bind) = bind {
                settings.server.bind = bind;
            }
            serve(Arc::new(AppState::from_settings(settings)?)).await
        }
        Commands::Analyze {
            text,
            file,
            prompt,
            provider,
            routing,
            json,
            explain,
        } => {
            let content = read_content(text, file.as_deref())?;
            let engine = engine(&settings)?;

            let mut request = AnalysisRequest::new(content)
                .allow_external(routing.allow_external(&settings))
                .with_format(if json { OutputFormat::Json } else { OutputFormat::Text });
            request.instruction = prompt;
            request.provider_override = provider;

            let result = within_deadline(&settings, engine.analyze(&request)).await?;
            if explain {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                eprintln!(
                    "provider: {} ({})",
                    result.provider_used,
                    if result.kept_local { "kept local" } else { "external" }
                );
                println!("{}", result.result);
            }
            Ok(())
        }
        Commands::Complete {
            prompt,
            system,
            provider,
            temperature,
            max_tokens,
        } => {
            let engine = engine(&settings)?;
            let mut request = CompletionRequest::new(prompt);
            if let Some(system) = system {
                request = request.with_system(system);
            }
            if let Some(temperature) = temperature {
                request = request.with_temperature(temperature);
            }
            if let Some(max_tokens) = max_tokens {
                request = request.with_max_tokens(max_tokens);
            }

            let direct =
                within_deadline(&settings, engine.complete_direct(provider.as_deref(), request)).await?;
            eprintln!("provider: {} ({})", direct.provider, direct.completion.model);
            println!("{}", direct.completion.text);
            Ok(())
        }
        Commands::Digest { url, title, routing } => {
            let pipeline = pipeline(&settings)?;
            let mut job = DigestJob::new(url).allow_external(routing.allow_external(&settings));
            if let Some(title) = title {
                job = job.with_title(title);
            }
            let digest = within_deadline(&settings, pipeline.digest(&job)).await?;
            println!("{}", serde_json::to_string_pretty(&digest)?);
            Ok(())
        }
        Commands::Batch {
            selection,
            concurrency,
            routing,
        } => {
            let entries = load_bookmarks(&settings, &selection)?;
            let entries = selection.filter(Some(settings.batch.size)).apply(entries);
            if entries.is_empty() {
                eprintln!("No bookmarks matched");
                return Ok(());
            }

            let allow_external = routing.allow_external(&settings);
            let jobs: Vec<DigestJob> = entries
                .iter()
                .map(|entry| {
                    DigestJob::new(entry.url.clone())
                        .with_title(entry.title.clone())
                        .allow_external(allow_external)
                })
                .collect();
            let concurrency = concurrency.unwrap_or(settings.batch.concurrency);
            eprintln!("Digesting {} bookmarks ({} at a time)", jobs.len(), concurrency);

            let pipeline = pipeline(&settings)?;
            let results = pipeline.digest_batch(jobs, concurrency).await;

            let mut failed = 0;
            for (entry, result) in entries.iter().zip(results) {
                match result {
                    Ok(digest) => println!("{}", serde_json::to_string(&digest)?),
                    Err(e) => {
                        failed += 1;
                        eprintln!("{}: {} ({})", entry.url, e, e.kind());
                    }
                }
            }
            eprintln!("{} digested, {} failed", entries.len() - failed, failed);
            Ok(())
        }
        Commands::Bookmarks { command } => match command {
            BookmarkCommands::Detect => {
                let Some(path) = bookmarks_path(&settings, None) else {
                    println!("No Chrome bookmarks file found");
                    return Ok(());
                };
                let entries = parse_bookmarks_file(&path)?;
                println!("Found: {}", path.display());
                println!("Bookmarks: {}", entries.len());
                for entry in entries.iter().take(5) {
                    print_entry(entry);
                }
                Ok(())
            }
            BookmarkCommands::List { selection, json } => {
                let entries = load_bookmarks(&settings, &selection)?;
                let entries = selection.filter(None).apply(entries);
                if json {
                    println!("{}", serde_json::to_string_pretty(&entries)?);
                } else {
                    for entry in &entries {
                        print_entry(entry);
                    }
                    eprintln!("{} bookmarks", entries.len());
                }
                Ok(())
            }
        },
        Commands::Health => {
            let registry = ProviderRegistry::from_settings(&settings)?;
            for (name, provider) in registry.iter() {
                let role = if name == registry.local_name() {
                    "local"
                } else if registry.high_quality().is_some_and(|p| p.name() == name) {
                    "high-quality"
                } else {
                    "available"
                };
                let status = if provider.is_available().await { "up" } else { "down" };
                println!("{:<10} {:<13} {}", name, role, status);
            }
            Ok(())
        }
    }
}

fn engine(settings: &Settings) -> Result<Arc<RoutingEngine>> {
    let registry = ProviderRegistry::from_settings(settings)?;
    Ok(Arc::new(RoutingEngine::new(Arc::new(registry))))
}

fn pipeline(settings: &Settings) -> Result<Arc<DistillationPipeline>> {
    let fetcher = ContentFetcher::new(&settings.fetch).context("failed to build HTTP fetcher")?;
    Ok(Arc::new(
        DistillationPipeline::new(Arc::new(fetcher), engine(settings)?)
            .with_taxonomy(settings.bookmarks.taxonomy())
            .with_job_deadline(settings.server.request_deadline()),
    ))
}

/// Run one command's model work under the configured request deadline
async fn within_deadline<T, E, F>(settings: &Settings, work: F) -> Result<T>
where
    F: Future<Output = Result<T, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    let deadline = settings.server.request_deadline();
    match tokio::time::timeout(deadline, work).await {
        Ok(result) => Ok(result?),
        Err(_) => bail!("deadline exceeded: no answer within {}s", deadline.as_secs()),
    }
}

fn read_content(text: Option<String>, file: Option<&Path>) -> Result<String> {
    let content = match (text, file) {
        (Some(text), _) => text,
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        (None, None) => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("failed to read stdin")?;
            buffer
        }
    };
    if content.trim().is_empty() {
        bail!("nothing to analyze");
    }
    Ok(content)
}

fn bookmarks_path(settings: &Settings, explicit: Option<&Path>) -> Option<PathBuf> {
    find_bookmarks_file(explicit.or(settings.bookmarks.path.as_deref()))
}

fn load_bookmarks(settings: &Settings, selection: &SelectionArgs) -> Result<Vec<BookmarkEntry>> {
    let path = bookmarks_path(settings, selection.bookmarks_file.as_deref())
        .context("no Chrome bookmarks file found; pass --bookmarks-file or set bookmarks.path")?;
    tracing::debug!(path = %path.display(), "reading bookmarks");
    Ok(parse_bookmarks_file(&path)?)
}

fn print_entry(entry: &BookmarkEntry) {
    let added = entry
        .created_at
        .map(|at| at.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "----------".to_string());
    let folder = if entry.folder_path.is_empty() {
        entry.root.clone()
    } else {
        entry.folder()
    };
    println!("{}  {:<24}  {}  {}", added, folder, entry.title, entry.url);
}
