//! CLI command definitions, routing, and tracing setup.

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use spacebook_core::{Book, BookEvent, render_outline};
use spacebook_crawler::{DownloadProgress, DownloadReport};
use spacebook_shared::{AppConfig, BookConfig, PublishedBook, init_config, load_config};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// spacebook — export hosted documentation spaces.
#[derive(Parser)]
#[command(
    name = "spacebook",
    version,
    about = "Export a hosted documentation space and follow its revisions.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
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

/// Options shared by every command that opens a book.
#[derive(clap::Args)]
pub(crate) struct BookArgs {
    /// Entry URL of the space, or the name of a `[[books]]` config entry.
    book: String,

    /// Page id or path to leave out (repeatable).
    #[arg(short, long)]
    ignore: Vec<String>,

    /// Concurrent page downloads per batch.
    #[arg(short, long)]
    concurrency: Option<usize>,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Print the table of contents.
    Index {
        #[command(flatten)]
        book: BookArgs,
    },

    /// Download every page and print the book as JSON.
    Fetch {
        #[command(flatten)]
        book: BookArgs,
    },

    /// Like `fetch`, then re-download on every published revision.
    Watch {
        #[command(flatten)]
        book: BookArgs,
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

/// Initialize tracing based on CLI flags. Logs go to stderr; stdout carries
/// command output.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "spacebook=info",
        1 => "spacebook=debug",
        _ => "spacebook=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(false)
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
        Command::Index { book } => cmd_index(&book).await,
        Command::Fetch { book } => cmd_fetch(&book).await,
        Command::Watch { book } => cmd_watch(&book).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(),
        },
    }
}

/// Merge the config file with command-line flags.
fn book_config(args: &BookArgs) -> Result<BookConfig> {
    let config = load_config()?;
    Ok(resolve_book(&config, args))
}

fn resolve_book(config: &AppConfig, args: &BookArgs) -> BookConfig {
    let uri = config
        .books
        .iter()
        .find(|b| b.name.as_deref() == Some(args.book.as_str()))
        .map_or(args.book.as_str(), |b| b.uri.as_str());

    let mut book = BookConfig::from_app(config, uri);
    book.ignore.extend(args.ignore.iter().cloned());
    if let Some(concurrency) = args.concurrency {
        book.concurrency = concurrency.max(1);
    }
    book
}

async fn open(args: &BookArgs) -> Result<Book> {
    let config = book_config(args)?;
    info!(url = %config.entry_url, "opening book");

    let spinner = spinner("Connecting");
    let book = Book::open(config).await;
    spinner.finish_and_clear();
    Ok(book?)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_index(args: &BookArgs) -> Result<()> {
    let book = open(args).await?;
    let current = book.current();

    println!("{} (revision {})", current.name, current.revision);
    print!("{}", render_outline(&current.index));

    book.close();
    Ok(())
}

async fn cmd_fetch(args: &BookArgs) -> Result<()> {
    let book = open(args).await?;
    let result = download_and_print(&book).await;
    book.close();
    result
}

async fn cmd_watch(args: &BookArgs) -> Result<()> {
    let book = open(args).await?;
    let mut events = book.subscribe();
    download_and_print(&book).await?;

    let outcome = loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(BookEvent::Refreshed { revision }) => {
                    info!(%revision, "new revision published");
                    download_and_print(&book).await?;
                }
                Ok(BookEvent::Closed { reason }) => break Err(eyre!("session lost: {reason}")),
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "missed book events, downloading the current generation");
                    download_and_print(&book).await?;
                }
                Err(RecvError::Closed) => break Ok(()),
            },
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break Ok(());
            }
        }
    };

    book.close();
    outcome
}

async fn download_and_print(book: &Book) -> Result<()> {
    let reporter = CliProgress::new();
    let (filled, report) = book.download(&reporter).await;
    reporter.finish(&report);
    print_book(&filled)
}

fn print_book(book: &PublishedBook) -> Result<()> {
    let json = serde_json::to_string_pretty(book)?;
    println!("{json}");
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

fn spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
        spinner.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
    }
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(std::time::Duration::from_millis(80));
    spinner
}

/// Download progress bar using indicatif.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        if let Ok(style) =
            ProgressStyle::with_template("{bar:30.cyan/blue} {pos}/{len} batch {prefix} {msg}")
        {
            bar.set_style(style);
        }
        Self { bar }
    }

    fn finish(&self, report: &DownloadReport) {
        self.bar.finish_and_clear();
        for (title, error) in &report.failed {
            warn!(page = %title, %error, "page left empty");
        }
        info!(
            fetched = report.fetched,
            failed = report.failed.len(),
            elapsed_s = report.duration.as_secs_f64(),
            "download finished"
        );
    }
}

impl DownloadProgress for CliProgress {
    fn batch_started(&self, number: usize, size: usize) {
        self.bar.set_prefix(number.to_string());
        self.bar.inc_length(size as u64);
    }

    fn page_done(&self, title: &str, _done: usize, _total: usize) {
        self.bar.set_message(title.to_string());
        self.bar.inc(1);
    }
}
