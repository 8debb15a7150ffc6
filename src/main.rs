//! draftpilot command-line interface.

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use draftpilot::budget::{Period, UsageLedger};
use draftpilot::cache::ContentCache;
use draftpilot::config::{AppConfig, Secrets, DEFAULT_CONFIG_FILE, GOOGLE_ACCESS_TOKEN_ENV};
use draftpilot::contacts::{ContactSource, JsonRowsSource, SheetsAuth, SheetsContactSource};
use draftpilot::drafts::{DraftSink, GmailDraftSink, LogDraftSink, OutboxDraftSink};
use draftpilot::generation::HuggingFaceBackend;
use draftpilot::pipeline::{ContactOutcome, Orchestrator, RunObserver, RunSummary, RunSummaryStore};
use draftpilot::PipelineError;

/// Normal completion, including runs with skipped contacts.
const EXIT_OK: u8 = 0;
/// A ledger or cache write failed.
const EXIT_PERSISTENCE: u8 = 1;
/// Bad configuration or unreachable contact source.
const EXIT_SETUP: u8 = 2;

#[derive(Parser)]
#[command(
    name = "draftpilot",
    version,
    about = "Generate personalised email drafts within a monthly API budget",
    long_about = "Reads contacts from a spreadsheet, generates an email body per contact with a\n\
                  language model, and saves each one as a draft for review.\n\
                  \n\
                  Spend is tracked per calendar month in a JSON ledger; contacts whose\n\
                  email and context are unchanged reuse cached content at no cost.\n\
                  \n\
                  Environment Variables:\n\
                    HUGGINGFACE_API_KEY              # Inference API key\n\
                    GOOGLE_API_KEY                   # Sheets API key (shared sheets)\n\
                    GOOGLE_ACCESS_TOKEN              # OAuth token for Sheets and Gmail\n\
                    DRAFTPILOT__<SECTION>__<KEY>     # Override any config value"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Configuration file (default: ./draftpilot.toml if present)
    #[arg(long, short, global = true, env = "DRAFTPILOT_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Generate drafts for every contact
    Run(RunArgs),
    /// Show API usage for a month
    Usage {
        /// Month to report, as YYYY-MM (default: current month)
        #[arg(long)]
        month: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Write a default configuration file
    Init {
        /// Destination path
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        path: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Read contacts from a local JSON sheet export instead of Google Sheets
    #[arg(long)]
    contacts: Option<PathBuf>,

    /// Log drafts instead of saving them
    #[arg(long, conflicts_with = "outbox")]
    dry_run: bool,

    /// Append drafts to the local outbox file instead of Gmail
    #[arg(long)]
    outbox: bool,

    /// Process at most N contacts
    #[arg(long)]
    limit: Option<usize>,

    /// Print the run summary as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let code = match cli.command {
        Command::Run(args) => run(cli.config.as_deref(), args).await,
        Command::Usage { month, json } => usage(cli.config.as_deref(), month.as_deref(), json),
        Command::Init { path, force } => init(&path, force),
    };
    ExitCode::from(code)
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "draftpilot=debug"
    } else {
        "draftpilot=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<AppConfig, u8> {
    AppConfig::load(path).map_err(|err| {
        error!(error = %err, "configuration error");
        EXIT_SETUP
    })
}

async fn run(config_path: Option<&Path>, args: RunArgs) -> u8 {
    match try_run(config_path, args).await {
        Ok(code) | Err(code) => code,
    }
}

async fn try_run(config_path: Option<&Path>, args: RunArgs) -> Result<u8, u8> {
    let mut config = load_config(config_path)?;
    if let Some(limit) = args.limit {
        config.batch.limit = Some(limit);
        config.validate().map_err(|err| {
            error!(error = %err, "configuration error");
            EXIT_SETUP
        })?;
    }
    let secrets = Secrets::from_env();

    let source = build_source(&config, &secrets, args.contacts.as_deref())?;
    let sink = build_sink(&config, &secrets, &args)?;
    let backend = HuggingFaceBackend::new(
        config.backend.endpoint.clone(),
        secrets.huggingface_api_key.clone().unwrap_or_default(),
        config.backend.timeout(),
    )
    .map_err(|err| {
        error!(error = %err, "cannot create generation backend");
        EXIT_SETUP
    })?;

    let ledger = UsageLedger::open_file(config.budget.clone(), &config.paths.ledger)
        .map_err(|err| persistence_failure(err.into()))?;
    let cache =
        ContentCache::open(&config.paths.cache).map_err(|err| persistence_failure(err.into()))?;

    let mut orchestrator = Orchestrator::new(
        config.pipeline_config(),
        ledger,
        cache,
        Box::new(backend),
        sink,
    );

    let result = if args.json {
        orchestrator.run(source.as_ref()).await
    } else {
        let mut progress = ProgressObserver::new();
        let result = orchestrator
            .run_with_observer(source.as_ref(), &mut progress)
            .await;
        progress.finish();
        result
    };

    let summary = match result {
        Ok(summary) => summary,
        Err(PipelineError::SourceUnavailable(err)) => {
            error!(error = %err, "cannot list contacts");
            return Err(EXIT_SETUP);
        }
        Err(err) => return Err(persistence_failure(err)),
    };

    save_summary(&config, &summary);
    print_summary(&summary, args.json);

    Ok(if summary.is_halted() {
        EXIT_PERSISTENCE
    } else {
        EXIT_OK
    })
}

fn persistence_failure(err: PipelineError) -> u8 {
    error!(error = %err, "cannot open durable state");
    EXIT_PERSISTENCE
}

fn build_source(
    config: &AppConfig,
    secrets: &Secrets,
    contacts: Option<&Path>,
) -> Result<Box<dyn ContactSource>, u8> {
    if let Some(path) = contacts {
        return Ok(Box::new(JsonRowsSource::new(path, config.columns.clone())));
    }

    let Some(spreadsheet_id) = config.sheets.spreadsheet_id.clone() else {
        error!("no contact source: pass --contacts or set sheets.spreadsheet_id");
        return Err(EXIT_SETUP);
    };
    let auth = match (&secrets.google_access_token, &secrets.google_api_key) {
        (Some(token), _) => SheetsAuth::Bearer(token.clone()),
        (None, Some(key)) => SheetsAuth::ApiKey(key.clone()),
        (None, None) => {
            error!("set GOOGLE_ACCESS_TOKEN or GOOGLE_API_KEY to read Google Sheets");
            return Err(EXIT_SETUP);
        }
    };

    SheetsContactSource::new(
        spreadsheet_id,
        config.sheets.range.clone(),
        auth,
        config.columns.clone(),
        config.backend.timeout(),
    )
    .map(|source| Box::new(source) as Box<dyn ContactSource>)
    .map_err(|err| {
        error!(error = %err, "cannot create Sheets client");
        EXIT_SETUP
    })
}

fn build_sink(
    config: &AppConfig,
    secrets: &Secrets,
    args: &RunArgs,
) -> Result<Box<dyn DraftSink>, u8> {
    if args.dry_run {
        info!("dry run: drafts will be logged, not saved");
        return Ok(Box::new(LogDraftSink));
    }
    if args.outbox {
        return OutboxDraftSink::new(&config.paths.outbox)
            .map(|sink| Box::new(sink) as Box<dyn DraftSink>)
            .map_err(|err| {
                error!(error = %err, "cannot open outbox");
                EXIT_SETUP
            });
    }

    let Some(token) = &secrets.google_access_token else {
        error!(
            "set {} to save Gmail drafts, or use --outbox / --dry-run",
            GOOGLE_ACCESS_TOKEN_ENV
        );
        return Err(EXIT_SETUP);
    };
    GmailDraftSink::new(token.clone(), config.backend.timeout())
        .map(|sink| Box::new(sink) as Box<dyn DraftSink>)
        .map_err(|err| {
            error!(error = %err, "cannot create Gmail client");
            EXIT_SETUP
        })
}

fn save_summary(config: &AppConfig, summary: &RunSummary) {
    let saved = RunSummaryStore::new(&config.paths.runs).and_then(|store| store.save(summary));
    match saved {
        Ok(path) => info!(path = %path.display(), "saved run summary"),
        Err(err) => warn!(error = %err, "failed to save run summary"),
    }
}

fn print_summary(summary: &RunSummary, json: bool) {
    if json {
        match serde_json::to_string_pretty(summary) {
            Ok(rendered) => println!("{}", rendered),
            Err(err) => error!(error = %err, "failed to render summary"),
        }
        return;
    }

    println!("{}", summary.format());
    if !std::io::stdout().is_terminal() {
        return;
    }
    if let Some(reason) = &summary.halted {
        println!("{} {}", "✗ Run halted:".red().bold(), reason);
    } else if summary.skipped_budget + summary.skipped_error > 0 {
        println!(
            "{} {} contact(s) skipped",
            "!".yellow().bold(),
            summary.skipped_budget + summary.skipped_error
        );
    } else {
        println!("{} All contacts drafted", "✓".green().bold());
    }
}

fn usage(config_path: Option<&Path>, month: Option<&str>, json: bool) -> u8 {
    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(code) => return code,
    };
    let period = match month {
        Some(month) => match month.parse::<Period>() {
            Ok(period) => period,
            Err(err) => {
                error!(error = %err, "invalid --month");
                return EXIT_SETUP;
            }
        },
        None => Period::current(),
    };

    let ledger = match UsageLedger::open_file(config.budget.clone(), &config.paths.ledger) {
        Ok(ledger) => ledger,
        Err(err) => return persistence_failure(err.into()),
    };
    let report = ledger.report(period);

    if json {
        match serde_json::to_string_pretty(&report) {
            Ok(rendered) => println!("{}", rendered),
            Err(err) => {
                error!(error = %err, "failed to render report");
                return EXIT_PERSISTENCE;
            }
        }
    } else {
        print!("{}", report.format());
    }
    EXIT_OK
}

fn init(path: &Path, force: bool) -> u8 {
    match AppConfig::write_default(path, force) {
        Ok(()) => {
            println!("Wrote default configuration to {}", path.display());
            EXIT_OK
        }
        Err(err) => {
            error!(error = %err, "cannot write configuration");
            EXIT_SETUP
        }
    }
}

/// Drives a progress bar from pipeline events.
struct ProgressObserver {
    bar: ProgressBar,
}

impl ProgressObserver {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        bar.set_style(style);
        Self { bar }
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl RunObserver for ProgressObserver {
    fn on_start(&mut self, contacts: usize) {
        self.bar.set_length(contacts as u64);
    }

    fn on_contact(&mut self, outcome: &ContactOutcome) {
        self.bar.set_message(format!("{} ({})", outcome.email, outcome.state));
        self.bar.inc(1);
    }
}
