//! note-harvest: capture and export ranking-list notes from the command line

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use note_harvest::{
    capture::{CaptureEngine, CaptureOutcome, EngineEvent, ObservedRequest, SessionOutcome},
    config::{CaptureConfig, Config},
    enrichment::{ChatCompletionsClassifier, EnrichmentOrchestrator},
    export::Exporter,
    logging,
    platform::{HttpPageExecutor, JsonFileStore, JsonWorkbookSink, LogNotifier, PageExecutor},
    util::truncate_str,
};
use serde::Deserialize;
use serde_json::Value;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "note-harvest")]
#[command(about = "Capture, replay and export paginated note lists")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "note-harvest.toml")]
    config: PathBuf,

    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Feed observed requests (JSON lines) through the capture engine
    Capture {
        /// File with one observed request per line
        requests: PathBuf,

        /// Switch capturing on before feeding requests
        #[arg(long)]
        enable: bool,
    },

    /// Inspect or clear the captured response buffer
    Responses {
        #[command(subcommand)]
        action: ResponsesAction,
    },

    /// Build the workbook from the captured buffer
    Export {
        /// Run secondary enrichment first
        #[arg(long)]
        process: bool,
    },

    /// Show or change the stored capture config
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ResponsesAction {
    /// List buffered pages
    List {
        /// Print full entries as JSON
        #[arg(long)]
        json: bool,
    },
    /// Empty the buffer
    Clear,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the app config and the stored capture config
    Show,
    /// Replace the capture URL patterns
    SetPatterns {
        #[arg(required = true)]
        patterns: Vec<String>,
    },
}

/// One line of the capture input
#[derive(Debug, Deserialize)]
struct RequestLine {
    url: String,
    #[serde(default = "default_method")]
    method: String,
    #[serde(rename = "type", alias = "requestType", default = "default_type")]
    request_type: String,
    /// JSON body, or the raw body text
    #[serde(default)]
    body: Option<Value>,
}

fn default_method() -> String {
    "POST".to_string()
}

fn default_type() -> String {
    "xmlhttprequest".to_string()
}

impl From<RequestLine> for ObservedRequest {
    fn from(line: RequestLine) -> Self {
        let request = ObservedRequest::new(line.url, line.method, line.request_type);
        match line.body {
            Some(Value::String(raw)) => request.with_body(raw),
            Some(Value::Null) | None => request,
            Some(body) => request.with_json_body(&body),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load_or_default(&cli.config)?;
    logging::init(&config.logging, cli.verbose)?;

    match cli.command {
        Commands::Init { force } => init_config(&cli.config, force),
        Commands::Capture { requests, enable } => capture(config, requests, enable).await,
        Commands::Responses { action } => responses(config, action),
        Commands::Export { process } => export(config, process).await,
        Commands::Config { action } => show_or_set_config(config, action),
    }
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    let toml = Config::default().to_toml()?;
    std::fs::write(path, toml).with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

fn open_engine(config: &Config) -> Result<(CaptureEngine, Arc<dyn PageExecutor>)> {
    let store = JsonFileStore::open(&config.store.path)
        .with_context(|| format!("Failed to open state file {}", config.store.path.display()))?;
    let executor: Arc<dyn PageExecutor> =
        Arc::new(HttpPageExecutor::new(&config.session).context("Failed to build HTTP client")?);
    let engine = CaptureEngine::start(
        Arc::new(store),
        Arc::clone(&executor),
        Arc::new(LogNotifier),
        config.replay.clone(),
        config.capture.clone(),
    )?;
    Ok((engine, executor))
}

async fn capture(config: Config, requests: PathBuf, enable: bool) -> Result<()> {
    let (engine, _) = open_engine(&config)?;
    if enable {
        engine.toggle_capture(true)?;
    }
    if !engine.is_capturing() {
        warn!("Capturing is off; requests will be ignored (pass --enable)");
    }

    let mut events = engine.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let EngineEvent::PageCaptured {
                session_id,
                page,
                total_pages,
            } = event
            {
                println!("[{}] page {}/{}", session_id, page, total_pages);
            }
        }
    });

    let file = std::fs::File::open(&requests)
        .with_context(|| format!("Failed to open {}", requests.display()))?;
    for (n, line) in std::io::BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let request: RequestLine = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                warn!("Skipping line {}: {}", n + 1, e);
                continue;
            }
        };
        let url = request.url.clone();
        match engine.handle_request(request.into()).await? {
            CaptureOutcome::Started(id) => info!(session = id, "Started capture of {}", url),
            outcome => info!(?outcome, "{}", truncate_str(&url, 80)),
        }
    }

    match engine.wait_for_session().await {
        Some(SessionOutcome::Completed { session_id, pages }) => {
            println!("Session {} captured {} page(s)", session_id, pages)
        }
        Some(outcome) => println!("Last session ended: {:?}", outcome),
        None => println!("No capture session started"),
    }
    Ok(())
}

fn responses(config: Config, action: ResponsesAction) -> Result<()> {
    let (engine, _) = open_engine(&config)?;
    match action {
        ResponsesAction::List { json } => {
            let pages = engine.responses()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&pages)?);
                return Ok(());
            }
            for page in &pages {
                println!(
                    "{:>3}/{:<3} {} {} {}",
                    page.page,
                    page.total_pages,
                    page.status_code,
                    page.group_id.as_deref().unwrap_or("-"),
                    truncate_str(&page.url, 60)
                );
            }
            println!("{} buffered page(s)", pages.len());
        }
        ResponsesAction::Clear => {
            engine.clear_responses()?;
            println!("Response buffer cleared");
        }
    }
    Ok(())
}

async fn export(config: Config, process: bool) -> Result<()> {
    let (engine, executor) = open_engine(&config)?;

    let mut orchestrator = EnrichmentOrchestrator::new(executor, config.enrichment.clone());
    if config.classifier.enabled {
        let classifier = ChatCompletionsClassifier::new(&config.classifier)
            .context("Failed to build relevance classifier")?;
        orchestrator = orchestrator.with_classifier(Arc::new(classifier));
    } else if process {
        warn!("Relevance classifier disabled; records will not be scored");
    }
    let sink = Arc::new(JsonWorkbookSink::new(&config.export.output_dir));
    engine.set_exporter(Exporter::new(orchestrator, sink));

    let canceller = engine.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current batch");
            canceller.cancel_export();
        }
    });

    let summary = engine.process_and_export(None, process).await?;
    println!("Wrote {} ({} notes)", summary.location, summary.notes);
    if let Some(valid) = summary.valid_records {
        println!("{} valid record(s)", valid);
    }
    if let Some(reason) = summary.aborted {
        println!("Enrichment stopped early: {}", reason);
    }
    Ok(())
}

fn show_or_set_config(config: Config, action: ConfigAction) -> Result<()> {
    let (engine, _) = open_engine(&config)?;
    match action {
        ConfigAction::Show => {
            println!("{}", config.to_toml()?);
            println!("# stored capture config");
            println!("{}", serde_json::to_string_pretty(&engine.stored_config()?)?);
        }
        ConfigAction::SetPatterns { patterns } => {
            let stored = engine.stored_config()?;
            let saved = engine.save_config(CaptureConfig {
                url_patterns: patterns,
                ..stored
            })?;
            println!("Saved {} URL pattern(s)", saved.url_patterns.len());
        }
    }
    Ok(())
}
