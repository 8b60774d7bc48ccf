//! OverWatch CLI
//!
//! ```text
//! overwatch run "bivol last fight"   # collect evidence and write the report
//! overwatch collect bivol last fight # collect evidence only
//! overwatch report                   # report on the latest collected query
//! ```

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use overwatch::clients::OpenRouterClient;
use overwatch::config::OverwatchConfig;
use overwatch::pipeline::{PipelineOutcome, PipelineProgress};
use overwatch::research::{self, Collaborators, CollectOutcome, Research, ReportOutcome};
use overwatch::store::EvidenceStore;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "overwatch")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Search, scrape and summarize the web against a fact-verification checklist")]
struct Cli {
    /// Config file (defaults to ./overwatch.toml)
    #[arg(long, global = true, env = "OVERWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Concurrent page fetches
    #[arg(long, global = true)]
    fetch_concurrency: Option<usize>,

    /// Concurrent summarization requests
    #[arg(long, global = true)]
    summarize_concurrency: Option<usize>,

    /// Maximum search results to process
    #[arg(long, global = true)]
    max_urls: Option<usize>,

    /// Skip the LLM connection check
    #[arg(long, global = true)]
    skip_verify: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect evidence for a query and write the final report
    Run {
        /// Query words (prompted for when omitted)
        query: Vec<String>,
    },
    /// Collect evidence for a query without writing a report
    Collect {
        /// Query words (prompted for when omitted)
        query: Vec<String>,
    },
    /// Write the report for the most recently collected query
    Report,
}

fn load_env_file() {
    let cwd = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(e) => {
            tracing::warn!(error = %e, "Could not determine current directory for .env lookup");
            return;
        }
    };

    let mut current = cwd.clone();
    loop {
        let candidate = current.join(".env");
        if candidate.exists() {
            match dotenvy::from_path(&candidate) {
                Ok(_) => tracing::debug!(path = %candidate.display(), "Loaded environment from .env"),
                Err(e) => tracing::warn!(
                    path = %candidate.display(),
                    error = %e,
                    "Failed to load .env file"
                ),
            }
            return;
        }
        if !current.pop() {
            break;
        }
    }
    tracing::debug!(cwd = %cwd.display(), "No .env file found; using process environment only");
}

fn load_config(cli: &Cli) -> Result<OverwatchConfig> {
    let mut config = OverwatchConfig::load(cli.config.as_deref())?;
    if let Some(n) = cli.fetch_concurrency {
        config.pipeline.fetch_concurrency = n;
    }
    if let Some(n) = cli.summarize_concurrency {
        config.pipeline.summarize_concurrency = n;
    }
    if let Some(n) = cli.max_urls {
        config.search.max_urls = n;
    }
    config.validate()?;
    Ok(config)
}

fn read_query(words: &[String]) -> Result<String> {
    let query = if words.is_empty() {
        print!("Enter your search query: ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        std::io::stdin()
            .lock()
            .read_line(&mut line)
            .context("failed to read query from stdin")?;
        line
    } else {
        words.join(" ")
    };

    let query = query.trim().to_string();
    if query.is_empty() {
        bail!("query cannot be empty");
    }
    Ok(query)
}

/// Print progress on one refreshed stderr line until the sender is dropped.
fn spawn_progress_printer() -> (
    mpsc::UnboundedSender<PipelineProgress>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<PipelineProgress>();
    let handle = tokio::spawn(async move {
        let mut printed = false;
        while let Some(progress) = rx.recv().await {
            eprint!("\r{progress}");
            printed = true;
        }
        if printed {
            eprintln!();
        }
    });
    (tx, handle)
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; finishing in-flight work");
            token.cancel();
        }
    });
    cancel
}

async fn collect_or_run(
    config: OverwatchConfig,
    skip_verify: bool,
    query: &str,
    report: bool,
) -> Result<()> {
    let collaborators = Collaborators::from_config(&config)?;
    let store = EvidenceStore::open(&config.database_path()).await?;
    let (progress_tx, printer) = spawn_progress_printer();

    let research = Research::new(config, store.clone(), collaborators)
        .skip_verification(skip_verify)
        .with_progress(progress_tx)
        .with_cancellation(cancel_on_ctrl_c());

    let result = if report {
        research.run(query).await.map(|run| (run.collect, run.report))
    } else {
        research.collect(query).await.map(|collect| (collect, None))
    };
    drop(research);
    let _ = printer.await;
    store.close().await;

    let (collect, report) = result?;
    print_collect(&collect);
    if let Some(report) = report {
        print_report(&report);
    }
    Ok(())
}

fn print_collect(collect: &CollectOutcome) {
    if let Some(domain) = &collect.domain {
        println!("Domain: {domain}");
    }
    println!("\nChecklist:\n{}\n", collect.checklist);
    print_pipeline(&collect.pipeline);
}

fn print_pipeline(outcome: &PipelineOutcome) {
    println!(
        "Processed {} URLs: {} with content, {} summarized, {} without content",
        outcome.total, outcome.found, outcome.summarized, outcome.failed
    );
    if outcome.cancelled {
        println!("Run cancelled: {} URLs were not fetched", outcome.skipped);
    }
}

fn print_report(report: &ReportOutcome) {
    println!("\n{}\n", report.report);
    println!(
        "Report on \"{}\" from {} sources ({} with findings) saved to {}",
        report.query.query,
        report.sources,
        report.informative,
        report.path.display()
    );
}

async fn execute(cli: &Cli) -> Result<()> {
    load_env_file();
    let config = load_config(cli)?;

    match &cli.command {
        Commands::Run { query } => {
            let query = read_query(query)?;
            collect_or_run(config, cli.skip_verify, &query, true).await
        }
        Commands::Collect { query } => {
            let query = read_query(query)?;
            collect_or_run(config, cli.skip_verify, &query, false).await
        }
        Commands::Report => {
            let llm = Arc::new(OpenRouterClient::new(&config.llm)?);
            let store = EvidenceStore::open(&config.database_path()).await?;
            let report = research::generate_report(&store, llm, &config).await;
            store.close().await;
            report.map(|report| print_report(&report)).map_err(Into::into)
        }
    }
}

/// Single-line diagnostic for a failed command. Causes are already part of
/// the outer message, so the chain is not repeated.
fn failure_line(e: &anyhow::Error) -> String {
    format!("error: {e}")
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "overwatch=info,warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match execute(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::debug!(error = ?e, "overwatch failed");
            eprintln!("{}", failure_line(&e));
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use overwatch::clients::LlmError;
    use overwatch::error::Error;

    use super::*;

    #[test]
    fn failure_line_is_one_line_without_repeated_cause() {
        let err = anyhow::Error::from(Error::from(LlmError::Api {
            status: 401,
            message: "bad key".to_string(),
        }));
        let line = failure_line(&err);
        assert!(!line.contains('\n'));
        assert!(line.starts_with("error: "));
        assert_eq!(line.matches("bad key").count(), 1);
    }
}
