use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

mod bookmarks;
mod classifier;
mod config;
mod error;
mod orchestrator;
mod parser;
mod pipeline;
mod progress;
mod report;
mod serializer;
mod state;
mod store;
mod tree;

use classifier::ChatClassifier;
use orchestrator::RunOutcome;
use pipeline::{CategorizerEngine, DEFAULT_EXPORT_FILE};

#[derive(Parser)]
#[command(name = "bookmark-categorizer")]
#[command(about = "Reorganize exported browser bookmarks into AI-assigned categories", long_about = None)]
#[command(version)]
struct Cli {
    /// Directory holding configuration and progress (default: ~/.bookmark-categorizer)
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a Netscape bookmark HTML export and start a new run
    Parse {
        /// Path to the exported bookmarks file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Categorize parsed bookmarks, resuming an unfinished run
    Categorize {
        /// Bookmarks per service call (overrides the configured value)
        #[arg(short, long)]
        batch_size: Option<usize>,
    },

    /// Export categorized bookmarks as an importable HTML file
    Export {
        /// Output file
        #[arg(short, long, default_value = DEFAULT_EXPORT_FILE)]
        output: PathBuf,

        /// Keep the pipeline state after a successful export
        #[arg(long)]
        keep_state: bool,
    },

    /// Show pipeline progress and category totals
    Status {
        /// Show every category path and uncategorized bookmark
        #[arg(short, long)]
        detailed: bool,
    },

    /// List bookmarks that could not be categorized
    Uncategorized,

    /// Re-submit uncategorized bookmarks to the classification service
    Retry {
        /// Bookmarks per service call (overrides the configured value)
        #[arg(short, long)]
        batch_size: Option<usize>,
    },

    /// Start new: discard progress and snapshots (configuration is kept)
    Reset {
        /// Confirm the reset
        #[arg(short, long)]
        yes: bool,
    },

    /// Show or change the configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration (API key masked)
    Show,

    /// Update stored configuration values
    Set {
        /// Chat-completions endpoint URL
        #[arg(long)]
        api_url: Option<String>,

        #[arg(long)]
        api_key: Option<String>,

        #[arg(long)]
        model: Option<String>,

        #[arg(long)]
        batch_size: Option<usize>,

        /// Categorization instructions
        #[arg(long, conflicts_with = "prompt_file")]
        prompt: Option<String>,

        /// Read the categorization instructions from a file
        #[arg(long)]
        prompt_file: Option<PathBuf>,

        #[arg(long)]
        max_tokens: Option<u32>,

        /// Request timeout in seconds
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Attempts per batch before it is filed as uncategorized
        #[arg(long)]
        max_attempts: Option<u32>,
    },

    /// Restore the default configuration
    Reset,
}

/// First Ctrl-C stops at the next batch boundary, the second exits immediately
fn install_cancel_handler() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let handler_flag = flag.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("🛑 Interrupt received, stopping after the current batch (Ctrl-C again to abort)");
        handler_flag.store(true, Ordering::SeqCst);

        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 Aborted, progress up to the last finished batch is saved");
            std::process::exit(130);
        }
    });
    flag
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .init();

    let engine = CategorizerEngine::open(cli.state_dir)?;

    match cli.command {
        Commands::Parse { file } => {
            info!("📥 Parsing bookmarks from: {:?}", file);
            let spinner = progress::create_spinner("Parsing bookmarks...");
            match engine.parse_file(&file) {
                Ok(count) => {
                    progress::finish_with_success(&spinner, &format!("Parsed {} bookmarks", count));
                    println!("📖 {} bookmarks ready, run `categorize` next", count);
                }
                Err(e) => {
                    progress::finish_with_warning(&spinner, "Parse failed");
                    return Err(e);
                }
            }
        }

        Commands::Categorize { batch_size } => {
            let mut config = engine.config()?;
            if let Some(size) = batch_size {
                config.batch_size = size;
            }
            config.validate_for_classification()?;

            let classifier = ChatClassifier::new(&config)?;
            let cancel = install_cancel_handler();
            info!("🏷️  Categorizing in batches of {}", config.batch_size);

            let pb = progress::create_batch_progress_bar(0, "Categorizing bookmarks");
            let outcome = engine
                .categorize(&classifier, config.batch_size, Some(cancel), |done, total| {
                    progress::update(&pb, done, total)
                })
                .await;

            match outcome {
                Ok(RunOutcome::Completed(records)) => {
                    progress::finish_with_success(&pb, "Categorization complete");
                    let pending = records.iter().filter(|r| r.is_uncategorized()).count();
                    println!("🏷️  {} bookmarks categorized", records.len());
                    if pending > 0 {
                        println!("⚠️  {} uncategorized, see `uncategorized` or run `retry`", pending);
                    }
                    println!("➡️  Run `export` to write the reorganized bookmarks");
                }
                Ok(RunOutcome::Interrupted { processed, total }) => {
                    progress::finish_with_warning(&pb, "Interrupted");
                    println!("⏸️  Stopped at {}/{}; run `categorize` again to resume", processed, total);
                }
                Err(e) => {
                    progress::finish_with_warning(&pb, "Categorization failed");
                    return Err(e);
                }
            }
        }

        Commands::Export { output, keep_state } => {
            info!("📤 Exporting categorized bookmarks to {:?}", output);
            let summary = engine.export(&output, keep_state)?;
            println!(
                "✅ Wrote {} bookmarks in {} top-level categories to {}",
                summary.records,
                summary.top_level_categories,
                summary.path.display()
            );
        }

        Commands::Status { detailed } => {
            let report = engine.status()?;
            println!("{}", report.format(detailed));
        }

        Commands::Uncategorized => {
            let pending = engine.uncategorized()?;
            if pending.is_empty() {
                println!("✅ No uncategorized bookmarks");
            } else {
                println!("⚠️  {} uncategorized bookmarks:", pending.len());
                for record in &pending {
                    println!("  • {}\n    {}", record.title, record.url);
                }
            }
        }

        Commands::Retry { batch_size } => {
            let mut config = engine.config()?;
            if let Some(size) = batch_size {
                config.batch_size = size;
            }
            config.validate_for_classification()?;

            let classifier = ChatClassifier::new(&config)?;
            let cancel = install_cancel_handler();

            let pb = progress::create_batch_progress_bar(0, "Retrying uncategorized bookmarks");
            let summary = engine
                .retry(&classifier, config.batch_size, Some(cancel), |done, total| {
                    progress::update(&pb, done, total)
                })
                .await;

            match summary {
                Ok(summary) => {
                    if summary.interrupted {
                        progress::finish_with_warning(&pb, "Interrupted");
                    } else {
                        progress::finish_with_success(&pb, "Retry complete");
                    }
                    println!(
                        "🔁 {} retried, {} recovered, {} still uncategorized",
                        summary.attempted, summary.recovered, summary.still_uncategorized
                    );
                }
                Err(e) => {
                    progress::finish_with_warning(&pb, "Retry failed");
                    return Err(e);
                }
            }
        }

        Commands::Reset { yes } => {
            if !yes {
                eprintln!("⚠️  This discards the parsed bookmarks and all categorization progress.");
                eprintln!("   Re-run with --yes to confirm");
                std::process::exit(1);
            }
            engine.reset()?;
            println!("✅ Ready for a new run");
        }

        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let config = engine.config()?;
                println!("api_url:      {}", config.api_url);
                println!("api_key:      {}", config.masked_api_key());
                println!("model:        {}", config.model_name);
                println!("batch_size:   {}", config.batch_size);
                println!("max_tokens:   {}", config.max_tokens);
                println!("timeout_secs: {}", config.timeout_secs);
                println!("max_attempts: {}", config.max_attempts);
                println!("prompt:\n{}", config.prompt);
            }

            ConfigAction::Set {
                api_url,
                api_key,
                model,
                batch_size,
                prompt,
                prompt_file,
                max_tokens,
                timeout_secs,
                max_attempts,
            } => {
                // Stored values only; environment overrides are never persisted
                let mut config = engine.store().load_config()?;
                if let Some(v) = api_url {
                    config.api_url = v;
                }
                if let Some(v) = api_key {
                    config.api_key = v;
                }
                if let Some(v) = model {
                    config.model_name = v;
                }
                if let Some(v) = batch_size {
                    config.batch_size = v;
                }
                if let Some(v) = prompt {
                    config.prompt = v;
                }
                if let Some(path) = prompt_file {
                    config.prompt = std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read prompt file {:?}", path))?;
                }
                if let Some(v) = max_tokens {
                    config.max_tokens = v;
                }
                if let Some(v) = timeout_secs {
                    config.timeout_secs = v;
                }
                if let Some(v) = max_attempts {
                    config.max_attempts = v;
                }
                engine.save_config(&config)?;
            }

            ConfigAction::Reset => engine.reset_config()?,
        },
    }

    Ok(())
}
