use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::runtime::Runtime;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use newsgist::cli::commands;
use newsgist::config::SummaryMode;

#[derive(Parser)]
#[command(name = "newsgist")]
#[command(
    version,
    about = "Resilient, budget-governed summarization of news articles"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true)]
    verbose: bool,

    #[arg(long, short, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarize a JSON array of article records
    Summarize {
        #[arg(long, short, help = "Input JSON file (default: stdin)")]
        input: Option<PathBuf>,
        #[arg(long, short, help = "Output JSON file (default: stdout)")]
        output: Option<PathBuf>,
        #[arg(long, short, help = "Provider mode: local, secondary, premium")]
        mode: Option<SummaryMode>,
        #[arg(long, short, help = "Records summarized concurrently per batch")]
        batch_size: Option<usize>,
    },

    /// Show premium usage totals
    Usage {
        #[arg(
            short = 'f',
            long,
            default_value = "text",
            help = "Output format: text, json"
        )]
        format: String,
    },

    /// Manage the summary cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Remove every cached summary
    Clear,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration (merged from all sources)
    Show {
        #[arg(short = 'g', long, help = "Show global config file only")]
        global: bool,
        #[arg(
            short = 'f',
            long,
            default_value = "text",
            help = "Output format: text, json, toml"
        )]
        format: String,
    },
    /// Show configuration file paths
    Path,
    /// Initialize configuration
    Init {
        #[arg(long, short, help = "Initialize global config")]
        global: bool,
        #[arg(long, help = "Overwrite existing config")]
        force: bool,
    },
}

/// Set up panic handler for graceful error reporting
fn setup_panic_handler() {
    let default_hook = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |panic_info| {
        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        eprintln!("\n\x1b[1;31m━━━ PANIC ━━━\x1b[0m");
        eprintln!("\x1b[31mnewsgist encountered an unexpected error:\x1b[0m");
        eprintln!("  {}", message);

        if let Some(location) = panic_info.location() {
            eprintln!(
                "\x1b[90mLocation: {}:{}:{}\x1b[0m",
                location.file(),
                location.line(),
                location.column()
            );
        }

        eprintln!("\n\x1b[33mPlease report this issue at:\x1b[0m");
        eprintln!("  https://github.com/junyeong-ai/newsgist/issues");
        eprintln!();

        // Backtrace when RUST_BACKTRACE=1
        default_hook(panic_info);
    }));
}

fn main() -> ExitCode {
    setup_panic_handler();

    match run_cli() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("\x1b[31mError:\x1b[0m {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };

    // Logs go to stderr so summarized JSON on stdout stays parseable
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Summarize {
            input,
            output,
            mode,
            batch_size,
        } => {
            let rt = Runtime::new()?;
            rt.block_on(commands::summarize::run(commands::summarize::SummarizeArgs {
                input,
                output,
                mode,
                batch_size,
                quiet: cli.quiet,
            }))?;
        }
        Commands::Usage { format } => {
            let rt = Runtime::new()?;
            rt.block_on(commands::usage::run(&format))?;
        }
        Commands::Cache { action } => match action {
            CacheAction::Clear => {
                let rt = Runtime::new()?;
                rt.block_on(commands::cache::clear())?;
            }
        },
        Commands::Config { action } => match action {
            ConfigAction::Show { global, format } => {
                commands::config::show(global, &format)?;
            }
            ConfigAction::Path => {
                commands::config::path()?;
            }
            ConfigAction::Init { global, force } => {
                commands::config::init(global, force)?;
            }
        },
    }

    Ok(())
}
