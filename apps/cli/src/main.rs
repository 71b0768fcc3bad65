//! Fetchline CLI - Command-line resumable downloader
//!
//! Downloads one file per invocation with a live progress bar. Ctrl-C pauses
//! the transfer and keeps the partial file for a later `--no-replace` run.

mod commands;
mod output;
mod progress;

use anyhow::Result;
use clap::{Parser, Subcommand};
use fetchline_core::SettingsStore;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Fetchline - Resumable HTTP Downloader
#[derive(Parser)]
#[command(name = "fetchline")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Config directory for Fetchline
    #[arg(long, env = "FETCHLINE_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "human")]
    output: OutputFormat,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum OutputFormat {
    Human,
    Json,
    Table,
}

#[derive(Subcommand)]
enum Commands {
    /// Download a file
    Get {
        /// URL to download
        url: String,

        /// Output file path (defaults to the URL's file name in the download dir)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Bandwidth cap in bytes/sec (0 = unlimited)
        #[arg(long)]
        max_speed: Option<u64>,

        /// Retries allowed after a transient failure
        #[arg(long)]
        retries: Option<u32>,

        /// Connect and read timeout in milliseconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Progress refresh interval in milliseconds
        #[arg(long)]
        refresh: Option<u64>,

        /// Keep an existing file and resume from its length
        #[arg(long)]
        no_replace: bool,
    },

    /// Probe URLs for size and resume support
    Probe {
        /// URLs to probe
        urls: Vec<String>,
    },

    /// Show/update settings
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a config value
    Get {
        /// Config key
        key: String,
    },

    /// Set a config value
    Set {
        /// Config key
        key: String,

        /// Config value
        value: String,
    },

    /// Show all config
    Show,

    /// Reset to defaults
    Reset {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

/// Job overrides given on the `get` command line
pub struct GetOptions {
    pub output: Option<PathBuf>,
    pub max_speed: Option<u64>,
    pub retries: Option<u32>,
    pub timeout: Option<u64>,
    pub refresh: Option<u64>,
    pub no_replace: bool,
}

fn init_logging(verbose: bool) {
    // Logs go to stderr so they never interleave with JSON output
    let default = if verbose { "fetchline_core=debug,info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let store = SettingsStore::new(cli.config_dir.unwrap_or_else(SettingsStore::default_dir));

    match cli.command {
        Commands::Get {
            url,
            output,
            max_speed,
            retries,
            timeout,
            refresh,
            no_replace,
        } => {
            let options = GetOptions {
                output,
                max_speed,
                retries,
                timeout,
                refresh,
                no_replace,
            };
            commands::get(&store, &url, options, cli.output).await?
        }

        Commands::Probe { urls } => commands::probe_urls(&store, urls, cli.output).await?,

        Commands::Config { action } => commands::config_action(&store, action, cli.output).await?,

        Commands::Completions { shell } => {
            use clap::CommandFactory;
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "fetchline",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}
