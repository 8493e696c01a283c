use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use compressor::{CompactCommand, Compressor};
use filter::ExtensionFilter;
use session::SessionController;
use volume::LocalVolume;

mod cache;
mod compressor;
mod config;
mod engine;
mod filter;
mod scheduler;
mod session;
mod stats;
#[cfg(test)]
mod test_support;
mod types;
mod utils;
mod volume;

#[derive(Parser)]
#[command(name = "lzx-sweep")]
#[command(version)]
#[command(disable_help_subcommand = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log per-file decisions
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Compress every changed file under a directory tree
    Run(RunArgs),
    /// Delete the change-detection cache
    ResetCache,
    /// Show entry count and size of the change-detection cache
    CacheInfo,
    /// Manage configuration
    Config(ConfigArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Directory tree to sweep
    root: PathBuf,

    /// Extra extension to leave uncompressed (repeatable)
    #[arg(long = "skip-ext", value_name = "EXT")]
    skip_ext: Vec<String>,

    /// Ignore the configured skip list
    #[arg(long, default_value_t = false)]
    no_default_skips: bool,

    /// Override the in-flight ceiling multiplier
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    queue_multiplier: Option<u32>,

    /// Print the summary as JSON
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Args)]
struct ConfigArgs {
    #[command(subcommand)]
    subcommand: ConfigSubcommands,
}

#[derive(Subcommand)]
enum ConfigSubcommands {
    /// Create default configuration file
    Init {
        #[arg(long, default_value_t = false)]
        overwrite: bool,
    },
    /// Show current configuration
    Show,
    /// Set configuration value
    Set {
        /// Configuration key (queue-multiplier, program, algorithm, skip-extensions, low-priority, cache-path, number-comma, locale)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Run(args) => {
            if let Err(e) = run_sweep(args).await {
                eprintln!("Error: {e:#}");
                std::process::exit(1);
            }
        }
        Commands::ResetCache => {
            if let Err(e) = reset_cache() {
                eprintln!("Error resetting cache: {e:#}");
                std::process::exit(1);
            }
        }
        Commands::CacheInfo => {
            if let Err(e) = cache_info() {
                eprintln!("Error reading cache: {e:#}");
                std::process::exit(1);
            }
        }
        Commands::Config(config_args) => {
            handle_config_subcommand(config_args);
        }
    }
}

fn setup_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("lzx_sweep=debug,warn")
        } else {
            EnvFilter::new("lzx_sweep=info,warn")
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

fn load_config() -> Result<config::Config> {
    Ok(config::Config::load()
        .context("Failed to load configuration")?
        .unwrap_or_default())
}

async fn run_sweep(args: RunArgs) -> Result<()> {
    let config = load_config()?;
    let format_options = utils::NumberFormatOptions {
        use_comma: config.formatting.number_comma,
        locale: config.formatting.locale.clone(),
    };

    let mut skip = if args.no_default_skips {
        ExtensionFilter::new()
    } else {
        ExtensionFilter::from_extensions(&config.compression.skip_extensions)
    };
    for ext in &args.skip_ext {
        skip.add(ext);
    }

    let multiplier = args
        .queue_multiplier
        .map(|m| m as usize)
        .unwrap_or(config.scheduler.queue_multiplier);
    let ceiling = scheduler::ceiling_for(multiplier);

    let cache_path = config.cache_path()?;
    let compressor: Arc<dyn Compressor> =
        Arc::new(CompactCommand::from_config(&config.compression));
    let controller = SessionController::open(
        &cache_path,
        compressor,
        Arc::new(LocalVolume),
        skip,
        ceiling,
    )
    .with_context(|| {
        format!(
            "Cache {} is unusable; run `lzx-sweep reset-cache` to discard it",
            cache_path.display()
        )
    })?;

    let controller = Arc::new(controller);
    let interrupt = Arc::clone(&controller);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing files already in progress");
            interrupt.cancel();
        }
    });

    let summary = controller.run(&args.root).await;

    if args.json {
        let json = simd_json::to_string_pretty(&summary)?;
        println!("{json}");
    } else {
        println!("{}", summary.render(&format_options));
    }

    Ok(())
}

fn reset_cache() -> Result<()> {
    let path = load_config()?.cache_path()?;
    let removed = cache::reset_snapshot(&path)
        .with_context(|| format!("Failed to delete {}", path.display()))?;
    if removed {
        println!("Cache deleted: {}", path.display());
    } else {
        println!("No cache found at {}", path.display());
    }
    Ok(())
}

fn cache_info() -> Result<()> {
    let path = load_config()?.cache_path()?;
    match cache::inspect_snapshot(&path)? {
        Some(info) => {
            let options = utils::NumberFormatOptions::default();
            println!("Cache: {}", path.display());
            println!(
                "   Entries: {}",
                utils::format_number(info.total_entries as u64, &options)
            );
            println!("   Size: {}", utils::format_bytes(info.db_size));
        }
        None => println!("No cache found at {}", path.display()),
    }
    Ok(())
}

fn handle_config_subcommand(config_args: ConfigArgs) {
    match config_args.subcommand {
        ConfigSubcommands::Init { overwrite } => {
            if let Err(e) = config::create_default_config(overwrite) {
                eprintln!("Error creating config: {e}");
                std::process::exit(1);
            }
        }
        ConfigSubcommands::Show => {
            if let Err(e) = config::show_config() {
                eprintln!("Error showing config: {e}");
                std::process::exit(1);
            }
        }
        ConfigSubcommands::Set { key, value } => {
            if let Err(e) = config::set_config_value(&key, &value) {
                eprintln!("Error setting config: {e}");
                std::process::exit(1);
            }
        }
    }
}
