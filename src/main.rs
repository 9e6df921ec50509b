//! Capstan - capability discovery, loading and hot reload.
//!
//! Discovers capability plugins under a root directory, validates and
//! activates them, and publishes them to a catalog.

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use capstan::{Config, Engine};

/// Capability discovery, loading and hot reload
#[derive(Parser)]
#[command(name = "capstan")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Capability root directory (overrides config)
    #[arg(short, long, global = true, env = "CAPSTAN_ROOT")]
    root: Option<PathBuf>,

    /// Configuration file (defaults to .capstan.toml, then the user config)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List discovered capabilities and scan statistics
    Scan {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print validation errors for every capability
    Validate,

    /// Run a discovery pass and print the summary
    Bootstrap {
        /// Keep reconciling until Ctrl+C
        #[arg(short, long)]
        watch: bool,
    },

    /// Run a discovery pass and print per-capability results
    Status {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print the catalog written by the last pass
    Catalog,

    /// Show configuration
    Config {
        /// Show config file path
        #[arg(long)]
        path: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose { EnvFilter::new("debug") } else { EnvFilter::new("warn") };

    tracing_subscriber::registry().with(fmt::layer().with_target(false)).with(filter).init();

    let config = load_config(cli.config.as_deref(), cli.root)?;

    match cli.command {
        Commands::Scan { format } => cmd_scan(&config, &format)?,
        Commands::Validate => cmd_validate(&config)?,
        Commands::Bootstrap { watch } => cmd_bootstrap(config, watch)?,
        Commands::Status { format } => cmd_status(config, &format)?,
        Commands::Catalog => cmd_catalog(&config)?,
        Commands::Config { path } => cmd_config(&config, path)?,
    }

    Ok(())
}

fn load_config(path: Option<&Path>, root: Option<PathBuf>) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::load_from_file(path)?,
        None => Config::load()?,
    };
    if let Some(root) = root {
        config.engine.root = root;
    }
    Ok(config)
}

/// Scan the capability root without activating anything.
fn cmd_scan(config: &Config, format: &str) -> Result<()> {
    use capstan::scanner::CapabilityScanner;

    let scanner = CapabilityScanner::new(&config.engine.root)
        .with_ignore_dirs(config.engine.ignore_dirs.clone());
    let records = scanner.scan_all()?;
    let stats = scanner.last_stats().unwrap_or_default();

    if format == "json" {
        let output = serde_json::json!({ "capabilities": records, "stats": stats });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Discovered {} capabilities in {:?}\n", records.len(), config.engine.root);

    for record in records.values() {
        let marker = if record.auto_generated { " (auto-generated)" } else { "" };
        println!(
            "  - {} v{} [{}, {}]{}",
            record.name, record.version, record.category, record.priority, marker
        );
    }

    if !stats.by_format.is_empty() {
        println!("\nBy format:");
        for (format, count) in &stats.by_format {
            println!("  {format}: {count}");
        }
    }

    for (path, error) in &stats.failed {
        println!("\nSkipped {}: {}", path.display(), error);
    }
    for collision in &stats.collisions {
        println!(
            "\nDuplicate name '{}': kept {}, ignored {}",
            collision.name,
            collision.kept.display(),
            collision.ignored.display()
        );
    }

    Ok(())
}

/// Validate every discovered capability.
fn cmd_validate(config: &Config) -> Result<()> {
    use capstan::scanner::CapabilityScanner;

    let scanner = CapabilityScanner::new(&config.engine.root)
        .with_ignore_dirs(config.engine.ignore_dirs.clone());
    let records = scanner.scan_all()?;

    let mut invalid = 0;
    for record in records.values() {
        let errors = scanner.validate(record);
        if errors.is_empty() {
            println!("✓ {}", record.name);
        } else {
            invalid += 1;
            println!("✗ {}", record.name);
            for error in errors {
                println!("    {error}");
            }
        }
    }

    println!("\n{} of {} capabilities valid", records.len() - invalid, records.len());
    Ok(())
}

/// Build the engine and run a bootstrap pass.
///
/// A catastrophic failure is reported as a failed bootstrap with an empty
/// result and exits the process.
fn start(config: Config) -> Engine {
    let result = Engine::from_config(config).and_then(|engine| {
        engine.bootstrap()?;
        Ok(engine)
    });

    match result {
        Ok(engine) => engine,
        Err(e) => {
            tracing::error!(error = %e, "Bootstrap failed");
            println!("bootstrap failed: {e}");
            println!("{{}}");
            std::process::exit(1);
        }
    }
}

fn cmd_bootstrap(config: Config, watch: bool) -> Result<()> {
    let engine = start(config);

    println!("{}", engine.summary().headline());

    if watch {
        engine.start_monitor()?;
        println!("\nWatching {:?}. Press Ctrl+C to stop.", engine.config().engine.root);

        // Wait for interrupt
        let (tx, rx) = std::sync::mpsc::channel();
        ctrlc::set_handler(move || {
            let _ = tx.send(());
        })?;

        let _ = rx.recv();
        println!("\nStopping...");
        engine.stop();
        println!("{}", engine.summary().headline());
    }

    Ok(())
}

fn cmd_status(config: Config, format: &str) -> Result<()> {
    let engine = start(config);
    let summary = engine.summary();

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("{}\n", summary.headline());
    for status in &summary.capabilities {
        if status.available {
            println!("✓ {}", status.name);
        } else {
            println!("✗ {}", status.name);
            if let Some(ref reason) = status.reason {
                println!("    {reason}");
            }
        }
    }

    Ok(())
}

fn cmd_catalog(config: &Config) -> Result<()> {
    use capstan::registry::CapabilityRegistry;

    let entries = CapabilityRegistry::read_catalog(&config.registry.dir)?;
    println!("{}", serde_json::to_string_pretty(&entries)?);
    Ok(())
}

fn cmd_config(config: &Config, show_path: bool) -> Result<()> {
    if show_path {
        if let Some(path) = Config::config_dir() {
            println!("{}", path.display());
        }
        return Ok(());
    }

    let toml = toml::to_string_pretty(config)?;
    println!("{toml}");

    Ok(())
}
