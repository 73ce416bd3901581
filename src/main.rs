use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process;

use kgmerge::config::{load_config, save_config, EtlConfig};
use kgmerge::errors::KgError;
use kgmerge::etl::Etl;
use kgmerge::resolution::ResolverRegistry;
use kgmerge::types::IdRequest;
use tracing_subscriber::EnvFilter;

/// Entity resolution and provenance-preserving merge for knowledge graphs.
#[derive(Parser)]
#[command(name = "kgmerge", about = "Resolve, merge, and load knowledge graph records")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the configured ETL
    Run {
        /// Path to the TOML configuration
        #[arg(short, long)]
        config: PathBuf,
        /// Empty every output before loading
        #[arg(short, long)]
        truncate: bool,
    },
    /// Resolve ids with one configured resolver and print the matches
    Resolve {
        /// Path to the TOML configuration
        #[arg(short, long)]
        config: PathBuf,
        /// Node type whose resolver to use
        #[arg(short, long)]
        label: String,
        /// Ids to resolve
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Write a default configuration file
    Init {
        /// Where to write the configuration
        #[arg(short, long, default_value = "kgmerge.toml")]
        config: PathBuf,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> kgmerge::errors::Result<()> {
    match cli.command {
        Commands::Run { config, truncate } => {
            let config = load_config(&config)?;
            let mut etl = Etl::from_config(&config)?;
            if truncate {
                etl.truncate_outputs()?;
            }
            let summary = etl.run()?;
            let resolution = summary.orchestration.resolution;
            println!(
                "Read {} records, merged {} in {} batches ({:.1}s)",
                summary.records_read,
                summary.records_merged,
                summary.batches_written,
                summary.elapsed.as_secs_f64()
            );
            println!(
                "  Resolution: {} updated, {} validated, {} newborn, {} unmatched, {} cached",
                resolution.updated,
                resolution.validated,
                resolution.newborn,
                resolution.unmatched,
                resolution.cached
            );
            println!(
                "  Relationships dropped: {}",
                summary.orchestration.relationships_dropped
            );
            println!(
                "  Written: {} nodes, {} edges",
                summary.writes.nodes, summary.writes.edges
            );
        }
        Commands::Resolve { config, label, ids } => {
            let config = load_config(&config)?;
            let mut registry = ResolverRegistry::from_config(&config)?;
            let entry = registry.get_mut(&label).ok_or_else(|| KgError::Config {
                message: format!("no resolver configured for '{}'", label),
            })?;
            let requests: Vec<IdRequest> =
                ids.iter().map(|id| IdRequest::new(id.clone(), label.clone())).collect();
            let matches: BTreeMap<_, _> = entry.resolver.resolve(&requests)?.into_iter().collect();
            println!("{}", serde_json::to_string_pretty(&matches)?);
        }
        Commands::Init { config } => {
            if config.exists() {
                return Err(KgError::Config {
                    message: format!("'{}' already exists", config.display()),
                });
            }
            save_config(&config, &EtlConfig::default())?;
            println!("Wrote default configuration to {}", config.display());
        }
    }
    Ok(())
}
