mod config;
mod contract;
mod extract;
mod fetch;
mod html;
mod index;
mod run;
mod sink;
mod store;
mod validate;

use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, Subcommand, ValueEnum};

use crate::extract::generative::{GenerativeExtractor, HttpGenerativeModel};
use crate::extract::Extractor;

#[derive(Parser)]
#[command(name = "sapds_scraper", about = "SAP table datasheet scraper and data-contract generator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ExtractorKind {
    /// Fixed-structure HTML parsing
    Structural,
    /// Language-model interpretation of the page
    Generative,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the table index and populate the queue
    Init,
    /// Process queued tables: fetch, extract, build and persist contracts
    Run {
        /// Max tables to process (default: all queued)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Newline-delimited allow-list of table names (blank lines and # comments ignored)
        #[arg(long)]
        tables_file: Option<PathBuf>,
        /// Concurrent fan-out instead of sequential processing
        #[arg(long)]
        async_mode: bool,
        /// Extraction strategy
        #[arg(long, value_enum, default_value = "structural")]
        extractor: ExtractorKind,
    },
    /// Validate persisted contract files and report counts
    Validate {
        /// Contracts directory (default: CONTRACTS_DIR)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Show queue and contract statistics
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let cfg = config::Config::from_env()?;

    let result = match cli.command {
        Commands::Init => {
            let conn = store::connect(&cfg.db_path)?;
            store::init_schema(&conn)?;
            let fetcher = fetch::Fetcher::new(&cfg);
            let tables = index::discover(&fetcher, &cfg.base_url).await?;
            let inserted = store::insert_tables(&conn, &tables)?;
            println!("Queued {} new tables ({} total found)", inserted, tables.len());
            Ok(())
        }
        Commands::Run { limit, tables_file, async_mode, extractor } => {
            let conn = store::connect(&cfg.db_path)?;
            store::init_schema(&conn)?;
            let extractor = build_extractor(extractor, &cfg)?;
            let opts = run::RunOptions { limit, tables_file, async_mode };
            let report = run::run(&conn, &cfg, extractor, &opts).await?;
            if report.outcomes.is_empty() {
                println!("No tables to process. Run 'init' first, or loosen the allow-list.");
            } else {
                report.print();
            }
            Ok(())
        }
        Commands::Validate { dir } => {
            let dir = dir.unwrap_or_else(|| PathBuf::from(&cfg.contracts_dir));
            let report = validate::validate_dir(&dir)?;
            report.print();
            Ok(())
        }
        Commands::Stats => {
            let conn = store::connect(&cfg.db_path)?;
            store::init_schema(&conn)?;
            let s = store::get_stats(&conn)?;
            println!("Queued:    {}", s.total);
            println!("Visited:   {}", s.visited);
            println!("Unvisited: {}", s.unvisited);
            println!("Contracts: {}", s.contracts);
            println!("Complete:  {}", s.complete);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

/// The generative strategy needs a model client; refusing to start without
/// its credential is the one fatal configuration check.
fn build_extractor(kind: ExtractorKind, cfg: &config::Config) -> anyhow::Result<Extractor> {
    match kind {
        ExtractorKind::Structural => Ok(Extractor::Structural),
        ExtractorKind::Generative => {
            let model = HttpGenerativeModel::new(cfg)?;
            Ok(Extractor::Generative(GenerativeExtractor::new(Box::new(model))))
        }
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
