use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::bail;
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use catalog_crawler::config::Settings;
use catalog_crawler::db::{ProductStore, SqliteStore};
use catalog_crawler::ingest::{CatalogIngestor, IngestOptions, RunReport, StageReport};
use catalog_crawler::model::Stage;
use catalog_crawler::source::ApiSource;

#[derive(Parser)]
#[command(name = "catalog_crawler", about = "Product catalog crawler: listing, stock and detail stages")]
struct Cli {
    /// Config file (default: ./catalog_crawler.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Count, list, then refresh stock and details
    Run {
        /// Categories to crawl (default: crawl.categories from config)
        categories: Vec<String>,
    },
    /// Count categories and insert new products
    Listing {
        categories: Vec<String>,
    },
    /// Refresh stock totals for products not yet stock-confirmed
    Stock,
    /// Scrape detail pages not yet detail-confirmed
    Details,
    /// Show product and confirmation counts
    Stats,
    /// Forget confirmations so the stage runs again
    Reset {
        #[arg(value_enum)]
        stage: ResetStage,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ResetStage {
    Stock,
    Detail,
}

impl From<ResetStage> for Stage {
    fn from(s: ResetStage) -> Self {
        match s {
            ResetStage::Stock => Stage::Stock,
            ResetStage::Detail => Stage::Detail,
        }
    }
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
    let settings = Settings::load(cli.config.as_deref())?;

    let db = &settings.database;
    let store = Arc::new(SqliteStore::open(&db.path, db.pool_size, db.busy_timeout())?);

    let result: anyhow::Result<()> = async {
        match cli.command {
            Commands::Run { categories } => {
                let categories = pick_categories(categories, &settings)?;
                let ingestor = build_ingestor(&settings, Arc::clone(&store))?;
                let report = ingestor.run(&categories).await?;
                print_run(&report);
                Ok(())
            }
            Commands::Listing { categories } => {
                let categories = pick_categories(categories, &settings)?;
                let ingestor = build_ingestor(&settings, Arc::clone(&store))?;
                let report = ingestor.run_listing(&categories).await?;
                println!("{} categories, {} pages.", report.counts.len(), report.pages);
                print_stage(&report.stage);
                Ok(())
            }
            Commands::Stock => {
                let ingestor = build_ingestor(&settings, Arc::clone(&store))?;
                print_stage(&ingestor.run_stock().await?);
                Ok(())
            }
            Commands::Details => {
                let ingestor = build_ingestor(&settings, Arc::clone(&store))?;
                print_stage(&ingestor.run_detail().await?);
                Ok(())
            }
            Commands::Stats => {
                let s = store.stats().await?;
                println!("Products:         {}", s.products);
                println!("Stock confirmed:  {}", s.stock_confirmed);
                println!("Detail confirmed: {}", s.detail_confirmed);
                println!("Units in stock:   {}", s.units_in_stock);
                Ok(())
            }
            Commands::Reset { stage } => {
                let stage = Stage::from(stage);
                let cleared = store.clear_confirmed(stage).await?;
                println!("Cleared {} {} confirmations.", cleared, stage);
                Ok(())
            }
        }
    }
    .await;

    store.close();

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn pick_categories(from_cli: Vec<String>, settings: &Settings) -> anyhow::Result<Vec<String>> {
    let categories = if from_cli.is_empty() {
        settings.crawl.categories.clone()
    } else {
        from_cli
    };
    if categories.is_empty() {
        bail!("No categories given. Pass them as arguments or set crawl.categories.");
    }
    Ok(categories)
}

fn build_ingestor(
    settings: &Settings,
    store: Arc<SqliteStore>,
) -> anyhow::Result<CatalogIngestor<ApiSource, SqliteStore>> {
    let source = Arc::new(ApiSource::new(settings)?);
    let options = IngestOptions {
        show_progress: true,
        ..IngestOptions::from(&settings.crawl)
    };

    // Ctrl-C stops dispatch; running requests finish
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, draining in-flight requests...");
            on_signal.cancel();
        }
    });

    Ok(CatalogIngestor::new(source, store, options, cancel))
}

fn print_stage(s: &StageReport) {
    println!(
        "{:<8} {} tasks ({} ok, {} failed, {} skipped), {} written",
        s.stage.as_str(), s.attempted, s.succeeded, s.failed, s.skipped, s.written
    );
}

fn print_run(report: &RunReport) {
    println!("\n--- Categories ---");
    for c in &report.categories {
        println!("  {:<32} {:>7}", c.category_id, c.total);
    }
    println!("\n--- Stages ---");
    for s in &report.stages {
        print_stage(s);
    }
    for e in &report.errors {
        println!("error: {}", e);
    }
    println!(
        "\nRun {} -> {}",
        report.started_at.format("%Y-%m-%d %H:%M:%S"),
        report.finished_at.format("%H:%M:%S")
    );
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
