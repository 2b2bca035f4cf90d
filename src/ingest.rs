use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::CrawlSettings;
use crate::db::ProductStore;
use crate::dedup::pending;
use crate::error::{CrawlError, PlanError, TaskError};
use crate::executor::{BoundedExecutor, Progress, RunOutcome};
use crate::model::{CategoryCount, Credentials, FieldUpdate, Minted, PageRequest, Stage, StockSample};
use crate::planner::{chunk_keys, plan_all};
use crate::source::CatalogSource;
use crate::stock::{aggregate, into_totals};

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub page_size: u64,
    pub stock_chunk_size: usize,
    pub count_workers: usize,
    pub listing_workers: usize,
    pub stock_workers: usize,
    pub detail_workers: usize,
    pub request_timeout: Duration,
    pub show_progress: bool,
}

impl From<&CrawlSettings> for IngestOptions {
    fn from(c: &CrawlSettings) -> Self {
        IngestOptions {
            page_size: c.page_size,
            stock_chunk_size: c.stock_chunk_size,
            count_workers: c.count_workers,
            listing_workers: c.listing_workers,
            stock_workers: c.stock_workers,
            detail_workers: c.detail_workers,
            request_timeout: c.request_timeout(),
            show_progress: false,
        }
    }
}

impl Default for IngestOptions {
    fn default() -> Self {
        IngestOptions::from(&CrawlSettings::default())
    }
}

/// Per-stage tallies.
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Rows inserted (listing) or keys confirmed (stock, detail).
    pub written: usize,
}

impl StageReport {
    fn from_outcome<R>(stage: Stage, outcome: &RunOutcome<R>, written: usize) -> Self {
        StageReport {
            stage,
            attempted: outcome.attempted,
            succeeded: outcome.attempted - outcome.failed,
            failed: outcome.failed,
            skipped: outcome.skipped,
            written,
        }
    }

    fn idle(stage: Stage) -> Self {
        StageReport {
            stage,
            attempted: 0,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            written: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub categories: Vec<CategoryCountReport>,
    pub stages: Vec<StageReport>,
    /// Stock or detail stage failures the run continued past.
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryCountReport {
    pub category_id: String,
    pub total: u64,
}

/// Listing stage result: the counts it planned from plus its tallies.
#[derive(Debug, Clone)]
pub struct ListingReport {
    pub counts: Vec<CategoryCount>,
    pub pages: usize,
    pub stage: StageReport,
}

struct PageResult {
    fetched: usize,
    inserted: usize,
}

/// Drives the listing, stock and detail stages against a source and a store.
pub struct CatalogIngestor<S, P> {
    source: Arc<S>,
    store: Arc<P>,
    options: IngestOptions,
    cancel: CancellationToken,
}

impl<S, P> CatalogIngestor<S, P>
where
    S: CatalogSource,
    P: ProductStore + 'static,
{
    pub fn new(source: Arc<S>, store: Arc<P>, options: IngestOptions, cancel: CancellationToken) -> Self {
        CatalogIngestor {
            source,
            store,
            options,
            cancel,
        }
    }

    pub fn store(&self) -> &Arc<P> {
        &self.store
    }

    fn executor(&self, workers: usize) -> BoundedExecutor {
        BoundedExecutor::new(workers, self.options.request_timeout, self.cancel.clone())
    }

    fn progress(&self, label: &str, len: usize) -> Progress {
        if self.options.show_progress {
            Progress::bar(label, len as u64)
        } else {
            Progress::hidden()
        }
    }

    async fn mint(&self) -> Result<Arc<Credentials>, CrawlError> {
        self.source
            .credentials()
            .await
            .map(Arc::new)
            .map_err(CrawlError::Source)
    }

    fn check_cancelled(&self) -> Result<(), CrawlError> {
        if self.cancel.is_cancelled() {
            return Err(CrawlError::Cancelled);
        }
        Ok(())
    }

    /// Ask the source how many products each category holds. Categories whose
    /// probe fails are left out.
    pub async fn count_categories(&self, categories: &[String]) -> Result<Vec<CategoryCount>, CrawlError> {
        let credentials = self.mint().await?;
        let tasks = Minted::all(&credentials, categories.iter().cloned());

        let progress = self.progress("count", tasks.len());
        let source = Arc::clone(&self.source);
        let outcome = self
            .executor(self.options.count_workers)
            .run(tasks, &progress, move |task| count_one(Arc::clone(&source), task))
            .await;
        let outcome = close_stage(&progress, outcome, Stage::Listing)?;

        let mut counts = outcome.results;
        // keep the configured category order for planning
        counts.sort_by_key(|c| categories.iter().position(|id| *id == c.category_id));
        Ok(counts)
    }

    /// Count, plan and fetch every listing page, inserting new products.
    pub async fn run_listing(&self, categories: &[String]) -> Result<ListingReport, CrawlError> {
        if self.options.page_size == 0 {
            return Err(PlanError::ZeroPageSize.into());
        }
        self.check_cancelled()?;

        let counts = self.count_categories(categories).await?;
        let total: u64 = counts.iter().map(|c| c.total).sum();
        let pages = plan_all(&counts, self.options.page_size)?;
        info!(
            "Listing: {} categories, {} products, {} pages",
            counts.len(),
            total,
            pages.len()
        );
        self.check_cancelled()?;

        let credentials = self.mint().await?;
        let tasks = Minted::all(&credentials, pages);
        let page_count = tasks.len();

        let progress = self.progress("listing", page_count);
        let (source, store) = (Arc::clone(&self.source), Arc::clone(&self.store));
        let outcome = self
            .executor(self.options.listing_workers)
            .run(tasks, &progress, move |task| {
                fetch_page(Arc::clone(&source), Arc::clone(&store), task)
            })
            .await;
        let outcome = close_stage(&progress, outcome, Stage::Listing)?;

        let fetched: usize = outcome.results.iter().map(|r| r.fetched).sum();
        let inserted: usize = outcome.results.iter().map(|r| r.inserted).sum();
        info!(
            "Listing done: {} items fetched, {} new, {} pages failed",
            fetched, inserted, outcome.failed
        );

        Ok(ListingReport {
            counts,
            pages: page_count,
            stage: StageReport::from_outcome(Stage::Listing, &outcome, inserted),
        })
    }

    /// Refresh stock totals for every product not yet stock-confirmed.
    pub async fn run_stock(&self) -> Result<StageReport, CrawlError> {
        if self.options.stock_chunk_size == 0 {
            return Err(PlanError::ZeroChunkSize.into());
        }
        self.check_cancelled()?;

        let keys = pending(
            &self.store.all_keys().await?,
            &self.store.confirmed_keys(Stage::Stock).await?,
        );
        if keys.is_empty() {
            info!("Stock: nothing pending");
            return Ok(StageReport::idle(Stage::Stock));
        }
        let pending_count = keys.len();
        let chunks = chunk_keys(keys, self.options.stock_chunk_size)?;
        info!(
            "Stock: {} of {} products pending, {} chunks",
            pending_count,
            self.store.count().await?,
            chunks.len()
        );

        let credentials = self.mint().await?;
        let tasks = Minted::all(&credentials, chunks);

        let progress = self.progress("stock", tasks.len());
        let source = Arc::clone(&self.source);
        let outcome = self
            .executor(self.options.stock_workers)
            .run(tasks, &progress, move |task| fetch_chunk(Arc::clone(&source), task))
            .await;
        progress.finish();

        if outcome.all_failed() {
            return Err(CrawlError::StageFailed {
                stage: Stage::Stock,
                attempted: outcome.attempted,
            });
        }

        let totals = into_totals(aggregate(outcome.results.iter().flatten().cloned()));
        let updates: Vec<FieldUpdate> = totals.iter().cloned().map(FieldUpdate::Count).collect();
        let confirmed: Vec<String> = totals.into_iter().map(|t| t.key).collect();

        // fields first, so a confirmed key always has its total written
        self.store.update_fields(&updates).await?;
        let written = self.store.mark_confirmed(Stage::Stock, &confirmed).await?;
        info!("Stock done: {} products updated, {} chunks failed", written, outcome.failed);

        Ok(StageReport::from_outcome(Stage::Stock, &outcome, written))
    }

    /// Scrape detail pages for every URL not yet detail-confirmed.
    pub async fn run_detail(&self) -> Result<StageReport, CrawlError> {
        self.check_cancelled()?;

        let mut urls: Vec<String> = pending(
            &self.store.all_urls().await?,
            &self.store.confirmed_keys(Stage::Detail).await?,
        )
        .into_iter()
        .collect();
        if urls.is_empty() {
            info!("Detail: nothing pending");
            return Ok(StageReport::idle(Stage::Detail));
        }
        urls.sort();
        info!("Detail: {} of {} products pending", urls.len(), self.store.count().await?);

        let credentials = self.mint().await?;
        let tasks = Minted::all(&credentials, urls);

        let progress = self.progress("detail", tasks.len());
        let (source, store) = (Arc::clone(&self.source), Arc::clone(&self.store));
        let outcome = self
            .executor(self.options.detail_workers)
            .run(tasks, &progress, move |task| {
                fetch_detail_page(Arc::clone(&source), Arc::clone(&store), task)
            })
            .await;
        let outcome = close_stage(&progress, outcome, Stage::Detail)?;

        let written = outcome.results.len();
        info!("Detail done: {} pages written, {} failed", written, outcome.failed);
        Ok(StageReport::from_outcome(Stage::Detail, &outcome, written))
    }

    /// Full pipeline. A listing failure ends the run; stock and detail
    /// failures are recorded and the run goes on.
    pub async fn run(&self, categories: &[String]) -> Result<RunReport, CrawlError> {
        let started_at = Utc::now();
        let mut stages = Vec::with_capacity(3);
        let mut errors = Vec::new();

        let listing = self.run_listing(categories).await?;
        stages.push(listing.stage);
        self.check_cancelled()?;

        match self.run_stock().await {
            Ok(report) => stages.push(report),
            Err(e @ CrawlError::StageFailed { .. }) => {
                warn!("Continuing without stock: {}", e);
                errors.push(e.to_string());
            }
            Err(e) => return Err(e),
        }
        self.check_cancelled()?;

        match self.run_detail().await {
            Ok(report) => stages.push(report),
            Err(e @ CrawlError::StageFailed { .. }) => {
                warn!("Detail stage failed: {}", e);
                errors.push(e.to_string());
            }
            Err(e) => return Err(e),
        }

        Ok(RunReport {
            started_at,
            finished_at: Utc::now(),
            categories: listing
                .counts
                .into_iter()
                .map(|c| CategoryCountReport {
                    category_id: c.category_id,
                    total: c.total,
                })
                .collect(),
            stages,
            errors,
        })
    }
}

/// Clear the stage's progress bar, then escalate if every task failed.
fn close_stage<R>(progress: &Progress, outcome: RunOutcome<R>, stage: Stage) -> Result<RunOutcome<R>, CrawlError> {
    progress.finish();
    outcome.require_any(stage)
}

// ── Task operations ──

async fn count_one<S: CatalogSource>(source: Arc<S>, task: Minted<String>) -> Result<CategoryCount, TaskError> {
    Ok(source.count_category(&task.credentials, &task.request).await?)
}

async fn fetch_page<S, P>(source: Arc<S>, store: Arc<P>, task: Minted<PageRequest>) -> Result<PageResult, TaskError>
where
    S: CatalogSource,
    P: ProductStore,
{
    // empty category, nothing to fetch
    if task.request.is_probe() {
        return Ok(PageResult { fetched: 0, inserted: 0 });
    }
    let records = source.fetch_listing(&task.credentials, &task.request).await?;
    let inserted = store.upsert_ignore(&records).await?;
    Ok(PageResult {
        fetched: records.len(),
        inserted,
    })
}

async fn fetch_chunk<S: CatalogSource>(source: Arc<S>, task: Minted<Vec<String>>) -> Result<Vec<StockSample>, TaskError> {
    let samples = source.fetch_stock(&task.credentials, &task.request).await?;
    let requested: HashSet<&String> = task.request.iter().collect();
    Ok(samples.into_iter().filter(|s| requested.contains(&s.key)).collect())
}

async fn fetch_detail_page<S, P>(source: Arc<S>, store: Arc<P>, task: Minted<String>) -> Result<(), TaskError>
where
    S: CatalogSource,
    P: ProductStore,
{
    let mut detail = source.fetch_detail(&task.credentials, &task.request).await?;
    detail.url.clone_from(&task.request);
    store.update_fields(&[FieldUpdate::Detail(detail)]).await?;
    store.mark_confirmed(Stage::Detail, &[task.request]).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteStore;
    use crate::error::FetchError;
    use crate::model::{ProductDetail, ProductKey, ProductRecord};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Every category has `total` products; listing pages yield one product each.
    struct OneItemSource {
        total: u64,
        listing_calls: AtomicUsize,
        fail_credentials: bool,
    }

    impl OneItemSource {
        fn new(total: u64) -> Self {
            OneItemSource {
                total,
                listing_calls: AtomicUsize::new(0),
                fail_credentials: false,
            }
        }
    }

    #[async_trait]
    impl CatalogSource for OneItemSource {
        async fn credentials(&self) -> Result<Credentials, FetchError> {
            if self.fail_credentials {
                return Err(FetchError::Status {
                    status: 401,
                    url: "session".into(),
                });
            }
            Ok(Credentials::default())
        }

        async fn count_category(&self, _: &Credentials, category_id: &str) -> Result<CategoryCount, FetchError> {
            Ok(CategoryCount {
                category_id: category_id.into(),
                total: self.total,
            })
        }

        async fn fetch_listing(&self, _: &Credentials, page: &PageRequest) -> Result<Vec<ProductRecord>, FetchError> {
            self.listing_calls.fetch_add(1, Ordering::SeqCst);
            let key = format!("{}-{}", page.category_id, page.offset);
            Ok(vec![ProductRecord {
                url: format!("https://shop/{}", key),
                key,
                price: String::new(),
                breadcrumbs: String::new(),
                name: String::new(),
                count: 0,
                images: String::new(),
                description: String::new(),
            }])
        }

        async fn fetch_stock(&self, _: &Credentials, chunk: &[ProductKey]) -> Result<Vec<StockSample>, FetchError> {
            let mut samples: Vec<StockSample> = chunk
                .iter()
                .map(|k| StockSample {
                    key: k.clone(),
                    store_id: "1".into(),
                    level: Some(2),
                })
                .collect();
            samples.push(StockSample {
                key: "not-requested".into(),
                store_id: "1".into(),
                level: Some(99),
            });
            Ok(samples)
        }

        async fn fetch_detail(&self, _: &Credentials, _url: &str) -> Result<ProductDetail, FetchError> {
            Ok(ProductDetail {
                url: "ignored".into(),
                description: "desc".into(),
                ..ProductDetail::default()
            })
        }
    }

    fn ingestor(source: OneItemSource, options: IngestOptions) -> CatalogIngestor<OneItemSource, SqliteStore> {
        CatalogIngestor::new(
            Arc::new(source),
            Arc::new(SqliteStore::open_in_memory().unwrap()),
            options,
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn empty_category_probe_skips_network() {
        let ing = ingestor(OneItemSource::new(0), IngestOptions::default());
        let report = ing.run_listing(&["empty".into()]).await.unwrap();
        assert_eq!(report.pages, 1);
        assert_eq!(report.stage.succeeded, 1);
        assert_eq!(ing.source.listing_calls.load(Ordering::SeqCst), 0);
        assert_eq!(ing.store().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn zero_page_size_rejected_before_network() {
        let options = IngestOptions {
            page_size: 0,
            ..IngestOptions::default()
        };
        let ing = ingestor(OneItemSource::new(10), options);
        let err = ing.run_listing(&["paint".into()]).await.unwrap_err();
        assert!(matches!(err, CrawlError::Plan(PlanError::ZeroPageSize)));
        assert_eq!(ing.source.listing_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn credentials_failure_is_fatal() {
        let mut source = OneItemSource::new(10);
        source.fail_credentials = true;
        let ing = ingestor(source, IngestOptions::default());
        assert!(matches!(
            ing.run(&["paint".into()]).await,
            Err(CrawlError::Source(_))
        ));
    }

    #[tokio::test]
    async fn stock_ignores_unrequested_keys() {
        let options = IngestOptions {
            page_size: 5,
            ..IngestOptions::default()
        };
        let ing = ingestor(OneItemSource::new(10), options);
        ing.run_listing(&["paint".into()]).await.unwrap();

        let report = ing.run_stock().await.unwrap();
        assert_eq!(report.written, 2);
        let confirmed = ing.store().confirmed_keys(Stage::Stock).await.unwrap();
        assert!(!confirmed.contains("not-requested"));
        assert_eq!(ing.store().stats().await.unwrap().units_in_stock, 4);
    }

    #[tokio::test]
    async fn detail_confirms_by_requested_url() {
        let ing = ingestor(OneItemSource::new(1), IngestOptions::default());
        ing.run_listing(&["paint".into()]).await.unwrap();

        let report = ing.run_detail().await.unwrap();
        assert_eq!(report.written, 1);
        let confirmed = ing.store().confirmed_keys(Stage::Detail).await.unwrap();
        assert!(confirmed.contains("https://shop/paint-0"));
    }

    #[test]
    fn failed_stage_still_clears_progress() {
        let progress = Progress::bar("listing", 2);
        let outcome: RunOutcome<()> = RunOutcome {
            results: Vec::new(),
            attempted: 2,
            failed: 2,
            skipped: 0,
        };
        let err = close_stage(&progress, outcome, Stage::Listing).unwrap_err();
        assert!(matches!(err, CrawlError::StageFailed { stage: Stage::Listing, attempted: 2 }));
        assert!(progress.is_finished());
    }

    #[tokio::test]
    async fn cancelled_run_stops_at_stage_boundary() {
        let ing = ingestor(OneItemSource::new(10), IngestOptions::default());
        ing.cancel.cancel();
        assert!(matches!(
            ing.run(&["paint".into()]).await,
            Err(CrawlError::Cancelled)
        ));
    }
}
