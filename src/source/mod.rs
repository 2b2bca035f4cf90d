pub mod api;
pub mod detail;
pub mod listing;
pub mod payload;

use async_trait::async_trait;

use crate::error::FetchError;
use crate::model::{CategoryCount, Credentials, PageRequest, ProductDetail, ProductKey, ProductRecord, StockSample};

pub use api::ApiSource;

/// Network side of the crawl. Retries, backoff and session handling live behind
/// this boundary; the ingestor makes at most one call per task.
#[async_trait]
pub trait CatalogSource: Send + Sync + 'static {
    /// Credentials to mint the next batch of tasks with.
    async fn credentials(&self) -> Result<Credentials, FetchError>;

    async fn count_category(&self, credentials: &Credentials, category_id: &str) -> Result<CategoryCount, FetchError>;

    async fn fetch_listing(&self, credentials: &Credentials, page: &PageRequest) -> Result<Vec<ProductRecord>, FetchError>;

    async fn fetch_stock(&self, credentials: &Credentials, chunk: &[ProductKey]) -> Result<Vec<StockSample>, FetchError>;

    async fn fetch_detail(&self, credentials: &Credentials, url: &str) -> Result<ProductDetail, FetchError>;
}
