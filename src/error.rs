use thiserror::Error;

use crate::model::Stage;

/// Failure of a single fetch task. Never escalates on its own.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("malformed response body: {0}")]
    Decode(#[from] serde_json::Error),

    /// Expected payload shape absent. `payload` is kept for diagnosis.
    #[error("response missing {what}: {payload}")]
    Structural { what: String, payload: String },

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl FetchError {
    pub fn structural(what: impl Into<String>, payload: impl Into<String>) -> Self {
        FetchError::Structural {
            what: what.into(),
            payload: payload.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("connection pool: {0}")]
    Pool(#[from] deadpool::unmanaged::PoolError),

    #[error("database directory: {0}")]
    Io(#[from] std::io::Error),
}

/// Why one executor task produced no result.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("page size must be positive")]
    ZeroPageSize,

    #[error("chunk size must be positive")]
    ZeroChunkSize,
}

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("planning rejected: {0}")]
    Plan(#[from] PlanError),

    #[error("{stage} stage failed: all {attempted} tasks failed")]
    StageFailed { stage: Stage, attempted: usize },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("credentials unavailable: {0}")]
    Source(#[source] FetchError),

    #[error("run cancelled")]
    Cancelled,
}
