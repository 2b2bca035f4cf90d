use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Article / SKU code, unique per product across a run.
pub type ProductKey = String;

/// Phase of the pipeline with its own confirmation tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Listing,
    Stock,
    Detail,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Listing => "listing",
            Stage::Stock => "stock",
            Stage::Detail => "detail",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryCount {
    pub category_id: String,
    pub total: u64,
}

/// One window of a category's result set. `page_size == 0` is the count probe
/// emitted for empty categories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub category_id: String,
    pub page_size: u64,
    pub offset: u64,
}

impl PageRequest {
    pub fn is_probe(&self) -> bool {
        self.page_size == 0
    }

    pub fn end(&self) -> u64 {
        self.offset + self.page_size
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub key: ProductKey,
    pub url: String,
    pub price: String,
    pub breadcrumbs: String,
    pub name: String,
    pub count: i64,
    pub images: String,
    pub description: String,
}

/// Fields written by the detail stage, keyed by product URL.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProductDetail {
    pub url: String,
    pub description: String,
    pub images: String,
    pub breadcrumbs: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockSample {
    pub key: ProductKey,
    pub store_id: String,
    pub level: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockTotal {
    pub key: ProductKey,
    pub total: u64,
}

/// Partial update of the fields one stage owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldUpdate {
    Count(StockTotal),
    Detail(ProductDetail),
}

impl FieldUpdate {
    /// Key the update is addressed by: article for stock, URL for detail.
    pub fn key(&self) -> &str {
        match self {
            FieldUpdate::Count(total) => &total.key,
            FieldUpdate::Detail(detail) => &detail.url,
        }
    }
}

/// Headers and identity a request is signed with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub user_id: String,
    pub headers: BTreeMap<String, String>,
}

/// A task together with the credentials it was minted with at planning time.
#[derive(Debug, Clone)]
pub struct Minted<T> {
    pub credentials: Arc<Credentials>,
    pub request: T,
}

impl<T> Minted<T> {
    pub fn all(credentials: &Arc<Credentials>, requests: impl IntoIterator<Item = T>) -> Vec<Self> {
        requests
            .into_iter()
            .map(|request| Minted {
                credentials: Arc::clone(credentials),
                request,
            })
            .collect()
    }
}
