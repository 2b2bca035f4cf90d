use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "catalog_crawler";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub crawl: CrawlSettings,
    pub api: ApiSettings,
    pub detail: DetailSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub path: PathBuf,
    pub pool_size: usize,
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: PathBuf::from("data/catalog.sqlite"),
            pool_size: 4,
            busy_timeout_ms: 5000,
        }
    }
}

impl DatabaseSettings {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrawlSettings {
    pub page_size: u64,
    pub stock_chunk_size: usize,
    pub count_workers: usize,
    pub listing_workers: usize,
    pub stock_workers: usize,
    pub detail_workers: usize,
    pub request_timeout_secs: u64,
    pub categories: Vec<String>,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        CrawlSettings {
            page_size: 1000,
            stock_chunk_size: 7,
            count_workers: 2,
            listing_workers: 20,
            stock_workers: 15,
            detail_workers: 7,
            request_timeout_secs: 60,
            categories: Vec::new(),
        }
    }
}

impl CrawlSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub base_url: String,
    pub site_url: String,
    pub location_code: String,
    /// JSON search body with `{group}` and `{user_id}` placeholders.
    pub payload_template: PathBuf,
    pub template_cache_capacity: usize,
    pub stock_page_size: u32,
    pub user_id: String,
    pub headers: BTreeMap<String, String>,
}

impl Default for ApiSettings {
    fn default() -> Self {
        ApiSettings {
            base_url: "https://api.prod.bunnings.com.au".into(),
            site_url: "https://www.bunnings.com.au".into(),
            location_code: "6400".into(),
            payload_template: PathBuf::from("payload.json"),
            template_cache_capacity: 256,
            stock_page_size: 8000,
            user_id: String::new(),
            headers: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetailSettings {
    pub image_selector: String,
    pub breadcrumb_selector: String,
    /// The description is the text of this element's parent.
    pub description_selector: String,
    /// Half-open slice of breadcrumb entries kept, `[start, end)`.
    pub breadcrumb_range: (usize, usize),
}

impl Default for DetailSettings {
    fn default() -> Self {
        DetailSettings {
            image_selector: "img.productImageLarge".into(),
            breadcrumb_selector: "nav[aria-label=Breadcrumb] > ul > li".into(),
            description_selector: "[data-locator=features_list]".into(),
            breadcrumb_range: (3, 5),
        }
    }
}

impl Settings {
    /// Layer an optional config file under `CATALOG_*` environment variables,
    /// e.g. `CATALOG_CRAWL__PAGE_SIZE=500`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => File::from(p).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };
        let settings: Settings = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix("CATALOG")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        let c = &self.crawl;
        ensure!(c.page_size > 0, "crawl.page_size must be positive");
        ensure!(c.stock_chunk_size > 0, "crawl.stock_chunk_size must be positive");
        ensure!(
            c.count_workers > 0 && c.listing_workers > 0 && c.stock_workers > 0 && c.detail_workers > 0,
            "worker counts must be positive"
        );
        ensure!(c.request_timeout_secs > 0, "crawl.request_timeout_secs must be positive");
        ensure!(self.database.pool_size > 0, "database.pool_size must be positive");
        ensure!(
            self.api.template_cache_capacity > 0,
            "api.template_cache_capacity must be positive"
        );
        let (start, end) = self.detail.breadcrumb_range;
        ensure!(start <= end, "detail.breadcrumb_range must be ascending");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let s = Settings::default();
        s.validate().unwrap();
        assert_eq!(s.crawl.page_size, 1000);
        assert_eq!(s.crawl.stock_chunk_size, 7);
        assert_eq!(s.api.location_code, "6400");
    }

    #[test]
    fn zero_workers_rejected() {
        let mut s = Settings::default();
        s.crawl.stock_workers = 0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn file_overrides_defaults() {
        let settings: Settings = Config::builder()
            .add_source(File::from_str(
                "[crawl]\npage_size = 250\ncategories = [\"paint\", \"tools\"]\n\n[api.headers]\nclientid = \"abc\"\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(settings.crawl.page_size, 250);
        assert_eq!(settings.crawl.listing_workers, 20);
        assert_eq!(settings.crawl.categories, vec!["paint", "tools"]);
        assert_eq!(settings.api.headers.get("clientid").map(String::as_str), Some("abc"));
    }
}
