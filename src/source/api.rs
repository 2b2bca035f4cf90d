use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::detail::DetailExtractor;
use super::listing::{normalize_page, SearchData, SearchResponse, StockResponse};
use super::payload::TemplateCache;
use super::CatalogSource;
use crate::config::{ApiSettings, Settings};
use crate::error::FetchError;
use crate::model::{CategoryCount, Credentials, PageRequest, ProductDetail, ProductKey, ProductRecord, StockSample};

const SEARCH_PATH: &str = "/v1/facets/category";
const STOCK_PATH: &str = "/v1/stores/products/stock";

/// Logged payloads are cut to this many characters.
const PAYLOAD_PREVIEW: usize = 2000;

/// HTTP source for the catalog search and stock APIs. Headers and the user id
/// come from configuration; acquiring them is left to whoever writes the config.
pub struct ApiSource {
    client: Client,
    api: ApiSettings,
    templates: TemplateCache,
    extractor: DetailExtractor,
}

impl ApiSource {
    pub fn new(settings: &Settings) -> Result<Self> {
        let template = std::fs::read_to_string(&settings.api.payload_template).with_context(|| {
            format!("Failed to read payload template {}", settings.api.payload_template.display())
        })?;
        let client = Client::builder()
            .timeout(settings.crawl.request_timeout())
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        Ok(ApiSource {
            client,
            templates: TemplateCache::new(template, settings.api.template_cache_capacity),
            extractor: DetailExtractor::new(&settings.detail)?,
            api: settings.api.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.api.base_url.trim_end_matches('/'), path)
    }

    async fn search(&self, credentials: &Credentials, category_id: &str, size: u64, offset: u64) -> Result<Value, FetchError> {
        let mut payload = self.templates.render(&credentials.user_id, category_id)?;
        if let Some(body) = payload.as_object_mut() {
            body.insert("numberOfResults".into(), Value::String(size.to_string()));
            body.insert("firstResult".into(), json!(offset));
        }
        let req = self.client.post(self.endpoint(SEARCH_PATH)).json(&payload);
        read_json(signed(req, credentials).send().await?).await
    }
}

#[async_trait]
impl CatalogSource for ApiSource {
    async fn credentials(&self) -> Result<Credentials, FetchError> {
        Ok(Credentials {
            user_id: self.api.user_id.clone(),
            headers: self.api.headers.clone(),
        })
    }

    async fn count_category(&self, credentials: &Credentials, category_id: &str) -> Result<CategoryCount, FetchError> {
        let body = self.search(credentials, category_id, 0, 0).await?;
        let total = search_data(&body, category_id)?
            .total_count
            .ok_or_else(|| missing("data.totalCount", category_id, &body))?;
        debug!("{}: {} products", category_id, total);
        Ok(CategoryCount {
            category_id: category_id.to_string(),
            total,
        })
    }

    async fn fetch_listing(&self, credentials: &Credentials, page: &PageRequest) -> Result<Vec<ProductRecord>, FetchError> {
        let body = self
            .search(credentials, &page.category_id, page.page_size, page.offset)
            .await?;
        let data = search_data(&body, &format!("{} @ {}", page.category_id, page.offset))?;
        Ok(normalize_page(data.results, &self.api.site_url, &self.api.location_code))
    }

    async fn fetch_stock(&self, credentials: &Credentials, chunk: &[ProductKey]) -> Result<Vec<StockSample>, FetchError> {
        let req = self
            .client
            .post(self.endpoint(STOCK_PATH))
            .query(&[("pageSize", self.api.stock_page_size)])
            .json(&json!({ "products": chunk }));
        let body: Value = read_json(signed(req, credentials).send().await?).await?;

        let resp: StockResponse = serde_json::from_value(body.clone())?;
        resp.data
            .map(|data| data.samples())
            .ok_or_else(|| missing("data.stores", &format!("{:?}", chunk), &body))
    }

    async fn fetch_detail(&self, credentials: &Credentials, url: &str) -> Result<ProductDetail, FetchError> {
        let mut req = self.client.get(url);
        if let Some(agent) = credentials.headers.get("user-agent") {
            req = req.header(reqwest::header::USER_AGENT, agent);
        }
        let html = checked(req.send().await?)?.text().await?;
        Ok(self.extractor.extract(url, &html))
    }
}

fn signed(mut req: RequestBuilder, credentials: &Credentials) -> RequestBuilder {
    for (name, value) in &credentials.headers {
        req = req.header(name.as_str(), value.as_str());
    }
    req
}

fn checked(resp: Response) -> Result<Response, FetchError> {
    let status = resp.status();
    if !status.is_success() {
        return Err(FetchError::Status {
            status: status.as_u16(),
            url: resp.url().to_string(),
        });
    }
    Ok(resp)
}

async fn read_json<T: DeserializeOwned>(resp: Response) -> Result<T, FetchError> {
    let bytes = checked(resp)?.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn search_data(body: &Value, context: &str) -> Result<SearchData, FetchError> {
    let resp: SearchResponse = serde_json::from_value(body.clone())?;
    resp.data.ok_or_else(|| missing("data", context, body))
}

/// Structural failure carrying a preview of the offending body, logged here.
fn missing(what: &str, context: &str, body: &Value) -> FetchError {
    let payload = preview(&body.to_string());
    warn!("Response for {} without {}: {}", context, what, payload);
    FetchError::structural(what, payload)
}

fn preview(payload: &str) -> String {
    payload.chars().take(PAYLOAD_PREVIEW).collect()
}
