use itertools::Itertools;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::FetchError;
use crate::model::{ProductRecord, StockSample};

// ── Search (listing + count) ──

#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    pub data: Option<SearchData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchData {
    pub total_count: Option<u64>,
    #[serde(default)]
    pub results: Vec<SearchResult>,
}

/// Items stay untyped until `normalize_page`, so one malformed item cannot
/// fail the whole page.
#[derive(Debug, Deserialize)]
pub struct SearchResult {
    #[serde(default)]
    pub raw: Value,
}

/// One catalog item as the search API returns it.
#[derive(Debug, Deserialize)]
pub struct RawListingItem {
    #[serde(default, deserialize_with = "lenient_string")]
    pub itemnumber: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub code: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub permanentid: Option<String>,
    #[serde(default)]
    pub productroutingurl: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub supercategoriescode: Vec<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub productcount: Option<i64>,
    #[serde(default)]
    pub thumbnailimageurl: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub keysellingpoints: Vec<String>,
    /// Location-specific fields such as `price_6400`.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RawListingItem {
    pub fn key(&self) -> Option<&str> {
        [&self.itemnumber, &self.code, &self.permanentid]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .find(|k| !k.is_empty())
    }

    pub fn normalize(self, site_url: &str, location_code: &str) -> Result<ProductRecord, FetchError> {
        let key = self
            .key()
            .ok_or_else(|| FetchError::structural("item key", self.title.clone().unwrap_or_default()))?
            .to_string();
        let route = self
            .productroutingurl
            .as_deref()
            .ok_or_else(|| FetchError::structural("productroutingurl", key.clone()))?;

        let price = match self.extra.get(&format!("price_{}", location_code)) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        };

        Ok(ProductRecord {
            url: format!("{}{}", site_url.trim_end_matches('/'), route),
            price,
            breadcrumbs: self.supercategoriescode.iter().take(2).join("->"),
            name: self.title.unwrap_or_default(),
            count: self.productcount.unwrap_or(0),
            images: self.thumbnailimageurl.unwrap_or_default(),
            description: self.keysellingpoints.join("\n"),
            key,
        })
    }
}

/// Normalize a page of search results. Items without a usable key or route are
/// logged and dropped; duplicate keys keep the first occurrence.
pub fn normalize_page(results: Vec<SearchResult>, site_url: &str, location_code: &str) -> Vec<ProductRecord> {
    results
        .into_iter()
        .filter_map(|r| match RawListingItem::deserialize(r.raw)
            .map_err(FetchError::from)
            .and_then(|item| item.normalize(site_url, location_code))
        {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Skipping listing item: {}", e);
                None
            }
        })
        .unique_by(|r| r.key.clone())
        .collect()
}

// ── Stock ──

#[derive(Debug, Deserialize)]
pub struct StockResponse {
    pub data: Option<StockData>,
}

#[derive(Debug, Deserialize)]
pub struct StockData {
    #[serde(default)]
    pub stores: Vec<StoreStock>,
}

#[derive(Debug, Deserialize)]
pub struct StoreStock {
    #[serde(default, alias = "storeNumber", deserialize_with = "lenient_string")]
    pub code: Option<String>,
    #[serde(default)]
    pub products: Vec<StoreProduct>,
}

#[derive(Debug, Deserialize)]
pub struct StoreProduct {
    #[serde(deserialize_with = "required_string")]
    pub code: String,
    #[serde(default)]
    pub stock: StockLevel,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockLevel {
    #[serde(default)]
    pub stock_level: Option<i64>,
}

impl StockData {
    /// Flatten store-by-store entries into samples. Negative levels clamp to 0.
    pub fn samples(self) -> Vec<StockSample> {
        self.stores
            .into_iter()
            .enumerate()
            .flat_map(|(i, store)| {
                let store_id = store.code.unwrap_or_else(|| format!("#{}", i));
                store.products.into_iter().map(move |p| StockSample {
                    key: p.code,
                    store_id: store_id.clone(),
                    level: p.stock.stock_level.map(|l| l.max(0) as u64),
                })
            })
            .collect()
    }
}

// ── Helpers ──

/// Accept codes sent either as strings or as bare numbers.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Counts sometimes arrive as floats or strings.
fn lenient_count<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

fn required_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    lenient_string(deserializer)?.ok_or_else(|| serde::de::Error::custom("expected string or number"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stock::aggregate;

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("tests/fixtures/{}", name)).unwrap()
    }

    #[test]
    fn listing_page_normalizes() {
        let resp: SearchResponse = serde_json::from_str(&fixture("listing_page.json")).unwrap();
        let data = resp.data.unwrap();
        assert_eq!(data.total_count, Some(2500));

        let records = normalize_page(data.results, "https://www.bunnings.com.au", "6400");
        // one item has no key, one repeats a key
        assert_eq!(records.len(), 2);

        let paint = &records[0];
        assert_eq!(paint.key, "0123456");
        assert_eq!(paint.url, "https://www.bunnings.com.au/dulux-wash-wear-4l_p0123456");
        assert_eq!(paint.price, "89.9");
        assert_eq!(paint.breadcrumbs, "paint->interior-paint");
        assert_eq!(paint.name, "Dulux Wash & Wear 4L");
        assert_eq!(paint.count, 12);
        assert_eq!(paint.description, "Low sheen\nWashable");

        let roller = &records[1];
        assert_eq!(roller.key, "7654321");
        assert_eq!(roller.price, "");
        assert_eq!(roller.images, "");
        assert_eq!(roller.description, "");
    }

    #[test]
    fn key_falls_back_to_code_then_permanentid() {
        let raw: RawListingItem = serde_json::from_value(serde_json::json!({
            "code": "",
            "permanentid": 998877,
            "productroutingurl": "/x_p998877",
            "title": "Widget"
        }))
        .unwrap();
        assert_eq!(raw.key(), Some("998877"));
        let r = raw.normalize("https://shop/", "6400").unwrap();
        assert_eq!(r.url, "https://shop/x_p998877");
    }

    #[test]
    fn malformed_item_does_not_sink_the_page() {
        let resp: SearchResponse = serde_json::from_value(serde_json::json!({
            "data": {
                "totalCount": 3,
                "results": [
                    {"raw": {"itemnumber": "111", "productroutingurl": "/a_p111",
                             "supercategoriescode": null, "keysellingpoints": null,
                             "productcount": 4.0}},
                    {"raw": {"itemnumber": "222", "productroutingurl": "/b_p222",
                             "supercategoriescode": "not-a-list"}},
                    {"raw": {"itemnumber": "333", "productroutingurl": "/c_p333",
                             "productcount": "7"}}
                ]
            }
        }))
        .unwrap();

        let records = normalize_page(resp.data.unwrap().results, "https://shop", "6400");
        let keys: Vec<&str> = records.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["111", "333"]);
        assert_eq!(records[0].breadcrumbs, "");
        assert_eq!(records[0].description, "");
        assert_eq!(records[0].count, 4);
        assert_eq!(records[1].count, 7);
    }

    #[test]
    fn stock_response_flattens_per_store() {
        let resp: StockResponse = serde_json::from_str(&fixture("stock_response.json")).unwrap();
        let samples = resp.data.unwrap().samples();
        assert_eq!(samples.len(), 5);
        assert!(samples.iter().any(|s| s.key == "ABC123" && s.level.is_none()));

        let totals = aggregate(samples);
        assert_eq!(totals.get("ABC123"), Some(&8));
        assert_eq!(totals.get("XYZ789"), Some(&0));
    }

    #[test]
    fn stock_response_without_data() {
        let resp: StockResponse = serde_json::from_str(r#"{"errors": ["bad token"]}"#).unwrap();
        assert!(resp.data.is_none());
    }
}
