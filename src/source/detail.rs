use anyhow::{anyhow, Result};
use scraper::{ElementRef, Html, Selector};

use crate::config::DetailSettings;
use crate::model::ProductDetail;

/// Pulls the detail-stage fields out of a product page. Selectors come from
/// configuration; anything not found yields an empty field.
pub struct DetailExtractor {
    images: Selector,
    breadcrumbs: Selector,
    description: Selector,
    range: (usize, usize),
}

impl DetailExtractor {
    pub fn new(settings: &DetailSettings) -> Result<Self> {
        let parse = |s: &str| Selector::parse(s).map_err(|e| anyhow!("invalid selector {:?}: {:?}", s, e));
        Ok(DetailExtractor {
            images: parse(&settings.image_selector)?,
            breadcrumbs: parse(&settings.breadcrumb_selector)?,
            description: parse(&settings.description_selector)?,
            range: settings.breadcrumb_range,
        })
    }

    pub fn extract(&self, url: &str, html: &str) -> ProductDetail {
        let doc = Html::parse_document(html);

        let images: Vec<&str> = doc
            .select(&self.images)
            .filter_map(|img| img.value().attr("src"))
            .collect();

        let (start, end) = self.range;
        let breadcrumbs: Vec<String> = doc
            .select(&self.breadcrumbs)
            .map(|li| li.text().collect::<String>().trim().to_string())
            .skip(start)
            .take(end.saturating_sub(start))
            .collect();

        let description = doc
            .select(&self.description)
            .next()
            .and_then(|el| el.parent())
            .and_then(ElementRef::wrap)
            .map(|parent| squash_lines(&parent.text().collect::<String>()))
            .unwrap_or_default();

        ProductDetail {
            url: url.to_string(),
            description,
            images: images.join("\n"),
            breadcrumbs: breadcrumbs.join("->"),
        }
    }
}

fn squash_lines(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> DetailExtractor {
        DetailExtractor::new(&DetailSettings::default()).unwrap()
    }

    #[test]
    fn extracts_product_page() {
        let html = std::fs::read_to_string("tests/fixtures/detail_page.html").unwrap();
        let d = extractor().extract("https://www.bunnings.com.au/p1", &html);
        assert_eq!(d.url, "https://www.bunnings.com.au/p1");
        assert_eq!(d.breadcrumbs, "Paint->Interior Paint");
        assert_eq!(
            d.images,
            "https://media.bunnings.com.au/0123456_1.jpg\nhttps://media.bunnings.com.au/0123456_2.jpg"
        );
        assert_eq!(d.description, "Features\nLow sheen finish");
    }

    #[test]
    fn missing_description_is_empty() {
        let d = extractor().extract("u", "<html><body><p>Nothing here</p></body></html>");
        assert_eq!(d.description, "");
        assert_eq!(d.images, "");
        assert_eq!(d.breadcrumbs, "");
    }

    #[test]
    fn bad_selector_rejected() {
        let settings = DetailSettings {
            image_selector: "img[".into(),
            ..DetailSettings::default()
        };
        assert!(DetailExtractor::new(&settings).is_err());
    }
}
