//! Yandex image search ("sites" view).

use std::sync::Arc;

use async_trait::async_trait;
use scraper::Html;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::extract::{absolute_url, selector, str_at};
use crate::http::{Body, FormPart, HttpClient, HttpRequest};
use crate::model::{Origin, SearchItem, SearchResponse};
use crate::{Engine, EngineConfig, ImageSource, Result, SearchError};

const NAME: &str = "Yandex";

/// A page containing the image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct YandexItem {
    pub url: String,
    pub title: String,
    pub thumbnail: String,
    /// Hosting domain.
    pub source: String,
    /// Snippet of the surrounding text.
    pub content: String,
    /// Original image dimensions, `WIDTHxHEIGHT`.
    pub size: String,
}

impl YandexItem {
    fn from_value(site: &Value) -> Self {
        Self {
            url: str_at(site, "url"),
            title: str_at(site, "title"),
            thumbnail: absolute_url("https://yandex.com", &str_at(site, "thumb.url")),
            source: str_at(site, "domain"),
            content: str_at(site, "description"),
            size: format!(
                "{}x{}",
                str_at(site, "originalImage.width"),
                str_at(site, "originalImage.height")
            ),
        }
    }
}

impl SearchItem for YandexItem {
    fn url(&self) -> &str {
        &self.url
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn thumbnail(&self) -> &str {
        &self.thumbnail
    }
}

/// Parsed Yandex "sites" results.
#[derive(Debug, Clone, PartialEq)]
pub struct YandexResponse {
    origin: Origin,
    url: String,
    raw: Vec<YandexItem>,
}

impl YandexResponse {
    /// Parses a results page. The sites are embedded as JSON in the
    /// `data-state` attribute of the `CbirSites` root.
    pub fn parse(html: &str, url: impl Into<String>) -> Result<Self> {
        let document = Html::parse_document(html);
        let root = selector(r#"div.Root[id^="CbirSites_infinite"]"#, NAME)?;
        let state = document
            .select(&root)
            .next()
            .and_then(|div| div.value().attr("data-state"))
            .ok_or_else(|| SearchError::parsing(NAME, "sites state not found"))?;
        let state: Value = serde_json::from_str(state).map_err(|e| SearchError::json(NAME, e))?;
        let raw = state
            .get("sites")
            .and_then(Value::as_array)
            .ok_or_else(|| SearchError::parsing(NAME, "sites state has no sites list"))?
            .iter()
            .map(YandexItem::from_value)
            .collect();
        Ok(Self {
            origin: Origin::Html(html.to_string()),
            url: url.into(),
            raw,
        })
    }
}

impl SearchResponse for YandexResponse {
    type Item = YandexItem;

    fn origin(&self) -> &Origin {
        &self.origin
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn raw(&self) -> &[YandexItem] {
        &self.raw
    }
}

/// Yandex engine.
pub struct Yandex {
    config: EngineConfig,
    client: Arc<dyn HttpClient>,
}

impl Yandex {
    /// Creates a Yandex engine on `https://yandex.com`.
    pub fn new(client: Arc<dyn HttpClient>) -> Self {
        Self {
            config: EngineConfig::new(NAME, "ya", "https://yandex.com"),
            client,
        }
    }

    /// Creates with custom configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }
}

#[async_trait]
impl Engine for Yandex {
    type Response = YandexResponse;

    fn config(&self) -> &EngineConfig {
        &self.config
    }

    async fn search(&self, source: &ImageSource) -> Result<YandexResponse> {
        let endpoint = format!("{}/images/search", self.base_url());
        let request = match source {
            ImageSource::Url(url) => HttpRequest::get(endpoint).query("url", url),
            ImageSource::File(file) => {
                let bytes = file.read().await?;
                HttpRequest::post(endpoint).body(Body::Multipart(vec![
                    FormPart::text("prg", "1"),
                    FormPart::named_file("upfile", bytes.to_vec(), file.filename(), "image/jpeg"),
                ]))
            }
        }
        .query("rpt", "imageview")
        .query("cbir_page", "sites");

        let resp = self.client.execute(request).await?.error_for_status()?;
        let response = YandexResponse::parse(&resp.text, resp.url)?;
        debug!(results = response.raw.len(), "Yandex parsed");
        Ok(response)
    }
}
