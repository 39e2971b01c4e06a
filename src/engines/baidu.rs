//! Baidu image recognition (graph.baidu.com).
//!
//! The upload answers with a landing page URL. That page embeds
//! `window.cardData`, a list of result cards; the `simipic` card links the
//! JSON list of similar images.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use scraper::Html;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::extract::{deep_get, percent, selector, str_at};
use crate::http::{Body, FormPart, HttpClient, HttpRequest};
use crate::model::{Origin, SearchItem, SearchResponse};
use crate::{Engine, EngineConfig, ImageSource, Result, SearchError};

const NAME: &str = "Baidu";

/// One similar image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BaiduItem {
    pub thumbnail: String,
    /// Page containing the original image.
    pub url: String,
    /// Page title, when Baidu still sends it.
    pub title: String,
    /// Similarity, when Baidu still sends it.
    pub similarity: f64,
}

impl BaiduItem {
    fn from_value(value: &Value) -> Result<Self> {
        let required = |key: &str| {
            value
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| SearchError::parsing(NAME, format!("list entry without '{key}'")))
        };
        let similarity = value
            .get("simi")
            .and_then(|s| s.as_f64().or_else(|| s.as_str().and_then(|s| s.parse().ok())))
            .map(percent)
            .unwrap_or_default();
        Ok(Self {
            thumbnail: required("thumbUrl")?,
            url: required("fromUrl")?,
            title: str_at(value, "fromPageTitle"),
            similarity,
        })
    }
}

impl SearchItem for BaiduItem {
    fn url(&self) -> &str {
        &self.url
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn thumbnail(&self) -> &str {
        &self.thumbnail
    }

    fn similarity(&self) -> f64 {
        self.similarity
    }
}

/// Cards found in `window.cardData`, by card name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CardData {
    /// Present when Baidu found nothing.
    pub noresult: Option<Value>,
    /// `tplData.firstUrl` of the similar-images card.
    pub simipic: Option<String>,
    /// Same-image card template data.
    pub same: Option<Value>,
    /// Every other card, keyed by `cardName`.
    pub extra: BTreeMap<String, Value>,
}

impl CardData {
    /// Sorts raw cards into known and unknown ones. The first card of each name wins.
    pub fn from_cards(cards: &[Value]) -> Self {
        let mut data = Self::default();
        for card in cards {
            let name = str_at(card, "cardName");
            match name.as_str() {
                "noresult" if data.noresult.is_none() => data.noresult = Some(card.clone()),
                "simipic" if data.simipic.is_none() => {
                    data.simipic = deep_get(card, "tplData.firstUrl")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                }
                "same" if data.same.is_none() => data.same = card.get("tplData").cloned(),
                "noresult" | "simipic" | "same" | "" => {}
                _ => {
                    data.extra.entry(name).or_insert_with(|| card.clone());
                }
            }
        }
        data
    }

    /// Extracts the cards from a landing page. A page without a
    /// `window.cardData` array is a parsing error.
    pub fn from_page(html: &str) -> Result<Self> {
        let document = Html::parse_document(html);
        let script_selector = selector("script", NAME)?;
        for script in document.select(&script_selector) {
            let text = script.text().collect::<String>();
            if !text.contains("window.cardData") {
                continue;
            }
            let array = match (text.find('['), text.rfind(']')) {
                (Some(start), Some(end)) => text.get(start..=end),
                _ => None,
            }
            .ok_or_else(|| SearchError::parsing(NAME, "window.cardData is not an array"))?;
            let cards: Vec<Value> = serde_json::from_str(array).map_err(|e| SearchError::json(NAME, e))?;
            return Ok(Self::from_cards(&cards));
        }
        Err(SearchError::parsing(NAME, "window.cardData not found on landing page"))
    }
}

/// Parsed Baidu response.
#[derive(Debug, Clone, PartialEq)]
pub struct BaiduResponse {
    origin: Origin,
    url: String,
    raw: Vec<BaiduItem>,
    /// Cards of the landing page.
    pub cards: CardData,
}

impl BaiduResponse {
    /// Parses the similar-images list.
    pub fn parse(data: Value, url: impl Into<String>, cards: CardData) -> Result<Self> {
        let raw = deep_get(&data, "data.list")
            .and_then(Value::as_array)
            .ok_or_else(|| SearchError::parsing(NAME, "missing 'data.list'"))?
            .iter()
            .map(BaiduItem::from_value)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            origin: Origin::Json(data),
            url: url.into(),
            raw,
            cards,
        })
    }

    fn empty(url: impl Into<String>, cards: CardData) -> Self {
        Self {
            origin: Origin::Json(json!({})),
            url: url.into(),
            raw: Vec::new(),
            cards,
        }
    }
}

impl SearchResponse for BaiduResponse {
    type Item = BaiduItem;

    fn origin(&self) -> &Origin {
        &self.origin
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn raw(&self) -> &[BaiduItem] {
        &self.raw
    }
}

/// Baidu engine.
pub struct Baidu {
    config: EngineConfig,
    client: Arc<dyn HttpClient>,
}

impl Baidu {
    /// Creates a Baidu engine on `https://graph.baidu.com`.
    pub fn new(client: Arc<dyn HttpClient>) -> Self {
        Self {
            config: EngineConfig::new(NAME, "bd", "https://graph.baidu.com"),
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
impl Engine for Baidu {
    type Response = BaiduResponse;

    fn config(&self) -> &EngineConfig {
        &self.config
    }

    async fn search(&self, source: &ImageSource) -> Result<BaiduResponse> {
        let request = HttpRequest::post(format!("{}/upload", self.base_url())).query("from", "pc");
        let request = match source {
            ImageSource::Url(url) => request.query("image", url),
            ImageSource::File(file) => {
                let bytes = file.read().await?;
                request.body(Body::Multipart(vec![FormPart::named_file(
                    "image",
                    bytes.to_vec(),
                    file.filename(),
                    "image/jpeg",
                )]))
            }
        };
        let resp = self.client.execute(request).await?.error_for_status()?;
        let upload = resp.json(NAME)?;
        let data_url = str_at(&upload, "data.url");
        if data_url.is_empty() {
            return Err(SearchError::parsing(NAME, "upload response has no landing page url")
                .with_details(upload.to_string()));
        }

        let page = self
            .client
            .execute(HttpRequest::get(data_url.as_str()))
            .await?
            .error_for_status()?;
        let cards = CardData::from_page(&page.text)?;

        if cards.noresult.is_some() {
            debug!("Baidu reported no result");
            return Ok(BaiduResponse::empty(data_url, cards));
        }
        let Some(first_url) = cards.simipic.clone() else {
            return Err(SearchError::parsing(NAME, "landing page has neither a simipic nor a noresult card"));
        };

        let list = self
            .client
            .execute(HttpRequest::get(first_url))
            .await?
            .error_for_status()?;
        BaiduResponse::parse(list.json(NAME)?, data_url, cards)
    }
}
