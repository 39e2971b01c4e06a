//! Copyseeker reverse image search.
//!
//! Copyseeker is driven through Next.js server actions: the image is
//! submitted first and yields a discovery id, which a second action turns
//! into the result document. Both answers are RSC streams where the payload
//! sits on the line prefixed `1:`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::extract::{find_prefixed_json, value_to_string};
use crate::http::{Body, FormPart, HttpClient, HttpRequest};
use crate::model::{Origin, SearchItem, SearchResponse};
use crate::{Engine, EngineConfig, ImageSource, Result, SearchError};

const NAME: &str = "Copyseeker";
const URL_ACTION: &str = "408936c3bdf458fbec6cf3c1253f56aefbcb4cf509";
const FILE_ACTION: &str = "40dc303bfd320afd703a1a0a159464be4d64117f96";
const DISCOVERY_ACTION: &str = "4084b9ef4e0e6922ef12b23a4b8517be790fa67b88";
const TEXT_PLAIN: &str = "text/plain;charset=UTF-8";

/// One page that contains the image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopyseekerItem {
    /// Page URL.
    pub url: String,
    /// Page title.
    pub title: String,
    /// Main image on the page.
    #[serde(rename = "mainImage", default)]
    pub thumbnail: String,
    /// Other matching images on the page.
    #[serde(rename = "otherImages", default)]
    pub thumbnail_list: Vec<String>,
    /// Site rank.
    #[serde(rename = "rank", default)]
    pub website_rank: f64,
}

impl SearchItem for CopyseekerItem {
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

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Discovery {
    id: String,
    image_url: String,
    #[serde(default)]
    best_guess_label: Option<String>,
    #[serde(default)]
    entities: Option<Value>,
    total_links_found: u64,
    #[serde(default)]
    exif: Value,
    #[serde(default)]
    pages: Vec<CopyseekerItem>,
    #[serde(default)]
    visually_similar_images: Vec<String>,
}

/// Parsed Copyseeker discovery.
#[derive(Debug, Clone, PartialEq)]
pub struct CopyseekerResponse {
    origin: Origin,
    url: String,
    raw: Vec<CopyseekerItem>,
    /// Discovery id. Empty when the submission was not accepted.
    pub id: String,
    /// The searched image as Copyseeker stored it.
    pub image_url: String,
    /// Best guess describing the image.
    pub best_guess_label: Option<String>,
    /// Detected entities.
    pub entities: Option<String>,
    /// Total number of pages found.
    pub total: u64,
    /// EXIF data extracted from the image.
    pub exif: Value,
    /// Visually similar image URLs.
    pub similar_image_urls: Vec<String>,
}

impl CopyseekerResponse {
    /// Parses a discovery document.
    pub fn parse(data: Value, url: impl Into<String>) -> Result<Self> {
        let discovery: Discovery =
            serde_json::from_value(data.clone()).map_err(|e| SearchError::shape(NAME, e))?;
        Ok(Self {
            origin: Origin::Json(data),
            url: url.into(),
            raw: discovery.pages,
            id: discovery.id,
            image_url: discovery.image_url,
            best_guess_label: discovery.best_guess_label,
            entities: discovery
                .entities
                .map(|e| value_to_string(&e))
                .filter(|e| !e.is_empty()),
            total: discovery.total_links_found,
            exif: discovery.exif,
            similar_image_urls: discovery.visually_similar_images,
        })
    }

    /// The response returned when no discovery id could be obtained.
    pub fn empty() -> Self {
        Self {
            origin: Origin::Json(json!({})),
            url: String::new(),
            raw: Vec::new(),
            id: String::new(),
            image_url: String::new(),
            best_guess_label: None,
            entities: None,
            total: 0,
            exif: Value::Null,
            similar_image_urls: Vec::new(),
        }
    }
}

impl SearchResponse for CopyseekerResponse {
    type Item = CopyseekerItem;

    fn origin(&self) -> &Origin {
        &self.origin
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn raw(&self) -> &[CopyseekerItem] {
        &self.raw
    }
}

/// Copyseeker engine.
pub struct Copyseeker {
    config: EngineConfig,
    client: Arc<dyn HttpClient>,
}

impl Copyseeker {
    /// Creates a Copyseeker engine on `https://copyseeker.net`.
    pub fn new(client: Arc<dyn HttpClient>) -> Self {
        Self {
            config: EngineConfig::new(NAME, "cs", "https://copyseeker.net"),
            client,
        }
    }

    /// Creates with custom configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    async fn discovery_id(&self, source: &ImageSource) -> Result<Option<String>> {
        let request = HttpRequest::post(self.base_url());
        let request = match source {
            ImageSource::Url(url) => request
                .header("next-action", URL_ACTION)
                .header("content-type", TEXT_PLAIN)
                .body(Body::Text(
                    json!([{"discoveryType": "ReverseImageSearch", "imageUrl": url}]).to_string(),
                )),
            ImageSource::File(file) => {
                let bytes = file.read().await?;
                request.header("next-action", FILE_ACTION).body(Body::Multipart(vec![
                    FormPart::named_file("1_file", bytes.to_vec(), file.filename(), "image/jpeg"),
                    FormPart::text("1_discoveryType", "ReverseImageSearch"),
                    FormPart::text("0", r#"["$K1"]"#),
                ]))
            }
        };

        let resp = self.client.execute(request).await?.error_for_status()?;
        Ok(action_payload(&resp.text)
            .and_then(|v| v.get("discoveryId").and_then(Value::as_str).map(str::to_string)))
    }
}

fn action_payload(text: &str) -> Option<Value> {
    let trimmed: String = text.lines().map(str::trim).collect::<Vec<_>>().join("\n");
    find_prefixed_json(&trimmed, "1:{", 2)
}

#[async_trait]
impl Engine for Copyseeker {
    type Response = CopyseekerResponse;

    fn config(&self) -> &EngineConfig {
        &self.config
    }

    async fn search(&self, source: &ImageSource) -> Result<CopyseekerResponse> {
        let Some(id) = self.discovery_id(source).await? else {
            debug!("Copyseeker returned no discovery id");
            return Ok(CopyseekerResponse::empty());
        };
        debug!(discovery_id = %id, "Copyseeker discovery id");

        let request = HttpRequest::post(format!("{}/discovery", self.base_url()))
            .header("next-action", DISCOVERY_ACTION)
            .header("content-type", TEXT_PLAIN)
            .body(Body::Text(
                json!([{"discoveryId": id, "hasBlocker": "False"}]).to_string(),
            ));
        let resp = self.client.execute(request).await?.error_for_status()?;

        let data = action_payload(&resp.text).ok_or_else(|| {
            SearchError::parsing(NAME, "discovery payload not found").with_details(format!("discovery id {id}"))
        })?;
        CopyseekerResponse::parse(data, resp.url)
    }
}
