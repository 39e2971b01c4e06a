//! Bing Visual Search.
//!
//! URL searches go straight to the knowledge (insights) endpoint. File
//! searches upload the image first and scrape the `bcid_*` insights token
//! from the returned page.

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use regex::Regex;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::extract::{deep_get, str_at};
use crate::http::{Body, FormPart, HttpClient, HttpRequest};
use crate::model::{Origin, SearchItem, SearchResponse};
use crate::{Engine, EngineConfig, ImageSource, Result, SearchError};

const NAME: &str = "Bing";
const INSIGHTS_QUERY: &str = "rshighlight=true&textDecorations=true&internalFeatures=share&nbl=1\
    &FORM=SBIHMP&safeSearch=off&mkt=en-us&setLang=en-us&IID=idpins&SFX=1";

/// An image match: a page including the image, or a visually similar image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BingItem {
    pub title: String,
    /// Page hosting the image.
    pub url: String,
    pub thumbnail: String,
    /// Direct image URL.
    pub image_url: String,
}

impl BingItem {
    fn from_value(value: &Value) -> Self {
        Self {
            title: str_at(value, "name"),
            url: str_at(value, "hostPageUrl"),
            thumbnail: str_at(value, "thumbnailUrl"),
            image_url: str_at(value, "contentUrl"),
        }
    }
}

impl SearchItem for BingItem {
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

/// A related query suggested by Bing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelatedSearch {
    pub text: String,
    pub thumbnail: String,
}

/// A point of interest in a travel card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attraction {
    pub url: String,
    pub title: String,
    /// Bing query for the attraction.
    pub search_url: String,
    pub interest_types: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TravelCard {
    pub card_type: String,
    pub title: String,
    pub url: String,
    pub image_url: String,
    pub image_source_url: String,
}

/// Travel information for landmark images.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TravelInfo {
    pub destination_name: String,
    pub travel_guide_url: String,
    pub attractions: Vec<Attraction>,
    pub travel_cards: Vec<TravelCard>,
}

impl TravelInfo {
    fn from_value(data: &Value) -> Self {
        let list = |key: &str| data.get(key).and_then(Value::as_array).cloned().unwrap_or_default();
        Self {
            destination_name: str_at(data, "destinationName"),
            travel_guide_url: str_at(data, "travelGuideUrl"),
            attractions: list("attractions")
                .iter()
                .map(|a| Attraction {
                    url: str_at(a, "attractionUrl"),
                    title: str_at(a, "title"),
                    search_url: str_at(a, "requeryUrl"),
                    interest_types: a
                        .get("interestTypes")
                        .and_then(Value::as_array)
                        .map(|types| types.iter().filter_map(Value::as_str).map(str::to_string).collect())
                        .unwrap_or_default(),
                })
                .collect(),
            travel_cards: list("travelCards")
                .iter()
                .map(|c| TravelCard {
                    card_type: str_at(c, "cardType"),
                    title: str_at(c, "title"),
                    url: str_at(c, "clickUrl"),
                    image_url: str_at(c, "image"),
                    image_source_url: str_at(c, "imageSourceUrl"),
                })
                .collect(),
        }
    }
}

/// A social media profile of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Profile {
    pub url: String,
    pub social_network: String,
}

/// An entity (person, landmark, artwork) recognized in the image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entity {
    pub name: String,
    pub thumbnail: String,
    pub description: String,
    pub profiles: Vec<Profile>,
    /// Entity type hint, e.g. "Painter".
    pub short_description: String,
}

impl Entity {
    fn from_value(data: &Value) -> Self {
        let profiles = deep_get(data, "socialMediaInfo.profiles")
            .and_then(Value::as_array)
            .map(|profiles| {
                profiles
                    .iter()
                    .map(|p| Profile {
                        url: str_at(p, "profileUrl"),
                        social_network: str_at(p, "socialNetwork"),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Self {
            name: str_at(data, "name"),
            thumbnail: str_at(data, "image.thumbnailUrl"),
            description: str_at(data, "description"),
            profiles,
            short_description: str_at(data, "entityPresentationInfo.entityTypeDisplayHint"),
        }
    }
}

/// Parsed Bing insights.
#[derive(Debug, Clone, PartialEq)]
pub struct BingResponse {
    origin: Origin,
    url: String,
    /// Pages that include the image. Also exposed as `raw()`.
    pub pages_including: Vec<BingItem>,
    pub visual_search: Vec<BingItem>,
    pub related_searches: Vec<RelatedSearch>,
    /// Best representative query.
    pub best_guess: Option<String>,
    pub travel: Option<TravelInfo>,
    pub entities: Vec<Entity>,
}

impl BingResponse {
    /// Parses a knowledge response. Actions are read from `tags[].actions[]`.
    /// A response without a `tags` list is a parsing error.
    pub fn parse(data: Value, url: impl Into<String>) -> Result<Self> {
        let tags = data
            .get("tags")
            .and_then(Value::as_array)
            .ok_or_else(|| SearchError::parsing(NAME, "knowledge response has no tags list"))?
            .clone();
        let mut resp = Self {
            origin: Origin::Json(Value::Null),
            url: url.into(),
            pages_including: Vec::new(),
            visual_search: Vec::new(),
            related_searches: Vec::new(),
            best_guess: None,
            travel: None,
            entities: Vec::new(),
        };

        let actions = tags
            .iter()
            .filter_map(|tag| tag.get("actions").and_then(Value::as_array))
            .flatten();
        for action in actions {
            resp.apply_action(action);
        }
        resp.origin = Origin::Json(data);
        Ok(resp)
    }

    fn apply_action(&mut self, action: &Value) {
        let values = || {
            deep_get(action, "data.value")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default()
        };
        match str_at(action, "actionType").as_str() {
            "PagesIncluding" => self
                .pages_including
                .extend(values().iter().map(BingItem::from_value)),
            "VisualSearch" => self
                .visual_search
                .extend(values().iter().map(BingItem::from_value)),
            "RelatedSearches" => self.related_searches.extend(values().iter().map(|v| RelatedSearch {
                text: str_at(v, "text"),
                thumbnail: str_at(v, "thumbnail.url"),
            })),
            "BestRepresentativeQuery" => {
                self.best_guess = action.get("displayName").and_then(Value::as_str).map(str::to_string)
            }
            "Travel" => {
                self.travel = Some(TravelInfo::from_value(action.get("data").unwrap_or(&Value::Null)))
            }
            "Entity" => {
                if let Some(data) = action.get("data").filter(|d| !d.is_null()) {
                    self.entities.push(Entity::from_value(data));
                }
            }
            _ => {}
        }
    }
}

impl SearchResponse for BingResponse {
    type Item = BingItem;

    fn origin(&self) -> &Origin {
        &self.origin
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn raw(&self) -> &[BingItem] {
        &self.pages_including
    }
}

/// Bing engine.
pub struct Bing {
    config: EngineConfig,
    client: Arc<dyn HttpClient>,
}

impl Bing {
    /// Creates a Bing engine on `https://www.bing.com`.
    pub fn new(client: Arc<dyn HttpClient>) -> Self {
        Self {
            config: EngineConfig::new(NAME, "bi", "https://www.bing.com"),
            client,
        }
    }

    /// Creates with custom configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    async fn upload(&self, bytes: &[u8]) -> Result<String> {
        let request = HttpRequest::post(format!(
            "{}/images/search?view=detailv2&iss=sbiupload",
            self.base_url()
        ))
        .body(Body::Multipart(vec![
            FormPart::text("imgurl", ""),
            FormPart::text("cbir", "sbi"),
            FormPart::text("imageBin", STANDARD.encode(bytes)),
        ]));
        let resp = self.client.execute(request).await?.error_for_status()?;

        let bcid = Regex::new(r"(bcid_[A-Za-z0-9\-.]+)").map_err(|e| SearchError::Other(e.to_string()))?;
        bcid.captures(&resp.text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| SearchError::parsing(NAME, "BCID not found on upload page").with_details(resp.url))
    }
}

#[async_trait]
impl Engine for Bing {
    type Response = BingResponse;

    fn config(&self) -> &EngineConfig {
        &self.config
    }

    async fn search(&self, source: &ImageSource) -> Result<BingResponse> {
        let base = self.base_url();
        let insights = format!("{base}/images/api/custom/knowledge?{INSIGHTS_QUERY}");

        let (url, referer, knowledge) = match source {
            ImageSource::Url(image_url) => (
                insights,
                format!(
                    "{base}/images/search?view=detailv2&iss=sbi&FORM=SBIHMP&sbisrc=UrlPaste&q=imgurl:{}&idpbck=1",
                    urlencoding::encode(image_url)
                ),
                json!({"imageInfo": {"url": image_url}}),
            ),
            ImageSource::File(file) => {
                let bytes = file.read().await?;
                let bcid = self.upload(&bytes).await?;
                debug!(bcid = %bcid, "Bing upload token");
                (
                    format!("{insights}&insightsToken={bcid}"),
                    format!("{base}/images/search?insightsToken={bcid}"),
                    json!({"imageInfo": {"imageInsightsToken": bcid}, "knowledgeRequest": {}}),
                )
            }
        };

        let request = HttpRequest::post(url.as_str())
            .header("Referer", referer)
            .body(Body::Multipart(vec![FormPart::text(
                "knowledgeRequest",
                knowledge.to_string(),
            )]));
        let resp = self.client.execute(request).await?.error_for_status()?;
        let response = BingResponse::parse(resp.json(NAME)?, url)?;
        debug!(
            pages = response.pages_including.len(),
            similar = response.visual_search.len(),
            "Bing parsed"
        );
        Ok(response)
    }
}
