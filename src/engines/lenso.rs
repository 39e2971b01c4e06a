//! Lenso.ai visual search.
//!
//! The image is uploaded as a base64 data URL to obtain an id, then searched
//! with both the id and the data.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::extract::{percent, str_at};
use crate::http::{Body, HttpClient, HttpRequest};
use crate::model::{Origin, SearchItem, SearchResponse};
use crate::{Engine, EngineConfig, ImageSource, Result, SearchError};

const NAME: &str = "Lenso";

/// Result categories, in the order they are flattened into `raw`.
const CATEGORIES: &[&str] = &["duplicates", "similar", "places", "related", "people"];

/// Which result category to ask for. `All` returns every category in
/// smaller quantities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LensoSearchType {
    #[default]
    All,
    Similar,
    Duplicates,
    Places,
    Related,
}

impl LensoSearchType {
    fn as_str(self) -> &'static str {
        match self {
            Self::All => "",
            Self::Similar => "similar",
            Self::Duplicates => "duplicates",
            Self::Places => "places",
            Self::Related => "related",
        }
    }
}

impl FromStr for LensoSearchType {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" => Ok(Self::All),
            "similar" => Ok(Self::Similar),
            "duplicates" => Ok(Self::Duplicates),
            "places" => Ok(Self::Places),
            "related" => Ok(Self::Related),
            other => Err(SearchError::InvalidArgument(format!(
                "invalid search type '{other}', expected one of: \"\", similar, duplicates, places, related"
            ))),
        }
    }
}

/// Result ordering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LensoSort {
    #[default]
    Smart,
    Random,
    QualityDescending,
    QualityAscending,
    DateDescending,
    DateAscending,
}

impl LensoSort {
    fn as_str(self) -> &'static str {
        match self {
            Self::Smart => "SMART",
            Self::Random => "RANDOM",
            Self::QualityDescending => "QUALITY_DESCENDING",
            Self::QualityAscending => "QUALITY_ASCENDING",
            Self::DateDescending => "DATE_DESCENDING",
            Self::DateAscending => "DATE_ASCENDING",
        }
    }
}

impl FromStr for LensoSort {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "SMART" => Ok(Self::Smart),
            "RANDOM" => Ok(Self::Random),
            "QUALITY_DESCENDING" => Ok(Self::QualityDescending),
            "QUALITY_ASCENDING" => Ok(Self::QualityAscending),
            "DATE_DESCENDING" => Ok(Self::DateDescending),
            "DATE_ASCENDING" => Ok(Self::DateAscending),
            other => Err(SearchError::InvalidArgument(format!(
                "invalid sort '{other}', expected one of: SMART, RANDOM, QUALITY_DESCENDING, \
                 QUALITY_ASCENDING, DATE_DESCENDING, DATE_ASCENDING"
            ))),
        }
    }
}

/// Per-search options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LensoOptions {
    pub search_type: LensoSearchType,
    pub sort: LensoSort,
}

/// A page the matched image appears on.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LensoUrl {
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub source_url: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub title: String,
    #[serde(default)]
    pub lang: String,
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// One matched image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LensoItem {
    /// Title of the first page listing the image.
    pub title: String,
    /// First page listing the image.
    pub url: String,
    pub hash: String,
    pub similarity: f64,
    pub thumbnail: String,
    pub url_list: Vec<LensoUrl>,
    pub width: u32,
    pub height: u32,
}

impl LensoItem {
    fn from_value(value: &Value) -> Result<Self> {
        let url_list: Vec<LensoUrl> = match value.get("urlList") {
            Some(list) if !list.is_null() => {
                serde_json::from_value(list.clone()).map_err(|e| SearchError::shape(NAME, e))?
            }
            _ => Vec::new(),
        };
        let dimension = |key: &str| {
            let raw = value.get(key).and_then(Value::as_u64).unwrap_or_default();
            u32::try_from(raw).unwrap_or_default()
        };
        Ok(Self {
            title: url_list.first().map(|u| u.title.clone()).unwrap_or_default(),
            url: url_list.first().map(|u| u.source_url.clone()).unwrap_or_default(),
            hash: str_at(value, "hash"),
            similarity: percent(value.get("distance").and_then(Value::as_f64).unwrap_or_default()),
            thumbnail: str_at(value, "proxyUrl"),
            url_list,
            width: dimension("width"),
            height: dimension("height"),
        })
    }
}

impl SearchItem for LensoItem {
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

/// Parsed Lenso results, grouped by category and flattened into `raw`.
#[derive(Debug, Clone, PartialEq)]
pub struct LensoResponse {
    origin: Origin,
    url: String,
    raw: Vec<LensoItem>,
    pub duplicates: Vec<LensoItem>,
    pub similar: Vec<LensoItem>,
    pub places: Vec<LensoItem>,
    pub related: Vec<LensoItem>,
    pub people: Vec<LensoItem>,
    pub detected_faces: Vec<Value>,
}

impl LensoResponse {
    pub fn parse(data: Value, url: impl Into<String>) -> Result<Self> {
        let mut groups: Vec<Vec<LensoItem>> = Vec::with_capacity(CATEGORIES.len());
        for category in CATEGORIES {
            let items = data
                .get("results")
                .and_then(|r| r.get(*category))
                .and_then(Value::as_array)
                .map(|items| items.iter().map(LensoItem::from_value).collect::<Result<Vec<_>>>())
                .transpose()?
                .unwrap_or_default();
            groups.push(items);
        }
        let raw = groups.iter().flatten().cloned().collect();
        let mut groups = groups.into_iter();
        let mut next = || groups.next().unwrap_or_default();

        Ok(Self {
            url: url.into(),
            raw,
            duplicates: next(),
            similar: next(),
            places: next(),
            related: next(),
            people: next(),
            detected_faces: data
                .get("detectedFaces")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
            origin: Origin::Json(data),
        })
    }
}

impl SearchResponse for LensoResponse {
    type Item = LensoItem;

    fn origin(&self) -> &Origin {
        &self.origin
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn raw(&self) -> &[LensoItem] {
        &self.raw
    }
}

/// Lenso engine.
pub struct Lenso {
    config: EngineConfig,
    client: Arc<dyn HttpClient>,
}

impl Lenso {
    /// Creates a Lenso engine on `https://lenso.ai`.
    pub fn new(client: Arc<dyn HttpClient>) -> Self {
        Self {
            config: EngineConfig::new(NAME, "ls", "https://lenso.ai"),
            client,
        }
    }

    /// Creates with custom configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    async fn upload(&self, data_url: &str) -> Result<String> {
        let request = HttpRequest::post(format!("{}/api/upload", self.base_url()))
            .body(Body::Json(json!({ "image": data_url })));
        let resp = self.client.execute(request).await?.error_for_status()?;
        let id = str_at(&resp.json(NAME)?, "id");
        if id.is_empty() {
            return Err(SearchError::parsing(NAME, "upload returned no image id").with_details(resp.text));
        }
        Ok(id)
    }

    /// Searches with per-call options.
    pub async fn search_with_options(&self, source: &ImageSource, options: &LensoOptions) -> Result<LensoResponse> {
        let bytes = source.bytes(self.client.as_ref()).await?;
        let data_url = format!("data:image/jpeg;base64,{}", STANDARD.encode(&bytes));
        let id = self.upload(&data_url).await?;
        debug!(id = %id, "Lenso upload");

        let payload = json!({
            "image": {"id": id, "data": data_url},
            "effects": {},
            "selection": {},
            "domain": "",
            "text": "",
            "page": 0,
            "type": options.search_type.as_str(),
            "sort": options.sort.as_str(),
            "seed": 0,
            "facial_search_consent": 0,
        });
        let request = HttpRequest::post(format!("{}/api/search", self.base_url())).body(Body::Json(payload));
        let resp = self.client.execute(request).await?.error_for_status()?;
        let response = LensoResponse::parse(resp.json(NAME)?, resp.url)?;
        debug!(results = response.raw.len(), "Lenso parsed");
        Ok(response)
    }
}

#[async_trait]
impl Engine for Lenso {
    type Response = LensoResponse;

    fn config(&self) -> &EngineConfig {
        &self.config
    }

    async fn search(&self, source: &ImageSource) -> Result<LensoResponse> {
        self.search_with_options(source, &LensoOptions::default()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::mock::MockClient;
    use crate::http::HttpResponse;

    const RESULTS: &str = r#"{"detectedFaces":[{"x":1}],"results":{
        "duplicates":[{"hash":"d1","distance":0.987,"proxyUrl":"https://proxy/d1","width":800,"height":600,
            "urlList":[{"imageUrl":"https://a.example/i.jpg","sourceUrl":"https://a.example/p","title":null,"lang":"en"},
                       {"imageUrl":"https://b.example/i.jpg","sourceUrl":"https://b.example/p","title":"B"}]}],
        "similar":[{"hash":"s1","distance":0.5,"proxyUrl":"https://proxy/s1","urlList":[{"sourceUrl":"https://c.example/p","title":"C"}]},
                   {"hash":"s2","distance":0.4,"proxyUrl":"https://proxy/s2"}],
        "places":[]
    }}"#;

    fn engine(responses: Vec<HttpResponse>) -> (Arc<MockClient>, Lenso) {
        let client = Arc::new(MockClient::with_responses(responses));
        (client.clone(), Lenso::new(client))
    }

    #[test]
    fn test_option_parsing() {
        assert_eq!("".parse::<LensoSearchType>().unwrap(), LensoSearchType::All);
        assert_eq!("DATE_ASCENDING".parse::<LensoSort>().unwrap(), LensoSort::DateAscending);
        assert!("smart".parse::<LensoSort>().unwrap_err().to_string().contains("SMART"));
        assert!("faces".parse::<LensoSearchType>().is_err());
    }

    #[test]
    fn test_parse_groups_and_raw_order() {
        let resp = LensoResponse::parse(serde_json::from_str(RESULTS).unwrap(), "u").unwrap();
        assert_eq!(resp.duplicates.len(), 1);
        assert_eq!(resp.similar.len(), 2);
        assert!(resp.places.is_empty());
        assert!(resp.people.is_empty());
        assert_eq!(resp.detected_faces.len(), 1);

        let hashes: Vec<_> = resp.raw().iter().map(|i| i.hash.as_str()).collect();
        assert_eq!(hashes, vec!["d1", "s1", "s2"]);

        let duplicate = &resp.raw()[0];
        assert_eq!(duplicate.similarity, 98.7);
        assert_eq!(duplicate.url, "https://a.example/p");
        assert_eq!(duplicate.title, "");
        assert_eq!(duplicate.url_list[1].title, "B");
        assert_eq!(duplicate.width, 800);
        assert_eq!(resp.raw()[2].url, "");
    }

    #[test]
    fn test_out_of_range_dimensions_become_zero() {
        let value = serde_json::json!({"hash": "h", "width": 4_294_967_296u64, "height": 720});
        let item = LensoItem::from_value(&value).unwrap();
        assert_eq!(item.width, 0);
        assert_eq!(item.height, 720);
    }

    #[tokio::test]
    async fn test_upload_then_search() {
        let (client, engine) = engine(vec![
            HttpResponse::new(200, r#"{"id":"img-1"}"#, "https://lenso.ai/api/upload"),
            HttpResponse::new(200, RESULTS, "https://lenso.ai/api/search"),
        ]);
        let options = LensoOptions {
            search_type: LensoSearchType::Similar,
            sort: LensoSort::QualityDescending,
        };
        let resp = engine
            .search_with_options(&ImageSource::file(b"img".to_vec()), &options)
            .await
            .unwrap();
        assert_eq!(resp.raw().len(), 3);

        let requests = client.requests();
        assert_eq!(requests[0].body, Body::Json(json!({"image": "data:image/jpeg;base64,aW1n"})));
        let Body::Json(payload) = &requests[1].body else {
            panic!("expected json body");
        };
        assert_eq!(payload["image"]["id"], "img-1");
        assert_eq!(payload["type"], "similar");
        assert_eq!(payload["sort"], "QUALITY_DESCENDING");
    }

    #[tokio::test]
    async fn test_url_source_is_downloaded() {
        let (client, engine) = engine(vec![
            HttpResponse::new(200, r#"{"id":"img-2"}"#, "https://lenso.ai/api/upload"),
            HttpResponse::new(200, r#"{"results":{}}"#, "https://lenso.ai/api/search"),
        ]);
        client.push_download(b"img".to_vec());
        let resp = engine.search(&ImageSource::url("https://img.example/a.jpg")).await.unwrap();
        assert!(resp.raw().is_empty());
        assert_eq!(client.requests()[0].url, "https://img.example/a.jpg");
    }

    #[tokio::test]
    async fn test_missing_upload_id_is_parsing_error() {
        let (client, engine) = engine(vec![HttpResponse::new(200, r#"{"error":"bad"}"#, "https://lenso.ai/api/upload")]);
        let err = engine.search(&ImageSource::file(b"img".to_vec())).await.unwrap_err();
        assert_eq!(err.engine(), Some("Lenso"));
        assert_eq!(client.calls(), 1);
    }
}
