//! AnimeTrace character recognition.
//!
//! Unlike the other engines this one identifies characters rather than
//! pages, so items carry a bounding box and candidate names but no URL.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::extract::value_to_string;
use crate::http::{Body, FormPart, HttpClient, HttpRequest};
use crate::model::{Origin, SearchItem, SearchResponse};
use crate::{Engine, EngineConfig, ImageSource, Result, SearchError};

const NAME: &str = "AnimeTrace";

/// Recognition model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnimeTraceModel {
    AnimeModelLovelive,
    PreStable,
    Anime,
    FullGameModelKira,
}

impl AnimeTraceModel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AnimeModelLovelive => "anime_model_lovelive",
            Self::PreStable => "pre_stable",
            Self::Anime => "anime",
            Self::FullGameModelKira => "full_game_model_kira",
        }
    }
}

impl FromStr for AnimeTraceModel {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "anime_model_lovelive" => Ok(Self::AnimeModelLovelive),
            "pre_stable" => Ok(Self::PreStable),
            "anime" => Ok(Self::Anime),
            "full_game_model_kira" => Ok(Self::FullGameModelKira),
            other => Err(SearchError::InvalidArgument(format!(
                "invalid model '{other}', expected one of: anime_model_lovelive, pre_stable, anime, full_game_model_kira"
            ))),
        }
    }
}

/// A candidate character and the work it appears in.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Character {
    #[serde(rename = "character")]
    pub name: String,
    pub work: String,
}

/// One detected face or figure.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AnimeTraceItem {
    /// Bounding box `[x1, y1, x2, y2]` relative to the image.
    #[serde(rename = "box")]
    pub bounding_box: Vec<f64>,
    pub box_id: String,
    #[serde(rename = "character", default)]
    pub characters: Vec<Character>,
    #[serde(skip)]
    url: String,
}

impl SearchItem for AnimeTraceItem {
    fn url(&self) -> &str {
        &self.url
    }

    fn title(&self) -> &str {
        self.characters.first().map(|c| c.name.as_str()).unwrap_or_default()
    }

    fn thumbnail(&self) -> &str {
        ""
    }
}

#[derive(Debug, Deserialize)]
struct RawResponse {
    code: i64,
    #[serde(default)]
    ai: bool,
    #[serde(default)]
    trace_id: String,
    #[serde(default)]
    data: Vec<AnimeTraceItem>,
}

/// Parsed AnimeTrace response.
#[derive(Debug, Clone, PartialEq)]
pub struct AnimeTraceResponse {
    origin: Origin,
    url: String,
    raw: Vec<AnimeTraceItem>,
    /// API status code, 0 on success.
    pub code: i64,
    /// Whether the image was judged AI-generated.
    pub ai: bool,
    pub trace_id: String,
}

impl AnimeTraceResponse {
    pub fn parse(data: Value, url: impl Into<String>) -> Result<Self> {
        let parsed: RawResponse = serde_json::from_value(data.clone()).map_err(|e| SearchError::shape(NAME, e))?;
        Ok(Self {
            origin: Origin::Json(data),
            url: url.into(),
            raw: parsed.data,
            code: parsed.code,
            ai: parsed.ai,
            trace_id: parsed.trace_id,
        })
    }
}

impl SearchResponse for AnimeTraceResponse {
    type Item = AnimeTraceItem;

    fn origin(&self) -> &Origin {
        &self.origin
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn raw(&self) -> &[AnimeTraceItem] {
        &self.raw
    }
}

/// AnimeTrace engine.
pub struct AnimeTrace {
    config: EngineConfig,
    endpoint: String,
    multi: Option<bool>,
    ai_detect: Option<bool>,
    client: Arc<dyn HttpClient>,
}

impl AnimeTrace {
    /// Creates an engine on `https://api.animetrace.com/v1/search`.
    pub fn new(client: Arc<dyn HttpClient>) -> Self {
        Self {
            config: EngineConfig::new(NAME, "at", "https://api.animetrace.com"),
            endpoint: "v1/search".to_string(),
            multi: None,
            ai_detect: None,
            client,
        }
    }

    /// Creates with custom configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Overrides the API path below the base URL.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Returns every detected character instead of the best one.
    pub fn with_multi(mut self, multi: bool) -> Self {
        self.multi = Some(multi);
        self
    }

    /// Enables or disables AI-generated image detection.
    pub fn with_ai_detect(mut self, detect: bool) -> Self {
        self.ai_detect = Some(detect);
        self
    }

    fn endpoint_url(&self) -> String {
        format!("{}/{}", self.base_url(), self.endpoint.trim_start_matches('/'))
    }

    fn params(&self, model: Option<AnimeTraceModel>) -> Vec<(String, Value)> {
        let mut params = Vec::new();
        // The API treats is_multi=0 as unset.
        if self.multi == Some(true) {
            params.push(("is_multi".to_string(), json!(1)));
        }
        if let Some(detect) = self.ai_detect {
            params.push(("ai_detect".to_string(), json!(if detect { 1 } else { 2 })));
        }
        if let Some(model) = model {
            params.push(("model".to_string(), json!(model.as_str())));
        }
        params
    }

    async fn post_json(&self, key: &str, value: String, model: Option<AnimeTraceModel>) -> Result<AnimeTraceResponse> {
        let mut body = Map::new();
        body.insert(key.to_string(), Value::String(value));
        body.extend(self.params(model));
        self.send(HttpRequest::post(self.endpoint_url()).body(Body::Json(Value::Object(body))))
            .await
    }

    async fn send(&self, request: HttpRequest) -> Result<AnimeTraceResponse> {
        let resp = self.client.execute(request).await?.error_for_status()?;
        let response = AnimeTraceResponse::parse(resp.json(NAME)?, resp.url)?;
        debug!(
            results = response.raw.len(),
            code = response.code,
            "AnimeTrace parsed"
        );
        Ok(response)
    }

    /// Searches with an explicit recognition model.
    pub async fn search_with_model(
        &self,
        source: &ImageSource,
        model: Option<AnimeTraceModel>,
    ) -> Result<AnimeTraceResponse> {
        match source {
            ImageSource::Url(url) => self.post_json("url", url.clone(), model).await,
            ImageSource::File(file) => {
                let bytes = file.read().await?;
                let mut parts = vec![FormPart::named_file("file", bytes.to_vec(), file.filename(), "image/jpeg")];
                parts.extend(
                    self.params(model)
                        .into_iter()
                        .map(|(k, v)| FormPart::text(k, value_to_string(&v))),
                );
                self.send(HttpRequest::post(self.endpoint_url()).body(Body::Multipart(parts)))
                    .await
            }
        }
    }

    /// Searches with an image already encoded as base64.
    pub async fn search_base64(&self, encoded: &str, model: Option<AnimeTraceModel>) -> Result<AnimeTraceResponse> {
        if encoded.is_empty() {
            return Err(SearchError::InvalidArgument("base64 image must not be empty".to_string()));
        }
        self.post_json("base64", encoded.to_string(), model).await
    }

    /// Encodes `bytes` and searches with them as base64.
    pub async fn search_bytes_as_base64(&self, bytes: &[u8], model: Option<AnimeTraceModel>) -> Result<AnimeTraceResponse> {
        self.search_base64(&STANDARD.encode(bytes), model).await
    }
}

#[async_trait]
impl Engine for AnimeTrace {
    type Response = AnimeTraceResponse;

    fn config(&self) -> &EngineConfig {
        &self.config
    }

    async fn search(&self, source: &ImageSource) -> Result<AnimeTraceResponse> {
        self.search_with_model(source, None).await
    }
}
