//! trace.moe anime scene search.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::extract::{percent, value_to_string};
use crate::http::{Body, FormPart, HttpClient, HttpRequest};
use crate::model::{Origin, SearchItem, SearchResponse};
use crate::{Engine, EngineConfig, ImageSource, Result, SearchError};

const NAME: &str = "TraceMoe";

/// Preview size appended to video and image links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PreviewSize {
    Small,
    Medium,
    Large,
}

impl PreviewSize {
    fn as_str(self) -> &'static str {
        match self {
            Self::Small => "s",
            Self::Medium => "m",
            Self::Large => "l",
        }
    }
}

impl FromStr for PreviewSize {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "s" => Ok(Self::Small),
            "m" => Ok(Self::Medium),
            "l" => Ok(Self::Large),
            other => Err(SearchError::InvalidArgument(format!(
                "invalid preview size '{other}', expected one of: s, m, l"
            ))),
        }
    }
}

/// Per-search options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceMoeOptions {
    /// API key sent as `x-trace-key`.
    pub key: Option<String>,
    /// Restrict the search to one AniList entry.
    pub anilist_id: Option<u64>,
    pub cut_borders: bool,
}

impl Default for TraceMoeOptions {
    fn default() -> Self {
        Self {
            key: None,
            anilist_id: None,
            cut_borders: true,
        }
    }
}

/// Account quota information returned by `/me`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceMoeMe {
    /// Visitor IP address or user email.
    pub id: String,
    pub priority: i64,
    pub concurrency: i64,
    pub quota: i64,
    pub quota_used: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct AnilistTitle {
    #[serde(default)]
    native: Option<String>,
    #[serde(default)]
    romaji: Option<String>,
    #[serde(default)]
    english: Option<String>,
    #[serde(default)]
    chinese: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnilistInfo {
    id: u64,
    #[serde(default)]
    id_mal: Option<u64>,
    #[serde(default)]
    title: AnilistTitle,
    #[serde(default)]
    synonyms: Vec<String>,
    #[serde(default)]
    is_adult: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Anilist {
    Id(u64),
    Info(AnilistInfo),
}

#[derive(Debug, Clone, Deserialize)]
struct RawMatch {
    anilist: Anilist,
    #[serde(default)]
    filename: String,
    #[serde(default)]
    episode: Value,
    #[serde(default)]
    from: f64,
    #[serde(default)]
    to: f64,
    similarity: f64,
    #[serde(default)]
    video: String,
    #[serde(default)]
    image: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawResponse {
    #[serde(default)]
    frame_count: u64,
    #[serde(default)]
    error: String,
    result: Option<Vec<RawMatch>>,
}

/// One matched scene.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceMoeItem {
    pub anilist_id: u64,
    pub mal_id: Option<u64>,
    pub title_native: String,
    pub title_romaji: String,
    pub title_english: String,
    pub title_chinese: String,
    pub synonyms: Vec<String>,
    pub is_adult: bool,
    pub filename: String,
    /// Episode as reported, which may be a number, a range or absent.
    pub episode: Option<String>,
    /// Scene start in seconds.
    pub from: f64,
    /// Scene end in seconds.
    pub to: f64,
    pub similarity: f64,
    pub video: String,
    pub image: String,
    /// AniList page of the anime.
    pub url: String,
    title: String,
}

impl TraceMoeItem {
    fn from_raw(raw: RawMatch, mute: bool, size: Option<PreviewSize>) -> Self {
        let (anilist_id, info) = match raw.anilist {
            Anilist::Id(id) => (id, None),
            Anilist::Info(info) => (info.id, Some(info)),
        };
        let info_title = info.as_ref().map(|i| i.title.clone()).unwrap_or_default();
        let native = info_title.native.unwrap_or_default();
        let romaji = info_title.romaji.unwrap_or_default();
        let english = info_title.english.unwrap_or_default();
        let chinese = info_title.chinese.unwrap_or_default();
        let title = [&english, &romaji, &native]
            .into_iter()
            .find(|t| !t.is_empty())
            .cloned()
            .unwrap_or_else(|| raw.filename.clone());

        let mut video = raw.video;
        let mut image = raw.image;
        if let Some(size) = size {
            video.push_str(&format!("&size={}", size.as_str()));
            image.push_str(&format!("&size={}", size.as_str()));
        }
        if mute {
            video.push_str("&mute");
        }

        let episode = match raw.episode {
            Value::Null => None,
            other => Some(value_to_string(&other)).filter(|e| !e.is_empty()),
        };

        Self {
            anilist_id,
            mal_id: info.as_ref().and_then(|i| i.id_mal),
            title_native: native,
            title_romaji: romaji,
            title_english: english,
            title_chinese: chinese,
            synonyms: info.as_ref().map(|i| i.synonyms.clone()).unwrap_or_default(),
            is_adult: info.as_ref().is_some_and(|i| i.is_adult),
            filename: raw.filename,
            episode,
            from: raw.from,
            to: raw.to,
            similarity: percent(raw.similarity),
            video,
            image,
            url: format!("https://anilist.co/anime/{anilist_id}"),
            title,
        }
    }
}

impl SearchItem for TraceMoeItem {
    fn url(&self) -> &str {
        &self.url
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn thumbnail(&self) -> &str {
        &self.image
    }

    fn similarity(&self) -> f64 {
        self.similarity
    }
}

/// Parsed trace.moe results.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceMoeResponse {
    origin: Origin,
    url: String,
    raw: Vec<TraceMoeItem>,
    /// Number of frames compared.
    pub frame_count: u64,
}

impl TraceMoeResponse {
    /// Parses a search response, applying the preview preferences to every
    /// item's media links. An `error` reported by the API is raised.
    pub fn parse(data: Value, url: impl Into<String>, mute: bool, size: Option<PreviewSize>) -> Result<Self> {
        let parsed: RawResponse =
            serde_json::from_value(data.clone()).map_err(|e| SearchError::shape(NAME, e))?;
        if !parsed.error.is_empty() {
            return Err(SearchError::parsing(NAME, parsed.error));
        }
        let result = parsed
            .result
            .ok_or_else(|| SearchError::parsing(NAME, "response has no result list"))?;
        Ok(Self {
            origin: Origin::Json(data),
            url: url.into(),
            raw: result
                .into_iter()
                .map(|m| TraceMoeItem::from_raw(m, mute, size))
                .collect(),
            frame_count: parsed.frame_count,
        })
    }
}

impl SearchResponse for TraceMoeResponse {
    type Item = TraceMoeItem;

    fn origin(&self) -> &Origin {
        &self.origin
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn raw(&self) -> &[TraceMoeItem] {
        &self.raw
    }
}

/// trace.moe engine.
pub struct TraceMoe {
    config: EngineConfig,
    mute: bool,
    size: Option<PreviewSize>,
    client: Arc<dyn HttpClient>,
}

impl TraceMoe {
    /// Creates a trace.moe engine on `https://api.trace.moe`.
    pub fn new(client: Arc<dyn HttpClient>) -> Self {
        Self {
            config: EngineConfig::new(NAME, "tm", "https://api.trace.moe"),
            mute: false,
            size: None,
            client,
        }
    }

    /// Creates with custom configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Mutes preview videos.
    pub fn with_mute(mut self, mute: bool) -> Self {
        self.mute = mute;
        self
    }

    /// Sets the preview size.
    pub fn with_size(mut self, size: PreviewSize) -> Self {
        self.size = Some(size);
        self
    }

    /// Queries account quota, anonymously when `key` is `None`.
    pub async fn me(&self, key: Option<&str>) -> Result<TraceMoeMe> {
        let mut request = HttpRequest::get(format!("{}/me", self.base_url()));
        if let Some(key) = key.filter(|k| !k.is_empty()) {
            request = request.query("key", key);
        }
        let resp = self.client.execute(request).await?.error_for_status()?;
        serde_json::from_value(resp.json(NAME)?).map_err(|e| SearchError::shape(NAME, e))
    }

    /// Searches with per-call options.
    pub async fn search_with_options(
        &self,
        source: &ImageSource,
        options: &TraceMoeOptions,
    ) -> Result<TraceMoeResponse> {
        let mut request = HttpRequest::post(format!("{}/search", self.base_url())).query("anilistInfo", "");
        if let Some(key) = options.key.as_deref().filter(|k| !k.is_empty()) {
            request = request.header("x-trace-key", key);
        }
        if options.cut_borders {
            request = request.query("cutBorders", "true");
        }
        if let Some(id) = options.anilist_id {
            request = request.query("anilistID", id);
        }
        let request = match source {
            ImageSource::Url(url) => request.query("url", url),
            ImageSource::File(file) => {
                let bytes = file.read().await?;
                request.body(Body::Multipart(vec![FormPart::named_file(
                    "file",
                    bytes.to_vec(),
                    file.filename(),
                    "image/jpeg",
                )]))
            }
        };

        let resp = self.client.execute(request).await?.error_for_status()?;
        let response = TraceMoeResponse::parse(resp.json(NAME)?, resp.url, self.mute, self.size)?;
        debug!(
            results = response.raw.len(),
            frames = response.frame_count,
            "TraceMoe parsed"
        );
        Ok(response)
    }
}

#[async_trait]
impl Engine for TraceMoe {
    type Response = TraceMoeResponse;

    fn config(&self) -> &EngineConfig {
        &self.config
    }

    async fn search(&self, source: &ImageSource) -> Result<TraceMoeResponse> {
        self.search_with_options(source, &TraceMoeOptions::default()).await
    }
}
