//! TinEye reverse image search.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::extract::str_at;
use crate::http::{Body, FormPart, HttpClient, HttpRequest};
use crate::model::{Origin, SearchItem, SearchResponse};
use crate::paging::{with_page, Paginate, Paginated};
use crate::{Engine, EngineConfig, ImageSource, Result, SearchError};

const NAME: &str = "Tineye";

/// Result ordering criterion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TineyeSort {
    #[default]
    Score,
    CrawlDate,
    Size,
}

impl TineyeSort {
    fn as_str(self) -> &'static str {
        match self {
            Self::Score => "score",
            Self::CrawlDate => "crawl_date",
            Self::Size => "size",
        }
    }
}

impl FromStr for TineyeSort {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "score" => Ok(Self::Score),
            "crawl_date" => Ok(Self::CrawlDate),
            "size" => Ok(Self::Size),
            other => Err(SearchError::InvalidArgument(format!(
                "invalid sort '{other}', expected one of: score, crawl_date, size"
            ))),
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TineyeOrder {
    Asc,
    #[default]
    Desc,
}

impl FromStr for TineyeOrder {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            other => Err(SearchError::InvalidArgument(format!(
                "invalid order '{other}', expected one of: asc, desc"
            ))),
        }
    }
}

/// Per-search TinEye options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TineyeOptions {
    /// Include results from domains TinEye marks unavailable.
    pub show_unavailable_domains: bool,
    /// Restrict results to one domain.
    pub domain: String,
    pub sort: TineyeSort,
    pub order: TineyeOrder,
    /// Comma-separated tag filter, e.g. `stock,collection`.
    pub tags: String,
}

impl TineyeOptions {
    fn params(&self) -> Vec<(String, String)> {
        let order = match self.order {
            TineyeOrder::Asc => "asc",
            TineyeOrder::Desc => "desc",
        };
        let unavailable = if self.show_unavailable_domains { "true" } else { "" };
        [
            ("sort", self.sort.as_str()),
            ("order", order),
            ("page", "1"),
            ("show_unavailable_domains", unavailable),
            ("tags", self.tags.as_str()),
            ("domain", self.domain.as_str()),
        ]
        .into_iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }
}

/// Tag TinEye attaches to some domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainTag {
    Stock,
    Collection,
}

/// A domain the image was found on, with its match count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainInfo {
    pub domain: String,
    pub count: u64,
    pub tag: Option<DomainTag>,
}

impl DomainInfo {
    /// Parses a `[name, count, [tag]]` entry.
    fn from_raw(entry: &Value) -> Option<Self> {
        let domain = entry.get(0)?.as_str()?.to_string();
        let count = entry.get(1)?.as_u64()?;
        let tag = match entry.get(2).and_then(|t| t.get(0)).and_then(Value::as_str) {
            Some("stock") => Some(DomainTag::Stock),
            Some("collection") => Some(DomainTag::Collection),
            _ => None,
        };
        Some(Self { domain, count, tag })
    }

    /// Collects the `domains` list, skipping malformed entries.
    fn parse_list(data: &Value) -> Vec<Self> {
        let Some(entries) = data.get("domains").and_then(Value::as_array) else {
            debug!("Tineye domain response has no domains list");
            return Vec::new();
        };
        entries
            .iter()
            .filter_map(|entry| {
                let parsed = Self::from_raw(entry);
                if parsed.is_none() {
                    debug!(%entry, "Tineye skipping malformed domain entry");
                }
                parsed
            })
            .collect()
    }
}

/// One match.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TineyeItem {
    /// TinEye-hosted copy of the match.
    pub thumbnail: String,
    /// Direct URL to the full-size image.
    pub image_url: String,
    /// Page the image was found on.
    pub url: String,
    pub domain: String,
    /// `[width, height]`.
    pub size: [u32; 2],
    pub crawl_date: String,
}

impl SearchItem for TineyeItem {
    fn url(&self) -> &str {
        &self.url
    }

    fn title(&self) -> &str {
        &self.domain
    }

    fn thumbnail(&self) -> &str {
        &self.thumbnail
    }
}

#[derive(Deserialize)]
struct RawBacklink {
    url: String,
    backlink: String,
    #[serde(default)]
    crawl_date: String,
}

#[derive(Deserialize)]
struct RawMatch {
    image_url: String,
    domain: String,
    width: u32,
    height: u32,
    backlinks: Vec<RawBacklink>,
}

impl TryFrom<RawMatch> for TineyeItem {
    type Error = SearchError;

    fn try_from(raw: RawMatch) -> Result<Self> {
        let backlink = raw
            .backlinks
            .into_iter()
            .next()
            .ok_or_else(|| SearchError::parsing(NAME, "match without backlinks").with_details(raw.image_url.clone()))?;
        Ok(Self {
            thumbnail: raw.image_url,
            image_url: backlink.url,
            url: backlink.backlink,
            domain: raw.domain,
            size: [raw.width, raw.height],
            crawl_date: backlink.crawl_date,
        })
    }
}

#[derive(Deserialize)]
struct RawResponse {
    query_hash: String,
    total_pages: usize,
    #[serde(default)]
    matches: Option<Vec<RawMatch>>,
}

/// Parsed TinEye results page.
#[derive(Debug, Clone, PartialEq)]
pub struct TineyeResponse {
    origin: Origin,
    url: String,
    raw: Vec<TineyeItem>,
    pages: Vec<String>,
    /// Current page, starting at 1.
    pub page_number: usize,
    pub query_hash: String,
    pub status_code: u16,
    pub total_pages: usize,
    /// Domains the image was found on. Only fetched with the first page.
    pub domains: Vec<DomainInfo>,
}

impl TineyeResponse {
    /// Parses one `result_json` document.
    pub fn parse(
        data: Value,
        status_code: u16,
        url: impl Into<String>,
        domains: Vec<DomainInfo>,
        page_number: usize,
    ) -> Result<Self> {
        let url = url.into();
        let parsed: RawResponse =
            serde_json::from_value(data.clone()).map_err(|e| SearchError::shape(NAME, e))?;
        let raw = parsed
            .matches
            .unwrap_or_default()
            .into_iter()
            .map(TineyeItem::try_from)
            .collect::<Result<Vec<_>>>()?;
        let api_url = url.replacen("/search/", "/api/v1/result_json/", 1);
        let pages = (1..=parsed.total_pages)
            .map(|page| with_page(&api_url, page))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            origin: Origin::Json(data),
            url,
            raw,
            pages,
            page_number,
            query_hash: parsed.query_hash,
            status_code,
            total_pages: parsed.total_pages,
            domains,
        })
    }
}

impl SearchResponse for TineyeResponse {
    type Item = TineyeItem;

    fn origin(&self) -> &Origin {
        &self.origin
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn raw(&self) -> &[TineyeItem] {
        &self.raw
    }
}

impl Paginated for TineyeResponse {
    fn page_number(&self) -> usize {
        self.page_number
    }

    fn pages(&self) -> &[String] {
        &self.pages
    }
}

/// TinEye engine.
pub struct Tineye {
    config: EngineConfig,
    client: Arc<dyn HttpClient>,
}

impl Tineye {
    /// Creates a TinEye engine on `https://tineye.com`.
    pub fn new(client: Arc<dyn HttpClient>) -> Self {
        Self {
            config: EngineConfig::new(NAME, "te", "https://tineye.com"),
            client,
        }
    }

    /// Creates with custom configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Searches with explicit options.
    pub async fn search_with_options(&self, source: &ImageSource, options: &TineyeOptions) -> Result<TineyeResponse> {
        let params = options.params();
        let request = HttpRequest::post(format!("{}/api/v1/result_json/", self.base_url()));
        let request = match source {
            ImageSource::Url(url) => {
                let mut form = params.clone();
                form.push(("url".to_string(), url.clone()));
                request.body(Body::Form(form))
            }
            ImageSource::File(file) => {
                let bytes = file.read().await?;
                let mut parts: Vec<FormPart> = params.iter().map(|(k, v)| FormPart::text(k, v)).collect();
                parts.push(FormPart::named_file("image", bytes.to_vec(), file.filename(), "image/jpeg"));
                request.body(Body::Multipart(parts))
            }
        };

        let resp = self.client.execute(request).await?.error_for_status()?;
        let data = resp.json(NAME)?;

        let mut url = resp.url.clone();
        let mut domains = Vec::new();
        let key = str_at(&data, "query.key");
        if !key.is_empty() {
            let query_string = params
                .iter()
                .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
                .collect::<Vec<_>>()
                .join("&");
            url = format!("{}/search/{}?{}", self.base_url(), key, query_string);
            domains = self.domains(&str_at(&data, "query.hash")).await?;
        }

        let response = TineyeResponse::parse(data, resp.status, url, domains, 1)?;
        debug!(matches = response.raw.len(), pages = response.total_pages, "Tineye parsed");
        Ok(response)
    }

    async fn domains(&self, query_hash: &str) -> Result<Vec<DomainInfo>> {
        let url = format!("{}/api/v1/search/get_domains/{}", self.base_url(), query_hash);
        let resp = self.client.execute(HttpRequest::get(url)).await?.error_for_status()?;
        let data = resp.json(NAME)?;
        Ok(DomainInfo::parse_list(&data))
    }
}

#[async_trait]
impl Engine for Tineye {
    type Response = TineyeResponse;

    fn config(&self) -> &EngineConfig {
        &self.config
    }

    async fn search(&self, source: &ImageSource) -> Result<TineyeResponse> {
        self.search_with_options(source, &TineyeOptions::default()).await
    }
}

#[async_trait]
impl Paginate for Tineye {
    async fn fetch_page(&self, response: &TineyeResponse, page: usize) -> Result<TineyeResponse> {
        let url = response
            .pages
            .get(page.wrapping_sub(1))
            .ok_or_else(|| SearchError::InvalidArgument(format!("page {page} out of range")))?;
        let resp = self
            .client
            .execute(HttpRequest::get(url.as_str()))
            .await?
            .error_for_status()?;
        let data = resp.json(NAME)?;
        let mut next = TineyeResponse::parse(data, resp.status, resp.url, response.domains.clone(), page)?;
        next.pages = response.pages.clone();
        Ok(next)
    }
}
