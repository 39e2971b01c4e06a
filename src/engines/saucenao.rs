//! SauceNAO search API.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::extract::{first_non_empty, str_at, value_to_string};
use crate::http::{Body, FormPart, HttpClient, HttpRequest};
use crate::model::{Origin, SearchItem, SearchResponse};
use crate::{Engine, EngineConfig, ImageSource, Result, SearchError};

const NAME: &str = "SauceNAO";

/// Result fields tried in order for the title.
const TITLE_FIELDS: &[&str] = &["title", "material", "jp_name", "eng_name", "source", "created_at"];

/// Result fields tried in order for the author.
const AUTHOR_FIELDS: &[&str] = &[
    "author",
    "member_name",
    "creator",
    "twitter_user_handle",
    "pawoo_user_display_name",
    "author_name",
    "user_name",
    "artist",
    "company",
];

/// Query options fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SauceNaoOptions {
    pub api_key: Option<String>,
    /// Number of results, 1–40.
    pub numres: u32,
    /// Explicit content filter, 0–3.
    pub hide: u32,
    /// Minimum similarity, 0–100.
    pub minsim: u32,
    /// Dry run that does not consume quota.
    pub testmode: bool,
    pub dbmask: Option<u64>,
    pub dbmaski: Option<u64>,
    /// Database index, 0–999. Ignored when `dbs` is non-empty.
    pub db: u32,
    pub dbs: Vec<u32>,
}

impl Default for SauceNaoOptions {
    fn default() -> Self {
        Self {
            api_key: None,
            numres: 5,
            hide: 0,
            minsim: 30,
            testmode: false,
            dbmask: None,
            dbmaski: None,
            db: 999,
            dbs: Vec::new(),
        }
    }
}

impl SauceNaoOptions {
    /// Checks every option against its documented range.
    pub fn validate(&self) -> Result<()> {
        check_range("numres", self.numres, 1, 40)?;
        check_range("hide", self.hide, 0, 3)?;
        check_range("minsim", self.minsim, 0, 100)?;
        check_range("db", self.db, 0, 999)?;
        for db in &self.dbs {
            check_range("dbs", *db, 0, 999)?;
        }
        Ok(())
    }

    /// Query parameters sent with every search. Output is always JSON.
    pub fn params(&self) -> Vec<(String, String)> {
        let mut params = vec![
            ("testmode".to_string(), u8::from(self.testmode).to_string()),
            ("numres".to_string(), self.numres.to_string()),
            ("output_type".to_string(), "2".to_string()),
            ("hide".to_string(), self.hide.to_string()),
        ];
        if self.dbs.is_empty() {
            params.push(("db".to_string(), self.db.to_string()));
        }
        params.push(("minsim".to_string(), self.minsim.to_string()));
        if let Some(key) = &self.api_key {
            params.push(("api_key".to_string(), key.clone()));
        }
        if let Some(mask) = self.dbmask {
            params.push(("dbmask".to_string(), mask.to_string()));
        }
        if let Some(mask) = self.dbmaski {
            params.push(("dbmaski".to_string(), mask.to_string()));
        }
        params.extend(self.dbs.iter().map(|db| ("dbs[]".to_string(), db.to_string())));
        params
    }
}

fn check_range(name: &str, value: u32, min: u32, max: u32) -> Result<()> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(SearchError::InvalidArgument(format!(
            "{name} must be within {min}..={max}, got {value}"
        )))
    }
}

/// One SauceNAO match.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SauceNaoItem {
    pub similarity: f64,
    pub thumbnail: String,
    pub index_id: i64,
    pub index_name: String,
    /// Non-zero when the result is hidden by the `hide` filter.
    pub hidden: i64,
    pub title: String,
    pub url: String,
    pub ext_urls: Vec<String>,
    pub author: String,
    pub author_url: String,
    pub source: String,
}

impl SauceNaoItem {
    fn from_value(value: &Value) -> Self {
        let header = value.get("header").unwrap_or(&Value::Null);
        let data = value.get("data").unwrap_or(&Value::Null);
        Self {
            similarity: str_at(header, "similarity").parse().unwrap_or(0.0),
            thumbnail: str_at(header, "thumbnail"),
            index_id: header.get("index_id").and_then(Value::as_i64).unwrap_or_default(),
            index_name: str_at(header, "index_name"),
            hidden: header.get("hidden").and_then(Value::as_i64).unwrap_or_default(),
            title: first_non_empty(data, TITLE_FIELDS).unwrap_or_default(),
            url: work_url(data),
            ext_urls: data
                .get("ext_urls")
                .and_then(Value::as_array)
                .map(|urls| urls.iter().filter_map(Value::as_str).map(str::to_string).collect())
                .unwrap_or_default(),
            author: first_non_empty(data, AUTHOR_FIELDS).unwrap_or_default(),
            author_url: author_url(data),
            source: str_at(data, "source"),
        }
    }
}

fn work_url(data: &Value) -> String {
    let has = |key: &str| data.get(key).is_some();
    let field = |key: &str| str_at(data, key);
    if has("pixiv_id") {
        format!("https://www.pixiv.net/artworks/{}", field("pixiv_id"))
    } else if has("pawoo_id") {
        format!("https://pawoo.net/@{}/{}", field("pawoo_user_acct"), field("pawoo_id"))
    } else if has("getchu_id") {
        format!("https://www.getchu.com/soft.phtml?id={}", field("getchu_id"))
    } else {
        field("ext_urls[0]")
    }
}

fn author_url(data: &Value) -> String {
    let has = |key: &str| data.get(key).is_some();
    let member = || str_at(data, "member_id");
    if has("pixiv_id") {
        format!("https://www.pixiv.net/users/{}", member())
    } else if has("seiga_id") {
        format!("https://seiga.nicovideo.jp/user/illust/{}", member())
    } else if has("nijie_id") {
        format!("https://nijie.info/members.php?id={}", member())
    } else if has("bcy_id") {
        format!("https://bcy.net/u/{}", member())
    } else if has("tweet_id") {
        format!(
            "https://twitter.com/intent/user?user_id={}",
            str_at(data, "twitter_user_id")
        )
    } else if has("pawoo_user_acct") {
        format!("https://pawoo.net/@{}", str_at(data, "pawoo_user_acct"))
    } else {
        str_at(data, "author_url")
    }
}

impl SearchItem for SauceNaoItem {
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

/// Parsed SauceNAO results plus account quota counters.
#[derive(Debug, Clone, PartialEq)]
pub struct SauceNaoResponse {
    origin: Origin,
    url: String,
    raw: Vec<SauceNaoItem>,
    pub status_code: u16,
    pub short_remaining: Option<i64>,
    pub long_remaining: Option<i64>,
    pub user_id: Option<String>,
    pub account_type: Option<String>,
    pub short_limit: Option<String>,
    pub long_limit: Option<String>,
    /// API status. Positive values flag a partial server side failure.
    pub status: Option<i64>,
    /// Notice from the API header, e.g. index outages.
    pub message: Option<String>,
    pub results_requested: Option<i64>,
    pub search_depth: Option<String>,
    pub minimum_similarity: Option<f64>,
    pub results_returned: Option<i64>,
}

impl SauceNaoResponse {
    /// Parses an API response. `base` is the site root used to build the
    /// canonical results URL.
    ///
    /// A non-2xx `status_code` or a negative header status (quota, bad key,
    /// rejected image) is raised with the header message.
    pub fn parse(data: Value, status_code: u16, base: &str) -> Result<Self> {
        let header = data
            .get("header")
            .filter(|h| h.is_object())
            .ok_or_else(|| SearchError::parsing(NAME, "response has no header"))?;

        let int = |key: &str| header.get(key).and_then(as_i64);
        let text = |key: &str| header.get(key).map(value_to_string);
        let message = text("message").filter(|m| !m.is_empty());
        let status = int("status");

        if !(200..300).contains(&status_code) || status.is_some_and(|s| s < 0) {
            let details = match status {
                Some(status) => format!("HTTP {status_code}, header status {status}"),
                None => format!("HTTP {status_code}"),
            };
            return Err(
                SearchError::parsing(NAME, message.unwrap_or_else(|| "request rejected".to_string())).with_details(details),
            );
        }

        let raw = match data.get("results") {
            Some(results) => results
                .as_array()
                .ok_or_else(|| SearchError::parsing(NAME, "'results' is not a list"))?
                .iter()
                .map(SauceNaoItem::from_value)
                .collect(),
            None if int("results_returned") == Some(0) => Vec::new(),
            None => {
                return Err(SearchError::parsing(
                    NAME,
                    message.unwrap_or_else(|| "response has no results".to_string()),
                ))
            }
        };

        let url = format!(
            "{base}/search.php?url={base}{}",
            str_at(header, "query_image_display")
        );
        Ok(Self {
            url,
            raw,
            status_code,
            short_remaining: int("short_remaining"),
            long_remaining: int("long_remaining"),
            user_id: text("user_id"),
            account_type: text("account_type"),
            short_limit: text("short_limit"),
            long_limit: text("long_limit"),
            status,
            message,
            results_requested: int("results_requested"),
            search_depth: text("search_depth"),
            minimum_similarity: header.get("minimum_similarity").and_then(as_f64),
            results_returned: int("results_returned"),
            origin: Origin::Json(data),
        })
    }
}

// SauceNAO mixes numbers and numeric strings in the header.
fn as_i64(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| value.as_str()?.parse().ok())
}

fn as_f64(value: &Value) -> Option<f64> {
    value.as_f64().or_else(|| value.as_str()?.parse().ok())
}

impl SearchResponse for SauceNaoResponse {
    type Item = SauceNaoItem;

    fn origin(&self) -> &Origin {
        &self.origin
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn raw(&self) -> &[SauceNaoItem] {
        &self.raw
    }
}

/// SauceNAO engine.
pub struct SauceNao {
    config: EngineConfig,
    options: SauceNaoOptions,
    client: Arc<dyn HttpClient>,
}

impl SauceNao {
    /// Creates a SauceNAO engine with default options.
    pub fn new(client: Arc<dyn HttpClient>) -> Self {
        Self {
            config: EngineConfig::new(NAME, "sn", "https://saucenao.com"),
            options: SauceNaoOptions::default(),
            client,
        }
    }

    /// Creates with custom configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the query options, rejecting out-of-range values.
    pub fn with_options(mut self, options: SauceNaoOptions) -> Result<Self> {
        options.validate()?;
        self.options = options;
        Ok(self)
    }

    /// Sets the API key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.options.api_key = Some(key.into());
        self
    }

    pub fn options(&self) -> &SauceNaoOptions {
        &self.options
    }
}

#[async_trait]
impl Engine for SauceNao {
    type Response = SauceNaoResponse;

    fn config(&self) -> &EngineConfig {
        &self.config
    }

    async fn search(&self, source: &ImageSource) -> Result<SauceNaoResponse> {
        let request = HttpRequest::post(format!("{}/search.php", self.base_url()))
            .query_pairs(self.options.params());
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

        // Quota and key errors come back as non-2xx with a JSON header whose
        // message is more useful than the bare status.
        let resp = self.client.execute(request).await?;
        let resp = if resp.is_success() || serde_json::from_str::<Value>(&resp.text).is_ok() {
            resp
        } else {
            resp.error_for_status()?
        };
        let data = resp.json(NAME)?;
        let response = SauceNaoResponse::parse(data, resp.status, self.base_url())?;
        debug!(
            results = response.raw.len(),
            long_remaining = ?response.long_remaining,
            "SauceNAO parsed"
        );
        Ok(response)
    }
}
