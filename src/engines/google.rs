//! Google reverse image search (`searchbyimage`).
//!
//! Result thumbnails are not in the `img` tags: Google inlines them as
//! base64 data inside scripts that reference the `dimg_*` ids of the images.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use scraper::Html;
use serde::Serialize;
use tracing::debug;

use crate::extract::{attr, child_attr, child_text, selector};
use crate::http::{Body, FormPart, HttpClient, HttpRequest};
use crate::model::{Origin, SearchItem, SearchResponse};
use crate::paging::{Paginate, Paginated};
use crate::{Engine, EngineConfig, ImageSource, Result, SearchError};

const NAME: &str = "Google";

/// One search result block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GoogleItem {
    pub title: String,
    pub url: String,
    /// Inline `data:image/...;base64,` thumbnail, or empty.
    pub thumbnail: String,
}

impl SearchItem for GoogleItem {
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

/// Parsed Google results page.
#[derive(Debug, Clone, PartialEq)]
pub struct GoogleResponse {
    origin: Origin,
    url: String,
    raw: Vec<GoogleItem>,
    pages: Vec<String>,
    /// Current page, starting at 1.
    pub page_number: usize,
}

impl GoogleResponse {
    /// Parses a results page.
    ///
    /// When `pages` is `None` the page list is read from the pager links,
    /// resolved against `host`, with `url` as page 1.
    pub fn parse(
        html: &str,
        url: impl Into<String>,
        host: &str,
        page_number: usize,
        pages: Option<Vec<String>>,
    ) -> Result<Self> {
        let url = url.into();
        let document = Html::parse_document(html);

        let pages = match pages {
            Some(pages) => pages,
            None => {
                let pager = selector(r#"a[aria-label~="Page"]"#, NAME)?;
                let mut pages = vec![url.clone()];
                pages.extend(
                    document
                        .select(&pager)
                        .map(|a| format!("{}{}", host.trim_end_matches('/'), attr(a, "href"))),
                );
                pages
            }
        };

        let thumbnails = thumbnail_map(&document)?;

        let block_selector = selector("#search .g", NAME)?;
        let title_selector = selector("h3", NAME)?;
        let link_selector = selector("a", NAME)?;
        let img_selector = selector(r#"img[id^="dimg_"]"#, NAME)?;

        let mut raw = Vec::new();
        for block in document.select(&block_selector) {
            let href = block
                .select(&link_selector)
                .next()
                .and_then(|a| a.value().attr("href"))
                .ok_or_else(|| {
                    SearchError::parsing(NAME, "result block without link").with_details(child_text(block, &title_selector))
                })?;
            let url = match href.strip_prefix("/url?") {
                Some(query) => url::form_urlencoded::parse(query.as_bytes())
                    .find(|(key, _)| key == "q")
                    .map(|(_, target)| target.into_owned())
                    .unwrap_or_else(|| href.to_string()),
                None => href.to_string(),
            };
            let image_id = child_attr(block, &img_selector, "id");
            raw.push(GoogleItem {
                title: child_text(block, &title_selector),
                url,
                thumbnail: thumbnails.get(&image_id).cloned().unwrap_or_default(),
            });
        }

        Ok(Self {
            origin: Origin::Html(html.to_string()),
            url,
            raw,
            pages,
            page_number,
        })
    }

    fn needs_thumbnails(&self) -> bool {
        self.raw.len() > 1 && self.raw.iter().all(|item| item.thumbnail.is_empty())
    }
}

/// Maps `dimg_*` image ids to the base64 thumbnail of the script that mentions them.
fn thumbnail_map(document: &Html) -> Result<HashMap<String, String>> {
    let base64_regex = Regex::new(r#"data:image/(?:jpeg|jpg|png|gif);base64,[^'"]+"#)
        .map_err(|e| SearchError::Other(e.to_string()))?;
    let id_regex = Regex::new(r#"dimg_[^'"]+"#).map_err(|e| SearchError::Other(e.to_string()))?;
    let script_selector = selector("script", NAME)?;

    let mut map = HashMap::new();
    for script in document.select(&script_selector) {
        let text = script.text().collect::<String>();
        let Some(data) = base64_regex.find(&text) else {
            continue;
        };
        let data = data.as_str().replace(r"\x3d", "=");
        for id in id_regex.find_iter(&text) {
            map.insert(id.as_str().to_string(), data.clone());
        }
    }
    Ok(map)
}

impl SearchResponse for GoogleResponse {
    type Item = GoogleItem;

    fn origin(&self) -> &Origin {
        &self.origin
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn raw(&self) -> &[GoogleItem] {
        &self.raw
    }
}

impl Paginated for GoogleResponse {
    fn page_number(&self) -> usize {
        self.page_number
    }

    fn pages(&self) -> &[String] {
        &self.pages
    }
}

/// Google search-by-image engine.
pub struct Google {
    config: EngineConfig,
    client: Arc<dyn HttpClient>,
}

impl Google {
    /// Creates a Google engine on `https://www.google.com`.
    ///
    /// Regional hosts such as `https://www.google.co.jp` can be set through
    /// [`Google::with_config`].
    pub fn new(client: Arc<dyn HttpClient>) -> Self {
        Self {
            config: EngineConfig::new(NAME, "g", "https://www.google.com"),
            client,
        }
    }

    /// Creates with custom configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    async fn get_page(&self, url: &str, page_number: usize, pages: Option<Vec<String>>) -> Result<GoogleResponse> {
        let resp = self.client.execute(HttpRequest::get(url)).await?.error_for_status()?;
        GoogleResponse::parse(&resp.text, resp.url, self.base_url(), page_number, pages)
    }
}

#[async_trait]
impl Engine for Google {
    type Response = GoogleResponse;

    fn config(&self) -> &EngineConfig {
        &self.config
    }

    async fn search(&self, source: &ImageSource) -> Result<GoogleResponse> {
        let endpoint = format!("{}/searchbyimage", self.base_url());
        let request = match source {
            ImageSource::Url(url) => HttpRequest::get(endpoint)
                .query("sbisrc", 1)
                .query("safe", "off")
                .query("image_url", url),
            ImageSource::File(file) => {
                let bytes = file.read().await?;
                HttpRequest::post(format!("{endpoint}/upload")).body(Body::Multipart(vec![
                    FormPart::text("sbisrc", "1"),
                    FormPart::text("safe", "off"),
                    FormPart::named_file("encoded_image", bytes.to_vec(), file.filename(), "image/jpeg"),
                ]))
            }
        };

        let resp = self.client.execute(request).await?.error_for_status()?;
        let response = GoogleResponse::parse(&resp.text, resp.url, self.base_url(), 1, None)?;
        debug!(results = response.raw.len(), pages = response.pages.len(), "Google parsed");

        if response.needs_thumbnails() {
            debug!("Google results carry no thumbnails, fetching the results page again");
            return self.get_page(&response.url, 1, None).await;
        }
        Ok(response)
    }
}

#[async_trait]
impl Paginate for Google {
    async fn fetch_page(&self, response: &GoogleResponse, page: usize) -> Result<GoogleResponse> {
        let url = response
            .pages
            .get(page.wrapping_sub(1))
            .ok_or_else(|| SearchError::InvalidArgument(format!("page {page} out of range")))?;
        self.get_page(url, page, Some(response.pages.clone())).await
    }
}
