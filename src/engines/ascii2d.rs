//! ascii2d.net color and feature (bovw) search.

use std::sync::Arc;

use async_trait::async_trait;
use scraper::{ElementRef, Html};
use serde::Serialize;
use tracing::debug;

use crate::extract::{absolute_url, attr, child_attr, child_text, selector, text};
use crate::http::{Body, FormPart, HttpClient, HttpRequest};
use crate::model::{Origin, SearchItem, SearchResponse};
use crate::{Engine, EngineConfig, ImageSource, Result, SearchError};

const NAME: &str = "Ascii2D";
const SITE: &str = "https://ascii2d.net";

/// Source labels whose first two links are the work and its author.
const SUPPORTED_SOURCES: &[&str] = &[
    "fanbox",
    "fantia",
    "misskey",
    "pixiv",
    "twitter",
    "げっちゅ屋",
    "ニコニコ静画",
    "ニジエ",
];

/// Titles that are board log placeholders rather than real titles.
const IGNORED_TITLES: &[&str] = &["詳細掲示板のログ", "2ちゃんねるのログ"];

/// A labelled link of a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Link {
    pub href: String,
    pub text: String,
}

/// One ascii2d result box.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ascii2dItem {
    pub hash: String,
    /// Dimensions, format and file size.
    pub detail: String,
    pub thumbnail: String,
    pub url: String,
    pub url_list: Vec<Link>,
    pub title: String,
    pub author: String,
    pub author_url: String,
}

impl Ascii2dItem {
    fn parse(item: ElementRef<'_>) -> Result<Self> {
        let hash = selector("div.hash", NAME)?;
        let small = selector("small", NAME)?;
        let img = selector("img", NAME)?;
        let detail_box = selector("div.detail-box.gray-link", NAME)?;
        let a = selector("a", NAME)?;

        let mut result = Self {
            hash: child_text(item, &hash),
            detail: child_text(item, &small),
            thumbnail: absolute_url(SITE, &child_attr(item, &img, "src")),
            url: String::new(),
            url_list: Vec::new(),
            title: String::new(),
            author: String::new(),
            author_url: String::new(),
        };

        if let Some(infos) = item.select(&detail_box).next() {
            let links: Vec<ElementRef<'_>> = infos.select(&a).collect();
            result.url_list = links
                .iter()
                .map(|link| Link {
                    href: attr(*link, "href"),
                    text: text(*link),
                })
                .collect();
            let supported = infos
                .select(&small)
                .map(text)
                .any(|mark| SUPPORTED_SOURCES.contains(&mark.as_str()));

            if links.len() > 1 && supported {
                result.title = text(links[0]);
                result.url = attr(links[0], "href");
                result.author = text(links[1]);
                result.author_url = attr(links[1], "href");
            } else if links.first().is_some_and(|link| inside(*link, "small")) {
                result.title = text_excluding(infos, &["small"]);
            }

            if result.title.is_empty() {
                result.title = external_text(infos)?;
            }
            if result.title.is_empty() {
                result.title = child_text(infos, &selector("h6", NAME)?);
            }
            if IGNORED_TITLES.iter().any(|t| result.title.contains(t)) {
                result.title.clear();
            }
        }

        for link in &mut result.url_list {
            if link.href.starts_with('/') {
                link.href = format!("{SITE}{}", link.href);
            }
        }

        if result.url_list.is_empty() {
            let backup = selector("div.pull-xs-right > a", NAME)?;
            if let Some(link) = item.select(&backup).next() {
                result.url = attr(link, "href");
                result.url_list.push(Link {
                    href: result.url.clone(),
                    text: text(link),
                });
            }
        }
        Ok(result)
    }
}

fn inside(element: ElementRef<'_>, tag: &str) -> bool {
    element
        .ancestors()
        .filter_map(|node| node.value().as_element())
        .any(|el| el.name() == tag)
}

/// Whitespace-normalized text of `element`, skipping `tags` subtrees.
fn text_excluding(element: ElementRef<'_>, tags: &[&str]) -> String {
    let id = element.id();
    element
        .descendants()
        .filter(|node| {
            !node
                .ancestors()
                .take_while(|ancestor| ancestor.id() != id)
                .filter_map(|ancestor| ancestor.value().as_element())
                .any(|el| tags.contains(&el.name()))
        })
        .filter_map(|node| node.value().as_text().map(|t| t.to_string()))
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Text of `.external` blocks without their links, one block per line.
fn external_text(infos: ElementRef<'_>) -> Result<String> {
    let external = selector(".external", NAME)?;
    Ok(infos
        .select(&external)
        .map(|block| text_excluding(block, &["a"]))
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n"))
}

impl SearchItem for Ascii2dItem {
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

/// Parsed ascii2d results page.
#[derive(Debug, Clone, PartialEq)]
pub struct Ascii2dResponse {
    origin: Origin,
    url: String,
    raw: Vec<Ascii2dItem>,
}

impl Ascii2dResponse {
    /// Parses a results page. The first box describes the query image.
    pub fn parse(html: &str, url: impl Into<String>) -> Result<Self> {
        let document = Html::parse_document(html);
        let item_box = selector("div.row.item-box", NAME)?;
        let raw = document
            .select(&item_box)
            .map(Ascii2dItem::parse)
            .collect::<Result<Vec<_>>>()?;
        if raw.is_empty() {
            return Err(SearchError::parsing(NAME, "no item boxes found").with_details("div.row.item-box"));
        }
        Ok(Self {
            origin: Origin::Html(html.to_string()),
            url: url.into(),
            raw,
        })
    }
}

impl SearchResponse for Ascii2dResponse {
    type Item = Ascii2dItem;

    fn origin(&self) -> &Origin {
        &self.origin
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn raw(&self) -> &[Ascii2dItem] {
        &self.raw
    }
}

/// ascii2d engine.
pub struct Ascii2d {
    config: EngineConfig,
    bovw: bool,
    client: Arc<dyn HttpClient>,
}

impl Ascii2d {
    /// Creates a color-search engine on `https://ascii2d.net`.
    pub fn new(client: Arc<dyn HttpClient>) -> Self {
        Self {
            config: EngineConfig::new(NAME, "a2d", SITE),
            bovw: false,
            client,
        }
    }

    /// Creates with custom configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Switches to feature search, which copes better with crops and
    /// recolored images.
    pub fn with_bovw(mut self, bovw: bool) -> Self {
        self.bovw = bovw;
        self
    }
}

#[async_trait]
impl Engine for Ascii2d {
    type Response = Ascii2dResponse;

    fn config(&self) -> &EngineConfig {
        &self.config
    }

    async fn search(&self, source: &ImageSource) -> Result<Ascii2dResponse> {
        let request = match source {
            ImageSource::Url(url) => HttpRequest::post(format!("{}/search/uri", self.base_url()))
                .body(Body::Form(vec![("uri".to_string(), url.clone())])),
            ImageSource::File(file) => {
                let bytes = file.read().await?;
                HttpRequest::post(format!("{}/search/file", self.base_url())).body(Body::Multipart(vec![
                    FormPart::named_file("file", bytes.to_vec(), file.filename(), "image/jpeg"),
                ]))
            }
        };
        let mut resp = self.client.execute(request).await?.error_for_status()?;

        if self.bovw {
            let bovw_url = resp.url.replace("/color/", "/bovw/");
            debug!(url = %bovw_url, "Ascii2D switching to feature search");
            resp = self
                .client
                .execute(HttpRequest::get(bovw_url))
                .await?
                .error_for_status()?;
        }

        let response = Ascii2dResponse::parse(&resp.text, resp.url)?;
        debug!(results = response.raw.len(), "Ascii2D parsed");
        Ok(response)
    }
}
