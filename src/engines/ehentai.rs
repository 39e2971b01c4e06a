//! E-Hentai / ExHentai similarity file search.
//!
//! ExHentai requires account cookies, configured on the HTTP client through
//! [`crate::config::ClientConfig::with_cookies`].

use std::sync::Arc;

use async_trait::async_trait;
use scraper::{ElementRef, Html};
use serde::Serialize;
use tracing::debug;

use crate::extract::{attr, child_text, selector, text};
use crate::http::{Body, FormPart, HttpClient, HttpRequest};
use crate::model::{Origin, SearchItem, SearchResponse};
use crate::{Engine, EngineConfig, ImageSource, Result, SearchError};

const NAME: &str = "EHentai";
const NO_RESULTS: &str = "No unfiltered results";

/// Lookup flags sent with every upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EHentaiOptions {
    /// Only match gallery covers.
    pub covers: bool,
    /// Similarity scan instead of exact matches.
    pub similar: bool,
    /// Include expunged galleries.
    pub exp: bool,
}

impl Default for EHentaiOptions {
    fn default() -> Self {
        Self {
            covers: false,
            similar: true,
            exp: false,
        }
    }
}

/// One gallery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EHentaiItem {
    pub title: String,
    pub url: String,
    pub thumbnail: String,
    /// Gallery category, e.g. "Doujinshi".
    pub kind: String,
    /// Posting date as displayed.
    pub date: String,
    pub tags: Vec<String>,
}

impl EHentaiItem {
    fn parse(entry: ElementRef<'_>) -> Result<Self> {
        let glink = selector(".glink", NAME)?;
        let posted = selector("[id^='posted']", NAME)?;
        let tags = selector(r#"div[class="gt"], div[class="gtl"]"#, NAME)?;

        let title_el = entry.select(&glink).next();
        let url = title_el
            .and_then(|el| {
                el.ancestors()
                    .filter_map(ElementRef::wrap)
                    .find(|a| a.value().name() == "a")
            })
            .map(|a| attr(a, "href"))
            .unwrap_or_default();

        let mut thumbnail = String::new();
        for css in [".glthumb img", ".gl1e img", ".gl3t img"] {
            if let Some(img) = entry.select(&selector(css, NAME)?).next() {
                thumbnail = img
                    .value()
                    .attr("data-src")
                    .or_else(|| img.value().attr("src"))
                    .unwrap_or_default()
                    .to_string();
                break;
            }
        }

        let mut kind = child_text(entry, &selector(".cs", NAME)?);
        if kind.is_empty() {
            kind = child_text(entry, &selector(".cn", NAME)?);
        }

        Ok(Self {
            title: title_el.map(text).unwrap_or_default(),
            url,
            thumbnail,
            kind,
            date: child_text(entry, &posted),
            tags: entry.select(&tags).map(|tag| attr(tag, "title")).collect(),
        })
    }
}

impl SearchItem for EHentaiItem {
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

/// Parsed gallery list.
#[derive(Debug, Clone, PartialEq)]
pub struct EHentaiResponse {
    origin: Origin,
    url: String,
    raw: Vec<EHentaiItem>,
}

impl EHentaiResponse {
    /// Parses a results page in either the table or the thumbnail layout.
    /// Only the explicit "no results" notice yields an empty list.
    pub fn parse(html: &str, url: impl Into<String>) -> Result<Self> {
        let document = Html::parse_document(html);
        let raw = if html.contains(NO_RESULTS) {
            Vec::new()
        } else {
            let rows = selector("table.itg > tbody > tr, table.itg > tr", NAME)?;
            let mut entries: Vec<ElementRef<'_>> = document
                .select(&rows)
                .filter(|row| row.children().filter_map(ElementRef::wrap).any(|c| c.value().name() == "td"))
                .collect();
            if entries.is_empty() {
                entries = document.select(&selector(".itg > .gl1t", NAME)?).collect();
            }
            if entries.is_empty() {
                return Err(SearchError::parsing(NAME, "no gallery table or grid found")
                    .with_details("expected `table.itg` rows or `.itg > .gl1t` cells"));
            }
            entries.into_iter().map(EHentaiItem::parse).collect::<Result<Vec<_>>>()?
        };
        Ok(Self {
            origin: Origin::Html(html.to_string()),
            url: url.into(),
            raw,
        })
    }
}

impl SearchResponse for EHentaiResponse {
    type Item = EHentaiItem;

    fn origin(&self) -> &Origin {
        &self.origin
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn raw(&self) -> &[EHentaiItem] {
        &self.raw
    }
}

/// E-Hentai engine.
pub struct EHentai {
    config: EngineConfig,
    is_ex: bool,
    options: EHentaiOptions,
    client: Arc<dyn HttpClient>,
}

impl EHentai {
    /// Creates an engine on `https://upld.e-hentai.org`.
    pub fn new(client: Arc<dyn HttpClient>) -> Self {
        Self {
            config: EngineConfig::new(NAME, "eh", "https://upld.e-hentai.org"),
            is_ex: false,
            options: EHentaiOptions::default(),
            client,
        }
    }

    /// Creates an engine on `https://upld.exhentai.org`.
    pub fn new_ex(client: Arc<dyn HttpClient>) -> Self {
        Self {
            config: EngineConfig::new("ExHentai", "ex", "https://upld.exhentai.org"),
            is_ex: true,
            options: EHentaiOptions::default(),
            client,
        }
    }

    /// Creates with custom configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the lookup flags.
    pub fn with_options(mut self, options: EHentaiOptions) -> Self {
        self.options = options;
        self
    }

    fn endpoint(&self) -> String {
        if self.is_ex {
            format!("{}/upld/image_lookup.php", self.base_url())
        } else {
            format!("{}/image_lookup.php", self.base_url())
        }
    }
}

#[async_trait]
impl Engine for EHentai {
    type Response = EHentaiResponse;

    fn config(&self) -> &EngineConfig {
        &self.config
    }

    async fn search(&self, source: &ImageSource) -> Result<EHentaiResponse> {
        // The lookup only accepts uploads, so URLs are fetched first.
        let (bytes, filename) = match source {
            ImageSource::Url(url) => (self.client.download(url).await?, "image".to_string()),
            ImageSource::File(file) => (file.read().await?.to_vec(), file.filename()),
        };

        let mut parts = vec![
            FormPart::text("f_sfile", "File Search"),
            FormPart::named_file("sfile", bytes, filename, "image/jpeg"),
        ];
        for (flag, on) in [
            ("fs_covers", self.options.covers),
            ("fs_similar", self.options.similar),
            ("fs_exp", self.options.exp),
        ] {
            if on {
                parts.push(FormPart::text(flag, "on"));
            }
        }

        let request = HttpRequest::post(self.endpoint()).body(Body::Multipart(parts));
        let resp = self.client.execute(request).await?.error_for_status()?;
        let response = EHentaiResponse::parse(&resp.text, resp.url)?;
        debug!(results = response.raw.len(), ex = self.is_ex, "EHentai parsed");
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::mock::MockClient;
    use crate::http::HttpResponse;

    const TABLE: &str = r#"<html><body><table class="itg gltc">
        <tr><th>Published</th><th>Title</th></tr>
        <tr>
          <td class="gl1c glcat"><div class="cn ct2">Doujinshi</div></td>
          <td class="gl2c"><div class="glthumb"><div><img data-src="https://ehgt.org/t/1.jpg" src="data:image/gif;base64,R0lGOD"></div></div>
            <div><div id="posted_123">2021-01-01 10:00</div></div></td>
          <td class="gl3c glname"><a href="https://e-hentai.org/g/123/abc/"><div class="glink">Gallery One</div>
            <div><div class="gt" title="language:english">english</div><div class="gtl" title="female:glasses">glasses</div><div class="gtw" title="skip">x</div></div></a></td>
        </tr>
        <tr>
          <td class="gl1c glcat"><div class="cs ct3">Manga</div></td>
          <td class="gl2c"><div class="glthumb"><div><img src="https://ehgt.org/t/2.jpg"></div></div><div id="posted_456">2020-05-05 00:00</div></td>
          <td class="gl3c glname"><a href="https://e-hentai.org/g/456/def/"><div class="glink">Gallery Two</div></a></td>
        </tr>
    </table></body></html>"#;

    const GRID: &str = r#"<html><body><div class="itg gld">
        <div class="gl1t"><a href="https://e-hentai.org/g/789/ghi/"><span class="glink">Grid Gallery</span></a>
          <div class="gl3t"><a href="https://e-hentai.org/g/789/ghi/"><img src="https://ehgt.org/t/3.jpg"></a></div>
          <div class="cs ct5">Cosplay</div><div id="posted_789">2019-01-01</div></div>
    </div></body></html>"#;

    fn engine(responses: Vec<HttpResponse>) -> (Arc<MockClient>, EHentai) {
        let client = Arc::new(MockClient::with_responses(responses));
        (client.clone(), EHentai::new(client))
    }

    #[test]
    fn test_parse_table_layout() {
        let resp = EHentaiResponse::parse(TABLE, "https://e-hentai.org/?f_shash=x").unwrap();
        assert_eq!(resp.raw().len(), 2);

        let first = &resp.raw()[0];
        assert_eq!(first.title, "Gallery One");
        assert_eq!(first.url, "https://e-hentai.org/g/123/abc/");
        assert_eq!(first.thumbnail, "https://ehgt.org/t/1.jpg");
        assert_eq!(first.kind, "Doujinshi");
        assert_eq!(first.date, "2021-01-01 10:00");
        assert_eq!(first.tags, vec!["language:english", "female:glasses"]);

        let second = &resp.raw()[1];
        assert_eq!(second.thumbnail, "https://ehgt.org/t/2.jpg");
        assert_eq!(second.kind, "Manga");
        assert!(second.tags.is_empty());
    }

    #[test]
    fn test_parse_grid_layout() {
        let resp = EHentaiResponse::parse(GRID, "u").unwrap();
        assert_eq!(resp.raw().len(), 1);
        assert_eq!(resp.raw()[0].title, "Grid Gallery");
        assert_eq!(resp.raw()[0].url, "https://e-hentai.org/g/789/ghi/");
        assert_eq!(resp.raw()[0].thumbnail, "https://ehgt.org/t/3.jpg");
        assert_eq!(resp.raw()[0].kind, "Cosplay");
    }

    #[test]
    fn test_parse_no_unfiltered_results() {
        let html = "<html><body><p>No unfiltered results in this page range.</p></body></html>";
        let resp = EHentaiResponse::parse(html, "u").unwrap();
        assert!(resp.raw().is_empty());
    }

    #[test]
    fn test_parse_unknown_layout_is_error() {
        let err = EHentaiResponse::parse("<html><body><p>redesigned</p></body></html>", "u").unwrap_err();
        assert!(matches!(err, SearchError::Parsing { .. }));
        assert_eq!(err.engine(), Some("EHentai"));
    }

    #[tokio::test]
    async fn test_url_source_is_downloaded_then_uploaded() {
        let (client, engine) = engine(vec![HttpResponse::new(200, TABLE, "https://e-hentai.org/?f_shash=x")]);
        client.push_download(vec![1, 2, 3]);

        let resp = engine.search(&ImageSource::url("https://img.example/a.jpg")).await.unwrap();
        assert_eq!(resp.raw().len(), 2);

        let requests = client.requests();
        assert_eq!(requests[0].url, "https://img.example/a.jpg");
        assert_eq!(requests[1].url, "https://upld.e-hentai.org/image_lookup.php");
        let Body::Multipart(parts) = &requests[1].body else {
            panic!("expected multipart body");
        };
        let names: Vec<_> = parts.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["f_sfile", "sfile", "fs_similar"]);
    }

    #[tokio::test]
    async fn test_ex_endpoint_and_flags() {
        let client = Arc::new(MockClient::with_responses(vec![HttpResponse::new(200, GRID, "https://exhentai.org/")]));
        let engine = EHentai::new_ex(client.clone()).with_options(EHentaiOptions {
            covers: true,
            similar: false,
            exp: true,
        });
        engine.search(&ImageSource::file(b"img".to_vec())).await.unwrap();

        let request = &client.requests()[0];
        assert_eq!(request.url, "https://upld.exhentai.org/upld/image_lookup.php");
        let Body::Multipart(parts) = &request.body else {
            panic!("expected multipart body");
        };
        let names: Vec<_> = parts.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["f_sfile", "sfile", "fs_covers", "fs_exp"]);
    }
}
