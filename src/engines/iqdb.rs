//! IQDB multi-service image search (iqdb.org and 3d.iqdb.org).

use std::sync::Arc;

use async_trait::async_trait;
use scraper::{ElementRef, Html};
use serde::Serialize;
use tracing::debug;

use crate::extract::{absolute_url, attr, child_attr, child_text, selector, text};
use crate::http::{Body, FormPart, HttpClient, HttpRequest};
use crate::model::{Origin, SearchItem, SearchResponse};
use crate::{Engine, EngineConfig, ImageSource, Result, SearchError};

const NAME: &str = "IQDB";
const IMAGE_HOST: &str = "https://iqdb.org";
const NO_MATCH: &str = "No relevant matches";

/// A secondary source listed next to the primary match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OtherSource {
    pub source: String,
    pub url: String,
}

/// One IQDB match table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IqdbItem {
    /// Match label such as "Best match" or "Additional match".
    pub content: String,
    pub url: String,
    pub thumbnail: String,
    /// Primary booru the match was found on.
    pub source: String,
    pub other_source: Vec<OtherSource>,
    /// Dimensions and rating, e.g. "1000×1414 [Safe]".
    pub size: String,
    pub similarity: f64,
}

impl IqdbItem {
    /// Parses a match table. Returns `None` for the "No relevant matches" table.
    fn parse(table: ElementRef<'_>) -> Result<Option<Self>> {
        let tr = selector("tr", NAME)?;
        let th = selector("th", NAME)?;
        let td = selector("td", NAME)?;
        let link = selector("td > a", NAME)?;
        let image = selector("td > a > img", NAME)?;

        let mut rows: Vec<ElementRef<'_>> = table.select(&tr).collect();
        let mut content = String::new();
        if rows.len() >= 5 {
            content = child_text(rows[0], &th);
            if content == NO_MATCH {
                return Ok(None);
            }
            rows.remove(0);
        }
        if rows.len() < 4 {
            return Err(SearchError::parsing(NAME, "match table has too few rows").with_details(content));
        }

        let href = child_attr(rows[0], &link, "href");
        if href.is_empty() {
            return Err(SearchError::parsing(NAME, "match table without link"));
        }
        let source_cell = rows[1];
        let other_source = source_cell
            .select(&link)
            .map(|a| OtherSource {
                source: text(a),
                url: absolute_url(IMAGE_HOST, &attr(a, "href")),
            })
            .collect();
        let similarity = child_text(rows[3], &td)
            .trim_end_matches("% similarity")
            .trim()
            .parse()
            .unwrap_or(0.0);

        Ok(Some(Self {
            content,
            url: absolute_url(IMAGE_HOST, &href),
            thumbnail: absolute_url(IMAGE_HOST, &child_attr(rows[0], &image, "src")),
            source: primary_source(source_cell),
            other_source,
            size: child_text(rows[2], &td),
            similarity,
        }))
    }
}

/// The first bare text in the source row; secondary sources are links.
fn primary_source(row: ElementRef<'_>) -> String {
    row.descendants()
        .filter(|node| {
            node.parent()
                .and_then(|p| p.value().as_element())
                .is_some_and(|el| el.name() == "td")
        })
        .filter_map(|node| node.value().as_text().map(|t| t.trim().to_string()))
        .find(|t| !t.is_empty())
        .unwrap_or_default()
}

impl SearchItem for IqdbItem {
    fn url(&self) -> &str {
        &self.url
    }

    fn title(&self) -> &str {
        &self.source
    }

    fn thumbnail(&self) -> &str {
        &self.thumbnail
    }

    fn similarity(&self) -> f64 {
        self.similarity
    }
}

/// Parsed IQDB results page.
#[derive(Debug, Clone, PartialEq)]
pub struct IqdbResponse {
    origin: Origin,
    url: String,
    raw: Vec<IqdbItem>,
    /// Lower-similarity matches from the hidden "more" section.
    pub more: Vec<IqdbItem>,
    pub saucenao_url: String,
    pub ascii2d_url: String,
    pub google_url: String,
    pub tineye_url: String,
}

impl IqdbResponse {
    /// Parses a results page. The first table echoes the query image.
    pub fn parse(html: &str) -> Result<Self> {
        let document = Html::parse_document(html);
        let tables_selector = selector("#pages > div > table", NAME)?;
        let img = selector("img", NAME)?;
        let th = selector("th", NAME)?;
        let a = selector("a", NAME)?;
        let three_d = selector(r#"a[href^="//3d.iqdb.org"]"#, NAME)?;

        let tables: Vec<ElementRef<'_>> = document.select(&tables_selector).collect();
        let Some(query_table) = tables.first() else {
            return Err(SearchError::parsing(NAME, "no result tables found"));
        };

        // The results page links to the other IQDB flavour.
        let host = if document.select(&three_d).next().is_some() {
            "https://iqdb.org"
        } else {
            "https://3d.iqdb.org"
        };
        let url = format!("{host}/?url={IMAGE_HOST}{}", child_attr(*query_table, &img, "src"));

        let mut raw = Vec::new();
        for table in tables.iter().skip(1) {
            raw.extend(IqdbItem::parse(*table)?);
        }

        let first = tables.get(1).unwrap_or(query_table);
        let links: Vec<ElementRef<'_>> = if child_text(*first, &th) == NO_MATCH {
            first.select(&a).collect()
        } else {
            document.select(&selector("#show1 > a", NAME)?).collect()
        };

        let more_selector = selector("#more1 > div.pages > div > table", NAME)?;
        let mut more = Vec::new();
        for table in document.select(&more_selector) {
            more.extend(IqdbItem::parse(table)?);
        }

        let mut resp = Self {
            origin: Origin::Html(html.to_string()),
            url,
            raw,
            more,
            saucenao_url: String::new(),
            ascii2d_url: String::new(),
            google_url: String::new(),
            tineye_url: String::new(),
        };
        for link in links {
            resp.set_other_url(&text(link), &attr(link, "href"));
        }
        Ok(resp)
    }

    fn set_other_url(&mut self, name: &str, href: &str) {
        if href == "#" {
            return;
        }
        let (prefix, slot) = match name {
            "SauceNao" => ("https:", &mut self.saucenao_url),
            "ascii2d.net" => ("", &mut self.ascii2d_url),
            "Google Images" => ("https:", &mut self.google_url),
            "TinEye" => ("https:", &mut self.tineye_url),
            _ => return,
        };
        *slot = if href.starts_with("https:") {
            href.to_string()
        } else {
            format!("{prefix}{href}")
        };
    }
}

impl SearchResponse for IqdbResponse {
    type Item = IqdbItem;

    fn origin(&self) -> &Origin {
        &self.origin
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn raw(&self) -> &[IqdbItem] {
        &self.raw
    }
}

/// Per-search options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IqdbOptions {
    /// Ignore colors when matching.
    pub force_gray: bool,
}

/// IQDB engine.
pub struct Iqdb {
    config: EngineConfig,
    client: Arc<dyn HttpClient>,
}

impl Iqdb {
    /// Creates an engine for anime artwork on `https://iqdb.org`.
    pub fn new(client: Arc<dyn HttpClient>) -> Self {
        Self {
            config: EngineConfig::new(NAME, "iq", "https://iqdb.org"),
            client,
        }
    }

    /// Creates an engine for real-life images on `https://3d.iqdb.org`.
    pub fn new_3d(client: Arc<dyn HttpClient>) -> Self {
        Self {
            config: EngineConfig::new("IQDB 3D", "iq3", "https://3d.iqdb.org"),
            client,
        }
    }

    /// Creates with custom configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Searches with per-call options.
    pub async fn search_with_options(&self, source: &ImageSource, options: &IqdbOptions) -> Result<IqdbResponse> {
        let request = HttpRequest::post(format!("{}/", self.base_url()));
        let request = match source {
            ImageSource::Url(url) => {
                let mut form = vec![("url".to_string(), url.clone())];
                if options.force_gray {
                    form.push(("forcegray".to_string(), "on".to_string()));
                }
                request.body(Body::Form(form))
            }
            ImageSource::File(file) => {
                let bytes = file.read().await?;
                let mut parts = Vec::new();
                if options.force_gray {
                    parts.push(FormPart::text("forcegray", "on"));
                }
                parts.push(FormPart::named_file("file", bytes.to_vec(), file.filename(), "image/jpeg"));
                request.body(Body::Multipart(parts))
            }
        };

        let resp = self.client.execute(request).await?.error_for_status()?;
        let response = IqdbResponse::parse(&resp.text)?;
        debug!(results = response.raw.len(), more = response.more.len(), "IQDB parsed");
        Ok(response)
    }
}

#[async_trait]
impl Engine for Iqdb {
    type Response = IqdbResponse;

    fn config(&self) -> &EngineConfig {
        &self.config
    }

    async fn search(&self, source: &ImageSource) -> Result<IqdbResponse> {
        self.search_with_options(source, &IqdbOptions::default()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::mock::MockClient;
    use crate::http::HttpResponse;

    const RESULTS: &str = r##"<html><body>
        <div id="pages">
          <div><table>
            <tr><th>Your image</th></tr>
            <tr><td><img src="/thu/thu_114514.jpg"></td></tr>
          </table></div>
          <div><table>
            <tr><th>Best match</th></tr>
            <tr><td class="image"><a href="//danbooru.donmai.us/posts/1"><img src="/danbooru/1.jpg" alt="x"></a></td></tr>
            <tr><td><img class="service-icon" src="/icon/danbooru.ico">Danbooru <img class="service-icon" src="/icon/gelbooru.ico"><a href="//gelbooru.com/index.php?id=2">Gelbooru</a></td></tr>
            <tr><td>1000×1414 [Safe]</td></tr>
            <tr><td>95% similarity</td></tr>
          </table></div>
          <div><table>
            <tr><th>Additional match</th></tr>
            <tr><td class="image"><a href="https://yande.re/post/show/3"><img src="/yandere/3.jpg"></a></td></tr>
            <tr><td><img class="service-icon" src="/icon/yandere.ico">yande.re</td></tr>
            <tr><td>800×600 [Ero]</td></tr>
            <tr><td>88% similarity</td></tr>
          </table></div>
        </div>
        <div id="show1"><a href="#">Show more</a>
          <a href="//saucenao.com/search.php?url=x">SauceNao</a>
          <a href="/ascii2d?url=x">ascii2d.net</a>
          <a href="//www.google.com/searchbyimage?image_url=x">Google Images</a>
          <a href="https://tineye.com/search?url=x">TinEye</a>
        </div>
        <div id="more1"><div class="pages"><div><table>
            <tr><td class="image"><a href="//e-shuushuu.net/image/4"><img src="/e-shuushuu/4.jpg"></a></td></tr>
            <tr><td>e-shuushuu</td></tr>
            <tr><td>500×500</td></tr>
            <tr><td>60% similarity</td></tr>
        </table></div></div></div>
        <a href="//3d.iqdb.org/">3D</a>
    </body></html>"##;

    const NO_MATCHES: &str = r#"<html><body><div id="pages">
        <div><table><tr><th>Your image</th></tr><tr><td><img src="/thu/q.jpg"></td></tr></table></div>
        <div><table>
            <tr><th>No relevant matches</th></tr>
            <tr><td><a href="//saucenao.com/search.php?url=q">SauceNao</a></td></tr>
            <tr><td>-</td></tr><tr><td>-</td></tr><tr><td>-</td></tr>
        </table></div>
    </div></body></html>"#;

    fn engine(responses: Vec<HttpResponse>) -> (Arc<MockClient>, Iqdb) {
        let client = Arc::new(MockClient::with_responses(responses));
        (client.clone(), Iqdb::new(client))
    }

    #[test]
    fn test_parse_results() {
        let resp = IqdbResponse::parse(RESULTS).unwrap();
        assert_eq!(resp.url(), "https://iqdb.org/?url=https://iqdb.org/thu/thu_114514.jpg");
        assert_eq!(resp.raw().len(), 2);

        let best = &resp.raw()[0];
        assert_eq!(best.content, "Best match");
        assert_eq!(best.url, "https://danbooru.donmai.us/posts/1");
        assert_eq!(best.thumbnail, "https://iqdb.org/danbooru/1.jpg");
        assert_eq!(best.source, "Danbooru");
        assert_eq!(
            best.other_source,
            vec![OtherSource {
                source: "Gelbooru".into(),
                url: "https://gelbooru.com/index.php?id=2".into(),
            }]
        );
        assert_eq!(best.size, "1000×1414 [Safe]");
        assert_eq!(best.similarity, 95.0);

        assert_eq!(resp.raw()[1].source, "yande.re");
        assert!(resp.raw()[1].other_source.is_empty());
    }

    #[test]
    fn test_parse_more_and_other_urls() {
        let resp = IqdbResponse::parse(RESULTS).unwrap();
        assert_eq!(resp.more.len(), 1);
        assert_eq!(resp.more[0].content, "");
        assert_eq!(resp.more[0].similarity, 60.0);

        assert_eq!(resp.saucenao_url, "https://saucenao.com/search.php?url=x");
        assert_eq!(resp.ascii2d_url, "/ascii2d?url=x");
        assert_eq!(resp.google_url, "https://www.google.com/searchbyimage?image_url=x");
        assert_eq!(resp.tineye_url, "https://tineye.com/search?url=x");
    }

    #[test]
    fn test_parse_no_relevant_matches() {
        let resp = IqdbResponse::parse(NO_MATCHES).unwrap();
        assert!(resp.raw().is_empty());
        assert_eq!(resp.url(), "https://3d.iqdb.org/?url=https://iqdb.org/thu/q.jpg");
        assert_eq!(resp.saucenao_url, "https://saucenao.com/search.php?url=q");
    }

    #[test]
    fn test_parse_without_tables_is_error() {
        let err = IqdbResponse::parse("<html><body>busy</body></html>").unwrap_err();
        assert_eq!(err.engine(), Some("IQDB"));
    }

    #[tokio::test]
    async fn test_search_by_url_posts_form() {
        let (client, engine) = engine(vec![HttpResponse::new(200, RESULTS, "https://iqdb.org/")]);
        engine
            .search_with_options(&ImageSource::url("https://img.example/a.jpg"), &IqdbOptions { force_gray: true })
            .await
            .unwrap();

        let request = &client.requests()[0];
        assert_eq!(request.url, "https://iqdb.org/");
        assert_eq!(
            request.body,
            Body::Form(vec![
                ("url".into(), "https://img.example/a.jpg".into()),
                ("forcegray".into(), "on".into()),
            ])
        );
    }

    #[tokio::test]
    async fn test_search_3d_by_file() {
        let client = Arc::new(MockClient::with_responses(vec![HttpResponse::new(200, RESULTS, "https://3d.iqdb.org/")]));
        let engine = Iqdb::new_3d(client.clone());
        engine.search(&ImageSource::file(b"img".to_vec())).await.unwrap();

        let request = &client.requests()[0];
        assert_eq!(request.url, "https://3d.iqdb.org/");
        let Body::Multipart(parts) = &request.body else {
            panic!("expected multipart body");
        };
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].name, "file");
    }
}
