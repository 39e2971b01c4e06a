//! Google Lens.
//!
//! The upload lands on a Lens overview page. For the narrower search types
//! the page links to a filtered Google results view (`udm=NN`), which is
//! fetched and parsed instead. Exact-match pages use a different layout and
//! item markup than the other views.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use tracing::debug;

use crate::extract::{attr, child_text, selector, text};
use crate::http::{Body, FormPart, HttpClient, HttpRequest};
use crate::model::{Origin, SearchItem, SearchResponse};
use crate::{Engine, EngineConfig, ImageSource, Result, SearchError};

const NAME: &str = "GoogleLens";

/// Which Lens result view to return.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum LensSearchType {
    #[default]
    All,
    Products,
    VisualMatches,
    ExactMatches,
}

impl LensSearchType {
    /// The `udm` value of the filtered results view, if any.
    fn udm(self) -> Option<&'static str> {
        match self {
            Self::All => None,
            Self::Products => Some("37"),
            Self::VisualMatches => Some("44"),
            Self::ExactMatches => Some("48"),
        }
    }

    fn layout(self) -> LensLayout {
        if self == Self::ExactMatches {
            LensLayout::ExactMatches
        } else {
            LensLayout::Visual
        }
    }
}

impl FromStr for LensSearchType {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "all" => Ok(Self::All),
            "products" => Ok(Self::Products),
            "visual_matches" => Ok(Self::VisualMatches),
            "exact_matches" => Ok(Self::ExactMatches),
            other => Err(SearchError::InvalidArgument(format!(
                "invalid search type '{other}', expected one of: all, products, visual_matches, exact_matches"
            ))),
        }
    }
}

/// Markup family of a results page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LensLayout {
    /// Overview, products and visual matches.
    Visual,
    ExactMatches,
}

/// Engine options fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoogleLensOptions {
    pub search_type: LensSearchType,
    /// Text refinement. Not allowed with exact matches.
    pub q: Option<String>,
    pub hl: String,
    pub country: String,
    /// Host of the filtered results views.
    pub search_url: String,
}

impl Default for GoogleLensOptions {
    fn default() -> Self {
        Self {
            search_type: LensSearchType::All,
            q: None,
            hl: "en".to_string(),
            country: "US".to_string(),
            search_url: "https://www.google.com".to_string(),
        }
    }
}

impl GoogleLensOptions {
    pub fn validate(&self) -> Result<()> {
        if self.search_type == LensSearchType::ExactMatches && self.q.as_deref().is_some_and(|q| !q.is_empty()) {
            return Err(SearchError::InvalidArgument(
                "query 'q' is not applicable to exact_matches searches".to_string(),
            ));
        }
        Ok(())
    }

    fn hl_param(&self) -> String {
        format!("{}-{}", self.hl, self.country.to_uppercase())
    }
}

/// A visual or exact match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GoogleLensItem {
    pub url: String,
    pub title: String,
    /// Publisher name, or the host of `url` when the page shows none.
    pub site_name: String,
    pub thumbnail: String,
    /// Image dimensions, only shown on exact-match pages.
    pub size: Option<String>,
}

impl SearchItem for GoogleLensItem {
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

/// A related search suggestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LensRelatedSearch {
    pub url: String,
    pub title: String,
    pub thumbnail: String,
}

/// Thumbnail sources found in the page scripts, keyed by image id.
#[derive(Debug, Default)]
struct ImageMaps {
    urls: HashMap<String, String>,
    base64: HashMap<String, String>,
}

impl ImageMaps {
    fn extract(document: &Html) -> Result<Self> {
        let ldi = Regex::new(r"google\.ldi\s*=\s*(\{[^}]+\})").map_err(|e| SearchError::Other(e.to_string()))?;
        let ldi_entry = Regex::new(r#"['"](dimg_[^'"]+)['"]\s*:\s*['"]([^'"]*)['"]"#)
            .map_err(|e| SearchError::Other(e.to_string()))?;
        let ids = Regex::new(r"var ii=\[([^\]]*)\];").map_err(|e| SearchError::Other(e.to_string()))?;
        let data = Regex::new(r"var s='(data:image/[^;]+;base64,[^']+)';").map_err(|e| SearchError::Other(e.to_string()))?;

        let mut maps = Self::default();
        for script in document.select(&selector("script[nonce]", NAME)?) {
            let source = script.text().collect::<String>();
            if let Some(object) = ldi.captures(&source).and_then(|c| c.get(1)) {
                for entry in ldi_entry.captures_iter(object.as_str()) {
                    let url = entry[2].replace(r"\u003d", "=").replace(r"\u0026", "&");
                    maps.urls.insert(entry[1].to_string(), url);
                }
            }
            if !source.contains("_setImagesSrc") {
                continue;
            }
            if let (Some(id_list), Some(image)) = (ids.captures(&source), data.captures(&source)) {
                for id in id_list[1].split(',').map(|id| id.trim().trim_matches('\'')).filter(|id| !id.is_empty()) {
                    maps.base64.insert(id.to_string(), image[1].to_string());
                }
            }
        }
        Ok(maps)
    }

    /// Mapped URL, then mapped base64 data, then `data-src`, then `src`.
    fn image_url(&self, image: Option<ElementRef<'_>>) -> String {
        let Some(image) = image else {
            return String::new();
        };
        let element = image.value();
        if let Some(id) = element.attr("data-iid").or_else(|| element.attr("id")) {
            if let Some(url) = self.urls.get(id).or_else(|| self.base64.get(id)) {
                return url.clone();
            }
        }
        element
            .attr("data-src")
            .or_else(|| element.attr("src"))
            .unwrap_or_default()
            .to_string()
    }
}

fn site_name(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.replace("www.", "")))
        .unwrap_or_default()
}

/// First match of `sel` among `element` itself and its descendants.
fn find<'a>(element: ElementRef<'a>, sel: &Selector) -> Option<ElementRef<'a>> {
    if sel.matches(&element) {
        Some(element)
    } else {
        element.select(sel).next()
    }
}

/// Parsed Google Lens page.
#[derive(Debug, Clone, PartialEq)]
pub struct GoogleLensResponse {
    origin: Origin,
    url: String,
    raw: Vec<GoogleLensItem>,
    /// Related searches. Always empty for exact-match pages.
    pub related_searches: Vec<LensRelatedSearch>,
    pub layout: LensLayout,
}

impl GoogleLensResponse {
    pub fn parse(html: &str, url: impl Into<String>, layout: LensLayout) -> Result<Self> {
        let document = Html::parse_document(html);
        let maps = ImageMaps::extract(&document)?;
        let (raw, related_searches) = match layout {
            LensLayout::Visual => (
                Self::visual_items(&document, &maps)?,
                Self::related_searches(&document, &maps)?,
            ),
            LensLayout::ExactMatches => (Self::exact_items(&document, &maps)?, Vec::new()),
        };
        if raw.is_empty() {
            let expected = match layout {
                LensLayout::Visual => ".vEWxFf.RCxtQc.my5z3d",
                LensLayout::ExactMatches => ".YxbOwd",
            };
            return Err(SearchError::parsing(NAME, "no result items found").with_details(expected));
        }
        Ok(Self {
            origin: Origin::Html(html.to_string()),
            url: url.into(),
            raw,
            related_searches,
            layout,
        })
    }

    fn visual_items(document: &Html, maps: &ImageMaps) -> Result<Vec<GoogleLensItem>> {
        let item = selector(".vEWxFf.RCxtQc.my5z3d", NAME)?;
        let link = selector("a.LBcIee", NAME)?;
        let title = selector("a.LBcIee .Yt787", NAME)?;
        let site = selector("a.LBcIee .R8BTeb.q8U8x.LJEGod.du278d.i0Rdmd", NAME)?;
        let image = selector(".gdOPf.q07dbf.uhHOwf.ez24Df img", NAME)?;

        Ok(document
            .select(&item)
            .map(|el| {
                let url = find(el, &link).map(|a| attr(a, "href")).unwrap_or_default();
                let site_name = find(el, &site).map(text).unwrap_or_else(|| site_name(&url));
                GoogleLensItem {
                    title: child_text(el, &title),
                    site_name,
                    thumbnail: maps.image_url(find(el, &image)),
                    size: None,
                    url,
                }
            })
            .collect())
    }

    fn related_searches(document: &Html, maps: &ImageMaps) -> Result<Vec<LensRelatedSearch>> {
        let item = selector(".Kg0xqe", NAME)?;
        let link = selector("a.Kg0xqe", NAME)?;
        let title = selector(".I9S4yc", NAME)?;
        let image = selector("img", NAME)?;

        Ok(document
            .select(&item)
            .map(|el| LensRelatedSearch {
                url: find(el, &link)
                    .and_then(|a| a.value().attr("href"))
                    .filter(|href| !href.is_empty())
                    .map(|href| format!("https://www.google.com{href}"))
                    .unwrap_or_default(),
                title: child_text(el, &title),
                thumbnail: maps.image_url(find(el, &image)),
            })
            .collect())
    }

    fn exact_items(document: &Html, maps: &ImageMaps) -> Result<Vec<GoogleLensItem>> {
        let item = selector(".YxbOwd", NAME)?;
        let link = selector("a.ngTNl", NAME)?;
        let title = selector(".ZhosBf", NAME)?;
        let image = selector(".GmoL0c .zVq10e img", NAME)?;
        let site = selector(".XC18Gb .LbKnXb .xuPcX", NAME)?;
        let info = selector(".oYQBg.Zn52Me > span", NAME)?;

        Ok(document
            .select(&item)
            .map(|el| {
                let url = find(el, &link).map(|a| attr(a, "href")).unwrap_or_default();
                let site_name = find(el, &site).map(text).unwrap_or_else(|| site_name(&url));
                GoogleLensItem {
                    title: child_text(el, &title),
                    site_name,
                    thumbnail: maps.image_url(find(el, &image)),
                    size: el.select(&info).map(text).find(|t| t.contains('x')),
                    url,
                }
            })
            .collect())
    }
}

impl SearchResponse for GoogleLensResponse {
    type Item = GoogleLensItem;

    fn origin(&self) -> &Origin {
        &self.origin
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn raw(&self) -> &[GoogleLensItem] {
        &self.raw
    }
}

/// Google Lens engine.
pub struct GoogleLens {
    config: EngineConfig,
    options: GoogleLensOptions,
    client: Arc<dyn HttpClient>,
}

impl GoogleLens {
    /// Creates an engine on `https://lens.google.com` returning all results.
    pub fn new(client: Arc<dyn HttpClient>) -> Self {
        Self {
            config: EngineConfig::new(NAME, "gl", "https://lens.google.com"),
            options: GoogleLensOptions::default(),
            client,
        }
    }

    /// Creates with custom configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the options, rejecting a query combined with exact matches.
    pub fn with_options(mut self, options: GoogleLensOptions) -> Result<Self> {
        options.validate()?;
        self.options = options;
        Ok(self)
    }

    pub fn options(&self) -> &GoogleLensOptions {
        &self.options
    }

    /// Searches with a text refinement overriding the configured one.
    /// The query is dropped for exact-match searches.
    pub async fn search_with_query(&self, source: &ImageSource, q: Option<&str>) -> Result<GoogleLensResponse> {
        let search_type = self.options.search_type;
        let q = q
            .or(self.options.q.as_deref())
            .filter(|q| !q.is_empty() && search_type != LensSearchType::ExactMatches);

        let request = match source {
            ImageSource::Url(url) => HttpRequest::get(format!("{}/uploadbyurl", self.base_url())).query("url", url),
            ImageSource::File(file) => {
                let bytes = file.read().await?;
                let filename = match file {
                    crate::FileSource::Bytes(_) => "image.jpg".to_string(),
                    crate::FileSource::Path(_) => file.filename(),
                };
                HttpRequest::post(format!("{}/v3/upload", self.base_url())).body(Body::Multipart(vec![
                    FormPart::named_file("encoded_image", bytes.to_vec(), filename, "image/jpeg"),
                ]))
            }
        };
        let mut request = request.query("hl", self.options.hl_param());
        if let Some(q) = q {
            request = request.query("q", q);
        }

        let mut resp = self.client.execute(request).await?.error_for_status()?;

        if let Some(udm) = search_type.udm() {
            let link = {
                let document = Html::parse_document(&resp.text);
                let filtered = selector(&format!(r#"a[href*="udm={udm}"]"#), NAME)?;
                document
                    .select(&filtered)
                    .next()
                    .and_then(|a| a.value().attr("href"))
                    .filter(|href| !href.is_empty())
                    .map(str::to_string)
            };
            let link = link.ok_or_else(|| {
                SearchError::parsing(NAME, format!("no link to the udm={udm} view on the overview page"))
                    .with_details(resp.url.clone())
            })?;
            debug!(udm, "GoogleLens following filtered view");
            let url = format!("{}{}", self.options.search_url.trim_end_matches('/'), link);
            resp = self.client.execute(HttpRequest::get(url)).await?.error_for_status()?;
        }

        let response = GoogleLensResponse::parse(&resp.text, resp.url, search_type.layout())?;
        debug!(
            results = response.raw.len(),
            related = response.related_searches.len(),
            "GoogleLens parsed"
        );
        Ok(response)
    }
}

#[async_trait]
impl Engine for GoogleLens {
    type Response = GoogleLensResponse;

    fn config(&self) -> &EngineConfig {
        &self.config
    }

    async fn search(&self, source: &ImageSource) -> Result<GoogleLensResponse> {
        self.search_with_query(source, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::mock::MockClient;
    use crate::http::HttpResponse;

    const OVERVIEW: &str = r#"<html><head>
        <script nonce="n1">google.ldi={'dimg_a1':'https://encrypted-tbn0.gstatic.com/images?q=tbn:1&s=1'};</script>
        <script nonce="n2">(function(){var s='data:image/jpeg;base64,AAAA';var ii=['dimg_b2','dimg_c3'];_setImagesSrc(ii,s);})();</script>
        </head><body>
        <a href="/search?udm=44&amp;vsrid=x">Visual matches</a>
        <a href="/search?udm=48&amp;vsrid=x">Exact matches</a>
        <div class="vEWxFf RCxtQc my5z3d">
          <a class="LBcIee" href="https://www.shop.example/item">
            <div class="gdOPf q07dbf uhHOwf ez24Df"><img id="dimg_a1" src="data:image/gif;base64,placeholder"></div>
            <div class="Yt787">Blue vase</div>
            <div class="R8BTeb q8U8x LJEGod du278d i0Rdmd">Shop Example</div>
          </a>
        </div>
        <div class="vEWxFf RCxtQc my5z3d">
          <a class="LBcIee" href="https://www.blog.example/post">
            <div class="gdOPf q07dbf uhHOwf ez24Df"><img data-iid="dimg_b2"></div>
            <div class="Yt787">A blog</div>
          </a>
        </div>
        <div class="vEWxFf RCxtQc my5z3d">
          <a class="LBcIee" href="https://third.example/">
            <div class="gdOPf q07dbf uhHOwf ez24Df"><img data-src="https://lazy.example/t.jpg"></div>
          </a>
        </div>
        <a class="Kg0xqe" href="/search?q=vase"><img id="dimg_c3"><div class="I9S4yc">vase</div></a>
    </body></html>"#;

    const EXACT: &str = r#"<html><body>
        <div class="YxbOwd">
          <a class="ngTNl" href="https://www.news.example/story">
            <div class="ZhosBf">Story title</div>
          </a>
          <div class="GmoL0c"><div class="zVq10e"><img src="https://t.example/1.jpg"></div></div>
          <div class="oYQBg Zn52Me"><span>3 days ago</span><span>1200 x 800</span></div>
        </div>
        <div class="YxbOwd">
          <a class="ngTNl" href="https://other.example/p"><div class="ZhosBf">Other</div></a>
          <div class="XC18Gb"><div class="LbKnXb"><div class="xuPcX">Other Site</div></div></div>
        </div>
    </body></html>"#;

    fn engine(responses: Vec<HttpResponse>) -> (Arc<MockClient>, GoogleLens) {
        let client = Arc::new(MockClient::with_responses(responses));
        (client.clone(), GoogleLens::new(client))
    }

    fn options(search_type: LensSearchType) -> GoogleLensOptions {
        GoogleLensOptions {
            search_type,
            ..Default::default()
        }
    }

    #[test]
    fn test_exact_matches_rejects_query() {
        let (_, lens) = engine(vec![]);
        let options = GoogleLensOptions {
            search_type: LensSearchType::ExactMatches,
            q: Some("vase".into()),
            ..Default::default()
        };
        assert!(matches!(lens.with_options(options), Err(SearchError::InvalidArgument(_))));
        assert!("images".parse::<LensSearchType>().is_err());
    }

    #[test]
    fn test_parse_visual_layout() {
        let resp = GoogleLensResponse::parse(OVERVIEW, "https://lens.google.com/x", LensLayout::Visual).unwrap();
        assert_eq!(resp.raw().len(), 3);

        assert_eq!(
            resp.raw()[0],
            GoogleLensItem {
                url: "https://www.shop.example/item".into(),
                title: "Blue vase".into(),
                site_name: "Shop Example".into(),
                thumbnail: "https://encrypted-tbn0.gstatic.com/images?q=tbn:1&s=1".into(),
                size: None,
            }
        );
        assert_eq!(resp.raw()[1].thumbnail, "data:image/jpeg;base64,AAAA");
        assert_eq!(resp.raw()[1].site_name, "blog.example");
        assert_eq!(resp.raw()[2].thumbnail, "https://lazy.example/t.jpg");
        assert_eq!(resp.raw()[2].title, "");

        assert_eq!(
            resp.related_searches,
            vec![LensRelatedSearch {
                url: "https://www.google.com/search?q=vase".into(),
                title: "vase".into(),
                thumbnail: "data:image/jpeg;base64,AAAA".into(),
            }]
        );
    }

    #[test]
    fn test_parse_exact_layout() {
        let resp = GoogleLensResponse::parse(EXACT, "u", LensLayout::ExactMatches).unwrap();
        assert_eq!(resp.raw().len(), 2);
        assert!(resp.related_searches.is_empty());

        let first = &resp.raw()[0];
        assert_eq!(first.title, "Story title");
        assert_eq!(first.site_name, "news.example");
        assert_eq!(first.size.as_deref(), Some("1200 x 800"));
        assert_eq!(first.thumbnail, "https://t.example/1.jpg");
        assert_eq!(resp.raw()[1].site_name, "Other Site");
        assert_eq!(resp.raw()[1].size, None);
    }

    #[tokio::test]
    async fn test_all_search_parses_overview() {
        let (client, engine) = engine(vec![HttpResponse::new(200, OVERVIEW, "https://lens.google.com/search?p=1")]);
        let resp = engine
            .search_with_query(&ImageSource::url("https://img.example/a.jpg"), Some("vase"))
            .await
            .unwrap();
        assert_eq!(resp.layout, LensLayout::Visual);
        assert_eq!(client.calls(), 1);

        let request = &client.requests()[0];
        assert_eq!(request.url, "https://lens.google.com/uploadbyurl");
        assert_eq!(request.query_value("hl"), Some("en-US"));
        assert_eq!(request.query_value("q"), Some("vase"));
    }

    #[tokio::test]
    async fn test_exact_matches_follows_filtered_view() {
        let (client, engine) = engine(vec![
            HttpResponse::new(200, OVERVIEW, "https://lens.google.com/search?p=1"),
            HttpResponse::new(200, EXACT, "https://www.google.com/search?udm=48"),
        ]);
        let engine = engine.with_options(options(LensSearchType::ExactMatches)).unwrap();
        let resp = engine
            .search_with_query(&ImageSource::file(b"img".to_vec()), Some("ignored"))
            .await
            .unwrap();

        assert_eq!(resp.layout, LensLayout::ExactMatches);
        assert_eq!(resp.raw().len(), 2);
        let requests = client.requests();
        assert_eq!(requests[0].url, "https://lens.google.com/v3/upload");
        assert_eq!(requests[0].query_value("q"), None);
        assert_eq!(requests[1].url, "https://www.google.com/search?udm=48&vsrid=x");
    }

    #[tokio::test]
    async fn test_missing_filtered_link_is_error() {
        let (client, engine) = engine(vec![HttpResponse::new(200, EXACT, "https://lens.google.com/search?p=1")]);
        let engine = engine.with_options(options(LensSearchType::Products)).unwrap();
        let err = engine.search(&ImageSource::url("https://img.example/a.jpg")).await.unwrap_err();
        assert!(matches!(err, SearchError::Parsing { .. }));
        assert!(err.to_string().contains("udm=37"));
        assert_eq!(client.calls(), 1);
    }

    #[test]
    fn test_parse_page_without_items_is_error() {
        let page = "<html><body>nothing</body></html>";
        for layout in [LensLayout::Visual, LensLayout::ExactMatches] {
            let err = GoogleLensResponse::parse(page, "u", layout).unwrap_err();
            assert_eq!(err.engine(), Some("GoogleLens"));
        }
    }
}
