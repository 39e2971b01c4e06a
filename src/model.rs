//! Common result model shared by all engines.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The raw payload a response was parsed from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Origin {
    /// Decoded JSON document.
    Json(Value),
    /// Markup text. Re-parse with `scraper::Html` when needed.
    Html(String),
}

impl Origin {
    /// Returns the JSON payload, if any.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Html(_) => None,
        }
    }

    /// Returns the markup payload, if any.
    pub fn as_html(&self) -> Option<&str> {
        match self {
            Self::Html(html) => Some(html),
            Self::Json(_) => None,
        }
    }
}

impl Default for Origin {
    fn default() -> Self {
        Self::Json(Value::Null)
    }
}

/// One match returned by an engine.
pub trait SearchItem {
    /// Link to the matching page or image.
    fn url(&self) -> &str;

    /// Title, or an empty string when the engine has none.
    fn title(&self) -> &str;

    /// Thumbnail URL or inline `data:` URI.
    fn thumbnail(&self) -> &str;

    /// Similarity on a 0–100 scale.
    fn similarity(&self) -> f64 {
        0.0
    }
}

/// A parsed engine response.
pub trait SearchResponse: Send + Sync + 'static {
    /// Item type produced by the engine.
    type Item: SearchItem;

    /// Raw payload the response was built from.
    fn origin(&self) -> &Origin;

    /// Canonical results URL.
    fn url(&self) -> &str;

    /// Items in site order.
    fn raw(&self) -> &[Self::Item];

    /// Normalizes the items into [`Hit`]s attributed to `engine`.
    fn hits(&self, engine: &str) -> Vec<Hit> {
        self.raw()
            .iter()
            .enumerate()
            .filter(|(_, item)| !item.url().is_empty())
            .map(|(position, item)| Hit::from_item(item, engine, (position + 1) as u32))
            .collect()
    }
}

/// Engine-independent view of one match, used for fan-out and aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    /// Result URL.
    pub url: String,
    /// Result title.
    pub title: String,
    /// Thumbnail URL.
    pub thumbnail: Option<String>,
    /// Best similarity reported for this URL.
    pub similarity: f64,
    /// Engines that returned this result.
    pub engines: BTreeSet<String>,
    /// Positions in each engine's results.
    pub positions: Vec<u32>,
    /// Calculated score for ranking.
    pub score: f64,
}

impl Hit {
    /// Creates a hit.
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            thumbnail: None,
            similarity: 0.0,
            engines: BTreeSet::new(),
            positions: Vec::new(),
            score: 0.0,
        }
    }

    /// Builds a hit from any engine item.
    pub fn from_item<I: SearchItem + ?Sized>(item: &I, engine: &str, position: u32) -> Self {
        let thumbnail = item.thumbnail();
        Self::new(item.url(), item.title())
            .with_similarity(item.similarity())
            .with_thumbnail_opt((!thumbnail.is_empty()).then(|| thumbnail.to_string()))
            .with_engine(engine, position)
    }

    /// Sets the similarity.
    pub fn with_similarity(mut self, similarity: f64) -> Self {
        self.similarity = similarity;
        self
    }

    /// Sets the thumbnail URL.
    pub fn with_thumbnail(mut self, thumbnail: impl Into<String>) -> Self {
        self.thumbnail = Some(thumbnail.into());
        self
    }

    fn with_thumbnail_opt(mut self, thumbnail: Option<String>) -> Self {
        self.thumbnail = thumbnail;
        self
    }

    /// Adds an engine that returned this hit.
    pub fn with_engine(mut self, engine: impl Into<String>, position: u32) -> Self {
        self.engines.insert(engine.into());
        self.positions.push(position);
        self
    }

    /// Returns a normalized URL for deduplication (without scheme, `www.` and trailing slash).
    pub fn normalized_url(&self) -> String {
        let url = self
            .url
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_start_matches("www.")
            .trim_end_matches('/');
        url.to_lowercase()
    }
}

/// Container for aggregated hits.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Hits {
    hits: Vec<Hit>,
    /// Engines that failed, with their error message.
    errors: Vec<(String, String)>,
    /// Number of hits.
    pub count: usize,
    /// Search duration in milliseconds.
    pub duration_ms: u64,
}

impl Hits {
    /// Creates an empty container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a hit.
    pub fn add_hit(&mut self, hit: Hit) {
        self.hits.push(hit);
        self.count = self.hits.len();
    }

    /// Records an engine failure.
    pub fn add_error(&mut self, engine: impl Into<String>, message: impl Into<String>) {
        self.errors.push((engine.into(), message.into()));
    }

    /// Returns the hits.
    pub fn items(&self) -> &[Hit] {
        &self.hits
    }

    /// Returns the recorded engine failures.
    pub fn errors(&self) -> &[(String, String)] {
        &self.errors
    }

    /// Sets the search duration.
    pub fn set_duration(&mut self, duration_ms: u64) {
        self.duration_ms = duration_ms;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Item {
        url: String,
        thumb: String,
        sim: f64,
    }

    impl SearchItem for Item {
        fn url(&self) -> &str {
            &self.url
        }
        fn title(&self) -> &str {
            "t"
        }
        fn thumbnail(&self) -> &str {
            &self.thumb
        }
        fn similarity(&self) -> f64 {
            self.sim
        }
    }

    struct Resp {
        origin: Origin,
        raw: Vec<Item>,
    }

    impl SearchResponse for Resp {
        type Item = Item;
        fn origin(&self) -> &Origin {
            &self.origin
        }
        fn url(&self) -> &str {
            ""
        }
        fn raw(&self) -> &[Item] {
            &self.raw
        }
    }

    #[test]
    fn test_origin_accessors() {
        let json = Origin::Json(serde_json::json!({"a": 1}));
        assert!(json.as_json().is_some());
        assert!(json.as_html().is_none());
        let html = Origin::Html("<p></p>".into());
        assert_eq!(html.as_html(), Some("<p></p>"));
    }

    #[test]
    fn test_hit_from_item() {
        let item = Item {
            url: "https://a".into(),
            thumb: String::new(),
            sim: 88.5,
        };
        let hit = Hit::from_item(&item, "IQDB", 2);
        assert_eq!(hit.url, "https://a");
        assert_eq!(hit.similarity, 88.5);
        assert!(hit.thumbnail.is_none());
        assert!(hit.engines.contains("IQDB"));
        assert_eq!(hit.positions, vec![2]);
    }

    #[test]
    fn test_response_hits_skip_items_without_url() {
        let resp = Resp {
            origin: Origin::default(),
            raw: vec![
                Item { url: "https://a".into(), thumb: "t.jpg".into(), sim: 0.0 },
                Item { url: String::new(), thumb: String::new(), sim: 0.0 },
                Item { url: "https://c".into(), thumb: String::new(), sim: 0.0 },
            ],
        };
        let hits = resp.hits("Yandex");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].thumbnail.as_deref(), Some("t.jpg"));
        assert_eq!(hits[1].positions, vec![3]);
    }

    #[test]
    fn test_normalized_url() {
        assert_eq!(Hit::new("https://www.Example.COM/Path/", "").normalized_url(), "example.com/path");
        assert_eq!(Hit::new("http://example.com/", "").normalized_url(), "example.com");
        assert_eq!(Hit::new("example.com/path", "").normalized_url(), "example.com/path");
    }

    #[test]
    fn test_hits_container() {
        let mut hits = Hits::new();
        hits.add_hit(Hit::new("u1", "t1"));
        hits.add_hit(Hit::new("u2", "t2"));
        hits.add_error("Bing", "timeout");
        hits.set_duration(120);
        assert_eq!(hits.count, 2);
        assert_eq!(hits.items().len(), 2);
        assert_eq!(hits.errors()[0].0, "Bing");
        assert_eq!(hits.duration_ms, 120);
    }

    #[test]
    fn test_hit_serialization() {
        let hit = Hit::new("https://example.com", "Title").with_similarity(90.0);
        let json = serde_json::to_string(&hit).unwrap();
        assert!(json.contains("\"url\":\"https://example.com\""));
        assert!(json.contains("\"similarity\":90.0"));
    }
}
