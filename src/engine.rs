//! Search engine trait and configuration.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::input::{FileSource, ImageSource};
use crate::model::{Hit, SearchResponse};
use crate::Result;

/// Configuration for a search engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Display name of the engine.
    pub name: String,
    /// Short identifier (e.g., "snao" for SauceNAO).
    pub shortcut: String,
    /// Site root, overridable for mirrors.
    pub base_url: String,
    /// Per-engine timeout in seconds, applied by `MultiSearch`.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Whether the engine is enabled.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_timeout() -> u64 {
    30
}

fn default_enabled() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            shortcut: String::new(),
            base_url: String::new(),
            timeout: default_timeout(),
            enabled: default_enabled(),
        }
    }
}

impl EngineConfig {
    /// Creates a configuration with default timeout, enabled.
    pub fn new(name: impl Into<String>, shortcut: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shortcut: shortcut.into(),
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Returns the base URL without a trailing slash.
    pub fn base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

/// Trait for implementing reverse image search engines.
///
/// Each engine owns its request protocol and response parser and returns its
/// own response type.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Parsed response produced by this engine.
    type Response: SearchResponse;

    /// Returns the engine configuration.
    fn config(&self) -> &EngineConfig;

    /// Searches for `source` with the engine's default options.
    async fn search(&self, source: &ImageSource) -> Result<Self::Response>;

    /// Validates a loose url/file pair, then searches.
    ///
    /// Fails with `InvalidArgument` before any request when neither or both
    /// inputs are present.
    async fn search_with(&self, url: Option<&str>, file: Option<FileSource>) -> Result<Self::Response> {
        let source = ImageSource::from_parts(url, file)?;
        self.search(&source).await
    }

    /// Returns the engine name.
    fn name(&self) -> &str {
        &self.config().name
    }

    /// Returns the engine shortcut.
    fn shortcut(&self) -> &str {
        &self.config().shortcut
    }

    /// Returns the configured base URL.
    fn base_url(&self) -> &str {
        self.config().base()
    }

    /// Returns whether the engine is enabled.
    fn is_enabled(&self) -> bool {
        self.config().enabled
    }
}

/// Object-safe view of an [`Engine`], used to fan out over heterogeneous engines.
#[async_trait]
pub trait DynEngine: Send + Sync {
    /// Returns the engine configuration.
    fn info(&self) -> &EngineConfig;

    /// Searches and returns normalized hits.
    async fn search_hits(&self, source: &ImageSource) -> Result<Vec<Hit>>;
}

#[async_trait]
impl<E: Engine> DynEngine for E {
    fn info(&self) -> &EngineConfig {
        self.config()
    }

    async fn search_hits(&self, source: &ImageSource) -> Result<Vec<Hit>> {
        let response = self.search(source).await?;
        Ok(response.hits(self.name()))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::http::mock::MockClient;
    use crate::http::{HttpClient, HttpRequest, HttpResponse};
    use crate::model::{Origin, SearchItem};
    use crate::SearchError;

    #[derive(Debug, Clone)]
    pub(crate) struct FakeItem(pub String);

    impl SearchItem for FakeItem {
        fn url(&self) -> &str {
            &self.0
        }
        fn title(&self) -> &str {
            ""
        }
        fn thumbnail(&self) -> &str {
            ""
        }
    }

    pub(crate) struct FakeResponse {
        origin: Origin,
        url: String,
        raw: Vec<FakeItem>,
    }

    impl SearchResponse for FakeResponse {
        type Item = FakeItem;
        fn origin(&self) -> &Origin {
            &self.origin
        }
        fn url(&self) -> &str {
            &self.url
        }
        fn raw(&self) -> &[FakeItem] {
            &self.raw
        }
    }

    /// Returns one item per line of the response body.
    pub(crate) struct FakeEngine {
        config: EngineConfig,
        client: Arc<dyn HttpClient>,
    }

    impl FakeEngine {
        pub(crate) fn new(name: &str, client: Arc<dyn HttpClient>) -> Self {
            Self {
                config: EngineConfig::new(name, name.to_lowercase(), "https://fake.example/"),
                client,
            }
        }
    }

    #[async_trait]
    impl Engine for FakeEngine {
        type Response = FakeResponse;

        fn config(&self) -> &EngineConfig {
            &self.config
        }

        async fn search(&self, source: &ImageSource) -> Result<FakeResponse> {
            let url = source.as_url().unwrap_or("file").to_string();
            let resp = self
                .client
                .execute(HttpRequest::get(self.base_url()).query("url", &url))
                .await?
                .error_for_status()?;
            Ok(FakeResponse {
                raw: resp.text.lines().map(|l| FakeItem(l.to_string())).collect(),
                origin: Origin::Html(resp.text),
                url: resp.url,
            })
        }
    }

    #[test]
    fn test_engine_config_default() {
        let config = EngineConfig::default();
        assert_eq!(config.name, "");
        assert_eq!(config.timeout, 30);
        assert!(config.enabled);
    }

    #[test]
    fn test_engine_config_base_trims_slash() {
        let config = EngineConfig::new("Ascii2D", "a2d", "https://ascii2d.net/");
        assert_eq!(config.base(), "https://ascii2d.net");
    }

    #[test]
    fn test_engine_config_deserialization() {
        let json = r#"{"name":"IQDB","shortcut":"iqdb","base_url":"https://iqdb.org"}"#;
        let config: EngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.name, "IQDB");
        assert_eq!(config.timeout, 30); // default
        assert!(config.enabled); // default
    }

    #[test]
    fn test_engine_config_serialization() {
        let config = EngineConfig::new("Test", "t", "https://x");
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"name\":\"Test\""));
        assert!(json.contains("\"base_url\":\"https://x\""));
    }

    #[tokio::test]
    async fn test_search_with_rejects_missing_input_without_requests() {
        let client = Arc::new(MockClient::new());
        let engine = FakeEngine::new("Fake", client.clone());

        let err = engine.search_with(None, None).await.err().unwrap();
        assert!(matches!(err, SearchError::InvalidArgument(_)));
        let err = engine
            .search_with(Some("https://x/a.jpg"), Some(vec![1u8].into()))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SearchError::InvalidArgument(_)));
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn test_dyn_engine_returns_hits() {
        let client = Arc::new(MockClient::with_responses(vec![HttpResponse::new(
            200,
            "https://a\nhttps://b",
            "https://fake.example",
        )]));
        let engine: Arc<dyn DynEngine> = Arc::new(FakeEngine::new("Fake", client));
        let hits = engine.search_hits(&ImageSource::url("https://x")).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].engines.contains("Fake"));
        assert_eq!(engine.info().shortcut, "fake");
    }
}
