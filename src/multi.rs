//! Fan-out of one image over several engines.

use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

use crate::aggregator::Aggregator;
use crate::engine::{DynEngine, Engine};
use crate::input::{FileSource, ImageSource};
use crate::model::Hits;
use crate::{Result, SearchError};

/// Runs one image through several engines concurrently and merges the hits.
pub struct MultiSearch {
    engines: Vec<Arc<dyn DynEngine>>,
    aggregator: Aggregator,
    default_timeout: Option<Duration>,
}

impl MultiSearch {
    /// Creates an empty fan-out.
    pub fn new() -> Self {
        Self {
            engines: Vec::new(),
            aggregator: Aggregator::new(),
            default_timeout: None,
        }
    }

    /// Adds an engine.
    pub fn add_engine<E: Engine + 'static>(&mut self, engine: E) {
        self.engines.push(Arc::new(engine));
    }

    /// Adds an already type-erased engine.
    pub fn add_dyn_engine(&mut self, engine: Arc<dyn DynEngine>) {
        self.engines.push(engine);
    }

    /// Sets the weight an engine's hits carry in ranking.
    pub fn set_engine_weight(&mut self, engine: impl Into<String>, weight: f64) {
        self.aggregator.set_engine_weight(engine, weight);
    }

    /// Overrides every engine's own timeout.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.default_timeout = Some(timeout);
    }

    /// Returns the number of configured engines.
    pub fn engine_count(&self) -> usize {
        self.engines.len()
    }

    /// Searches all enabled engines.
    ///
    /// Engine failures and timeouts are logged and recorded in
    /// [`Hits::errors`]; they do not fail the whole search.
    pub async fn search(&self, source: &ImageSource) -> Result<Hits> {
        let engines: Vec<_> = self
            .engines
            .iter()
            .filter(|engine| engine.info().enabled)
            .cloned()
            .collect();
        if engines.is_empty() {
            return Err(SearchError::InvalidArgument("no enabled engines".to_string()));
        }

        let start = Instant::now();
        let source = Arc::new(share_file(source).await?);
        debug!("Searching {} engines", engines.len());

        let futures: Vec<_> = engines
            .iter()
            .map(|engine| {
                let engine = Arc::clone(engine);
                let source = Arc::clone(&source);
                let timeout_duration = self
                    .default_timeout
                    .unwrap_or_else(|| Duration::from_secs(engine.info().timeout));

                async move {
                    let name = engine.info().name.clone();
                    match timeout(timeout_duration, engine.search_hits(&source)).await {
                        Ok(Ok(hits)) => {
                            debug!("Engine {} returned {} hits", name, hits.len());
                            Ok((name, hits))
                        }
                        Ok(Err(e)) => {
                            warn!("Engine {} failed: {}", name, e);
                            Err((name, e.to_string()))
                        }
                        Err(_) => {
                            warn!("Engine {} timed out", name);
                            Err((name, "timed out".to_string()))
                        }
                    }
                }
            })
            .collect();

        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        for outcome in join_all(futures).await {
            match outcome {
                Ok(hits) => succeeded.push(hits),
                Err(failure) => failed.push(failure),
            }
        }

        let mut hits = self.aggregator.aggregate(succeeded);
        for (engine, message) in failed {
            hits.add_error(engine, message);
        }
        hits.set_duration(start.elapsed().as_millis() as u64);

        Ok(hits)
    }
}

impl Default for MultiSearch {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads a path source once so every engine shares the same bytes.
async fn share_file(source: &ImageSource) -> Result<ImageSource> {
    match source {
        ImageSource::File(file @ FileSource::Path(_)) => {
            Ok(ImageSource::File(FileSource::Bytes(file.read().await?)))
        }
        other => Ok(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration as StdDuration;

    use async_trait::async_trait;

    use super::*;
    use crate::engine::tests::FakeEngine;
    use crate::engine::EngineConfig;
    use crate::http::mock::MockClient;
    use crate::http::HttpResponse;
    use crate::model::Hit;

    struct SlowEngine {
        config: EngineConfig,
    }

    #[async_trait]
    impl DynEngine for SlowEngine {
        fn info(&self) -> &EngineConfig {
            &self.config
        }

        async fn search_hits(&self, _source: &ImageSource) -> Result<Vec<Hit>> {
            tokio::time::sleep(StdDuration::from_secs(5)).await;
            Ok(vec![])
        }
    }

    fn fake(name: &str, body: &str) -> FakeEngine {
        let client = Arc::new(MockClient::with_responses(vec![HttpResponse::new(
            200,
            body,
            "https://fake.example",
        )]));
        FakeEngine::new(name, client)
    }

    #[tokio::test]
    async fn test_no_engines() {
        let search = MultiSearch::new();
        let err = search.search(&ImageSource::url("https://x")).await.unwrap_err();
        assert!(matches!(err, SearchError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_merges_engines() {
        let mut search = MultiSearch::new();
        search.add_engine(fake("One", "https://a\nhttps://b"));
        search.add_engine(fake("Two", "https://b"));
        assert_eq!(search.engine_count(), 2);

        let hits = search.search(&ImageSource::url("https://x")).await.unwrap();
        assert_eq!(hits.count, 2);
        assert_eq!(hits.items()[0].url, "https://b");
        assert!(hits.errors().is_empty());
    }

    #[tokio::test]
    async fn test_failing_engine_is_recorded() {
        let mut search = MultiSearch::new();
        search.add_engine(fake("Good", "https://a"));
        let broken = Arc::new(MockClient::with_responses(vec![HttpResponse::new(
            500,
            "",
            "https://fake.example",
        )]));
        search.add_engine(FakeEngine::new("Broken", broken));

        let hits = search.search(&ImageSource::url("https://x")).await.unwrap();
        assert_eq!(hits.count, 1);
        assert_eq!(hits.errors().len(), 1);
        assert_eq!(hits.errors()[0].0, "Broken");
    }

    #[tokio::test]
    async fn test_timeout_is_recorded() {
        let mut search = MultiSearch::new();
        search.add_dyn_engine(Arc::new(SlowEngine {
            config: EngineConfig::new("Slow", "slow", "https://slow"),
        }));
        search.set_timeout(StdDuration::from_millis(20));

        let hits = search.search(&ImageSource::url("https://x")).await.unwrap();
        assert_eq!(hits.count, 0);
        assert_eq!(hits.errors()[0].1, "timed out");
    }

    #[tokio::test]
    async fn test_disabled_engines_are_skipped() {
        let mut search = MultiSearch::new();
        let mut config = EngineConfig::new("Off", "off", "https://off");
        config.enabled = false;
        search.add_dyn_engine(Arc::new(SlowEngine { config }));
        assert!(search.search(&ImageSource::url("https://x")).await.is_err());
    }

    #[tokio::test]
    async fn test_share_file_reads_path_once() {
        let path = std::env::temp_dir().join(format!("picsearch-multi-{}.png", std::process::id()));
        tokio::fs::write(&path, b"img").await.unwrap();
        let shared = share_file(&ImageSource::file(path.clone())).await.unwrap();
        assert_eq!(shared, ImageSource::file(b"img".to_vec()));
        let _ = tokio::fs::remove_file(&path).await;
    }
}
