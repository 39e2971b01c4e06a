//! Integration tests for search engines using real HTTP requests.
//!
//! These tests are marked with `#[ignore]` by default because they require
//! network access and may be slow or flaky. Sites change their markup and
//! rate-limit anonymous clients, so an empty result is reported, not failed.
//!
//! Run with: `cargo test --test integration -- --ignored`

use std::sync::Arc;

use picsearch::{default_client, Engine, HttpClient, ImageSource, SearchResponse};

const IMAGE_URL: &str = "https://upload.wikimedia.org/wikipedia/commons/4/47/PNG_transparency_demonstration_1.png";

fn client() -> Arc<dyn HttpClient> {
    default_client().expect("default client")
}

fn image() -> ImageSource {
    ImageSource::url(IMAGE_URL)
}

/// Helper to run an engine test
async fn test_engine<E: Engine>(engine: E) -> Option<E::Response> {
    match engine.search(&image()).await {
        Ok(response) => {
            println!(
                "Engine '{}' returned {} results at {}",
                engine.name(),
                response.raw().len(),
                response.url()
            );
            for hit in response.hits(engine.name()).iter().take(3) {
                println!("  {} - {}", hit.title, hit.url);
            }
            Some(response)
        }
        Err(e) => {
            println!("Engine '{}' failed: {}", engine.name(), e);
            None
        }
    }
}

mod anime_tests {
    use super::*;
    use picsearch::engines::{Ascii2d, Iqdb, TraceMoe};

    #[tokio::test]
    #[ignore]
    async fn test_iqdb_search() {
        test_engine(Iqdb::new(client())).await;
    }

    #[tokio::test]
    #[ignore]
    async fn test_ascii2d_search() {
        test_engine(Ascii2d::new(client())).await;
    }

    #[tokio::test]
    #[ignore]
    async fn test_tracemoe_me() {
        let engine = TraceMoe::new(client());
        let me = engine.me(None).await.expect("trace.moe /me");
        println!("trace.moe quota {}/{}", me.quota_used, me.quota);
        assert!(me.quota > 0);
    }
}

mod web_tests {
    use super::*;
    use picsearch::engines::{Bing, Copyseeker, Google, Tineye, Yandex};
    use picsearch::Paginate;

    #[tokio::test]
    #[ignore]
    async fn test_bing_search() {
        test_engine(Bing::new(client())).await;
    }

    #[tokio::test]
    #[ignore]
    async fn test_yandex_search() {
        test_engine(Yandex::new(client())).await;
    }

    #[tokio::test]
    #[ignore]
    async fn test_copyseeker_search() {
        test_engine(Copyseeker::new(client())).await;
    }

    #[tokio::test]
    #[ignore]
    async fn test_google_search() {
        test_engine(Google::new(client())).await;
    }

    #[tokio::test]
    #[ignore]
    async fn test_tineye_next_page() {
        let engine = Tineye::new(client());
        let Some(first) = test_engine(Tineye::new(client())).await else {
            return;
        };
        match engine.next_page(&first).await {
            Ok(Some(second)) => println!("Tineye page 2 has {} results", second.raw().len()),
            Ok(None) => println!("Tineye returned a single page"),
            Err(e) => println!("Tineye page 2 failed: {e}"),
        }
    }
}

mod multi_tests {
    use super::*;
    use picsearch::{engines, MultiSearch};

    #[tokio::test]
    #[ignore]
    async fn test_multi_search() {
        let client = client();
        let mut search = MultiSearch::new();
        for shortcut in ["iq", "bi", "ya"] {
            search.add_dyn_engine(engines::build(shortcut, client.clone()).unwrap());
        }

        let hits = search.search(&image()).await.unwrap();
        println!("{} merged hits in {}ms", hits.count, hits.duration_ms);
        for (engine, message) in hits.errors() {
            println!("  {engine} failed: {message}");
        }
        assert_eq!(hits.count, hits.items().len());
    }
}

mod blocking_tests {
    use super::*;
    use picsearch::engines::Iqdb;
    use picsearch::Blocking;

    #[test]
    #[ignore]
    fn test_blocking_search_outside_runtime() {
        let engine = Blocking::new(Iqdb::new(client()));
        match engine.search(&image()).wait() {
            Ok(response) => println!("IQDB (blocking) returned {} results", response.raw().len()),
            Err(e) => println!("IQDB (blocking) failed: {e}"),
        }
    }
}
