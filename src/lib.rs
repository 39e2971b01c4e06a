//! # picsearch
//!
//! A reverse image search client. It queries third-party sites (by scraping
//! or through their undocumented APIs) and normalizes their responses into
//! one object model.
//!
//! Every engine returns its own typed response with engine-specific metadata,
//! and every response also exposes the common surface of [`SearchResponse`]:
//! the origin payload, the result page URL and the ordered `raw` items.
//! [`MultiSearch`] runs one image through several engines and merges the
//! normalized [`Hit`]s.
//!
//! ## Example
//!
//! ```rust,no_run
//! use picsearch::{default_client, engines::SauceNao, Engine, ImageSource, SearchResponse};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = SauceNao::new(default_client()?).with_api_key("...");
//!     let response = engine.search(&ImageSource::url("https://example.com/a.jpg")).await?;
//!
//!     for item in response.raw() {
//!         println!("{:.1}% {}: {}", item.similarity, item.title, item.url);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! Blocking callers wrap an engine in [`Blocking`].

mod aggregator;
mod engine;
mod error;
mod extract;
mod http_reqwest;
mod input;
mod model;
mod multi;
mod paging;

pub mod config;
pub mod engines;
pub mod http;
pub mod sync;

pub use aggregator::Aggregator;
pub use config::{ClientConfig, ProxyConfig, ProxyProtocol};
pub use engine::{DynEngine, Engine, EngineConfig};
pub use error::{Result, SearchError};
pub use http::HttpClient;
pub use http_reqwest::{default_client, ReqwestClient};
pub use input::{FileSource, ImageSource};
pub use model::{Hit, Hits, Origin, SearchItem, SearchResponse};
pub use multi::MultiSearch;
pub use paging::{Paginate, Paginated};
pub use sync::{Blocking, Maybe};
