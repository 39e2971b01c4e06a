//! HTTP client abstraction used by every engine.
//!
//! Engines never talk to `reqwest` directly. They build an [`HttpRequest`]
//! and hand it to an [`HttpClient`], which keeps the transport swappable
//! (shared pools, proxies, test doubles).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;

use crate::{Result, SearchError};

/// HTTP method supported by the engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// Content of one multipart field.
#[derive(Debug, Clone, PartialEq)]
pub enum PartContent {
    /// Plain text field.
    Text(String),
    /// File field with an optional filename and MIME type.
    File {
        bytes: Vec<u8>,
        filename: Option<String>,
        mime: Option<String>,
    },
}

/// One named multipart field.
#[derive(Debug, Clone, PartialEq)]
pub struct FormPart {
    pub name: String,
    pub content: PartContent,
}

impl FormPart {
    /// Creates a text field.
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: PartContent::Text(value.into()),
        }
    }

    /// Creates a file field without filename or MIME type.
    pub fn file(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            content: PartContent::File {
                bytes,
                filename: None,
                mime: None,
            },
        }
    }

    /// Creates a file field with an explicit filename and MIME type.
    pub fn named_file(
        name: impl Into<String>,
        bytes: Vec<u8>,
        filename: impl Into<String>,
        mime: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            content: PartContent::File {
                bytes,
                filename: Some(filename.into()),
                mime: Some(mime.into()),
            },
        }
    }
}

/// Request body.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Body {
    #[default]
    Empty,
    /// `application/x-www-form-urlencoded` pairs.
    Form(Vec<(String, String)>),
    /// JSON document.
    Json(Value),
    /// Raw text; set the content type through a header.
    Text(String),
    /// `multipart/form-data` fields.
    Multipart(Vec<FormPart>),
}

/// A fully described HTTP request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub body: Body,
}

impl HttpRequest {
    /// Creates a GET request.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    /// Creates a POST request.
    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::Post, url)
    }

    fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            query: Vec::new(),
            body: Body::Empty,
        }
    }

    /// Adds a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Adds a query parameter.
    pub fn query(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((name.into(), value.to_string()));
        self
    }

    /// Appends several query parameters, keeping their order.
    pub fn query_pairs<I, K, V>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.query
            .extend(pairs.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Sets the body.
    pub fn body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    /// Returns the value of the first query parameter named `name`.
    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Returns the value of the first header named `name` (case-insensitive).
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// The parts of an HTTP response the engines consume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Decoded body text.
    pub text: String,
    /// Final URL after redirects.
    pub url: String,
}

impl HttpResponse {
    /// Creates a response.
    pub fn new(status: u16, text: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            status,
            text: text.into(),
            url: url.into(),
        }
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Fails with [`SearchError::Status`] unless the status is 2xx.
    pub fn error_for_status(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(SearchError::Status {
                status: self.status,
                url: self.url,
            })
        }
    }

    /// Decodes the body as JSON, attributing failures to `engine`.
    pub fn json(&self, engine: &str) -> Result<Value> {
        serde_json::from_str(&self.text).map_err(|e| SearchError::json(engine, e))
    }
}

/// Transport used by the engines.
///
/// Implementations must be safe to share between concurrent searches.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a request and returns status, body text and final URL.
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;

    /// Downloads the raw bytes behind `url`.
    async fn download(&self, url: &str) -> Result<Vec<u8>>;

    /// Downloads `url` into `path` and returns the path written.
    async fn stream_to_file(&self, url: &str, path: &Path) -> Result<PathBuf> {
        let bytes = self.download(url).await?;
        tokio::fs::write(path, bytes).await?;
        Ok(path.to_path_buf())
    }
}
