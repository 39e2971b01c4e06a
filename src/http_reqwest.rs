//! [`HttpClient`] implementation backed by reqwest.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, COOKIE};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::config::ClientConfig;
use crate::http::{Body, HttpClient, HttpRequest, HttpResponse, Method, PartContent};
use crate::{Result, SearchError};

/// An HTTP client that sends requests through a shared reqwest connection pool.
#[derive(Clone)]
pub struct ReqwestClient {
    client: Client,
}

impl ReqwestClient {
    /// Creates a client with the default configuration.
    pub fn new() -> Result<Self> {
        Self::from_config(&ClientConfig::default())
    }

    /// Builds a client from `config`.
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            headers.insert(header_name(name)?, header_value(value)?);
        }
        if let Some(cookie) = config.cookie_header() {
            headers.insert(COOKIE, header_value(&cookie)?);
        }

        let mut builder = Client::builder()
            .user_agent(&config.user_agent)
            .default_headers(headers)
            .timeout(config.timeout)
            .danger_accept_invalid_certs(!config.verify_ssl);

        if let Some(proxy) = &config.proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy.url())?);
        }
        for (host, addrs) in &config.resolve {
            builder = builder.resolve_to_addrs(host, addrs);
        }

        Ok(Self {
            client: builder.build()?,
        })
    }

    /// Wraps an existing reqwest client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

/// Builds the default shared client used when an engine is constructed
/// without one.
pub fn default_client() -> Result<Arc<dyn HttpClient>> {
    Ok(Arc::new(ReqwestClient::new()?))
}

fn header_name(name: &str) -> Result<HeaderName> {
    HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| SearchError::InvalidArgument(format!("invalid header name '{name}': {e}")))
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| SearchError::InvalidArgument(format!("invalid header value '{value}': {e}")))
}

fn multipart_form(parts: Vec<crate::http::FormPart>) -> Result<Form> {
    let mut form = Form::new();
    for part in parts {
        form = match part.content {
            PartContent::Text(text) => form.text(part.name, text),
            PartContent::File {
                bytes,
                filename,
                mime,
            } => {
                let mut file = Part::bytes(bytes).file_name(filename.unwrap_or_else(|| "image".to_string()));
                if let Some(mime) = mime {
                    file = file.mime_str(&mime)?;
                }
                form.part(part.name, file)
            }
        };
    }
    Ok(form)
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        debug!(method = ?request.method, url = %request.url, "sending request");

        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(header_name(name)?, header_value(value)?);
        }
        builder = match request.body {
            Body::Empty => builder,
            Body::Form(pairs) => builder.form(&pairs),
            Body::Json(value) => builder.json(&value),
            Body::Text(text) => builder.body(text),
            Body::Multipart(parts) => builder.multipart(multipart_form(parts)?),
        };

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let url = response.url().to_string();
        let text = response.text().await?;
        debug!(status, url = %url, bytes = text.len(), "received response");

        Ok(HttpResponse { status, text, url })
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn stream_to_file(&self, url: &str, path: &Path) -> Result<PathBuf> {
        let mut response = self.client.get(url).send().await?.error_for_status()?;
        let mut file = tokio::fs::File::create(path).await?;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::ProxyConfig;
    use crate::http::FormPart;

    #[test]
    fn test_reqwest_client_new() {
        let _client = ReqwestClient::new().unwrap();
    }

    #[test]
    fn test_reqwest_client_with_client() {
        let client = Client::builder().user_agent("test-agent").build().unwrap();
        let _client = ReqwestClient::with_client(client);
    }

    #[test]
    fn test_reqwest_client_from_full_config() {
        let config = ClientConfig::new()
            .with_header("Referer", "https://www.bing.com/")
            .with_cookies("a=1; b=2")
            .unwrap()
            .with_timeout(Duration::from_secs(5))
            .with_verify_ssl(false)
            .with_proxy(ProxyConfig::new("127.0.0.1", 7890))
            .with_resolve("saucenao.com", vec!["127.0.0.1:443".parse().unwrap()]);
        assert!(ReqwestClient::from_config(&config).is_ok());
    }

    #[test]
    fn test_reqwest_client_rejects_bad_header() {
        let config = ClientConfig::new().with_header("bad header", "x");
        let err = ReqwestClient::from_config(&config).err().unwrap();
        assert!(matches!(err, SearchError::InvalidArgument(_)));
    }

    #[test]
    fn test_multipart_form_accepts_text_and_file_parts() {
        let parts = vec![
            FormPart::text("cbir", "sbi"),
            FormPart::named_file("encoded_image", vec![1, 2, 3], "image.jpg", "image/jpeg"),
            FormPart::file("file", vec![4]),
        ];
        assert!(multipart_form(parts).is_ok());
    }

    #[test]
    fn test_multipart_form_rejects_bad_mime() {
        let parts = vec![FormPart::named_file("f", vec![], "x", "not a mime")];
        assert!(multipart_form(parts).is_err());
    }

    #[test]
    fn test_default_client() {
        assert!(default_client().is_ok());
    }
}
