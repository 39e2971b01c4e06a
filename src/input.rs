//! Image inputs accepted by the engines.

use std::path::PathBuf;

use bytes::Bytes;

use crate::{Result, SearchError};

/// A local image, either on disk or already in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileSource {
    Path(PathBuf),
    Bytes(Bytes),
}

impl FileSource {
    /// Reads the image into memory. Paths hit the filesystem exactly once.
    pub async fn read(&self) -> Result<Bytes> {
        match self {
            Self::Path(path) => Ok(Bytes::from(tokio::fs::read(path).await?)),
            Self::Bytes(bytes) => Ok(bytes.clone()),
        }
    }

    /// Returns a filename suitable for a multipart upload.
    pub fn filename(&self) -> String {
        match self {
            Self::Path(path) => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| "image".to_string()),
            Self::Bytes(_) => "image".to_string(),
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Self::Path(path) => path.as_os_str().is_empty(),
            Self::Bytes(bytes) => bytes.is_empty(),
        }
    }
}

impl From<PathBuf> for FileSource {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<&std::path::Path> for FileSource {
    fn from(path: &std::path::Path) -> Self {
        Self::Path(path.to_path_buf())
    }
}

impl From<Vec<u8>> for FileSource {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(bytes))
    }
}

impl From<Bytes> for FileSource {
    fn from(bytes: Bytes) -> Self {
        Self::Bytes(bytes)
    }
}

/// The image to search for: a public URL or a local file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Url(String),
    File(FileSource),
}

impl ImageSource {
    /// Creates a URL source.
    pub fn url(url: impl Into<String>) -> Self {
        Self::Url(url.into())
    }

    /// Creates a file source from a path or an in-memory buffer.
    pub fn file(file: impl Into<FileSource>) -> Self {
        Self::File(file.into())
    }

    /// Validates a loose url/file pair. Exactly one must be present; empty
    /// strings and empty buffers count as absent.
    pub fn from_parts(url: Option<&str>, file: Option<FileSource>) -> Result<Self> {
        let url = url.filter(|u| !u.trim().is_empty());
        let file = file.filter(|f| !f.is_empty());
        match (url, file) {
            (Some(url), None) => Ok(Self::Url(url.to_string())),
            (None, Some(file)) => Ok(Self::File(file)),
            (Some(_), Some(_)) => Err(SearchError::InvalidArgument(
                "provide either url or file, not both".to_string(),
            )),
            (None, None) => Err(SearchError::InvalidArgument(
                "either url or file must be provided".to_string(),
            )),
        }
    }

    /// Returns the URL for URL sources.
    pub fn as_url(&self) -> Option<&str> {
        match self {
            Self::Url(url) => Some(url),
            Self::File(_) => None,
        }
    }

    /// Resolves the source into raw image bytes, downloading URLs through `client`.
    pub async fn bytes(&self, client: &dyn crate::http::HttpClient) -> Result<Bytes> {
        match self {
            Self::Url(url) => Ok(Bytes::from(client.download(url).await?)),
            Self::File(file) => file.read().await,
        }
    }
}
