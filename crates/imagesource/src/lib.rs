//! Resolves raster image references and decodes them into RGBA bitmaps.
//!
//! References are either remote (`http://` / `https://`, fetched with a blocking
//! `reqwest` client) or local (`file://` URLs and plain paths). Decoding guesses
//! the format from the bytes, so the extension of a reference does not matter.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use image::RgbaImage;
use reqwest::blocking::Client;
use reqwest::Url;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("invalid image reference '{input}': {reason}")]
    InvalidReference { input: String, reason: String },
    #[error("request for {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to decode image from {origin}: {source}")]
    Decode {
        origin: String,
        #[source]
        source: image::ImageError,
    },
    #[error("image from {origin} has zero size")]
    Empty { origin: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceRef {
    Remote(Url),
    Local(PathBuf),
}

impl SourceRef {
    pub fn from_input(input: &str) -> Result<Self, SourceError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(SourceError::InvalidReference {
                input: input.to_string(),
                reason: "reference is empty".into(),
            });
        }

        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            let url = Url::parse(trimmed).map_err(|err| SourceError::InvalidReference {
                input: trimmed.to_string(),
                reason: err.to_string(),
            })?;
            return Ok(SourceRef::Remote(url));
        }

        if trimmed.starts_with("file://") {
            let url = Url::parse(trimmed).map_err(|err| SourceError::InvalidReference {
                input: trimmed.to_string(),
                reason: err.to_string(),
            })?;
            let path = url
                .to_file_path()
                .map_err(|_| SourceError::InvalidReference {
                    input: trimmed.to_string(),
                    reason: "file url does not name a local path".into(),
                })?;
            return Ok(SourceRef::Local(path));
        }

        if let Some((scheme, _)) = trimmed.split_once("://") {
            return Err(SourceError::InvalidReference {
                input: trimmed.to_string(),
                reason: format!("unsupported scheme '{scheme}'"),
            });
        }

        Ok(SourceRef::Local(PathBuf::from(trimmed)))
    }

    /// Joins a relative local path onto `base`. Remote and absolute references
    /// are returned unchanged.
    pub fn resolve_against(self, base: &Path) -> Self {
        match self {
            SourceRef::Local(path) if path.is_relative() => SourceRef::Local(base.join(path)),
            other => other,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            SourceRef::Remote(url) => url.to_string(),
            SourceRef::Local(path) => path.display().to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SourceClient {
    http: Client,
}

impl SourceClient {
    pub fn new(options: ClientOptions) -> Result<Self, SourceError> {
        let user_agent = options
            .user_agent
            .unwrap_or_else(|| format!("geowarp/{}", env!("CARGO_PKG_VERSION")));
        let http = Client::builder()
            .timeout(options.timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|source| SourceError::Http {
                url: "<client>".into(),
                source,
            })?;
        Ok(Self { http })
    }

    pub fn fetch_bytes(&self, source: &SourceRef) -> Result<Vec<u8>, SourceError> {
        match source {
            SourceRef::Remote(url) => {
                debug!(%url, "fetching remote image");
                let http_error = |source| SourceError::Http {
                    url: url.to_string(),
                    source,
                };
                let response = self
                    .http
                    .get(url.clone())
                    .send()
                    .and_then(|response| response.error_for_status())
                    .map_err(http_error)?;
                let bytes = response.bytes().map_err(http_error)?;
                Ok(bytes.to_vec())
            }
            SourceRef::Local(path) => {
                debug!(path = %path.display(), "reading local image");
                fs::read(path).map_err(|source| SourceError::Io {
                    path: path.display().to_string(),
                    source,
                })
            }
        }
    }

    pub fn load(&self, source: &SourceRef) -> Result<RgbaImage, SourceError> {
        let bytes = self.fetch_bytes(source)?;
        decode_bytes(&bytes, &source.describe())
    }
}

/// Decodes `bytes` into an RGBA bitmap. `origin` only labels errors.
pub fn decode_bytes(bytes: &[u8], origin: &str) -> Result<RgbaImage, SourceError> {
    let decoded = image::load_from_memory(bytes).map_err(|source| SourceError::Decode {
        origin: origin.to_string(),
        source,
    })?;
    let rgba = decoded.to_rgba8();
    if rgba.width() == 0 || rgba.height() == 0 {
        return Err(SourceError::Empty {
            origin: origin.to_string(),
        });
    }
    Ok(rgba)
}
