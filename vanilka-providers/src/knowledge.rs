//! Knowledge base loader
//!
//! Fetches the shop document from a shared Google Docs/Drive file (or a
//! direct URL), keeps a local cache copy and falls back to it when the
//! remote source is unreachable.

use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use vanilka_core::config::KnowledgeConfig;

use crate::base::{ProviderError, ProviderResult};

/// Plain-text export of a Google Doc
pub fn docs_export_url(file_id: &str) -> String {
    format!(
        "https://docs.google.com/document/d/{}/export?format=txt",
        file_id
    )
}

/// Direct download of an uploaded Drive file
pub fn drive_download_url(file_id: &str) -> String {
    format!(
        "https://drive.google.com/uc?export=download&id={}",
        file_id
    )
}

pub struct KnowledgeBase {
    client: Client,
    sources: Vec<String>,
    cache_path: PathBuf,
    content: RwLock<String>,
}

impl KnowledgeBase {
    /// Sources are tried in order; the first usable document wins
    pub fn new(sources: Vec<String>, cache_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
            sources,
            cache_path: cache_path.into(),
            content: RwLock::new(String::new()),
        }
    }

    pub fn from_config(config: &KnowledgeConfig) -> Self {
        let sources = match config.source_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => vec![url.to_string()],
            _ if !config.file_id.trim().is_empty() => {
                let id = config.file_id.trim();
                vec![docs_export_url(id), drive_download_url(id)]
            }
            _ => Vec::new(),
        };
        Self::new(
            sources,
            &config.cache_path,
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    /// Most recently loaded document, empty before the first load
    pub async fn content(&self) -> String {
        self.content.read().await.clone()
    }

    /// Refresh from the remote source, falling back to the cache.
    ///
    /// Never fails: returns an empty string when neither is available.
    pub async fn load(&self) -> String {
        let loaded = match self.fetch_remote().await {
            Ok(text) => {
                if let Err(e) = self.write_cache(&text).await {
                    warn!(
                        "Failed to write knowledge base cache {}: {}",
                        self.cache_path.display(),
                        e
                    );
                }
                info!(
                    "Knowledge base loaded from remote source, {} chars",
                    text.chars().count()
                );
                text
            }
            Err(e) => {
                error!("Error loading knowledge base from remote source: {}", e);
                self.load_from_cache().await
            }
        };

        *self.content.write().await = loaded.clone();
        loaded
    }

    async fn fetch_remote(&self) -> ProviderResult<String> {
        if self.sources.is_empty() {
            return Err(ProviderError::ConfigError(
                "no knowledge source configured".to_string(),
            ));
        }

        let mut last_error = None;
        for url in &self.sources {
            debug!("Fetching knowledge base from {}", url);
            match self.fetch_one(url).await {
                Ok(text) => return Ok(text),
                Err(e) => {
                    info!("Knowledge source {} failed ({}), trying next", url, e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| ProviderError::InvalidResponse("no source succeeded".to_string())))
    }

    async fn fetch_one(&self, url: &str) -> ProviderResult<String> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::ApiError(format!("HTTP {}", status)));
        }

        // Drive answers private or oversized files with an HTML interstitial
        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with("text/html"))
            .unwrap_or(false);
        if is_html {
            return Err(ProviderError::InvalidResponse(
                "received an HTML page instead of the document".to_string(),
            ));
        }

        let bytes = response.bytes().await?;
        decode_document(&bytes)
    }

    async fn write_cache(&self, text: &str) -> std::io::Result<()> {
        if let Some(parent) = self.cache_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(&self.cache_path, text).await
    }

    async fn load_from_cache(&self) -> String {
        match tokio::fs::read_to_string(&self.cache_path).await {
            Ok(text) => {
                info!(
                    "Knowledge base loaded from cache, {} chars",
                    text.chars().count()
                );
                text
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("No cached knowledge base found");
                String::new()
            }
            Err(e) => {
                error!(
                    "Failed to read knowledge base cache {}: {}",
                    self.cache_path.display(),
                    e
                );
                String::new()
            }
        }
    }
}

/// UTF-8 text with an optional byte order mark
fn decode_document(bytes: &[u8]) -> ProviderResult<String> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    String::from_utf8(bytes.to_vec())
        .map_err(|_| ProviderError::InvalidResponse("document is not UTF-8 text".to_string()))
}
