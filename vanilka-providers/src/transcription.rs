//! Voice transcription through a Whisper-compatible HTTP API

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};
use vanilka_core::config::TranscriptionConfig;

/// Transcription errors
#[derive(Error, Debug)]
pub enum TranscriptionError {
    #[error("API key not configured")]
    NoApiKey,

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Failed to read file: {0}")]
    FileReadError(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("API error: {0}")]
    ApiError(String),
}

/// Anything that turns a voice note into text.
///
/// An empty string means nothing could be recognised.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn recognize(&self, audio_path: &Path) -> String;
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Speech-to-text client
///
/// Works with Groq, OpenAI and other servers exposing
/// `POST /audio/transcriptions` with a multipart `file` field.
#[derive(Clone)]
pub struct TranscriptionService {
    client: Client,
    api_key: Option<String>,
    api_url: String,
    model: String,
    language: Option<String>,
}

impl TranscriptionService {
    pub fn new(
        api_key: Option<String>,
        api_url: impl Into<String>,
        model: impl Into<String>,
        language: Option<String>,
    ) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .unwrap_or_else(|_| Client::new()),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            api_url: api_url.into(),
            model: model.into(),
            language: language.filter(|l| !l.trim().is_empty()),
        }
    }

    pub fn from_config(config: &TranscriptionConfig) -> Self {
        Self::new(
            Some(config.api_key.clone()),
            config.api_url.clone(),
            config.model.clone(),
            Some(config.language.clone()),
        )
    }

    /// Check if the service is configured
    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// Transcribe an audio file (OGG/Opus from Telegram, MP3, WAV, ...)
    pub async fn transcribe<P: AsRef<Path>>(
        &self,
        file_path: P,
    ) -> Result<String, TranscriptionError> {
        let api_key = self.api_key.as_ref().ok_or(TranscriptionError::NoApiKey)?;

        let path = file_path.as_ref();
        if !path.exists() {
            return Err(TranscriptionError::FileNotFound(
                path.to_string_lossy().to_string(),
            ));
        }

        let file_bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("voice.ogg")
            .to_string();

        let mut form = Form::new()
            .part("file", Part::bytes(file_bytes).file_name(file_name))
            .text("model", self.model.clone());
        if let Some(language) = &self.language {
            form = form.text("language", language.clone());
        }

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(api_key)
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!("Transcription failed: {} - {}", status, error_text);
            return Err(TranscriptionError::ApiError(format!(
                "{}: {}",
                status, error_text
            )));
        }

        let data: TranscriptionResponse = response.json().await?;
        let text = data.text.trim().to_string();
        if text.is_empty() {
            warn!("Transcription returned no text");
        } else {
            info!("Transcription successful: {} chars", text.chars().count());
        }
        Ok(text)
    }

    /// Transcribe with fallback - returns empty string on error instead of Err
    pub async fn transcribe_safe<P: AsRef<Path>>(&self, file_path: P) -> String {
        match self.transcribe(file_path).await {
            Ok(text) => text,
            Err(e) => {
                warn!("Transcription failed: {}", e);
                String::new()
            }
        }
    }
}

#[async_trait]
impl SpeechToText for TranscriptionService {
    async fn recognize(&self, audio_path: &Path) -> String {
        self.transcribe_safe(audio_path).await
    }
}

impl Default for TranscriptionService {
    fn default() -> Self {
        Self::from_config(&TranscriptionConfig::default())
    }
}
