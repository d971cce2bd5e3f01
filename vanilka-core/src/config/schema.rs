//! Configuration schema definitions

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Root configuration for vanilka
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Assistant behaviour
    #[serde(default)]
    pub assistant: AssistantConfig,
    /// Telegram channel
    #[serde(default)]
    pub telegram: TelegramConfig,
    /// Administrators allowed to run privileged commands
    #[serde(default)]
    pub admin: AdminConfig,
    /// Chat completion provider
    #[serde(default)]
    pub provider: ProviderConfig,
    /// Speech-to-text provider
    #[serde(default)]
    pub transcription: TranscriptionConfig,
    /// Knowledge base source and cache
    #[serde(default)]
    pub knowledge: KnowledgeConfig,
    /// Conversation history storage
    #[serde(default)]
    pub history: HistoryConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,
    /// Directory for log files
    #[serde(default = "default_log_dir")]
    pub dir: String,
    /// Module-specific overrides
    #[serde(default)]
    pub overrides: HashMap<String, String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            dir: default_log_dir(),
            overrides: HashMap::new(),
        }
    }
}

/// Assistant settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    /// Chat model
    #[serde(default = "default_model")]
    pub model: String,
    /// Completion token limit
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// System prompt template; `{knowledge_base}` is replaced by the loaded
    /// document. The built-in prompt is used when unset.
    #[serde(default)]
    pub system_prompt: Option<String>,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_tokens() -> u32 {
    1000
}

fn default_temperature() -> f32 {
    0.7
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            system_prompt: None,
        }
    }
}

/// Telegram channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub proxy: Option<String>,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            token: String::new(),
            proxy: None,
        }
    }
}

/// Administrator list
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AdminConfig {
    #[serde(default)]
    pub user_ids: Vec<i64>,
}

impl AdminConfig {
    pub fn is_admin(&self, user_id: i64) -> bool {
        self.user_ids.contains(&user_id)
    }
}

/// OpenAI-compatible chat completion provider
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: String,
    /// Base URL, e.g. an OpenRouter endpoint; OpenAI when unset
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default)]
    pub extra_headers: Option<HashMap<String, String>>,
}

/// Whisper-compatible speech-to-text endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_transcription_url")]
    pub api_url: String,
    #[serde(default = "default_transcription_model")]
    pub model: String,
    /// ISO-639-1 hint passed to the recogniser
    #[serde(default = "default_transcription_language")]
    pub language: String,
}

fn default_transcription_url() -> String {
    "https://api.groq.com/openai/v1/audio/transcriptions".to_string()
}

fn default_transcription_model() -> String {
    "whisper-large-v3".to_string()
}

fn default_transcription_language() -> String {
    "ru".to_string()
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_url: default_transcription_url(),
            model: default_transcription_model(),
            language: default_transcription_language(),
        }
    }
}

/// Knowledge base document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    /// Google Drive / Docs file id of the shared document
    #[serde(default)]
    pub file_id: String,
    /// Direct URL; takes precedence over `file_id`
    #[serde(default)]
    pub source_url: Option<String>,
    /// Local copy used when the remote source is unreachable
    #[serde(default = "default_knowledge_cache")]
    pub cache_path: String,
    #[serde(default = "default_knowledge_timeout")]
    pub timeout_secs: u64,
}

fn default_knowledge_cache() -> String {
    "data/knowledge_base.md".to_string()
}

fn default_knowledge_timeout() -> u64 {
    30
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            file_id: String::new(),
            source_url: None,
            cache_path: default_knowledge_cache(),
            timeout_secs: default_knowledge_timeout(),
        }
    }
}

/// Conversation history storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// SQLite database file, or `:memory:`
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// Per-user window size
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
    /// `utc`, `local` or an IANA time zone name
    #[serde(default = "default_day_boundary")]
    pub day_boundary: String,
    /// Write plain-text per-user transcripts
    #[serde(default = "default_true")]
    pub transcripts: bool,
    #[serde(default = "default_transcript_dir")]
    pub transcript_dir: String,
}

fn default_db_path() -> String {
    "data/vanilka.db".to_string()
}

fn default_max_messages() -> usize {
    20
}

fn default_day_boundary() -> String {
    "utc".to_string()
}

fn default_transcript_dir() -> String {
    "history".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            max_messages: default_max_messages(),
            day_boundary: default_day_boundary(),
            transcripts: true,
            transcript_dir: default_transcript_dir(),
        }
    }
}
