//! External service clients for vanilka
//!
//! Chat completions, speech-to-text and the knowledge base document.

pub mod base;
pub mod knowledge;
pub mod openai;
pub mod transcription;

pub use base::{LLMProvider, LLMResponse, Message, ProviderError, ProviderResult};
pub use knowledge::KnowledgeBase;
pub use openai::OpenAIClient;
pub use transcription::{SpeechToText, TranscriptionError, TranscriptionService};
