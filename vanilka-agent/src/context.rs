//! Context builder for assembling prompts

use parking_lot::RwLock;
use vanilka_core::history::HistoryEntry;
use vanilka_providers::Message;

/// Placeholder substituted with the knowledge base document
pub const KNOWLEDGE_PLACEHOLDER: &str = "{knowledge_base}";

/// Built-in persona for the shop assistant
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"Ты — дружелюбный AI-администратор магазина бенто-тортов "Ванилька".
Твоя задача — помогать клиентам с информацией о продукции, ценах, графике работы и условиях заказа.

Правила общения:
- Будь вежливым, дружелюбным и профессиональным
- Отвечай только на вопросы, связанные с магазином и его продукцией
- Если вопрос не касается магазина, вежливо перенаправь разговор на тему тортов
- Используй эмодзи для создания дружелюбной атмосферы 🎂
- Если не знаешь ответа, предложи связаться с магазином напрямую

Информация о магазине:
{knowledge_base}
"#;

/// Shown to the model while no knowledge base is loaded
pub const EMPTY_KNOWLEDGE_BASE: &str = "Информация о магазине пока не загружена.";

/// Builds the context for LLM requests
pub struct ContextBuilder {
    template: String,
    knowledge_base: RwLock<String>,
}

impl ContextBuilder {
    /// Create a context builder from a prompt template.
    ///
    /// `None` selects [`DEFAULT_SYSTEM_PROMPT`]. A template without the
    /// placeholder gets the knowledge base appended at the end.
    pub fn new(template: Option<String>) -> Self {
        let template = template
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());
        Self {
            template,
            knowledge_base: RwLock::new(String::new()),
        }
    }

    /// Swap in a freshly loaded knowledge base
    pub fn update_knowledge_base(&self, content: impl Into<String>) {
        let content = content.into();
        tracing::info!(
            "Knowledge base updated, length: {} chars",
            content.chars().count()
        );
        *self.knowledge_base.write() = content;
    }

    pub fn has_knowledge_base(&self) -> bool {
        !self.knowledge_base.read().trim().is_empty()
    }

    /// System prompt with the current knowledge base filled in
    pub fn build_system_prompt(&self) -> String {
        let kb = self.knowledge_base.read();
        let kb = if kb.trim().is_empty() {
            EMPTY_KNOWLEDGE_BASE
        } else {
            kb.as_str()
        };

        if self.template.contains(KNOWLEDGE_PLACEHOLDER) {
            self.template.replace(KNOWLEDGE_PLACEHOLDER, kb)
        } else {
            format!("{}\n\n{}", self.template.trim_end(), kb)
        }
    }

    /// System prompt, then the stored window, then the new user message
    pub fn build_messages(&self, history: &[HistoryEntry], current_message: &str) -> Vec<Message> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(self.build_system_prompt()));
        messages.extend(history.iter().map(Message::from));
        messages.push(Message::user(current_message));
        messages
    }
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new(None)
    }
}
