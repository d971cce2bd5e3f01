//! Turning one inbound event into the replies it deserves

use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use vanilka_core::bus::{InboundMessage, MessageKind, OutboundMessage, KEEP_TYPING};
use vanilka_core::config::{AdminConfig, AssistantConfig};
use vanilka_core::history::{HistoryStore, Role};
use vanilka_core::transcript::TranscriptLogger;
use vanilka_core::utils::preview;
use vanilka_core::Result;
use vanilka_providers::{LLMProvider, SpeechToText};

use crate::commands::{self, BotCommand};
use crate::context::ContextBuilder;

/// Generation settings passed to every completion call
#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub model: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl From<&AssistantConfig> for GenerationSettings {
    fn from(config: &AssistantConfig) -> Self {
        Self {
            model: Some(config.model.clone()).filter(|m| !m.trim().is_empty()),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self::from(&AssistantConfig::default())
    }
}

/// Conversation logic shared by all per-event tasks
pub struct ConversationHandler {
    history: Arc<dyn HistoryStore>,
    provider: Arc<dyn LLMProvider>,
    context: Arc<ContextBuilder>,
    speech: Option<Arc<dyn SpeechToText>>,
    transcripts: Option<TranscriptLogger>,
    admins: AdminConfig,
    settings: GenerationSettings,
}

impl ConversationHandler {
    pub fn new(
        history: Arc<dyn HistoryStore>,
        provider: Arc<dyn LLMProvider>,
        context: Arc<ContextBuilder>,
    ) -> Self {
        Self {
            history,
            provider,
            context,
            speech: None,
            transcripts: None,
            admins: AdminConfig::default(),
            settings: GenerationSettings::default(),
        }
    }

    pub fn with_speech(mut self, speech: Arc<dyn SpeechToText>) -> Self {
        self.speech = Some(speech);
        self
    }

    pub fn with_transcripts(mut self, transcripts: TranscriptLogger) -> Self {
        self.transcripts = Some(transcripts);
        self
    }

    pub fn with_admins(mut self, admins: AdminConfig) -> Self {
        self.admins = admins;
        self
    }

    pub fn with_settings(mut self, settings: GenerationSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn context(&self) -> &Arc<ContextBuilder> {
        &self.context
    }

    /// Handle one inbound event.
    ///
    /// Storage failures propagate; everything the user can be told about is
    /// answered with a reply instead.
    pub async fn handle(&self, msg: &InboundMessage) -> Result<Vec<OutboundMessage>> {
        self.history
            .upsert_user(msg.user_id, msg.username.as_deref())
            .await?;

        match &msg.kind {
            MessageKind::Command { name, args } => {
                self.handle_command(msg, BotCommand::parse(name, args)).await
            }
            MessageKind::Voice => self.handle_voice(msg).await,
            MessageKind::Text => {
                let text = msg.content.trim();
                if text.is_empty() {
                    debug!("Ignoring empty text message from {}", msg.user_id);
                    return Ok(Vec::new());
                }
                Ok(vec![self.answer(msg, text).await?])
            }
        }
    }

    async fn handle_voice(&self, msg: &InboundMessage) -> Result<Vec<OutboundMessage>> {
        let text = match (msg.media.first(), &self.speech) {
            (Some(path), Some(speech)) => {
                let path = Path::new(path);
                let text = speech.recognize(path).await;
                if let Err(e) = tokio::fs::remove_file(path).await {
                    debug!("Could not remove voice file {}: {}", path.display(), e);
                }
                text
            }
            (None, _) => {
                warn!("Voice message from {} without audio file", msg.user_id);
                String::new()
            }
            (Some(_), None) => {
                warn!("Voice message received but transcription is not configured");
                String::new()
            }
        };

        let text = text.trim();
        if text.is_empty() {
            return Ok(vec![msg.reply(commands::VOICE_NOT_RECOGNISED)]);
        }

        info!("Voice from {} recognised: {}", msg.user_id, preview(text, 50));
        let echo = msg
            .reply(commands::voice_echo(text))
            .with_metadata(KEEP_TYPING, true);
        let answer = self.answer(msg, text).await?;
        Ok(vec![echo, answer])
    }

    /// Ask the model, keeping the history window in step
    async fn answer(&self, msg: &InboundMessage, text: &str) -> Result<OutboundMessage> {
        if let Some(transcripts) = &self.transcripts {
            transcripts
                .log_message(msg.user_id, msg.username.as_deref(), text)
                .await;
        }

        let history = self.history.get_history(msg.user_id).await?;
        self.history
            .append_message(msg.user_id, Role::User, text)
            .await?;

        let messages = self.context.build_messages(&history, text);
        let response = self
            .provider
            .chat(
                messages,
                self.settings.model.clone(),
                self.settings.max_tokens,
                self.settings.temperature,
            )
            .await;

        let reply = match response {
            Ok(response) => match response.text() {
                Some(reply) => {
                    self.history
                        .append_message(msg.user_id, Role::Assistant, reply)
                        .await?;
                    reply.to_string()
                }
                None => {
                    warn!(
                        "Empty completion for {} (finish_reason: {})",
                        msg.user_id, response.finish_reason
                    );
                    commands::EMPTY_COMPLETION.to_string()
                }
            },
            Err(e) => {
                error!("Error generating LLM response: {}", e);
                commands::LLM_ERROR.to_string()
            }
        };

        Ok(msg.reply(reply))
    }

    async fn handle_command(
        &self,
        msg: &InboundMessage,
        command: BotCommand,
    ) -> Result<Vec<OutboundMessage>> {
        let is_admin = self.admins.is_admin(msg.user_id);
        if command.is_admin_only() && !is_admin {
            info!("User {} tried admin command {:?}", msg.user_id, command);
            return Ok(vec![msg.reply(commands::NOT_ALLOWED)]);
        }

        let reply = match command {
            BotCommand::Start => {
                self.history.clear_history(msg.user_id).await?;
                commands::GREETING.to_string()
            }
            BotCommand::Help if is_admin => format!("{}{}", commands::HELP, commands::ADMIN_HELP),
            BotCommand::Help => commands::HELP.to_string(),
            BotCommand::Reset => {
                let removed = self.history.clear_history(msg.user_id).await?;
                info!("Cleared {} messages for {}", removed, msg.user_id);
                commands::reset_done(removed)
            }
            BotCommand::Stats => {
                let stats = self.history.get_stats().await?;
                commands::format_stats(&stats)
            }
            BotCommand::Broadcast(text) if text.is_empty() => commands::BROADCAST_USAGE.to_string(),
            BotCommand::Broadcast(text) => return self.broadcast(msg, &text).await,
            BotCommand::Unknown(name) => {
                debug!("Unknown command /{} from {}", name, msg.user_id);
                commands::UNKNOWN_COMMAND.to_string()
            }
        };

        Ok(vec![msg.reply(reply)])
    }

    /// One message per known user (private chat id equals user id), then a
    /// report to the sender
    async fn broadcast(&self, msg: &InboundMessage, text: &str) -> Result<Vec<OutboundMessage>> {
        let recipients: Vec<i64> = self
            .history
            .list_user_ids()
            .await?
            .into_iter()
            .filter(|id| *id != msg.user_id)
            .collect();
        info!(
            "Broadcast from {} to {} users",
            msg.user_id,
            recipients.len()
        );

        let mut replies: Vec<OutboundMessage> = recipients
            .iter()
            .map(|id| OutboundMessage::new(&msg.channel, id.to_string(), text))
            .collect();
        replies.push(msg.reply(commands::broadcast_done(recipients.len())));
        Ok(replies)
    }
}
