//! Telegram channel integration

use crate::base::{ChannelError, ChannelHandler, Result, KEEP_TYPING};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use teloxide::dispatching::{Dispatcher, ShutdownToken, UpdateFilterExt};
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{ChatAction, ParseMode, Voice};
use teloxide::utils::command::BotCommands;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use vanilka_core::bus::{InboundMessage, OutboundMessage};
use vanilka_core::config::schema::TelegramConfig;

/// Bot commands shown in the Telegram menu
#[derive(BotCommands, Clone, Debug, PartialEq)]
#[command(rename_rule = "lowercase", description = "Команды:")]
enum Command {
    #[command(description = "начать сначала")]
    Start,
    #[command(description = "список команд")]
    Help,
    #[command(description = "очистить историю диалога")]
    Reset,
    #[command(description = "статистика (для администраторов)")]
    Stats,
    #[command(description = "рассылка всем пользователям (для администраторов)")]
    Broadcast(String),
}

impl Command {
    fn into_parts(self) -> (&'static str, String) {
        match self {
            Command::Start => ("start", String::new()),
            Command::Help => ("help", String::new()),
            Command::Reset => ("reset", String::new()),
            Command::Stats => ("stats", String::new()),
            Command::Broadcast(text) => ("broadcast", text.trim().to_string()),
        }
    }
}

/// Per-chat "typing..." loops
#[derive(Clone, Default)]
struct TypingIndicators {
    tasks: Arc<Mutex<HashMap<i64, JoinHandle<()>>>>,
}

impl TypingIndicators {
    async fn start(&self, bot: Bot, chat_id: i64) {
        let handle = tokio::spawn(async move {
            loop {
                let _ = bot
                    .send_chat_action(ChatId(chat_id), ChatAction::Typing)
                    .await;
                tokio::time::sleep(tokio::time::Duration::from_secs(4)).await;
            }
        });
        if let Some(previous) = self.tasks.lock().await.insert(chat_id, handle) {
            previous.abort();
        }
    }

    async fn stop(&self, chat_id: i64) {
        if let Some(handle) = self.tasks.lock().await.remove(&chat_id) {
            handle.abort();
        }
    }

    async fn stop_all(&self) {
        for (_, handle) in self.tasks.lock().await.drain() {
            handle.abort();
        }
    }
}

/// State shared with the dispatcher endpoints
#[derive(Clone)]
struct DispatchContext {
    channel: Arc<String>,
    inbound_tx: Option<mpsc::Sender<InboundMessage>>,
    typing: TypingIndicators,
    media_dir: Arc<PathBuf>,
}

impl DispatchContext {
    async fn forward(&self, bot: &Bot, chat_id: ChatId, inbound: InboundMessage) {
        let Some(tx) = &self.inbound_tx else {
            warn!("No inbound sender set, dropping Telegram message");
            return;
        };
        self.typing.start(bot.clone(), chat_id.0).await;
        if let Err(e) = tx.send(inbound).await {
            error!("Failed to send inbound message: {}", e);
            self.typing.stop(chat_id.0).await;
        }
    }
}

/// Numeric id and display name of the sender
fn sender_of(msg: &Message) -> Option<(i64, Option<String>)> {
    let user = msg.from.as_ref()?;
    let name = user
        .username
        .clone()
        .or_else(|| Some(user.first_name.clone()));
    Some((user.id.0 as i64, name))
}

fn with_message_metadata(inbound: InboundMessage, msg: &Message) -> InboundMessage {
    inbound
        .with_metadata("message_id", msg.id.0)
        .with_metadata("is_group", msg.chat.id.0 < 0)
}

async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    ctx: DispatchContext,
) -> ResponseResult<()> {
    let Some((user_id, username)) = sender_of(&msg) else {
        return Ok(());
    };
    let (name, args) = cmd.into_parts();
    debug!("Telegram command /{} from {}", name, user_id);

    let inbound = InboundMessage::command(
        ctx.channel.as_str(),
        user_id,
        msg.chat.id.0.to_string(),
        name,
        args,
    )
    .with_username(username);
    ctx.forward(&bot, msg.chat.id, with_message_metadata(inbound, &msg))
        .await;
    Ok(())
}

async fn handle_text(bot: Bot, msg: Message, ctx: DispatchContext) -> ResponseResult<()> {
    let (Some((user_id, username)), Some(text)) = (sender_of(&msg), msg.text()) else {
        return Ok(());
    };

    let inbound =
        InboundMessage::text(ctx.channel.as_str(), user_id, msg.chat.id.0.to_string(), text)
            .with_username(username);
    ctx.forward(&bot, msg.chat.id, with_message_metadata(inbound, &msg))
        .await;
    Ok(())
}

async fn handle_voice(bot: Bot, msg: Message, ctx: DispatchContext) -> ResponseResult<()> {
    let (Some((user_id, username)), Some(voice)) = (sender_of(&msg), msg.voice()) else {
        return Ok(());
    };

    let path = match download_voice(&bot, voice, &ctx.media_dir).await {
        Ok(path) => path,
        Err(e) => {
            error!("Failed to download voice message from {}: {}", user_id, e);
            bot.send_message(
                msg.chat.id,
                "Не удалось получить голосовое сообщение. Попробуйте ещё раз.",
            )
            .await?;
            return Ok(());
        }
    };

    let inbound = InboundMessage::voice(
        ctx.channel.as_str(),
        user_id,
        msg.chat.id.0.to_string(),
        path.to_string_lossy(),
    )
    .with_username(username);
    ctx.forward(&bot, msg.chat.id, with_message_metadata(inbound, &msg))
        .await;
    Ok(())
}

/// Save the voice note as `<media_dir>/<uuid>.ogg`
async fn download_voice(bot: &Bot, voice: &Voice, media_dir: &Path) -> Result<PathBuf> {
    let file = bot
        .get_file(voice.file.id.clone())
        .await
        .map_err(|e| ChannelError::ApiError(format!("get_file failed: {}", e)))?;

    tokio::fs::create_dir_all(media_dir)
        .await
        .map_err(|e| ChannelError::Error(format!("Failed to create media dir: {}", e)))?;
    let path = media_dir.join(format!("{}.ogg", uuid::Uuid::new_v4()));

    let mut dst = tokio::fs::File::create(&path)
        .await
        .map_err(|e| ChannelError::Error(format!("File creation failed: {}", e)))?;
    bot.download_file(&file.path, &mut dst)
        .await
        .map_err(|e| ChannelError::ApiError(format!("Download failed: {}", e)))?;

    Ok(path)
}

static CODE_BLOCK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```[\w]*\n?([\s\S]*?)```").expect("static regex"));
static INLINE_CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"`([^`]+)`").expect("static regex"));
static HEADER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^#{1,6}\s+(.+)$").expect("static regex"));
static QUOTE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^>\s*(.*)$").expect("static regex"));
static LINK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\]]+)\]\(([^)]+)\)").expect("static regex"));
static BOLD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*(.+?)\*\*").expect("static regex"));
static BOLD_UNDERSCORE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"__(.+?)__").expect("static regex"));
static ITALIC_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"_([^_\n]+)_").expect("static regex"));
static STRIKE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"~~(.+?)~~").expect("static regex"));
static BULLET_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^[-*]\s+").expect("static regex"));

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Convert the model's Markdown to the HTML subset Telegram accepts
pub fn markdown_to_telegram_html(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    // Code is cut out first so its contents are never reformatted
    let mut code_blocks: Vec<String> = Vec::new();
    let mut result = CODE_BLOCK_RE
        .replace_all(text, |caps: &regex::Captures| {
            code_blocks.push(caps[1].to_string());
            format!("\x00CB{}\x00", code_blocks.len() - 1)
        })
        .to_string();

    let mut inline_codes: Vec<String> = Vec::new();
    result = INLINE_CODE_RE
        .replace_all(&result, |caps: &regex::Captures| {
            inline_codes.push(caps[1].to_string());
            format!("\x00IC{}\x00", inline_codes.len() - 1)
        })
        .to_string();

    result = HEADER_RE.replace_all(&result, "$1").to_string();
    result = QUOTE_RE.replace_all(&result, "$1").to_string();
    result = escape_html(&result);
    result = LINK_RE
        .replace_all(&result, r#"<a href="$2">$1</a>"#)
        .to_string();
    result = BOLD_RE.replace_all(&result, "<b>$1</b>").to_string();
    result = BOLD_UNDERSCORE_RE
        .replace_all(&result, "<b>$1</b>")
        .to_string();
    result = ITALIC_RE.replace_all(&result, "<i>$1</i>").to_string();
    result = STRIKE_RE.replace_all(&result, "<s>$1</s>").to_string();
    result = BULLET_RE.replace_all(&result, "• ").to_string();

    for (i, code) in inline_codes.iter().enumerate() {
        result = result.replace(
            &format!("\x00IC{}\x00", i),
            &format!("<code>{}</code>", escape_html(code)),
        );
    }
    for (i, code) in code_blocks.iter().enumerate() {
        result = result.replace(
            &format!("\x00CB{}\x00", i),
            &format!("<pre><code>{}</code></pre>", escape_html(code)),
        );
    }

    result
}

/// Telegram channel handler (long polling)
pub struct TelegramHandler {
    name: String,
    token: String,
    proxy: Option<String>,
    bot: Option<Bot>,
    running: bool,
    inbound_tx: Option<mpsc::Sender<InboundMessage>>,
    dispatcher_handle: Option<JoinHandle<()>>,
    shutdown_token: Option<ShutdownToken>,
    typing: TypingIndicators,
    media_dir: PathBuf,
}

impl TelegramHandler {
    /// Create a new Telegram handler from config
    pub fn new(config: &TelegramConfig) -> Self {
        Self {
            name: "telegram".to_string(),
            token: config.token.clone(),
            proxy: config.proxy.clone().filter(|p| !p.trim().is_empty()),
            bot: None,
            running: false,
            inbound_tx: None,
            dispatcher_handle: None,
            shutdown_token: None,
            typing: TypingIndicators::default(),
            media_dir: std::env::temp_dir().join("vanilka-voice"),
        }
    }

    /// Directory where downloaded voice notes are stored
    pub fn with_media_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.media_dir = dir.into();
        self
    }

    fn build_bot(&self) -> Result<Bot> {
        let Some(proxy) = &self.proxy else {
            return Ok(Bot::new(&self.token));
        };
        let proxy = reqwest::Proxy::all(proxy)
            .map_err(|e| ChannelError::NotConfigured(format!("Invalid proxy URL: {}", e)))?;
        let client = teloxide::net::default_reqwest_settings()
            .proxy(proxy)
            .build()
            .map_err(|e| ChannelError::Error(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Bot::with_client(&self.token, client))
    }
}

#[async_trait]
impl ChannelHandler for TelegramHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_running(&self) -> bool {
        self.running
    }

    async fn start(&mut self) -> Result<()> {
        if self.token.is_empty() {
            return Err(ChannelError::NotConfigured(
                "Telegram token not configured".to_string(),
            ));
        }

        if self.running {
            return Ok(());
        }

        info!("Starting Telegram bot (polling mode)...");
        let bot = self.build_bot()?;

        if let Err(e) = bot.set_my_commands(Command::bot_commands()).await {
            warn!("Failed to set bot commands: {}", e);
        }

        match bot.get_me().await {
            Ok(me) => {
                let username = me.username.clone().unwrap_or_else(|| "unknown".to_string());
                info!("Telegram bot @{} connected", username);
            }
            Err(e) => {
                return Err(ChannelError::ApiError(format!(
                    "Failed to get bot info: {}",
                    e
                )));
            }
        }

        let ctx = DispatchContext {
            channel: Arc::new(self.name.clone()),
            inbound_tx: self.inbound_tx.clone(),
            typing: self.typing.clone(),
            media_dir: Arc::new(self.media_dir.clone()),
        };

        let handler = Update::filter_message()
            .branch(
                dptree::entry()
                    .filter_command::<Command>()
                    .endpoint(handle_command),
            )
            .branch(dptree::filter(|msg: Message| msg.voice().is_some()).endpoint(handle_voice))
            .branch(dptree::filter(|msg: Message| msg.text().is_some()).endpoint(handle_text));

        let mut dispatcher = Dispatcher::builder(bot.clone(), handler)
            .dependencies(dptree::deps![ctx])
            .default_handler(|upd| async move {
                debug!("Unhandled Telegram update: {:?}", upd.kind);
            })
            .build();
        self.shutdown_token = Some(dispatcher.shutdown_token());
        self.dispatcher_handle = Some(tokio::spawn(async move {
            dispatcher.dispatch().await;
        }));

        self.bot = Some(bot);
        self.running = true;
        info!("Telegram bot started successfully");

        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if !self.running {
            return Ok(());
        }

        info!("Stopping Telegram bot...");
        self.typing.stop_all().await;

        if let Some(token) = self.shutdown_token.take() {
            match token.shutdown() {
                Ok(done) => done.await,
                Err(e) => debug!("Dispatcher was not running: {}", e),
            }
        }
        if let Some(handle) = self.dispatcher_handle.take() {
            handle.abort();
        }

        self.bot = None;
        self.running = false;
        info!("Telegram bot stopped");

        Ok(())
    }

    async fn send(&self, message: OutboundMessage) -> Result<()> {
        let bot = self
            .bot
            .as_ref()
            .ok_or_else(|| ChannelError::NotRunning("Telegram bot not running".to_string()))?;

        let chat_id: i64 = message
            .chat_id
            .parse()
            .map_err(|_| ChannelError::Error(format!("Invalid chat_id: {}", message.chat_id)))?;

        let keep_typing = message
            .metadata
            .get(KEEP_TYPING)
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if !keep_typing {
            self.typing.stop(chat_id).await;
        }

        let html_content = markdown_to_telegram_html(&message.content);
        match bot
            .send_message(ChatId(chat_id), html_content)
            .parse_mode(ParseMode::Html)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!("HTML parse failed, falling back to plain text: {}", e);
                bot.send_message(ChatId(chat_id), &message.content)
                    .await
                    .map_err(|e2| {
                        ChannelError::ApiError(format!("Failed to send message: {}", e2))
                    })?;
                Ok(())
            }
        }
    }

    fn set_inbound_sender(&mut self, tx: mpsc::Sender<InboundMessage>) {
        self.inbound_tx = Some(tx);
    }
}
