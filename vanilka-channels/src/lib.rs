//! Chat platform integrations for vanilka
//!
//! Telegram is the only channel; the manager keeps the door open for more.

pub mod base;
pub mod manager;
pub mod telegram;

pub use base::{ChannelError, ChannelHandler, ChannelHandlerPtr, Result, KEEP_TYPING};
pub use manager::ChannelManager;
pub use telegram::{markdown_to_telegram_html, TelegramHandler};
