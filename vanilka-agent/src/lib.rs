//! Conversation logic for vanilka
//!
//! This crate provides the agent loop, prompt building and the handler that
//! answers commands, text and voice messages.

pub mod agent_loop;
pub mod commands;
pub mod context;
pub mod conversation;

pub use agent_loop::AgentLoop;
pub use commands::BotCommand;
pub use context::ContextBuilder;
pub use conversation::{ConversationHandler, GenerationSettings};
