//! Message bus for decoupled communication
//!
//! The message bus provides a dual-queue system for inbound and outbound
//! messages, decoupling chat channels from the conversation core.

pub mod events;
pub mod queue;

pub use events::{InboundMessage, MessageKind, OutboundMessage, KEEP_TYPING};
pub use queue::MessageBus;
