//! Core types and storage for vanilka
//!
//! This crate provides the configuration, logging, message bus and the
//! bounded per-user conversation history store shared by all other
//! vanilka components.

pub mod bus;
pub mod config;
pub mod error;
pub mod history;
pub mod logging;
pub mod transcript;
pub mod utils;

pub use error::{Error, Result};
