//! Channel manager

use crate::base::{ChannelError, ChannelHandler, ChannelHandlerPtr, Result};
use crate::telegram::TelegramHandler;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use vanilka_core::bus::{InboundMessage, OutboundMessage};
use vanilka_core::config::schema::Config;

/// Channel manager that owns the configured chat channels
pub struct ChannelManager {
    config: Config,
    handlers: RwLock<HashMap<String, ChannelHandlerPtr>>,
    inbound_tx: Option<mpsc::Sender<InboundMessage>>,
}

impl ChannelManager {
    /// Create a new channel manager
    pub fn new(config: Config) -> Self {
        Self {
            config,
            handlers: RwLock::new(HashMap::new()),
            inbound_tx: None,
        }
    }

    /// Set the inbound message sender
    pub fn set_inbound_sender(&mut self, tx: mpsc::Sender<InboundMessage>) {
        self.inbound_tx = Some(tx);
    }

    /// Initialize channels based on configuration
    pub async fn initialize(&self) -> Result<()> {
        let telegram = &self.config.telegram;
        if !telegram.enabled {
            tracing::info!("Telegram channel disabled");
            return Ok(());
        }
        if telegram.token.is_empty() {
            tracing::warn!("Telegram channel enabled but token not configured");
            return Ok(());
        }

        self.register(TelegramHandler::new(telegram)).await;
        tracing::info!("Telegram channel initialized");
        Ok(())
    }

    /// Register a handler under its own name, wiring the inbound sender
    pub async fn register<H>(&self, mut handler: H)
    where
        H: ChannelHandler + 'static,
    {
        if let Some(ref tx) = self.inbound_tx {
            handler.set_inbound_sender(tx.clone());
        }
        let name = handler.name().to_string();
        self.handlers.write().await.insert(
            name,
            Arc::new(RwLock::new(handler)) as Arc<RwLock<dyn ChannelHandler>>,
        );
    }

    /// Start all channel handlers.
    ///
    /// Fails when handlers are registered but none of them came up.
    pub async fn start_all(&self) -> Result<()> {
        let handlers = self.handlers.read().await;
        let mut started = 0usize;
        let mut last_error = None;

        for (name, handler) in handlers.iter() {
            tracing::info!("Starting {} channel...", name);
            let mut handler = handler.write().await;
            match handler.start().await {
                Ok(()) => started += 1,
                Err(e) => {
                    tracing::error!("Failed to start {} channel: {}", name, e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if started == 0 => Err(e),
            _ => Ok(()),
        }
    }

    /// Stop all channel handlers
    pub async fn stop_all(&self) -> Result<()> {
        let mut handlers = self.handlers.write().await;

        for (name, handler) in handlers.iter_mut() {
            tracing::info!("Stopping {} channel...", name);
            let mut handler = handler.write().await;
            if let Err(e) = handler.stop().await {
                tracing::error!("Failed to stop {} channel: {}", name, e);
            }
        }

        handlers.clear();
        Ok(())
    }

    /// Get a channel handler by name
    pub async fn get_handler(&self, name: &str) -> Option<ChannelHandlerPtr> {
        let handlers = self.handlers.read().await;
        handlers.get(name).cloned()
    }

    /// Send a message through a specific channel
    pub async fn send(&self, channel: &str, message: OutboundMessage) -> Result<()> {
        let handlers = self.handlers.read().await;
        let handler = handlers
            .get(channel)
            .ok_or_else(|| ChannelError::NotConfigured(format!("Channel {} not found", channel)))?;

        let handler = handler.read().await;
        handler.send(message).await
    }

    /// Check if a channel is running
    pub async fn is_channel_running(&self, name: &str) -> bool {
        let handlers = self.handlers.read().await;
        match handlers.get(name) {
            Some(handler) => handler.read().await.is_running(),
            None => false,
        }
    }

    /// Get list of registered channels
    pub async fn list_channels(&self) -> Vec<String> {
        let handlers = self.handlers.read().await;
        let mut names: Vec<String> = handlers.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for ChannelManager {
    fn default() -> Self {
        Self::new(Config::default())
    }
}
