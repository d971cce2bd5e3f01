//! Async message queue implementation

use super::events::{InboundMessage, OutboundMessage};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tracing::{debug, warn};

type OutboundCallback =
    Arc<dyn Fn(OutboundMessage) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Async message bus that decouples chat channels from the conversation core
///
/// Channels push messages to the inbound queue; the agent consumes them and
/// pushes replies to the outbound queue, which the dispatcher hands to the
/// subscribed channel. Replies are delivered one at a time in publish order,
/// so several replies to the same chat arrive in the order they were made.
#[derive(Clone)]
pub struct MessageBus {
    inbound_tx: mpsc::UnboundedSender<InboundMessage>,
    inbound_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<InboundMessage>>>>,
    outbound_tx: mpsc::UnboundedSender<OutboundMessage>,
    outbound_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<OutboundMessage>>>>,
    /// Outbound subscribers by channel
    subscribers: Arc<RwLock<HashMap<String, Vec<OutboundCallback>>>>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl MessageBus {
    /// Create a new message bus
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);

        Self {
            inbound_tx,
            inbound_rx: Arc::new(Mutex::new(Some(inbound_rx))),
            outbound_tx,
            outbound_rx: Arc::new(Mutex::new(Some(outbound_rx))),
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            shutdown: Arc::new(shutdown),
        }
    }

    /// Take the inbound receiver (can only be called once)
    pub async fn take_inbound_receiver(&self) -> Option<mpsc::UnboundedReceiver<InboundMessage>> {
        self.inbound_rx.lock().await.take()
    }

    /// Take the outbound receiver (can only be called once)
    pub async fn take_outbound_receiver(&self) -> Option<mpsc::UnboundedReceiver<OutboundMessage>> {
        self.outbound_rx.lock().await.take()
    }

    /// Publish a message from a channel to the agent
    pub fn publish_inbound(&self, msg: InboundMessage) -> crate::Result<()> {
        self.inbound_tx
            .send(msg)
            .map_err(|_| crate::Error::Channel("Inbound channel closed".to_string()))
    }

    /// Publish a reply from the agent to channels
    pub fn publish_outbound(&self, msg: OutboundMessage) -> crate::Result<()> {
        self.outbound_tx
            .send(msg)
            .map_err(|_| crate::Error::Channel("Outbound channel closed".to_string()))
    }

    /// Subscribe to outbound messages for a specific channel with a callback
    pub async fn subscribe_outbound<F, Fut>(&self, channel: impl Into<String>, callback: F)
    where
        F: Fn(OutboundMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let wrapped: OutboundCallback = Arc::new(move |msg| Box::pin(callback(msg)));
        self.subscribers
            .write()
            .await
            .entry(channel.into())
            .or_default()
            .push(wrapped);
    }

    /// A receiver that flips to `true` once [`MessageBus::stop`] is called
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Dispatch outbound messages to subscribed channels.
    /// Run this as a background task; it returns after [`MessageBus::stop`].
    pub async fn dispatch_outbound_loop(&self) {
        let mut outbound_rx = match self.take_outbound_receiver().await {
            Some(rx) => rx,
            None => {
                warn!("Outbound receiver already taken");
                return;
            }
        };
        let mut shutdown = self.shutdown_signal();
        if *shutdown.borrow() {
            return;
        }

        debug!("Starting outbound dispatcher");
        loop {
            tokio::select! {
                maybe_msg = outbound_rx.recv() => {
                    let Some(msg) = maybe_msg else { break };
                    self.deliver(msg).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Outbound dispatcher stopped");
    }

    async fn deliver(&self, msg: OutboundMessage) {
        let callbacks = {
            let subscribers = self.subscribers.read().await;
            subscribers.get(&msg.channel).cloned()
        };
        match callbacks {
            Some(callbacks) => {
                for callback in callbacks {
                    callback(msg.clone()).await;
                }
            }
            None => debug!("No subscribers for channel: {}", msg.channel),
        }
    }

    /// Stop the dispatcher loop and any consumer watching the shutdown signal
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }

    /// Whether [`MessageBus::stop`] has been called
    pub fn is_stopped(&self) -> bool {
        *self.shutdown.borrow()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}
