//! Agent loop: pulls events off the bus and answers them concurrently

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, warn, Instrument};
use vanilka_core::bus::{InboundMessage, MessageBus, MessageKind};
use vanilka_core::utils::preview;
use vanilka_core::{Error, Result};

use crate::commands;
use crate::conversation::ConversationHandler;

/// How long shutdown waits for in-flight conversations
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// The agent loop is the core processing engine
pub struct AgentLoop {
    bus: MessageBus,
    handler: Arc<ConversationHandler>,
}

impl AgentLoop {
    pub fn new(bus: MessageBus, handler: Arc<ConversationHandler>) -> Self {
        Self { bus, handler }
    }

    pub fn handler(&self) -> &Arc<ConversationHandler> {
        &self.handler
    }

    /// Run until the bus is stopped or every inbound sender is gone.
    ///
    /// Each event is handled in its own task; on shutdown the loop waits a
    /// bounded time for those tasks so their history writes land before the
    /// store is closed.
    pub async fn run(&self) -> Result<()> {
        let Some(mut inbound_rx) = self.bus.take_inbound_receiver().await else {
            error!("Failed to take inbound receiver");
            return Err(Error::Internal(
                "Inbound receiver already taken".to_string(),
            ));
        };
        let mut shutdown = self.bus.shutdown_signal();
        let mut tasks = JoinSet::new();

        info!("Agent loop started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                maybe_msg = inbound_rx.recv() => {
                    let Some(msg) = maybe_msg else {
                        info!("Message bus closed, stopping agent loop");
                        break;
                    };
                    debug!("Received message from {}:{}", msg.channel, msg.chat_id);
                    tasks.spawn(process_event(self.handler.clone(), self.bus.clone(), msg));
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!("Conversation task failed: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        if !tasks.is_empty() {
            info!("Waiting for {} in-flight conversations", tasks.len());
            let drain = async { while tasks.join_next().await.is_some() {} };
            if tokio::time::timeout(DRAIN_TIMEOUT, drain).await.is_err() {
                warn!("In-flight conversations did not finish in time, aborting");
                tasks.abort_all();
            }
        }

        info!("Agent loop stopped");
        Ok(())
    }
}

/// Handle one event: request logging, error apology, reply publishing
async fn process_event(handler: Arc<ConversationHandler>, bus: MessageBus, msg: InboundMessage) {
    let span = info_span!("conversation", channel = %msg.channel, user_id = msg.user_id);
    async move {
        let started = Instant::now();
        let who = msg.username.as_deref().unwrap_or("-");
        match &msg.kind {
            MessageKind::Text => {
                info!("Text message from {} ({}): {}", msg.user_id, who, preview(&msg.content, 50))
            }
            MessageKind::Voice => info!("Voice message from {} ({})", msg.user_id, who),
            MessageKind::Command { name, .. } => {
                info!("Command /{} from {} ({})", name, msg.user_id, who)
            }
        }

        let replies = match handler.handle(&msg).await {
            Ok(replies) => replies,
            Err(e) => {
                error!("Error in handler: {}", e);
                vec![msg.reply(commands::UNEXPECTED_ERROR)]
            }
        };

        for reply in replies {
            if let Err(e) = bus.publish_outbound(reply) {
                error!("Failed to publish response: {}", e);
            }
        }

        info!("Handled in {:.2}s", started.elapsed().as_secs_f64());
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use vanilka_core::history::{HistoryStore, MemoryHistoryStore};
    use vanilka_providers::{LLMProvider, LLMResponse, Message, ProviderResult};

    use crate::context::ContextBuilder;

    struct EchoProvider;

    #[async_trait]
    impl LLMProvider for EchoProvider {
        async fn chat(
            &self,
            messages: Vec<Message>,
            _model: Option<String>,
            _max_tokens: u32,
            _temperature: f32,
        ) -> ProviderResult<LLMResponse> {
            let last = messages.last().map(|m| m.content.clone()).unwrap_or_default();
            Ok(LLMResponse {
                content: Some(format!("echo: {}", last)),
                finish_reason: "stop".to_string(),
                usage: HashMap::new(),
            })
        }

        fn get_default_model(&self) -> String {
            "echo".to_string()
        }
    }

    fn agent(store: Arc<MemoryHistoryStore>) -> (AgentLoop, MessageBus) {
        let bus = MessageBus::new();
        let handler = ConversationHandler::new(
            store,
            Arc::new(EchoProvider),
            Arc::new(ContextBuilder::default()),
        );
        (AgentLoop::new(bus.clone(), Arc::new(handler)), bus)
    }

    #[tokio::test]
    async fn test_replies_are_published() {
        let store = Arc::new(MemoryHistoryStore::new(10).unwrap());
        let (agent, bus) = agent(store.clone());
        let mut outbound = bus.take_outbound_receiver().await.unwrap();
        let runner = tokio::spawn(async move { agent.run().await });

        bus.publish_inbound(InboundMessage::text("telegram", 5, "5", "привет"))
            .unwrap();
        let reply = tokio::time::timeout(Duration::from_secs(5), outbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.content, "echo: привет");
        assert_eq!(reply.chat_id, "5");

        bus.stop();
        runner.await.unwrap().unwrap();
        assert_eq!(store.get_message_count(5).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_handler_error_becomes_apology() {
        let store = Arc::new(MemoryHistoryStore::new(10).unwrap());
        store.close().await;
        let (agent, bus) = agent(store);
        let mut outbound = bus.take_outbound_receiver().await.unwrap();
        let runner = tokio::spawn(async move { agent.run().await });

        bus.publish_inbound(InboundMessage::text("telegram", 5, "5", "привет"))
            .unwrap();
        let reply = tokio::time::timeout(Duration::from_secs(5), outbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.content, commands::UNEXPECTED_ERROR);

        bus.stop();
        runner.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_second_run_fails() {
        let store = Arc::new(MemoryHistoryStore::new(10).unwrap());
        let (agent, bus) = agent(store);
        bus.stop();
        agent.run().await.unwrap();
        assert!(agent.run().await.is_err());
    }
}
