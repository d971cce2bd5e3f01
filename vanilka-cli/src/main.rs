//! CLI entry point for vanilka

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use vanilka_agent::{AgentLoop, ContextBuilder, ConversationHandler, GenerationSettings};
use vanilka_channels::ChannelManager;
use vanilka_core::bus::{InboundMessage, MessageBus};
use vanilka_core::config::{validate_gateway, Config, ConfigLoader, LoggingConfig};
use vanilka_core::history::{
    DayBoundary, HistoryStore, HistoryStoreOptions, SqliteHistoryStore,
};
use vanilka_core::logging::init_logging;
use vanilka_core::transcript::TranscriptLogger;
use vanilka_core::utils::{mask_secret, preview};
use vanilka_providers::{KnowledgeBase, OpenAIClient, TranscriptionService};

#[derive(Parser)]
#[command(name = "vanilka")]
#[command(about = "Telegram assistant for the Vanilka bento cake shop")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration directory
    #[arg(short, long, global = true)]
    config_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the Telegram bot
    Gateway,
    /// Show history statistics
    Stats,
    /// Print the stored conversation window of a user
    History {
        /// Telegram user id
        #[arg(short, long)]
        user: i64,
    },
    /// Clear the stored conversation of a user
    Clear {
        /// Telegram user id
        #[arg(short, long)]
        user: i64,
    },
    /// List known user ids
    Users,
    /// Show the effective configuration
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config_loader = if let Some(dir) = cli.config_dir {
        ConfigLoader::with_dir(dir)
    } else {
        ConfigLoader::new()
    };
    let config = config_loader
        .load()
        .with_context(|| format!("Failed to load {}", config_loader.config_path().display()))?;

    // Maintenance commands only report problems, the gateway logs everything
    let _log_guard = match cli.command {
        Commands::Gateway => init_logging(&config.logging),
        _ => init_logging(&LoggingConfig {
            level: "warn".to_string(),
            ..config.logging.clone()
        }),
    };

    match cli.command {
        Commands::Gateway => {
            info!("Starting gateway");
            run_gateway(config).await?;
        }
        Commands::Stats => {
            let store = open_store(&config).await?;
            let result = run_stats(&store).await;
            store.close().await;
            result?;
        }
        Commands::History { user } => {
            let store = open_store(&config).await?;
            let result = run_history(&store, user).await;
            store.close().await;
            result?;
        }
        Commands::Clear { user } => {
            let store = open_store(&config).await?;
            let result = run_clear(&store, user).await;
            store.close().await;
            result?;
        }
        Commands::Users => {
            let store = open_store(&config).await?;
            let result = run_users(&store).await;
            store.close().await;
            result?;
        }
        Commands::Status => run_status(&config_loader, &config),
    }

    Ok(())
}

async fn open_store(config: &Config) -> Result<SqliteHistoryStore> {
    let day_boundary: DayBoundary = config.history.day_boundary.parse()?;
    let options = HistoryStoreOptions::new(&config.history.db_path, config.history.max_messages)
        .with_day_boundary(day_boundary);
    SqliteHistoryStore::open(options)
        .await
        .with_context(|| format!("Failed to open history database {}", config.history.db_path))
}

/// Run the bot until Ctrl+C. The store is closed on every exit path once
/// it has been opened.
async fn run_gateway(config: Config) -> Result<()> {
    validate_gateway(&config)?;

    let store = Arc::new(open_store(&config).await?);
    info!(
        "History database {} opened (window: {} messages)",
        config.history.db_path, config.history.max_messages
    );

    let result = serve(&config, store.clone()).await;
    store.close().await;
    info!("History database closed");
    result
}

async fn serve(config: &Config, store: Arc<SqliteHistoryStore>) -> Result<()> {
    println!("{}", style("Starting Vanilka...").bold().cyan());
    println!("Model: {}", config.assistant.model);
    println!("Database: {}", config.history.db_path);

    // Knowledge base first, so the very first answer already has it
    let context = Arc::new(ContextBuilder::new(config.assistant.system_prompt.clone()));
    let knowledge = KnowledgeBase::from_config(&config.knowledge);
    info!("Loading knowledge base...");
    let content = knowledge.load().await;
    if content.trim().is_empty() {
        warn!("Knowledge base is empty or failed to load");
    } else {
        context.update_knowledge_base(content);
    }

    let provider = Arc::new(OpenAIClient::from_config(
        &config.provider,
        &config.assistant.model,
    ));

    let mut handler = ConversationHandler::new(store, provider, context)
        .with_admins(config.admin.clone())
        .with_settings(GenerationSettings::from(&config.assistant));

    let transcription = TranscriptionService::from_config(&config.transcription);
    if transcription.is_configured() {
        handler = handler.with_speech(Arc::new(transcription));
    } else {
        warn!("Transcription API key not set, voice messages will not be recognised");
    }
    if config.history.transcripts {
        handler = handler.with_transcripts(TranscriptLogger::new(&config.history.transcript_dir));
    }

    let bus = MessageBus::new();
    let agent = AgentLoop::new(bus.clone(), Arc::new(handler));

    // Create and initialize channel manager
    let mut channel_manager = ChannelManager::new(config.clone());

    // Bridge channel inbound queue -> message bus inbound queue
    let (inbound_tx, mut inbound_rx) = mpsc::channel::<InboundMessage>(1024);
    channel_manager.set_inbound_sender(inbound_tx);
    let bus_for_inbound_bridge = bus.clone();
    let inbound_bridge_handle = tokio::spawn(async move {
        while let Some(msg) = inbound_rx.recv().await {
            if let Err(e) = bus_for_inbound_bridge.publish_inbound(msg) {
                error!("Failed to publish inbound message to bus: {}", e);
            }
        }
    });

    channel_manager
        .initialize()
        .await
        .context("Failed to initialize channels")?;

    let channel_manager = Arc::new(channel_manager);
    for channel_name in channel_manager.list_channels().await {
        let manager = channel_manager.clone();
        let channel_key = channel_name.clone();
        bus.subscribe_outbound(channel_name, move |msg| {
            let manager = manager.clone();
            let channel_key = channel_key.clone();
            async move {
                if let Err(e) = manager.send(&channel_key, msg).await {
                    error!("Failed to send outbound message to {}: {}", channel_key, e);
                }
            }
        })
        .await;
    }

    if let Err(e) = channel_manager.start_all().await {
        inbound_bridge_handle.abort();
        return Err(anyhow::Error::new(e).context("Failed to start channels"));
    }

    // Start outbound dispatcher loop
    let bus_for_outbound_dispatch = bus.clone();
    let outbound_dispatch_handle = tokio::spawn(async move {
        bus_for_outbound_dispatch.dispatch_outbound_loop().await;
    });

    let mut agent_handle = tokio::spawn(async move {
        if let Err(e) = agent.run().await {
            error!("Agent loop error: {}", e);
        }
    });

    println!(
        "\n{}",
        style("Bot is running. Press Ctrl+C to stop.").green()
    );

    let agent_finished = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl+C")?;
            false
        }
        _ = &mut agent_handle => true,
    };
    println!("\n{}", style("Shutting down...").yellow());

    // Stop the bus; the agent loop drains in-flight conversations
    bus.stop();
    if !agent_finished {
        if let Err(e) = agent_handle.await {
            error!("Agent loop task failed: {}", e);
        }
    }
    if let Err(e) = channel_manager.stop_all().await {
        error!("Failed to stop channels: {}", e);
    }

    inbound_bridge_handle.abort();
    let _ = inbound_bridge_handle.await;
    let _ = outbound_dispatch_handle.await;

    println!("{}", style("Bot stopped.").green());
    Ok(())
}

async fn run_stats(store: &dyn HistoryStore) -> Result<()> {
    let stats = store.get_stats().await?;

    println!("{}", style("History statistics").bold().cyan());
    println!("  Users: {}", stats.total_users);
    println!("  Messages: {}", stats.total_messages);
    println!("  From users: {}", stats.user_messages);
    println!("  Active today: {}", stats.active_today);
    Ok(())
}

async fn run_history(store: &dyn HistoryStore, user_id: i64) -> Result<()> {
    if let Some(user) = store.get_user(user_id).await? {
        println!(
            "{} (first seen {}, last seen {})",
            user.display_name.as_deref().unwrap_or("unnamed"),
            user.first_seen.format("%Y-%m-%d %H:%M UTC"),
            user.last_seen.format("%Y-%m-%d %H:%M UTC")
        );
    }
    let history = store.get_history(user_id).await?;
    if history.is_empty() {
        println!("No stored messages for user {}", user_id);
        return Ok(());
    }

    println!(
        "{}",
        style(format!(
            "User {}: {} of {} messages",
            user_id,
            history.len(),
            store.max_messages()
        ))
        .bold()
    );
    for entry in history {
        let role = format!("{:>9}", entry.role.as_str());
        let role = match entry.role {
            vanilka_core::history::Role::User => style(role).cyan(),
            vanilka_core::history::Role::Assistant => style(role).magenta(),
        };
        println!("{} {}", role, preview(&entry.content, 200));
    }
    Ok(())
}

async fn run_clear(store: &dyn HistoryStore, user_id: i64) -> Result<()> {
    let removed = store.clear_history(user_id).await?;
    println!("Removed {} messages for user {}", removed, user_id);
    Ok(())
}

async fn run_users(store: &dyn HistoryStore) -> Result<()> {
    let ids = store.list_user_ids().await?;
    if ids.is_empty() {
        println!("No users yet");
    }
    for id in ids {
        println!("{}", id);
    }
    Ok(())
}

fn run_status(loader: &ConfigLoader, config: &Config) {
    println!("{}", style("Vanilka Status").bold().cyan());
    println!("Version: {}\n", env!("CARGO_PKG_VERSION"));

    println!("{}", style("Configuration:").bold());
    println!("  Config file: {}", loader.config_path().display());
    println!("  Model: {}", config.assistant.model);
    println!(
        "  Generation: max_tokens {}, temperature {}",
        config.assistant.max_tokens, config.assistant.temperature
    );
    println!(
        "  System prompt: {}",
        if config.assistant.system_prompt.is_some() {
            "custom"
        } else {
            "built-in"
        }
    );
    println!();

    println!("{}", style("Secrets:").bold());
    println!("  Telegram token: {}", mask_secret(&config.telegram.token));
    println!("  Provider API key: {}", mask_secret(&config.provider.api_key));
    println!(
        "  Transcription API key: {}",
        mask_secret(&config.transcription.api_key)
    );
    println!();

    println!("{}", style("Services:").bold());
    let telegram = if config.telegram.enabled {
        style("enabled").green()
    } else {
        style("disabled").dim()
    };
    println!("  Telegram: {}", telegram);
    println!(
        "  Provider base: {}",
        config
            .provider
            .api_base
            .as_deref()
            .unwrap_or(vanilka_providers::openai::DEFAULT_API_BASE)
    );
    println!(
        "  Transcription: {} ({})",
        config.transcription.model, config.transcription.api_url
    );
    let knowledge = match (&config.knowledge.source_url, config.knowledge.file_id.as_str()) {
        (Some(url), _) if !url.trim().is_empty() => url.clone(),
        (_, id) if !id.trim().is_empty() => format!("Google Drive file {}", id),
        _ => "cache only".to_string(),
    };
    println!("  Knowledge base: {}", knowledge);
    println!("  Knowledge cache: {}", config.knowledge.cache_path);
    println!(
        "  Admins: {}",
        if config.admin.user_ids.is_empty() {
            "none".to_string()
        } else {
            config
                .admin
                .user_ids
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        }
    );
    println!();

    println!("{}", style("History:").bold());
    println!("  Database: {}", config.history.db_path);
    println!("  Window: {} messages", config.history.max_messages);
    println!("  Day boundary: {}", config.history.day_boundary);
    println!(
        "  Transcripts: {}",
        if config.history.transcripts {
            config.history.transcript_dir.as_str()
        } else {
            "off"
        }
    );
}
