use anyhow::{Context, Result};
use clap::Parser;
use colloquy_core::config::{ColloquyConfig, ConfigLoader};
use colloquy_core::tools::calculator_tool;
use colloquy_core::{
    create_provider, ChatSession, ClientAction, ConversationStore, InMemoryStore, JsonFileStore,
    Message, Orchestrator, PooledExecutor, SessionSettings, ToolDispatcher, ToolSet, UserMessage,
};
use log::LevelFilter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

mod console;

use console::ConsoleSink;

#[derive(Parser, Debug)]
#[clap(name = "colloquy", author, version = "0.1.0", about = "Colloquy conversation runner")]
struct Cli {
    #[clap(long, short, default_value = "colloquy.yaml", help = "Configuration file")]
    config: PathBuf,

    #[clap(
        long,
        help = "JSON file holding the conversation; it is replayed and resumed if it exists"
    )]
    conversation: Option<PathBuf>,

    #[clap(long, short, help = "Log level (overrides logging.level from the config)")]
    log_level: Option<String>,
}

/// Splits a conversation file path into a store directory and conversation id.
fn store_location(path: &Path) -> Result<(PathBuf, String)> {
    let id = path
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .with_context(|| format!("Invalid conversation file '{}'", path.display()))?
        .to_string();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((dir, id))
}

fn init_logging(cli: &Cli, config: &ColloquyConfig) -> Result<()> {
    let level = match &cli.log_level {
        Some(level) => level
            .parse::<LevelFilter>()
            .with_context(|| format!("Invalid log level '{}'", level))?,
        None => config.logging.level_filter()?,
    };
    env_logger::Builder::new().filter_level(level).init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::from_file(&cli.config)
        .await
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    init_logging(&cli, &config)?;
    log::info!("Configuration loaded from {}", cli.config.display());

    let provider = create_provider(&config.llm, &config.retry)?;
    let executor = Arc::new(PooledExecutor::from_config(&config.tools));
    let dispatcher = ToolDispatcher::new(executor).with_debug(config.orchestration.debug);
    let orchestrator = Arc::new(Orchestrator::new(provider, dispatcher));
    let tools = Arc::new(ToolSet::from_tools([calculator_tool()])?);

    let (store, id): (Arc<dyn ConversationStore>, String) = match &cli.conversation {
        Some(path) => {
            let (dir, id) = store_location(path)?;
            (Arc::new(JsonFileStore::new(dir)), id)
        }
        None => (
            Arc::new(InMemoryStore::new()),
            uuid::Uuid::new_v4().simple().to_string(),
        ),
    };

    let mut sink = ConsoleSink::new(std::io::stdout());
    let mut session = ChatSession::connect(
        id,
        store,
        orchestrator,
        tools,
        SessionSettings::from(&config),
        &mut sink,
    )
    .await?;

    println!("Type a message, '/rate <1-5>' to rate the last answer, or '/quit' to exit.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }

        let action = if let Some(rating) = line.strip_prefix("/rate") {
            let Some(target) = session
                .conversation()
                .messages()
                .iter()
                .rev()
                .find(|m| matches!(m, Message::Assistant(_)))
                .map(Message::id)
            else {
                println!("Nothing to rate yet.");
                continue;
            };
            let Ok(rating) = rating.trim().parse::<u8>() else {
                println!("Usage: /rate <1-5>");
                continue;
            };
            ClientAction::Rate {
                uuid: target,
                rating,
            }
        } else {
            ClientAction::Append {
                message: UserMessage::new(line),
                collections: Vec::new(),
            }
        };

        session.handle(action, &mut sink).await?;
    }

    log::info!("Session '{}' closed", session.id());
    Ok(())
}
