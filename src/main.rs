use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use repurposely::{
    chat, constants,
    dispatcher::{DispatchSettings, Dispatcher},
    llm_interaction::{ModelSettings, OpenAiCompatibleClient},
    persistence::PersistenceSink,
    session::{FixedSession, Session},
    store::JsonFileChatStore,
    web_server::{self, AppState},
};

// Define the command-line interface structure using clap
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Directory holding saved chats.
    #[arg(long, global = true, env = "REPURPOSELY_DATA_DIR", default_value_t = constants::DATA_DIR.clone())]
    data_dir: String,

    /// Model identifier sent to the chat-completion endpoint.
    #[arg(long, global = true, env = "REPURPOSELY_MODEL", default_value_t = constants::MODEL_NAME.clone())]
    model: String,

    /// Seconds to wait for a complete model response.
    #[arg(long, global = true, value_parser = clap::value_parser!(u64).range(1..))]
    response_timeout: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

// Define the available subcommands
#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Serve the writing assistant over HTTP.
    Serve {
        #[arg(long, default_value_t = 9900, help = "Port for the web server.")]
        port: u16,
        #[arg(long, env = "REPURPOSELY_USER_HEADER", default_value_t = constants::USER_HEADER.clone(), help = "Trusted header carrying the signed-in user id.")]
        user_header: String,
    },
    /// Chat with the writing assistant in the terminal.
    Chat {
        #[arg(long, help = "Resume a saved chat by id.")]
        chat_id: Option<String>,
        #[arg(long, help = "User id to save the chat under; omit to chat anonymously.")]
        user: Option<String>,
    },
    /// List saved chats for a user.
    History {
        #[arg(long)]
        user: String,
    },
}

async fn build_dispatcher(cli: &Cli) -> Result<Dispatcher> {
    let store = JsonFileChatStore::open(PathBuf::from(&cli.data_dir))
        .await
        .with_context(|| format!("Failed to open chat store at {}", cli.data_dir))?;
    let client = OpenAiCompatibleClient::new(ModelSettings::from_env())
        .context("Failed to build model client")?;

    let mut settings = DispatchSettings::from_env();
    settings.model = cli.model.clone();
    if let Some(secs) = cli.response_timeout {
        settings.response_timeout = Duration::from_secs(secs);
    }

    Ok(Dispatcher::new(
        Arc::new(client),
        PersistenceSink::new(Arc::new(store)),
        settings,
    ))
}

// The main entry point of the application, using tokio's async runtime
#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (for OPENAI_API_KEY and friends)
    dotenvy::dotenv().ok();

    // Reads log level from RUST_LOG environment variable (e.g., RUST_LOG=info,repurposely=debug)
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    info!("Repurposely starting with command: {:?}", cli.command);

    if constants::MODEL_API_KEY.is_empty() && !matches!(cli.command, Commands::History { .. }) {
        error!("OPENAI_API_KEY is not set; model requests will be rejected");
    }

    let dispatcher = build_dispatcher(&cli).await?;

    match &cli.command {
        Commands::Serve { port, user_header } => {
            let state = AppState::new(dispatcher, user_header.as_str())?;
            let mut web_server_handle =
                tokio::spawn(web_server::start_web_server(*port, state));

            let ctrl_c = tokio::signal::ctrl_c();
            tokio::pin!(ctrl_c);

            tokio::select! {
                _ = &mut ctrl_c => {
                    info!("Ctrl-C received, initiating shutdown...");
                }
                res = &mut web_server_handle => {
                    match res {
                        Ok(Ok(())) => info!("Web server task completed unexpectedly."),
                        Ok(Err(e)) => error!("Web server failed: {:?}", e),
                        Err(e) if e.is_panic() => error!("Web server task panicked: {:?}", e),
                        Err(e) => error!("Web server task failed: {:?}", e),
                    }
                }
            }

            if !web_server_handle.is_finished() {
                info!("Aborting web server task...");
                web_server_handle.abort();
            }
            info!("Shutdown complete.");
        }
        Commands::Chat { chat_id, user } => {
            let sessions = FixedSession::from(user.clone().map(Session::new));
            chat::run_terminal_chat(dispatcher, &sessions, chat_id.as_deref())
                .await
                .context("Chat session failed")?;
            info!("Chat session finished.");
        }
        Commands::History { user } => {
            let session = Session::new(user.clone());
            let chats = dispatcher
                .persistence()
                .list(Some(&session))
                .await
                .context("Failed to list chats")?;
            if chats.is_empty() {
                println!("No saved chats for {}.", user);
            }
            for chat in chats {
                println!(
                    "{}  {}  {}",
                    chat.id,
                    chat.created_at.format("%Y-%m-%d %H:%M"),
                    chat.title
                );
            }
        }
    }

    Ok(())
}
