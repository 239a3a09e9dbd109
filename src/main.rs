use nutribox::api::{self, AppState};
use nutribox::clock::{Clock, SystemClock};
use nutribox::commands::CommandHandler;
use nutribox::config::{AppConfig, ServerConfig};
use nutribox::database::{Database, KeyValueStore};
use nutribox::food::api::{
    CredentialProvider, RecognitionClient, RecognitionCredential, StaticCredential, SubscriptionClient,
};
use nutribox::food::{AnalysisOrchestrator, HistoryStore, QuotaTracker};
use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use dotenv::dotenv;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::Editor;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Run the account and subscription service instead of the client
    #[arg(long)]
    api: bool,

    #[arg(long)]
    port: Option<u16>,

    /// SQLite file for local state (client) or accounts (server)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Base URL of the subscription service
    #[arg(long)]
    server_url: Option<String>,

    /// Session token from an earlier login
    #[arg(long)]
    token: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize colored output
    colored::control::set_override(true);

    // Load environment variables
    dotenv().ok();

    let args = Args::parse();

    if args.api {
        tracing_subscriber::fmt().init();
        run_api_server(args).await
    } else {
        env_logger::init();
        run_cli_mode(args).await
    }
}

async fn run_cli_mode(args: Args) -> Result<()> {
    let mut config = AppConfig::from_env()?;
    if let Some(db) = args.db {
        config.db_path = db;
    }
    if let Some(url) = args.server_url {
        config.server_url = url;
    }

    let db = Database::new(&config.db_path)
        .await
        .with_context(|| format!("Failed to open {}", config.db_path.display()))?;
    let store: Arc<dyn KeyValueStore> = Arc::new(db);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let mut subscription = SubscriptionClient::new(&config.server_url)?;
    if let Some(token) = args.token {
        subscription = subscription.with_token(token);
    }
    let subscription = Arc::new(subscription);

    let credentials: Arc<dyn CredentialProvider> = match &config.food.static_api_key {
        Some(key) => {
            log::warn!("Using NUTRIBOX_DEV_RECOGNITION_KEY from the environment; intended for development only");
            Arc::new(StaticCredential(RecognitionCredential {
                api_key: key.clone(),
                host: config.food.recognition_host.clone(),
            }))
        }
        None => subscription.clone(),
    };

    let orchestrator = AnalysisOrchestrator::new(
        QuotaTracker::with_limit(store.clone(), clock.clone(), config.food.free_daily_limit),
        HistoryStore::new(store, clock.clone()),
        Arc::new(RecognitionClient::new(&config.food, credentials)),
        clock,
    );
    let mut command_handler = CommandHandler::new(orchestrator, subscription);

    // Show initial help menu
    command_handler.handle_command("help").await.map_err(anyhow::Error::msg)?;

    let mut rl = Editor::<(), DefaultHistory>::new()?;

    // Main input loop
    loop {
        match rl.readline("🥗 ") {
            Ok(line) => {
                let input = line.trim();
                if input == "exit" || input == "quit" {
                    break;
                }
                let _ = rl.add_history_entry(input);

                if let Err(e) = command_handler.handle_command(input).await {
                    println!("{}", e.red());
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("CTRL-C");
                break;
            }
            Err(ReadlineError::Eof) => {
                println!("CTRL-D");
                break;
            }
            Err(err) => {
                println!("Error: {:?}", err);
                break;
            }
        }
    }
    Ok(())
}

async fn run_api_server(args: Args) -> Result<()> {
    let mut config = ServerConfig::from_env()?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(db) = args.db {
        config.db_path = db;
    }
    if config.recognition_api_key.is_none() {
        tracing::warn!("RECOGNITION_API_KEY not set; /recognition/credential will answer 503");
    }

    let addr: SocketAddr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Starting API server on {}", addr);

    let db = Database::new(&config.db_path)
        .await
        .with_context(|| format!("Failed to open {}", config.db_path.display()))?;
    let app = api::create_api(AppState::new(db, config, Arc::new(SystemClock)));

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    tracing::info!("Ready to accept connections!");

    axum::serve(listener, app)
        .await
        .context("Server error")?;

    Ok(())
}
