//! NBP MCP Server - Rust Implementation
//!
//! A Model Context Protocol (MCP) server for NBP exchange rates and gold
//! prices, billed per call against a token ledger.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use nbp_mcp_server::auth::{generate_api_key, hash_secret, ApiKeyAuthenticator, SessionAuthenticator};
use nbp_mcp_server::config::Config;
use nbp_mcp_server::http::{self, AppState};
use nbp_mcp_server::ledger::SqliteLedger;
use nbp_mcp_server::mcp::{ApiKeyAdapter, OAuthAdapter, ProtocolAdapter, ServerFactory};
use nbp_mcp_server::nbp::client::NbpClient;

/// NBP MCP Server
#[derive(Parser)]
#[command(name = "nbp-mcp-server")]
#[command(author, version, about = "NBP MCP Server - exchange rates and gold prices over MCP")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve both MCP endpoints over HTTP (default)
    Serve,
    /// Serve one caller over stdin/stdout, authenticated with NBP_MCP_API_KEY
    Stdio,
    /// Create the ledger schema
    InitDb,
    /// Issue an API key for an existing account
    CreateApiKey {
        #[arg(long)]
        user_id: String,
        #[arg(long, default_value = "default")]
        label: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging; stdout belongs to the stdio transport
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Load configuration
    let config = Config::new().context("Failed to load configuration")?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Stdio => stdio(config).await,
        Commands::InitDb => {
            let ledger = open_ledger(&config).await?;
            eprintln!("Ledger ready at {}", ledger.path().display());
            Ok(())
        }
        Commands::CreateApiKey { user_id, label } => {
            let ledger = open_ledger(&config).await?;
            let key = generate_api_key();
            ledger
                .insert_api_key(&user_id, &hash_secret(&key), &label)
                .await
                .with_context(|| format!("Failed to create API key for user {}", user_id))?;
            eprintln!("API key for {} (shown once):", user_id);
            println!("{}", key);
            Ok(())
        }
    }
}

async fn open_ledger(config: &Config) -> Result<SqliteLedger> {
    SqliteLedger::open(&config.database_path)
        .await
        .with_context(|| format!("Failed to open ledger at {}", config.database_path.display()))
}

fn factory(config: &Config, ledger: &SqliteLedger) -> Result<Arc<ServerFactory>> {
    let client = NbpClient::new(config.nbp_base_url.clone(), config.nbp_timeout)
        .context("Failed to build NBP client")?;
    Ok(Arc::new(ServerFactory::new(
        Arc::new(ledger.clone()),
        Arc::new(client),
        config,
    )))
}

async fn serve(config: Config) -> Result<()> {
    let ledger = open_ledger(&config).await?;
    let factory = factory(&config, &ledger)?;

    let state = AppState {
        api_key: Arc::new(ApiKeyAdapter::new(
            ApiKeyAuthenticator::new(ledger.clone()),
            Arc::clone(&factory),
        )),
        oauth: Arc::new(OAuthAdapter::new(SessionAuthenticator::new(ledger), factory)),
    };

    http::serve(config.bind_addr, state)
        .await
        .with_context(|| format!("HTTP transport on {} failed", config.bind_addr))
}

async fn stdio(config: Config) -> Result<()> {
    let api_key = config.require_api_key()?.to_string();
    let ledger = open_ledger(&config).await?;
    let factory = factory(&config, &ledger)?;

    let adapter = ApiKeyAdapter::new(ApiKeyAuthenticator::new(ledger), factory);
    let server = adapter
        .connect(&api_key)
        .await
        .context("NBP_MCP_API_KEY was rejected")?;
    tracing::info!(user_id = %server.caller().user_id, "serving MCP over stdio");

    server.run_stdio().await?;
    Ok(())
}
