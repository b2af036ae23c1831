use anyhow::Result;
use bunq_core::keystore::{self, KeyStore};
use bunq_core::session::next_missing_stage;
use bunq_core::{BunqClient, ClientConfig};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about = "Command-line access to the bunq API", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show keystore location and bootstrap progress
    Status,
    /// Bootstrap a session now instead of lazily on first use
    Init,
    /// List monetary accounts
    Accounts,
    /// List payments for one account, newest first
    Payments {
        #[arg(long)]
        account_id: i64,
        /// Only show payments created after this RFC 3339 timestamp
        #[arg(long)]
        since: Option<DateTime<Utc>>,
    },
    /// Manage notification callback URLs
    Callbacks {
        #[command(subcommand)]
        action: CallbackAction,
    },
    /// Swap in a new personal access token and rebuild all derived state
    ExchangePat { token: String },
}

#[derive(Subcommand, Debug)]
enum CallbackAction {
    /// List registered callback URLs
    List,
    /// Register a callback URL for payment mutations
    Add { url: String },
    /// Remove a callback URL
    Remove { url: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Status => status_command(),
        Commands::Init => init_command().await,
        Commands::Accounts => accounts_command().await,
        Commands::Payments { account_id, since } => payments_command(account_id, since).await,
        Commands::Callbacks { action } => callbacks_command(action).await,
        Commands::ExchangePat { token } => exchange_pat_command(token).await,
    }
}

fn client_from_env() -> Result<BunqClient> {
    Ok(BunqClient::new(ClientConfig::from_env()?)?)
}

fn status_command() -> Result<()> {
    let config = ClientConfig::from_env()?;
    let store = KeyStore::new(config.keystore_path.clone());
    println!("environment: {}", config.environment);
    println!("keystore:    {}", config.keystore_path.display());
    match next_missing_stage(&store, Utc::now())? {
        Some(stage) => println!("next step:   {stage}"),
        None => {
            println!("session:     active");
            if let Some(expires_at) = store.get_str(keystore::SESSION_EXPIRES_AT)? {
                println!("expires at:  {expires_at}");
            }
            if let Some(user_id) = store.get(keystore::SESSION_USER_ID)? {
                println!("user id:     {user_id}");
            }
        }
    }
    Ok(())
}

async fn init_command() -> Result<()> {
    let client = client_from_env()?;
    client.ensure_session_active().await?;
    let user_id = client.user_id().await?;
    println!("session active for user {user_id}");
    Ok(())
}

async fn accounts_command() -> Result<()> {
    let client = client_from_env()?;
    let accounts = client.accounts().await?;
    println!("{}", serde_json::to_string_pretty(&accounts)?);
    Ok(())
}

async fn payments_command(account_id: i64, since: Option<DateTime<Utc>>) -> Result<()> {
    let client = client_from_env()?;
    let payments = client.payments_for_account(account_id, since).await?;
    println!("{}", serde_json::to_string_pretty(&payments)?);
    Ok(())
}

async fn callbacks_command(action: CallbackAction) -> Result<()> {
    let client = client_from_env()?;
    match action {
        CallbackAction::List => {
            let callbacks = client.callbacks().await?;
            println!("{}", serde_json::to_string_pretty(&callbacks)?);
        }
        CallbackAction::Add { url } => {
            client.add_callback(&url).await?;
            println!("callback registered: {url}");
        }
        CallbackAction::Remove { url } => {
            client.remove_callback(&url).await?;
            println!("callback removed: {url}");
        }
    }
    Ok(())
}

async fn exchange_pat_command(token: String) -> Result<()> {
    let client = client_from_env()?;
    client.exchange_pat(&token).await?;
    println!("token exchanged; new installation and session are in place");
    println!("revoke the previous token in the bunq app if you have not already");
    Ok(())
}
