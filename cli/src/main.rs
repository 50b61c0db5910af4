//! Newsroom CLI client

mod client;
mod messages;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

use crate::client::NewsroomClient;
use crate::messages::ServerEvent;

#[derive(Parser)]
#[command(name = "newsroom-cli")]
#[command(about = "CLI client for the newsroom collaboration server")]
#[command(version)]
struct Cli {
    /// Server URL
    #[arg(short, long, env = "NEWSROOM_URL", default_value = "ws://localhost:3000/ws")]
    server: String,

    /// Identity to act as
    #[arg(short, long, env = "NEWSROOM_USER", default_value = "cli")]
    user: String,

    /// Role to join with
    #[arg(short, long, env = "NEWSROOM_ROLE", default_value = "writer")]
    role: String,

    /// Display name shown to other participants
    #[arg(short = 'n', long, default_value = "CLI User")]
    name: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Join a document and print every event
    Watch {
        /// Document ID
        document: String,
    },

    /// Lock a block, replace its content, then release it
    Edit {
        document: String,
        block: String,
        /// New content; parsed as JSON when possible, otherwise sent as a string
        content: String,
        /// Persist the document after editing
        #[arg(long)]
        save: bool,
    },

    /// Record an approval decision
    Approve {
        document: String,
        /// approve, reject or request_changes
        #[arg(value_parser = ["approve", "reject", "request_changes"])]
        action: String,
    },

    /// Add a comment to a document
    Comment { document: String, text: String },

    /// Show server-wide session statistics
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "newsroom_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Watch { document } => run_watch(&cli, document).await,
        Commands::Edit {
            document,
            block,
            content,
            save,
        } => run_edit(&cli, document, block, content, *save).await,
        Commands::Approve { document, action } => run_approve(&cli, document, action).await,
        Commands::Comment { document, text } => run_comment(&cli, document, text).await,
        Commands::Stats => run_stats(&cli.server).await,
    }
}

async fn connect(cli: &Cli, document: &str) -> Result<NewsroomClient> {
    let mut client = NewsroomClient::connect(&cli.server, document, &cli.user).await?;
    let state = client.join(&cli.role, &cli.name).await?;
    println!("{}", state.describe());
    Ok(client)
}

async fn run_watch(cli: &Cli, document: &str) -> Result<()> {
    let mut client = connect(cli, document).await?;

    client
        .listen(|event| {
            println!("{}", event.describe());
            !matches!(event, ServerEvent::Disconnected { .. })
        })
        .await
}

async fn run_edit(cli: &Cli, document: &str, block: &str, content: &str, save: bool) -> Result<()> {
    let mut client = connect(cli, document).await?;

    let content = serde_json::from_str(content)
        .unwrap_or_else(|_| serde_json::Value::String(content.to_string()));

    client.acquire(block).await?;
    let version = client.edit(block, content).await;
    client.release(block).await?;
    println!("Updated {} to version {}", block, version?);

    if save {
        let url = http_base(&cli.server)?.join(&format!("documents/{}/save", document))?;
        let response = reqwest::Client::new()
            .post(url)
            .json(&serde_json::json!({"userId": cli.user}))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(anyhow!("Save failed: {}", response.text().await?));
        }
        println!("Saved {}", document);
    }

    Ok(())
}

async fn run_approve(cli: &Cli, document: &str, action: &str) -> Result<()> {
    let mut client = connect(cli, document).await?;
    let status = client.approve(action).await?;
    println!("Document {} is now {}", document, status);
    Ok(())
}

async fn run_comment(cli: &Cli, document: &str, text: &str) -> Result<()> {
    let mut client = connect(cli, document).await?;
    let id = client.comment(text).await?;
    println!("Added comment #{}", id);
    Ok(())
}

async fn run_stats(server: &str) -> Result<()> {
    let url = http_base(server)?.join("admin/stats")?;
    let stats: serde_json::Value = reqwest::get(url).await?.error_for_status()?.json().await?;

    println!("Sessions:");
    println!("{:─<40}", "");
    for key in [
        "activeSessions",
        "participants",
        "lockedBlocks",
        "queuedRequests",
        "comments",
    ] {
        println!("  {:<16} {}", key, stats[key]);
    }
    if let Some(by_status) = stats["sessionsByStatus"].as_object() {
        for (status, count) in by_status {
            println!("  {:<16} {}", status, count);
        }
    }

    Ok(())
}

/// HTTP root of the server behind a `ws://` or `wss://` URL
fn http_base(server: &str) -> Result<Url> {
    let mut url = Url::parse(server)?;
    let scheme = match url.scheme() {
        "ws" => "http",
        "wss" => "https",
        "http" | "https" => url.scheme(),
        other => return Err(anyhow!("Unsupported scheme: {}", other)),
    }
    .to_string();
    url.set_scheme(&scheme)
        .map_err(|_| anyhow!("Cannot use scheme {}", scheme))?;
    url.set_path("/");
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_base_from_ws() {
        let url = http_base("ws://localhost:3000/ws").unwrap();
        assert_eq!(url.as_str(), "http://localhost:3000/");
        assert_eq!(
            url.join("admin/stats").unwrap().as_str(),
            "http://localhost:3000/admin/stats"
        );
    }

    #[test]
    fn test_http_base_secure() {
        let url = http_base("wss://news.example.com/ws").unwrap();
        assert_eq!(url.as_str(), "https://news.example.com/");
    }

    #[test]
    fn test_http_base_rejects_other_schemes() {
        assert!(http_base("ftp://example.com").is_err());
    }
}
