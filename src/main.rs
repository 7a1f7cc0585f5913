//! lsp-bridge: hosts the LSP client behind a line-based JSON bridge
//!
//! Commands arrive on stdin, events leave on stdout, logs go to stderr.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

use lsp_bridge::bridge::{BridgeEvent, EditorBridge};
use lsp_bridge::config::{default_config_path, load_config};
use lsp_bridge::editor::ProviderRegistry;
use lsp_bridge::lsp::{LspClient, WsConnector};

/// Bridge an editor host to a WebSocket language server
#[derive(Parser, Debug)]
#[command(name = "lsp-bridge")]
#[command(version)]
#[command(about, long_about = None)]
struct Cli {
    /// Language server endpoint as host:port (overrides config and LSP_HOST)
    #[arg(short, long)]
    endpoint: Option<String>,

    /// Path to the JSON config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Language id the providers register for
    #[arg(long)]
    language_id: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    lsp_bridge::log::init().context("failed to initialize logging")?;

    let config_path = cli.config.unwrap_or_else(default_config_path);
    let mut config = load_config(&config_path);
    if let Some(language_id) = cli.language_id {
        config.language_id = language_id;
    }
    let endpoint = cli.endpoint.unwrap_or_else(|| config.lsp_host.clone());
    info!(config = %config_path.display(), %endpoint, language = %config.language_id, "starting");

    let registry = ProviderRegistry::new();
    let client = LspClient::new(
        config.client_config(),
        Arc::new(WsConnector::new()),
        Arc::new(registry.clone()),
    );
    client.set_snippets(config.snippets.clone());

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_events(events_rx));

    let mut bridge = EditorBridge::new(client.clone(), registry, events_tx);
    client.connect(&endpoint);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        if bridge.handle_line(&line).await.is_break() {
            break;
        }
    }

    client.destroy();
    drop(bridge);
    writer.await.context("event writer panicked")??;
    info!("stopped");
    Ok(())
}

async fn write_events(mut events: mpsc::UnboundedReceiver<BridgeEvent>) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    while let Some(event) = events.recv().await {
        let mut line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(e) => {
                warn!("could not encode event: {}", e);
                continue;
            }
        };
        line.push('\n');
        stdout.write_all(line.as_bytes()).await?;
        stdout.flush().await?;
    }
    Ok(())
}
