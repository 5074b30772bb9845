//! Main Entrypoint for the FinBuddy Terminal Client
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment and the command line.
//! 2. Opening the control channel and forwarding its redirects.
//! 3. Building the chat and voice controllers for this visit.
//! 4. Reading user input until `/quit` or `Ctrl+C`, then tearing down.

use anyhow::{Context, bail};
use clap::Parser;
use finbuddy_client::{
    chat::{ChatSessionController, ExchangeOutcome},
    config::Config,
    state::ClientContext,
    voice::VoiceSessionController,
    ws::ConnectionManager,
};
use finbuddy_core::{
    credentials::HttpCredentialIssuer,
    message::Sender,
    room::LoopbackRoomConnector,
    voice::VoiceState,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

/// FinBuddy terminal client.
#[derive(Parser, Debug)]
#[command(name = "finbuddy", version, about = "FinBuddy terminal client")]
struct Cli {
    /// Visitor identity (overrides `USER_ID`).
    #[arg(long)]
    user_id: Option<String>,

    /// Base URL of the agent API (overrides `API_URL`).
    #[arg(long)]
    api_url: Option<String>,
}

/// Listens for the `Ctrl+C` signal to shut down gracefully.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

const HELP: &str =
    "Commands: /voice, /stop, /mute, /unmute, /quit. Anything else is sent as chat.";

async fn handle_command(
    line: &str,
    chat: &ChatSessionController,
    voice: &VoiceSessionController,
) {
    let result = match line {
        "/voice" => voice.start().await,
        "/stop" => voice.stop().await,
        "/mute" => voice.set_muted(true).await,
        "/unmute" => voice.set_muted(false).await,
        "/help" => {
            println!("{HELP}");
            Ok(())
        }
        text => {
            let chat = chat.clone();
            let text = text.to_string();
            // Chat runs in the background so voice commands stay responsive.
            tokio::spawn(async move {
                match chat.send(&text).await {
                    Ok(ExchangeOutcome::Failed { error }) => warn!(%error, "Chat failed"),
                    Ok(_) => {}
                    Err(e) => println!("! {e}"),
                }
            });
            Ok(())
        }
    };
    if let Err(e) = result {
        println!("! {e}");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let cli = Cli::parse();
    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(user_id) = cli.user_id {
        config.user_id = user_id;
    }
    if let Some(api_url) = cli.api_url {
        if !(api_url.starts_with("http://") || api_url.starts_with("https://")) {
            bail!("--api-url must start with http:// or https://");
        }
        config.api_url = api_url.trim_end_matches('/').to_string();
    }

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();
    info!(user_id = %config.user_id, api_url = %config.api_url, "Configuration loaded");

    let context = ClientContext::new(config);

    // --- 3. Control Channel ---
    let connection = ConnectionManager::spawn(
        context.config.control_channel_url(),
        context.config.reconnect_delay,
    );
    let forwarder = connection.forward_redirects(context.navigator());

    // --- 4. Controllers ---
    let chat = ChatSessionController::new(&context);
    let issuer = Arc::new(HttpCredentialIssuer::new(
        context.http.clone(),
        context.config.api_url.clone(),
        context.config.agent_dispatch,
    ));
    let voice =
        VoiceSessionController::new(&context, issuer, Arc::new(LoopbackRoomConnector::new()));

    // --- 5. Printers ---
    let mut routes = context.routes.subscribe();
    tokio::spawn(async move {
        while routes.changed().await.is_ok() {
            let route = routes.borrow_and_update().clone();
            println!("→ {route}");
        }
    });

    let mut messages = chat.subscribe();
    tokio::spawn(async move {
        while messages.changed().await.is_ok() {
            let snapshot = messages.borrow_and_update().clone();
            if let Some(last) = snapshot.last() {
                if last.sender == Sender::Assistant && !last.text.is_empty() {
                    let at = last.timestamp.with_timezone(&chrono::Local).format("%H:%M");
                    println!("[{at}] assistant: {}", last.text);
                }
            }
        }
    });

    let mut sessions = voice.subscribe();
    let acknowledger = voice.clone();
    tokio::spawn(async move {
        while sessions.changed().await.is_ok() {
            let session = sessions.borrow_and_update().clone();
            match session.state {
                VoiceState::Error => {
                    println!("voice: error: {}", session.error.unwrap_or_default());
                    if let Err(e) = acknowledger.acknowledge().await {
                        warn!(error = %e, "Failed to acknowledge voice error");
                    }
                }
                state => {
                    let muted = if session.muted { " (muted)" } else { "" };
                    println!("voice: {state}{muted}");
                }
            }
        }
    });

    // --- 6. Input Loop ---
    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line == "/quit" {
                        break;
                    }
                    if !line.is_empty() {
                        handle_command(line, &chat, &voice).await;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!("Failed to read input: {}", e);
                    break;
                }
            },
        }
    }

    // --- 7. Teardown ---
    voice.shutdown().await;
    connection.shutdown().await;
    forwarder.abort();
    info!("Client has shut down.");
    Ok(())
}
