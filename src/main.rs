//! Pipeline Mirror - terminal front end
//!
//! Connects one session to the pipeline server, sends each stdin line as a
//! message and prints assistant replies as they are finalized.

use pipeline_mirror::store::{Role, StoreSnapshot};
use pipeline_mirror::{ConnectionStatus, MirrorClient, MirrorConfig, WsConnector};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::WatchStream;
use tokio_stream::StreamExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging; stdout is reserved for the conversation
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pipeline_mirror=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = MirrorConfig::from_env();
    tracing::info!(
        server_url = %config.server_url,
        max_reconnect_attempts = config.max_reconnect_attempts,
        "Loaded configuration"
    );

    let (client, runtime) = MirrorClient::spawn(&config, WsConnector::new())?;
    tracing::info!(session_id = %client.session_id(), "Session created");

    let printer = tokio::spawn(print_updates(WatchStream::new(client.subscribe())));
    client.connect().await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                handle_line(&client, line.trim()).await?;
            }
        }
    }

    client.shutdown().await?;
    runtime.await?;
    printer.abort();
    Ok(())
}

async fn handle_line(client: &MirrorClient, line: &str) -> Result<(), Box<dyn std::error::Error>> {
    match line {
        "" => {}
        "/reset" => client.reset().await?,
        "/connect" => client.connect().await?,
        "/disconnect" => client.disconnect().await?,
        text => {
            if !client.send_message(text).await {
                println!("! not connected, message dropped");
            }
        }
    }
    Ok(())
}

/// Print connection changes, server errors and finalized assistant replies
async fn print_updates(mut snapshots: WatchStream<StoreSnapshot>) {
    let mut status = None;
    let mut seen_messages = 0;
    let mut seen_error = None;

    while let Some(snapshot) = snapshots.next().await {
        let connection = &snapshot.connection;
        if status != Some(connection.status) {
            status = Some(connection.status);
            match (connection.status, connection.last_error.as_deref()) {
                (ConnectionStatus::TerminallyFailed, Some(error)) => {
                    println!("* connection failed: {error} (type /connect to retry)");
                }
                (current, _) => println!("* {current:?}"),
            }
        }

        for message in snapshot.messages.iter().skip(seen_messages) {
            if message.role == Role::Assistant {
                println!("< {}", message.content);
            }
        }
        seen_messages = snapshot.messages.len();

        if snapshot.server_error != seen_error {
            if let Some(error) = &snapshot.server_error {
                println!("! {}: {}", error.code, error.message);
            }
            seen_error = snapshot.server_error.clone();
        }
    }
}
