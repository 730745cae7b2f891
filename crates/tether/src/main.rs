//! # tether
//!
//! Command-line client: loads settings, opens a connection, prints every
//! received frame to stdout, and sends each stdin line as a frame.
//! Ctrl-C or end of input stops the connection.

#![deny(unsafe_code)]

mod cli;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tether_client::{ConnectionEvent, ConnectionEvents, HttpConnection, HttpConnectionOptions};
use tether_core::auth::StaticToken;
use tether_core::logging::{LogFormat, init_subscriber};
use tether_core::transfer::{Payload, TransferFormat};
use tether_settings::{ClientSettings, load_settings, load_settings_from_path};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::cli::{Cli, Command, ConnectArgs};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.settings {
        Some(path) => load_settings_from_path(path),
        None => load_settings(),
    }
    .context("failed to load settings")?;
    let format = if cli.json_logs || settings.logging.json {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    };
    let _ = init_subscriber(format, &settings.logging.level);

    if let Command::Connect(args) = &cli.command {
        args.apply(&mut settings);
        settings.validate();
    }

    match cli.command {
        Command::Settings => {
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(())
        }
        Command::Connect(args) => connect(settings, args).await,
    }
}

async fn connect(settings: ClientSettings, args: ConnectArgs) -> Result<()> {
    let Some(url) = settings.url.clone() else {
        bail!("no URL given: pass one on the command line or set `url` in the settings");
    };
    let mut options = HttpConnectionOptions::from_settings(&settings);
    if let Some(token) = args.access_token {
        options = options.with_access_token(StaticToken::shared(token));
    }

    let connection = HttpConnection::new(&url, options).context("invalid connection URL")?;
    let mut events = connection
        .take_events()
        .context("connection events already taken")?;

    let format = settings.transfer_format;
    connection
        .start(format)
        .await
        .with_context(|| format!("failed to connect to {url}"))?;
    info!(
        url = %url,
        connection_id = connection.connection_id().as_ref().map(|id| id.as_str()),
        "connected; type lines to send, Ctrl-C to quit"
    );

    session(&connection, &mut events, format).await
}

/// Pump stdin and connection events until the connection closes.
async fn session(
    connection: &HttpConnection,
    events: &mut ConnectionEvents,
    format: TransferFormat,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(ConnectionEvent::Closed(None)) | None => {
                    info!("connection closed");
                    return Ok(());
                }
                Some(ConnectionEvent::Closed(Some(error))) => {
                    return Err(error).context("connection closed with an error");
                }
                Some(event) => report(event),
            },
            line = lines.next_line(), if stdin_open => match line.context("failed to read stdin")? {
                Some(line) => {
                    let payload = match format {
                        TransferFormat::Text => Payload::from(line),
                        TransferFormat::Binary => Payload::from(line.into_bytes()),
                    };
                    if let Err(error) = connection.send(payload).await {
                        warn!(%error, "send failed");
                    }
                }
                None => {
                    stdin_open = false;
                    info!("end of input, stopping");
                    connection.stop(None).await;
                }
            },
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl-C")?;
                info!("interrupted, stopping");
                connection.stop(None).await;
            }
        }
    }
}

fn report(event: ConnectionEvent) {
    match event {
        ConnectionEvent::Received(Payload::Text(text)) => println!("{text}"),
        ConnectionEvent::Received(Payload::Binary(bytes)) => {
            println!("<{} bytes>", bytes.len());
        }
        ConnectionEvent::Reconnecting(error) => match error {
            Some(error) => warn!(%error, "connection lost, reconnecting"),
            None => warn!("connection closed by the server, reconnecting"),
        },
        ConnectionEvent::Reconnected(connection_id) => info!(
            connection_id = connection_id.as_ref().map(|id| id.as_str()),
            "reconnected"
        ),
        ConnectionEvent::Closed(_) => {}
    }
}
