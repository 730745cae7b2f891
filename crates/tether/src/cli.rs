//! Command-line arguments and how they layer over loaded settings.

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Args, Parser, Subcommand};
use tether_core::transfer::TransferFormat;
use tether_settings::ClientSettings;

/// Tether real-time connection client.
#[derive(Parser, Debug)]
#[command(name = "tether", about = "Tether real-time connection client")]
pub struct Cli {
    /// Settings file (defaults to `$TETHER_SETTINGS` or `~/.tether/settings.json`).
    #[arg(long, global = true)]
    pub settings: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Connect, print received frames, and send each stdin line.
    Connect(ConnectArgs),
    /// Print the effective settings as JSON.
    Settings,
}

/// Arguments of `tether connect`.
#[derive(Args, Debug, Default)]
pub struct ConnectArgs {
    /// Server endpoint. Falls back to the `url` setting.
    pub url: Option<String>,

    /// `auto` or a comma-separated transport list, e.g. `WebSockets,LongPolling`.
    #[arg(long)]
    pub transport: Option<String>,

    /// Request binary frames instead of text.
    #[arg(long)]
    pub binary: bool,

    /// Connect a socket straight to the URL without negotiating.
    #[arg(long)]
    pub skip_negotiation: bool,

    /// Disable automatic reconnect even if the settings enable it.
    #[arg(long)]
    pub no_reconnect: bool,

    /// Bearer token for negotiate and transport requests.
    #[arg(long)]
    pub access_token: Option<String>,

    /// Extra request header as `name=value`. Repeatable.
    #[arg(long = "header", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,
}

impl ConnectArgs {
    /// Layer flags over `settings`. Flags win.
    pub fn apply(&self, settings: &mut ClientSettings) {
        if let Some(url) = &self.url {
            settings.url = Some(url.clone());
        }
        if let Some(transport) = &self.transport {
            settings.transport.clone_from(transport);
        }
        if self.binary {
            settings.transfer_format = TransferFormat::Binary;
        }
        if self.skip_negotiation {
            settings.skip_negotiation = true;
        }
        if self.no_reconnect {
            settings.reconnect.enabled = false;
        }
        for (name, value) in &self.headers {
            let _ = settings.headers.insert(name.clone(), value.clone());
        }
    }
}

fn parse_header(raw: &str) -> Result<(String, String)> {
    let Some((name, value)) = raw.split_once('=') else {
        bail!("expected name=value, got '{raw}'");
    };
    let name = name.trim();
    if name.is_empty() {
        bail!("header name is empty in '{raw}'");
    }
    Ok((name.to_string(), value.trim().to_string()))
}
