//! # crossbar
//!
//! Relay binary: loads settings, starts telemetry and the two-group relay,
//! and waits for Ctrl-C. Also carries a small WebSocket client for poking
//! at a running relay.

#![deny(unsafe_code)]

mod client;

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use crossbar_server::RelayServer;
use crossbar_settings::{CrossbarSettings, LoggingSettings};
use crossbar_telemetry::{TelemetryConfig, init_telemetry};
use tracing::Level;

use crate::client::{ListenArgs, SendArgs};

/// Two-group WebSocket relay with a UDP side channel to an external worker.
#[derive(Parser, Debug)]
#[command(name = "crossbar", about = "Two-group WebSocket relay with a UDP worker bridge")]
struct Cli {
    /// Settings file (defaults to `~/.crossbar/settings.json`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (overrides settings and `CROSSBAR_LOG_LEVEL`).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the relay (default).
    Serve(ServeArgs),
    /// Connect to a group, send messages and print what comes back.
    Send(SendArgs),
    /// Connect to a group and print every message received.
    Listen(ListenArgs),
}

/// Overrides for `serve`.
#[derive(Args, Debug, Default)]
struct ServeArgs {
    /// Bind address for both listeners.
    #[arg(long)]
    host: Option<String>,

    /// Group A port.
    #[arg(long)]
    port_a: Option<u16>,

    /// Group B port.
    #[arg(long)]
    port_b: Option<u16>,

    /// Worker address for bridge requests.
    #[arg(long)]
    worker_addr: Option<String>,

    /// Local address for worker responses.
    #[arg(long)]
    bridge_addr: Option<String>,

    /// `type` value that marks a message for the worker.
    #[arg(long)]
    marker: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,

    /// Do not install the Prometheus recorder.
    #[arg(long)]
    no_metrics: bool,
}

impl ServeArgs {
    fn apply(self, settings: &mut CrossbarSettings) {
        if let Some(v) = self.host {
            settings.server.host = v;
        }
        if let Some(v) = self.port_a {
            settings.server.group_a_port = v;
        }
        if let Some(v) = self.port_b {
            settings.server.group_b_port = v;
        }
        if let Some(v) = self.worker_addr {
            settings.bridge.worker_addr = v;
        }
        if let Some(v) = self.bridge_addr {
            settings.bridge.listen_addr = v;
        }
        if let Some(v) = self.marker {
            settings.bridge.request_marker = v;
        }
        if self.json_logs {
            settings.logging.json = true;
        }
        if self.no_metrics {
            settings.logging.metrics = false;
        }
    }
}

fn load_settings(path: Option<&PathBuf>) -> Result<CrossbarSettings> {
    match path {
        Some(path) => crossbar_settings::load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display())),
        None => crossbar_settings::load_settings().context("Failed to load settings"),
    }
}

fn telemetry_config(logging: &LoggingSettings, metrics_enabled: bool) -> Result<TelemetryConfig> {
    let Ok(log_level) = Level::from_str(&logging.level) else {
        bail!("invalid log level `{}`", logging.level);
    };
    Ok(TelemetryConfig {
        log_level,
        json: logging.json,
        metrics_enabled,
        ..TelemetryConfig::default()
    })
}

async fn serve(mut settings: CrossbarSettings, args: ServeArgs) -> Result<()> {
    args.apply(&mut settings);
    let _ = settings.validate();

    let telemetry = init_telemetry(&telemetry_config(&settings.logging, settings.logging.metrics)?)
        .context("Failed to initialize telemetry")?;

    let shutdown_timeout = Duration::from_secs(settings.server.shutdown_timeout_secs);
    let mut server = RelayServer::new(settings);
    if let Some(handle) = telemetry.prometheus() {
        server = server.with_metrics(handle.clone());
    }

    let relay = server.listen().await.context("Failed to start relay")?;
    tracing::info!(
        group_a = %relay.group_a_addr(),
        group_b = %relay.group_b_addr(),
        bridge = %relay.bridge_addr(),
        "crossbar relay running"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!(timeout_secs = shutdown_timeout.as_secs(), "Shutting down...");
    if !relay.shutdown(shutdown_timeout).await {
        tracing::warn!("shutdown did not finish cleanly");
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = load_settings(cli.config.as_ref())?;
    if let Some(level) = cli.log_level {
        settings.logging.level = level;
    }

    match cli.command.unwrap_or(Command::Serve(ServeArgs::default())) {
        Command::Serve(args) => serve(settings, args).await,
        Command::Send(args) => {
            let _telemetry = init_telemetry(&telemetry_config(&settings.logging, false)?)?;
            client::run_send(&settings, args).await
        }
        Command::Listen(args) => {
            let _telemetry = init_telemetry(&telemetry_config(&settings.logging, false)?)?;
            client::run_listen(&settings, args).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_means_serve() {
        let cli = Cli::parse_from(["crossbar"]);
        assert!(cli.command.is_none());
        assert!(cli.config.is_none());
    }

    #[test]
    fn serve_overrides_apply() {
        let cli = Cli::parse_from([
            "crossbar",
            "serve",
            "--port-a",
            "9001",
            "--worker-addr",
            "10.0.0.2:8080",
            "--marker",
            "PROCESS",
            "--no-metrics",
        ]);
        let Some(Command::Serve(args)) = cli.command else {
            panic!("expected serve");
        };
        let mut settings = CrossbarSettings::default();
        args.apply(&mut settings);
        assert_eq!(settings.server.group_a_port, 9001);
        assert_eq!(settings.server.group_b_port, 8775);
        assert_eq!(settings.bridge.worker_addr, "10.0.0.2:8080");
        assert_eq!(settings.bridge.request_marker, "PROCESS");
        assert!(!settings.logging.metrics);
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::parse_from(["crossbar", "serve", "--config", "/etc/crossbar.json"]);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/crossbar.json")));
    }

    #[test]
    fn telemetry_config_parses_level() {
        let logging = LoggingSettings {
            level: "debug".into(),
            ..LoggingSettings::default()
        };
        let config = telemetry_config(&logging, false).unwrap();
        assert_eq!(config.log_level, Level::DEBUG);
        assert!(!config.metrics_enabled);
    }

    #[test]
    fn telemetry_config_rejects_unknown_level() {
        let logging = LoggingSettings {
            level: "loud".into(),
            ..LoggingSettings::default()
        };
        assert!(telemetry_config(&logging, true).is_err());
    }
}
