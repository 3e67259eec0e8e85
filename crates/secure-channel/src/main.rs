//! # Secure Channel Server
//!
//! Loads settings (TOML file, then `SC_*` environment, then CLI flags),
//! starts the channel and feeds configuration reloads to the reactor.
//!
//! - `SIGHUP` re-reads the settings file and applies the result
//! - `Ctrl+C` stops the server gracefully

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{debug, info};

use channel_telemetry::{init_telemetry, TelemetryConfig};
use secure_channel::{ChannelServer, ChannelSettings, ConfigReactor, Envelope, Origin};

/// Secure messaging channel server
#[derive(Parser, Debug, Clone)]
#[command(name = "secure-channel")]
#[command(about = "Authenticated, encrypted WebSocket messaging channel")]
struct Args {
    /// Settings file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listening port (overrides settings and SC_PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Bind address (overrides settings and SC_HOST)
    #[arg(long)]
    host: Option<IpAddr>,

    /// Log filter, e.g. `info` or `secure_channel=debug`
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    /// Load settings with CLI overrides applied last
    fn load_settings(&self) -> Result<ChannelSettings> {
        let mut settings = ChannelSettings::load(self.config.as_deref())
            .context("failed to load channel settings")?;
        if let Some(port) = self.port {
            settings.channel.port = port;
        }
        if let Some(host) = self.host {
            settings.channel.host = host;
        }
        settings.validate().context("invalid channel settings")?;
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut telemetry = TelemetryConfig::from_env();
    if let Some(level) = &args.log_level {
        telemetry = telemetry.with_log_level(level.clone());
    }
    let _telemetry = init_telemetry(telemetry).context("failed to initialise logging")?;

    let settings = args.load_settings()?;
    let server = Arc::new(
        ChannelServer::from_settings(&settings).context("failed to build channel server")?,
    );

    server.subscribe(Arc::new(|envelope: &Envelope, origin: &Origin| {
        debug!(
            connection_id = %origin.connection_id,
            principal = %origin.principal,
            kind = envelope.kind(),
            envelope_id = envelope.id(),
            "Inbound envelope"
        );
    }));

    server.start().await.context("failed to start channel")?;

    let (config_tx, config_rx) = watch::channel(settings.channel.clone());
    let reactor = tokio::spawn(ConfigReactor::new(Arc::clone(&server)).run(config_rx));

    #[cfg(unix)]
    let reload = tokio::spawn(reload_on_sighup(args.clone(), settings, config_tx));
    #[cfg(not(unix))]
    drop(config_tx);

    info!("Secure channel running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;

    info!("Shutdown requested");
    #[cfg(unix)]
    reload.abort();
    // Dropping the config sender ends the reactor
    let _ = reactor.await;

    if server.state() == secure_channel::ServerState::Listening {
        server.stop().await.context("failed to stop channel")?;
    }
    Ok(())
}

/// Re-read settings on every SIGHUP and publish the channel section.
///
/// `auth` and `crypto` are fixed when the server is built; edits to them are
/// reported and take effect on the next process start.
#[cfg(unix)]
async fn reload_on_sighup(
    args: Args,
    started_with: ChannelSettings,
    config_tx: watch::Sender<secure_channel::ChannelConfig>,
) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangups = match signal(SignalKind::hangup()) {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(error = %e, "SIGHUP reload unavailable");
            return;
        }
    };

    while hangups.recv().await.is_some() {
        match args.load_settings() {
            Ok(settings) => {
                info!("Reloading channel settings");
                let ignored = started_with.restart_only_changes(&settings);
                if !ignored.is_empty() {
                    tracing::warn!(
                        sections = ?ignored,
                        "Settings changed that only apply after a process restart"
                    );
                }
                config_tx.send_replace(settings.channel);
            }
            Err(e) => tracing::warn!(error = %format!("{e:#}"), "Settings reload failed"),
        }
    }
}
