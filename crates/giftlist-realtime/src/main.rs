//! # giftlist-realtime
//!
//! Realtime server binary: loads settings, installs logging and metrics,
//! and serves WebSocket subscriptions until interrupted.

#![deny(unsafe_code)]

mod telemetry;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use giftlist_auth::{JwtConfig, JwtValidator};
use giftlist_server::{RealtimeServer, ServerConfig};
use giftlist_settings::{AuthSettings, RealtimeSettings};

/// Giftlist realtime server.
#[derive(Parser, Debug)]
#[command(name = "giftlist-realtime", about = "Giftlist realtime event server")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (defaults to `$GIFTLIST_SETTINGS` or
    /// `~/.giftlist/realtime.json`).
    #[arg(long)]
    settings: Option<PathBuf>,
}

impl Cli {
    /// Layered settings with CLI flags applied last, validated.
    fn resolve_settings(&self) -> Result<RealtimeSettings> {
        let path = self
            .settings
            .clone()
            .unwrap_or_else(giftlist_settings::settings_path);
        let mut settings = giftlist_settings::load_settings_from_path(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;

        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        settings.validate().context("Invalid settings")?;
        Ok(settings)
    }
}

fn jwt_config(auth: &AuthSettings) -> JwtConfig {
    JwtConfig {
        secret: auth.jwt_secret.clone(),
        issuer: auth.issuer.clone(),
        audience: auth.audience.clone(),
        leeway_secs: auth.leeway_secs,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = args.resolve_settings()?;

    telemetry::init_subscriber(&settings.logging);
    let metrics = giftlist_server::metrics::install_recorder();

    let validator = Arc::new(JwtValidator::new(&jwt_config(&settings.auth)));
    let config = ServerConfig::from(&settings);
    tracing::debug!(?config, "server config");

    let server = RealtimeServer::new(config, validator, metrics);
    let (addr, handle) = server
        .listen()
        .await
        .context("Failed to bind server")?;
    tracing::info!("Giftlist realtime listening on ws://{addr}/ws");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    if !server.stop(vec![handle]).await {
        tracing::warn!("some connections did not drain before the shutdown timeout");
    }
    tracing::info!("Shutdown complete");
    Ok(())
}
