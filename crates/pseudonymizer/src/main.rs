//! `pseudonymizer`: HTTP service entry point.
//!
//! Startup sequence:
//! 1. Load and validate [`Config`] from environment variables.
//! 2. Initialise the tracing subscriber (JSON logs, optional OTLP export).
//! 3. Load the AWS SDK sessions and build the KMS / Secrets Manager gateways.
//! 4. Load or create the DEK. Failure here aborts the process.
//! 5. Build the Axum router and start serving.

mod aws;
mod config;
mod crypto;
mod dek;
mod pseudonymize;
mod server;
mod telemetry;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use config::Config;
use dek::KeyLifecycleManager;
use pseudonymize::PseudonymizationService;
use server::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let cfg = Config::from_env().map_err(|e| {
        // Telemetry is not yet up; write to stderr directly.
        eprintln!("ERROR: configuration invalid: {e:#}");
        e
    })?;

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    telemetry::init_telemetry(cfg.otel_exporter_otlp_endpoint.as_deref(), &cfg.log_level)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        listen_port = cfg.listen_port,
        "pseudonymizer starting"
    );

    // -----------------------------------------------------------------------
    // 3. AWS gateways
    // -----------------------------------------------------------------------
    let sessions = aws::AwsSessions::load(&cfg.aws_fallback_region).await;
    let keys = Arc::new(KeyLifecycleManager::new(
        Arc::new(aws::KmsGateway::new(&sessions)),
        Arc::new(aws::SecretsManagerGateway::new(&sessions)),
        cfg.fpe_master_key_arn.clone(),
        cfg.fpe_dek_secret_name.clone(),
    ));

    // -----------------------------------------------------------------------
    // 4. DEK initialisation
    // -----------------------------------------------------------------------
    keys.get_or_create_dek()
        .await
        .context("initialization failure")?;
    info!("DEK ready");

    // -----------------------------------------------------------------------
    // 5. HTTP server
    // -----------------------------------------------------------------------
    let service = PseudonymizationService::new(keys, cfg.tweak()?, cfg.alphabet()?);
    let router = server::router::build(AppState::new(service));

    let addr: std::net::SocketAddr = ([0, 0, 0, 0], cfg.listen_port).into();
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, router).await?;

    Ok(())
}
