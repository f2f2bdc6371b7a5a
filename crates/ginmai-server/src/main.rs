//! # ginmai-server
//!
//! Server-authoritative backend for GinMai.
//!
//! This binary provides:
//! - **REST API** (axum) for moments, seats, feedback, profiles and safety
//! - **Server-sent events** carrying committed moment and connection changes
//! - **Push notifications** to hosts and guests through a configurable gateway
//! - **Expiry sweep** that closes moments whose meal window has passed
//! - **Per-IP rate limiting** to protect against abuse

mod api;
mod auth;
mod config;
mod error;
mod push;
mod rate_limit;
mod realtime;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ginmai_store::{Database, LogNotifier, MomentEngine, Notifier};

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::push::PushNotifier;
use crate::rate_limit::RateLimiter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,ginmai_server=debug")),
        )
        .init();

    info!("Starting GinMai server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let db = Database::open_at(&config.database_path)?;
    info!(path = %config.database_path.display(), "Moment store ready");

    let notifier: Arc<dyn Notifier> = match &config.push_endpoint {
        Some(endpoint) => {
            info!(endpoint = %endpoint, "Push notifications enabled");
            Arc::new(PushNotifier::new(endpoint.clone())?)
        }
        None => {
            info!("No PUSH_ENDPOINT configured, notifications are logged only");
            Arc::new(LogNotifier)
        }
    };

    let engine = MomentEngine::new(db, notifier);
    let rate_limiter = RateLimiter::from_config(&config);

    let app_state = AppState {
        engine: engine.clone(),
        rate_limiter: rate_limiter.clone(),
        config: Arc::new(config.clone()),
        started: Instant::now(),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Periodic rate limiter cleanup (every 5 minutes, evict buckets idle >10 min)
    let rl = rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            rl.purge_idle(600.0).await;
        }
    });

    // Expired moments are already hidden from listings; this only rewrites
    // their stored status.
    if let Some(every) = config.sweep_interval {
        let sweeper = engine.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                match sweeper.sweep_expired().await {
                    Ok(swept) if !swept.is_empty() => info!(count = swept.len(), "Expired moments closed"),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Expiry sweep failed"),
                }
            }
        });
    } else {
        info!("Expiry sweep disabled");
    }

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, config.http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
