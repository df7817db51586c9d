//! zkbridge - L1 <-> L2 bridge orchestrator for zkSync-stack chains
//!
//! Runs the deposits and withdrawals named in the configuration, resumes any
//! operation a previous run left unfinished, and serves status and metrics.

use anyhow::{Context, Result};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

use zkbridge::api;
use zkbridge::bridge::{BridgeContext, TokenRegistry};
use zkbridge::chain::{ChainRole, Credential, EvmChainClient};
use zkbridge::config::Settings;
use zkbridge::coordination::BridgeEngine;
use zkbridge::metrics::{self, MetricsServer};
use zkbridge::state::OperationStore;
use zkbridge::tx::NonceManager;

const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting zkbridge v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        l1 = %settings.l1.name,
        l2 = %settings.l2.name,
        operations = settings.operations.len(),
        "Loaded configuration"
    );

    let credential = Credential::from_env(&settings.wallet.private_key_env)
        .context("Failed to load signing key")?;
    info!(address = ?credential.address(), "Signing key loaded");

    // Chain clients share one nonce manager
    let nonces = Arc::new(NonceManager::new());
    let l1 = Arc::new(EvmChainClient::new(
        ChainRole::L1,
        settings.l1.clone(),
        nonces.clone(),
        settings.contracts.diamond_proxy,
    )?);
    let l2 = Arc::new(
        EvmChainClient::new(
            ChainRole::L2,
            settings.l2.clone(),
            nonces,
            settings.contracts.diamond_proxy,
        )?
        .with_l2_erc20_bridge(settings.contracts.l2_erc20_bridge),
    );
    info!("Chain connections initialized");

    let ctx = BridgeContext {
        l1: l1.clone(),
        l2: l2.clone(),
        zk: l2.clone(),
        contracts: settings.contracts.clone(),
        bridge: settings.bridge.clone(),
        poller: settings.poller.clone(),
        tokens: Arc::new(TokenRegistry::from_config(&settings.tokens)),
    };

    let store = Arc::new(OperationStore::open(&settings.state.path)?);
    let engine = Arc::new(BridgeEngine::new(ctx, credential, store));

    // Unfinished operations first, then the configured ones
    let mut handles = engine.resume()?;
    for request in &settings.operations {
        let op = engine.plan(request)?;
        handles.push(engine.submit(op));
    }

    // Start API server
    let api_handle = if settings.api.enabled {
        let config = settings.api.clone();
        let engine = engine.clone();
        info!("API server: http://{}:{}", config.host, config.port);
        Some(tokio::spawn(async move {
            if let Err(e) = api::run_server(config, engine).await {
                error!("API server error: {}", e);
            }
        }))
    } else {
        None
    };

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    // Health check loop
    let health_handle = tokio::spawn(async move {
        loop {
            for (role, client) in [(ChainRole::L1, &l1), (ChainRole::L2, &l2)] {
                let healthy = client.health_check().await;
                if !healthy {
                    warn!(chain = %role, "Chain health check failed");
                }
                metrics::record_chain_health(role, healthy);
            }
            tokio::time::sleep(HEALTH_CHECK_INTERVAL).await;
        }
    });

    info!(operations = handles.len(), "zkbridge is running");

    // Servers keep the process up; otherwise exit once every operation ends
    let serving = api_handle.is_some() || metrics_handle.is_some();
    tokio::select! {
        _ = shutdown_signal() => {
            // Running operations keep their last snapshot and resume on restart
            info!(running = engine.running(), "Shutdown signal received, stopping...");
        }
        results = join_all(handles), if !serving => {
            for result in results {
                match result {
                    Ok(result) => info!(
                        operation_id = %result.operation_id,
                        kind = %result.kind,
                        state = %result.final_state,
                        l1_tx_hash = ?result.l1_tx_hash,
                        l2_tx_hash = ?result.l2_tx_hash,
                        error = ?result.error_kind,
                        "Operation result"
                    ),
                    Err(e) => error!("Operation task panicked: {}", e),
                }
            }
        }
    }

    // Abort background tasks
    health_handle.abort();
    if let Some(h) = api_handle {
        h.abort();
    }
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("zkbridge stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,zkbridge=debug,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
