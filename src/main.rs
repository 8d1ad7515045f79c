//! CKB bridge relayer
//!
//! Runs one watcher and one processing loop per enabled chain, the HTTP API
//! with the peer signing endpoint, and the Prometheus exporter.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use ckb_bridge_relayer::api::{self, AppState};
use ckb_bridge_relayer::chain::{ChainClient, Collector, RpcChainClient, RpcCollector};
use ckb_bridge_relayer::config::{DatabaseBackend, Settings};
use ckb_bridge_relayer::coordination::{
    BridgeContext, ChainHandler, CkbHandlerConfig, ExternalHandlerConfig, ProcessingConfig,
};
use ckb_bridge_relayer::metrics::MetricsServer;
use ckb_bridge_relayer::multisig::{
    HttpPeerSigner, LocalSigner, MultisigCoordinator, MultisigScript, PeerSigner, SignerService,
};
use ckb_bridge_relayer::state::{Ledger, MemoryLedger, PgLedger};
use ckb_bridge_relayer::tasks::{Schedule, TaskManager};
use ckb_bridge_relayer::types::{Chain, ScriptRegistry};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    info!("Starting CKB bridge relayer v{}", env!("CARGO_PKG_VERSION"));

    let settings = Settings::load()?;
    info!(
        instance = %settings.relayer.instance_id,
        chains = settings.enabled_chains().len(),
        "Loaded configuration"
    );

    let ledger = open_ledger(&settings).await?;

    let local = Arc::new(LocalSigner::from_env(&settings.multisig.private_key_env)?);
    let script = MultisigScript::new(
        settings.multisig.require_first_n,
        settings.multisig.threshold,
        settings.multisig.members.clone(),
    )?;
    let registry = Arc::new(ScriptRegistry::new(&settings.ckb.scripts, &script));
    info!(
        signer = %format!("{:#x}", local.id()),
        threshold = script.threshold,
        members = script.signers.len(),
        "Committee loaded"
    );

    let peer_timeout = Duration::from_secs(settings.multisig.timeout_secs);
    let peers = settings
        .multisig
        .peers
        .iter()
        .map(|peer| -> Result<Arc<dyn PeerSigner>> {
            let client = HttpPeerSigner::new(format!("{:#x}", peer.id), &peer.url, peer_timeout)?;
            Ok(Arc::new(client))
        })
        .collect::<Result<Vec<_>>>()?;
    let coordinator = Arc::new(MultisigCoordinator::new(script, local.clone(), peers)?);

    let ctx = BridgeContext {
        ledger: ledger.clone(),
        registry,
        coordinator,
        processing: ProcessingConfig::from_settings(&settings),
    };

    let schedule = Schedule {
        busy_interval: Duration::ZERO,
        idle_interval: settings.relayer.poll_interval(),
        error_backoff: settings.relayer.error_backoff(),
    };
    let mut tasks = TaskManager::new(CancellationToken::new());

    let ckb_timeout = Duration::from_secs(settings.ckb.rpc_timeout_secs);
    let ckb_client: Arc<dyn ChainClient> = Arc::new(RpcChainClient::new(
        Chain::Ckb,
        &settings.ckb.rpc_url,
        ckb_timeout,
    )?);
    let ckb_collector: Arc<dyn Collector> = Arc::new(RpcCollector::new(
        Chain::Ckb,
        &settings.ckb.indexer_url,
        ckb_timeout,
    )?);
    ChainHandler::for_ckb(
        &ctx,
        ckb_client,
        ckb_collector,
        &CkbHandlerConfig::from_settings(&settings.ckb),
    )
    .spawn(&mut tasks, schedule);

    for (chain, config) in settings.enabled_chains() {
        let timeout = Duration::from_secs(config.rpc_timeout_secs);
        let client: Arc<dyn ChainClient> =
            Arc::new(RpcChainClient::new(chain, &config.rpc_url, timeout)?);
        let collector: Arc<dyn Collector> =
            Arc::new(RpcCollector::new(chain, config.indexer_url(), timeout)?);
        let handler = ChainHandler::for_external(
            &ctx,
            client,
            collector,
            &ExternalHandlerConfig::from_settings(chain, config),
        )
        .with_context(|| format!("Invalid custody address for {chain}"))?;
        handler.spawn(&mut tasks, schedule);
    }

    let signer_service = Arc::new(SignerService::new(local).with_retention(peer_timeout));
    let api_state = AppState::new(ledger.clone(), signer_service);
    let api_config = settings.api.clone();
    let api_shutdown = tasks.token();
    tasks.spawn(async move {
        if let Err(e) = api::run_server(&api_config, api_state, api_shutdown).await {
            error!("API server error: {}", e);
        }
    });

    if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        let metrics_shutdown = tasks.token();
        tasks.spawn(async move {
            if let Err(e) = server.run(metrics_shutdown).await {
                error!("Metrics server error: {}", e);
            }
        });
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    info!(tasks = tasks.len(), "CKB bridge relayer is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);

    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");
    tasks
        .shutdown(Duration::from_secs(settings.relayer.shutdown_grace_secs))
        .await;

    info!("CKB bridge relayer stopped");
    Ok(())
}

async fn open_ledger(settings: &Settings) -> Result<Arc<dyn Ledger>> {
    match settings.database.backend {
        DatabaseBackend::Postgres => {
            let ledger = PgLedger::connect(&settings.database).await?;
            info!("Database connection established");
            ledger.run_migrations().await?;
            Ok(Arc::new(ledger))
        }
        DatabaseBackend::Memory => {
            warn!("Using the in-memory ledger, state is lost on restart");
            Ok(Arc::new(MemoryLedger::new()))
        }
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,ckb_bridge_relayer=debug,sqlx=warn,hyper=warn")
    });

    if std::env::var_os("RELAYER_LOG_JSON").is_some() {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
