// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use anyhow::Context;
use clap::Parser;
use escrow_indexer::api::{make_metrics_router, make_router, serve, ApiState};
use escrow_indexer::config::{Config, IndexerConfig};
use escrow_indexer::indexer::ChainIndexer;
use escrow_indexer::metrics::IndexerMetrics;
use escrow_indexer::notify::NotificationHub;
use escrow_indexer::reconcile::ReconciliationEngine;
use escrow_indexer::source::{EthersLogFetcher, EvmPoller, SuiRpcClient, SuiSubscriber};
use escrow_schema::{InMemoryMirrorStore, MirrorStore};
use escrow_types::ChainKind;
use prometheus::Registry;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(rename_all = "kebab-case", author, version)]
struct Args {
    #[clap(env, long)]
    config: PathBuf,
    #[clap(env, long, default_value = "0.0.0.0:9184")]
    metrics_address: SocketAddr,
    #[clap(env, long, default_value = "0.0.0.0:9185")]
    api_address: SocketAddr,
}

fn spawn_server(
    name: &'static str,
    address: SocketAddr,
    router: axum::Router,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = serve(address, router, cancel).await {
            tracing::error!("[Main] {} server on {} failed: {:#}", name, address, e);
        }
    })
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = IndexerConfig::load(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;
    config.validate()?;

    let registry = Registry::new();
    let metrics = Arc::new(IndexerMetrics::new(&registry)?);
    let store: Arc<dyn MirrorStore> = Arc::new(InMemoryMirrorStore::new());
    let hub = Arc::new(NotificationHub::new(config.notifications.channel_capacity));
    let engine = Arc::new(ReconciliationEngine::new(store.clone(), hub, metrics.clone()));
    let retry = config.engine.retry();

    let mut indexers = Vec::new();
    let mut api_state = ApiState::new(registry.clone());

    if let Some(evm) = &config.evm {
        let contract = evm.contract()?;
        let fetcher = Arc::new(EthersLogFetcher::new(&evm.rpc_url, contract)?);
        let poller = EvmPoller::new(fetcher, contract, evm.poller_config());
        let mut indexer = ChainIndexer::new(
            ChainKind::Evm,
            store.clone(),
            engine.clone(),
            metrics.clone(),
            retry.clone(),
        );
        indexer.start(Box::new(poller))?;
        tracing::info!("[Main] EVM indexer started for contract {:?}", contract);
        api_state = api_state.with_indexer(ChainKind::Evm, indexer.state_handle());
        indexers.push(indexer);
    }

    if let Some(sui) = &config.sui {
        let package = sui.package()?;
        let client = Arc::new(SuiRpcClient::new(
            sui.rpc_url.clone(),
            package,
            Duration::from_millis(sui.poll_interval_ms),
            sui.page_size,
        ));
        let subscriber = SuiSubscriber::new(client, package, sui.subscriber_config());
        let mut indexer = ChainIndexer::new(
            ChainKind::Sui,
            store.clone(),
            engine.clone(),
            metrics.clone(),
            retry.clone(),
        );
        indexer.start(Box::new(subscriber))?;
        tracing::info!("[Main] Sui indexer started for package {}", package);
        api_state = api_state.with_indexer(ChainKind::Sui, indexer.state_handle());
        indexers.push(indexer);
    }

    let cancel = CancellationToken::new();
    let servers = vec![
        spawn_server(
            "metrics",
            args.metrics_address,
            make_metrics_router(registry),
            cancel.child_token(),
        ),
        spawn_server(
            "api",
            args.api_address,
            make_router(api_state),
            cancel.child_token(),
        ),
    ];

    tokio::signal::ctrl_c().await?;
    tracing::warn!("[Main] Shutdown requested, stopping indexers");
    for indexer in indexers.iter_mut() {
        indexer.stop().await;
    }
    cancel.cancel();
    let _ = futures::future::join_all(servers).await;
    tracing::info!("[Main] All services stopped");
    Ok(())
}
