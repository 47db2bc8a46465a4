// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Health and metrics endpoints.

use crate::source::IndexerState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use escrow_types::ChainKind;
use prometheus::{Registry, TextEncoder};
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub const HEALTH_PATH: &str = "/health";
pub const METRICS_PATH: &str = "/metrics";

#[derive(Clone)]
pub struct ApiState {
    registry: Registry,
    indexers: Vec<(ChainKind, Arc<RwLock<IndexerState>>)>,
}

impl ApiState {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            indexers: vec![],
        }
    }

    pub fn with_indexer(mut self, chain: ChainKind, state: Arc<RwLock<IndexerState>>) -> Self {
        self.indexers.push((chain, state));
        self
    }
}

#[derive(Debug, Serialize, PartialEq)]
pub struct HealthResponse {
    pub healthy: bool,
    pub indexers: BTreeMap<&'static str, IndexerState>,
}

pub fn make_router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route(HEALTH_PATH, get(health_check))
        .route(METRICS_PATH, get(metrics))
        .with_state(state)
}

/// `/metrics` only, for a dedicated scrape port
pub fn make_metrics_router(registry: Registry) -> Router {
    Router::new()
        .route(METRICS_PATH, get(metrics))
        .with_state(ApiState::new(registry))
}

/// Serves `router` until `cancel` fires
pub async fn serve(address: SocketAddr, router: Router, cancel: CancellationToken) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(address).await?;
    info!("[Api] Listening on {}", address);
    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}

/// 200 while every configured indexer runs, 503 otherwise
async fn health_check(State(state): State<ApiState>) -> (StatusCode, Json<HealthResponse>) {
    let mut indexers = BTreeMap::new();
    for (chain, handle) in &state.indexers {
        indexers.insert(chain.as_str(), *handle.read().await);
    }
    let healthy = indexers.values().all(|s| s.is_running());
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(HealthResponse { healthy, indexers }))
}

async fn metrics(State(state): State<ApiState>) -> Result<String, StatusCode> {
    TextEncoder::new()
        .encode_to_string(&state.registry.gather())
        .map_err(|e| {
            error!("[Api] Failed to encode metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })
}
