// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Subscription source for the Sui escrow package.
//!
//! The live stream is opened before the backfill from the stored cursor
//! starts, so nothing emitted in between is missed. Events seen on both are
//! dropped by event ID.

use super::{ChainCursor, ChainSource, IndexerState, SourceBatch, SourceError};
use crate::handlers::SuiEventHandler;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use escrow_contracts::sui::{EventId, ObjectId, SuiAddress, SuiEvent, SuiEventPage};
use escrow_types::ChainKind;
use futures::stream::{BoxStream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Dedup window for events delivered by both the backfill and the stream
const SEEN_EVENTS_CAPACITY: usize = 10_000;

#[async_trait]
pub trait SuiEventProvider: Send + Sync {
    /// Events of the escrow package strictly after `cursor`, ascending
    async fn query_events(
        &self,
        cursor: Option<EventId>,
        limit: usize,
    ) -> Result<SuiEventPage, SourceError>;

    /// Live events emitted from now on
    async fn subscribe(&self) -> Result<BoxStream<'static, Result<SuiEvent, SourceError>>, SourceError>;
}

/// JSON-RPC client for `suix_queryEvents`. Subscriptions are served by
/// long-polling from the head observed when subscribing.
#[derive(Clone)]
pub struct SuiRpcClient {
    client: reqwest::Client,
    rpc_url: String,
    package: ObjectId,
    poll_interval: Duration,
    page_size: usize,
}

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcEventId {
    tx_digest: String,
    event_seq: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcEvent {
    id: RpcEventId,
    package_id: String,
    transaction_module: String,
    sender: String,
    #[serde(rename = "type")]
    type_: String,
    bcs: String,
    #[serde(default)]
    bcs_encoding: Option<String>,
    #[serde(default)]
    timestamp_ms: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcEventPage {
    data: Vec<RpcEvent>,
    next_cursor: Option<RpcEventId>,
    has_next_page: bool,
}

fn decode_err(e: impl std::fmt::Display) -> SourceError {
    SourceError::Decode(e.to_string())
}

impl RpcEventId {
    fn into_event_id(self) -> Result<EventId, SourceError> {
        let seq = self.event_seq.parse::<u64>().map_err(decode_err)?;
        Ok(EventId::new(self.tx_digest, seq))
    }
}

impl RpcEvent {
    fn into_sui_event(self) -> Result<SuiEvent, SourceError> {
        if let Some(encoding) = self.bcs_encoding.as_deref() {
            if encoding != "base64" {
                return Err(SourceError::Decode(format!(
                    "unsupported bcs encoding {}",
                    encoding
                )));
            }
        }
        Ok(SuiEvent {
            id: self.id.into_event_id()?,
            package_id: self.package_id.parse::<ObjectId>().map_err(decode_err)?,
            transaction_module: self.transaction_module,
            sender: self.sender.parse::<SuiAddress>().map_err(decode_err)?,
            type_: self.type_,
            bcs: STANDARD.decode(self.bcs).map_err(decode_err)?,
            timestamp_ms: self
                .timestamp_ms
                .map(|ts| ts.parse::<u64>())
                .transpose()
                .map_err(decode_err)?,
        })
    }
}

impl SuiRpcClient {
    pub fn new(rpc_url: impl Into<String>, package: ObjectId, poll_interval: Duration, page_size: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            rpc_url: rpc_url.into(),
            package,
            poll_interval,
            page_size,
        }
    }

    async fn call<T: for<'de> Deserialize<'de>>(&self, method: &str, params: Value) -> Result<T, SourceError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let response: RpcResponse<T> = self
            .client
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| SourceError::Rpc(e.to_string()))?
            .json()
            .await
            .map_err(|e| SourceError::Rpc(e.to_string()))?;
        if let Some(err) = response.error {
            let message = err.message.to_lowercase();
            if message.contains("could not find") || message.contains("not found") {
                return Err(SourceError::CursorLost(err.message));
            }
            return Err(SourceError::Rpc(format!("{} (code {})", err.message, err.code)));
        }
        response
            .result
            .ok_or_else(|| SourceError::Rpc(format!("{} returned no result", method)))
    }

    async fn query(
        &self,
        cursor: Option<&EventId>,
        limit: usize,
        descending: bool,
    ) -> Result<SuiEventPage, SourceError> {
        let cursor = cursor.map(|id| {
            json!({
                "txDigest": id.tx_digest,
                "eventSeq": id.event_seq.to_string(),
            })
        });
        let page: RpcEventPage = self
            .call(
                "suix_queryEvents",
                json!([
                    { "Package": self.package.to_string() },
                    cursor,
                    limit,
                    descending
                ]),
            )
            .await?;
        Ok(SuiEventPage {
            data: page
                .data
                .into_iter()
                .map(RpcEvent::into_sui_event)
                .collect::<Result<_, _>>()?,
            next_cursor: page.next_cursor.map(RpcEventId::into_event_id).transpose()?,
            has_next_page: page.has_next_page,
        })
    }

    async fn latest_event_id(&self) -> Result<Option<EventId>, SourceError> {
        let page = self.query(None, 1, true).await?;
        Ok(page.data.into_iter().next().map(|e| e.id))
    }
}

struct LongPoll {
    client: SuiRpcClient,
    cursor: Option<EventId>,
    buffer: VecDeque<SuiEvent>,
}

#[async_trait]
impl SuiEventProvider for SuiRpcClient {
    async fn query_events(
        &self,
        cursor: Option<EventId>,
        limit: usize,
    ) -> Result<SuiEventPage, SourceError> {
        self.query(cursor.as_ref(), limit, false).await
    }

    async fn subscribe(&self) -> Result<BoxStream<'static, Result<SuiEvent, SourceError>>, SourceError> {
        let head = self.latest_event_id().await?;
        let state = LongPoll {
            client: self.clone(),
            cursor: head,
            buffer: VecDeque::new(),
        };
        Ok(futures::stream::unfold(state, |mut state| async move {
            loop {
                if let Some(event) = state.buffer.pop_front() {
                    return Some((Ok(event), state));
                }
                tokio::time::sleep(state.client.poll_interval).await;
                let limit = state.client.page_size;
                match state.client.query(state.cursor.as_ref(), limit, false).await {
                    Ok(page) => {
                        if let Some(last) = page.data.last() {
                            state.cursor = Some(last.id.clone());
                        }
                        state.buffer.extend(page.data);
                    }
                    Err(e) => return Some((Err(e), state)),
                }
            }
        })
        .boxed())
    }
}

#[derive(Debug, Clone)]
pub struct SuiSubscriberConfig {
    pub page_size: usize,
}

impl Default for SuiSubscriberConfig {
    fn default() -> Self {
        Self { page_size: 50 }
    }
}

struct Backfill {
    cursor: Option<EventId>,
    first_page: Option<SuiEventPage>,
}

/// Bounded set of recently delivered event IDs
#[derive(Default)]
struct SeenEvents {
    order: VecDeque<EventId>,
    ids: HashSet<EventId>,
}

impl SeenEvents {
    /// Returns false when `id` was already seen
    fn insert(&mut self, id: &EventId) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        if self.order.len() == SEEN_EVENTS_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        self.order.push_back(id.clone());
        self.ids.insert(id.clone());
        true
    }

    fn clear(&mut self) {
        self.order.clear();
        self.ids.clear();
    }
}

pub struct SuiSubscriber<P> {
    provider: Arc<P>,
    handler: SuiEventHandler,
    config: SuiSubscriberConfig,
    live: Option<BoxStream<'static, Result<SuiEvent, SourceError>>>,
    backfill: Option<Backfill>,
    seen: SeenEvents,
}

impl<P: SuiEventProvider> SuiSubscriber<P> {
    pub fn new(provider: Arc<P>, package: ObjectId, config: SuiSubscriberConfig) -> Self {
        Self {
            provider,
            handler: SuiEventHandler::new(package),
            config,
            live: None,
            backfill: None,
            seen: SeenEvents::default(),
        }
    }

    fn decode_batch(&mut self, events: Vec<SuiEvent>) -> SourceBatch {
        let mut batch = SourceBatch::default();
        for event in events {
            if !self.seen.insert(&event.id) {
                debug!("[SUI] Dropping already delivered event {}", event.id);
                continue;
            }
            match self.handler.decode(&event) {
                Ok(Some(indexed)) => batch.events.push(indexed),
                Ok(None) => {}
                Err(e) => warn!("[SUI] Skipping undecodable event {}: {}", event.id, e),
            }
            batch.cursor = Some(ChainCursor::Sui(event.id));
        }
        batch
    }
}

#[async_trait]
impl<P: SuiEventProvider + 'static> ChainSource for SuiSubscriber<P> {
    fn chain(&self) -> ChainKind {
        ChainKind::Sui
    }

    fn mode(&self) -> IndexerState {
        IndexerState::Subscribed
    }

    async fn start(&mut self, cursor: Option<ChainCursor>) -> Result<(), SourceError> {
        let cursor = match cursor {
            None => None,
            Some(ChainCursor::Sui(id)) => Some(id),
            Some(other) => {
                return Err(SourceError::CursorLost(format!("not a Sui cursor: {}", other)));
            }
        };
        self.live = Some(self.provider.subscribe().await?);
        // Fails with CursorLost when the stored cursor was pruned.
        let first_page = self
            .provider
            .query_events(cursor.clone(), self.config.page_size)
            .await?;
        info!(
            "[SUI] Subscribed to package {}, backfilling from {}",
            self.handler.package(),
            cursor
                .as_ref()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "genesis".into())
        );
        self.backfill = Some(Backfill {
            cursor,
            first_page: Some(first_page),
        });
        self.seen.clear();
        Ok(())
    }

    async fn next_batch(&mut self) -> Result<SourceBatch, SourceError> {
        if let Some(backfill) = self.backfill.as_mut() {
            let page = match backfill.first_page.take() {
                Some(page) => page,
                None => {
                    self.provider
                        .query_events(backfill.cursor.clone(), self.config.page_size)
                        .await?
                }
            };
            if let Some(last) = page.data.last() {
                backfill.cursor = Some(last.id.clone());
            }
            if !page.has_next_page {
                info!("[SUI] Backfill complete, following live events");
                self.backfill = None;
            }
            return Ok(self.decode_batch(page.data));
        }

        let live = self.live.as_mut().ok_or(SourceError::StreamClosed)?;
        match live.next().await {
            Some(Ok(event)) => Ok(self.decode_batch(vec![event])),
            Some(Err(e)) => Err(e),
            None => {
                self.live = None;
                Err(SourceError::StreamClosed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use escrow_contracts::sui::events::MoveEscrowCompletedEvent;
    use escrow_contracts::sui::SuiEscrowEvent;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    fn receiver_stream(
        rx: mpsc::UnboundedReceiver<Result<SuiEvent, SourceError>>,
    ) -> BoxStream<'static, Result<SuiEvent, SourceError>> {
        futures::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|ev| (ev, rx)) })
            .boxed()
    }

    fn package() -> ObjectId {
        ObjectId::repeat_byte(0x0a)
    }

    fn completed(seq: u64) -> SuiEvent {
        SuiEscrowEvent::EscrowCompleted(MoveEscrowCompletedEvent {
            escrow_id: ObjectId::repeat_byte(seq as u8),
        })
        .to_sui_event(&package(), EventId::new("d", seq), SuiAddress::repeat_byte(1), seq)
        .unwrap()
    }

    struct ScriptedProvider {
        history: Vec<SuiEvent>,
        live: Mutex<Option<mpsc::UnboundedReceiver<Result<SuiEvent, SourceError>>>>,
    }

    #[async_trait]
    impl SuiEventProvider for ScriptedProvider {
        async fn query_events(
            &self,
            cursor: Option<EventId>,
            limit: usize,
        ) -> Result<SuiEventPage, SourceError> {
            let start = match cursor {
                None => 0,
                Some(c) => {
                    self.history
                        .iter()
                        .position(|e| e.id == c)
                        .ok_or_else(|| SourceError::CursorLost(c.to_string()))?
                        + 1
                }
            };
            let data: Vec<_> = self.history.iter().skip(start).take(limit).cloned().collect();
            Ok(SuiEventPage {
                next_cursor: data.last().map(|e| e.id.clone()),
                has_next_page: start + data.len() < self.history.len(),
                data,
            })
        }

        async fn subscribe(
            &self,
        ) -> Result<BoxStream<'static, Result<SuiEvent, SourceError>>, SourceError> {
            self.live
                .lock()
                .unwrap()
                .take()
                .map(receiver_stream)
                .ok_or(SourceError::StreamClosed)
        }
    }

    fn seqs(batch: &SourceBatch) -> Vec<u64> {
        batch
            .events
            .iter()
            .map(|e| match &e.meta.cursor {
                ChainCursor::Sui(id) => id.event_seq,
                other => panic!("unexpected {:?}", other),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_backfill_then_live_without_duplicates() {
        let (tx, rx) = mpsc::unbounded_channel();
        let provider = Arc::new(ScriptedProvider {
            history: (0..5).map(completed).collect(),
            live: Mutex::new(Some(rx)),
        });
        // Emitted while backfilling: seen on both paths
        tx.send(Ok(completed(4))).unwrap();
        tx.send(Ok(completed(5))).unwrap();

        let mut subscriber =
            SuiSubscriber::new(provider, package(), SuiSubscriberConfig { page_size: 2 });
        subscriber
            .start(Some(ChainCursor::Sui(EventId::new("d", 0))))
            .await
            .unwrap();

        let mut delivered = vec![];
        for _ in 0..4 {
            delivered.extend(seqs(&subscriber.next_batch().await.unwrap()));
        }
        assert_eq!(delivered, vec![1, 2, 3, 4, 5]);

        drop(tx);
        assert_eq!(
            subscriber.next_batch().await.unwrap_err(),
            SourceError::StreamClosed
        );
    }

    #[tokio::test]
    async fn test_pruned_cursor_is_lost() {
        let (_tx, rx) = mpsc::unbounded_channel();
        let provider = Arc::new(ScriptedProvider {
            history: (0..2).map(completed).collect(),
            live: Mutex::new(Some(rx)),
        });
        let mut subscriber = SuiSubscriber::new(provider, package(), SuiSubscriberConfig::default());
        let err = subscriber
            .start(Some(ChainCursor::Sui(EventId::new("gone", 9))))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::CursorLost(_)));
    }

    #[test]
    fn test_seen_window_is_bounded() {
        let mut seen = SeenEvents::default();
        for i in 0..(SEEN_EVENTS_CAPACITY as u64 + 1) {
            assert!(seen.insert(&EventId::new("d", i)));
        }
        assert_eq!(seen.ids.len(), SEEN_EVENTS_CAPACITY);
        // The oldest ID fell out of the window
        assert!(seen.insert(&EventId::new("d", 0)));
        assert!(!seen.insert(&EventId::new("d", 5)));
    }

    #[test]
    fn test_rpc_event_conversion() {
        let raw = json!({
            "id": { "txDigest": "9xQe", "eventSeq": "3" },
            "packageId": "0x0a",
            "transactionModule": "escrow",
            "sender": "0x1",
            "type": "0xa::escrow::EscrowCompleted",
            "bcs": STANDARD.encode([1u8, 2, 3]),
            "bcsEncoding": "base64",
            "timestampMs": "1700000000000"
        });
        let event: RpcEvent = serde_json::from_value(raw).unwrap();
        let event = event.into_sui_event().unwrap();
        assert_eq!(event.id, EventId::new("9xQe", 3));
        assert_eq!(event.bcs, vec![1, 2, 3]);
        assert_eq!(event.timestamp_ms, Some(1_700_000_000_000));
        assert_eq!(event.package_id.0[31], 0x0a);
    }
}
