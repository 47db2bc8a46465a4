// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Escrow indexer
//!
//! ```text
//!  EvmPoller (poll)        SuiSubscriber (subscribe + backfill)
//!        │                            │
//!        ▼                            ▼
//!  ChainIndexer (EVM)          ChainIndexer (SUI)
//!        └──────────┬─────────────────┘
//!                   ▼
//!         ReconciliationEngine ──► MirrorStore
//!                   │
//!                   ▼
//!           NotificationHub
//! ```
//!
//! Each chain runs as its own cancellable task and persists its cursor
//! after every applied event.

pub mod api;
pub mod config;
pub mod events;
pub mod handlers;
pub mod indexer;
pub mod metrics;
pub mod notify;
pub mod reconcile;
pub mod source;


/// Retries `$func` while it fails with a recoverable `SourceError`, up to
/// `$max_elapsed_time`.
#[macro_export]
macro_rules! retry_with_max_elapsed_time {
    ($func:expr, $max_elapsed_time:expr) => {{
        // 0.4, 0.8, 1.6, 3.2, 6.4, 12.8, 25.6, 51.2, 102.4, 120, 120 ... with jitter
        let backoff = backoff::ExponentialBackoff {
            initial_interval: std::time::Duration::from_millis(400),
            randomization_factor: 0.1,
            multiplier: 2.0,
            max_interval: std::time::Duration::from_secs(120),
            max_elapsed_time: Some($max_elapsed_time),
            ..Default::default()
        };
        backoff::future::retry(backoff, || {
            let fut = async {
                match $func.await {
                    Ok(v) => Ok(v),
                    Err(e) => {
                        let e: $crate::source::SourceError = e;
                        if e.is_recoverable() {
                            tracing::debug!("Retrying due to error: {:?}", e);
                            Err(backoff::Error::transient(e))
                        } else {
                            Err(backoff::Error::permanent(e))
                        }
                    }
                }
            };
            fut
        })
        .await
    }};
}

#[cfg(test)]
mod tests {
    use crate::source::SourceError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    async fn flaky(calls: &AtomicUsize, fail_times: usize) -> Result<usize, SourceError> {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        if n < fail_times {
            Err(SourceError::Rpc("timeout".into()))
        } else {
            Ok(n)
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_errors() {
        let calls = AtomicUsize::new(0);
        let result = retry_with_max_elapsed_time!(flaky(&calls, 1), Duration::from_secs(10));
        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_stops_on_permanent_error() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), SourceError> = retry_with_max_elapsed_time!(
            async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(SourceError::StreamClosed)
            },
            Duration::from_secs(10)
        );
        assert_eq!(result.unwrap_err(), SourceError::StreamClosed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
