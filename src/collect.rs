//! # Stage: Collection Fan-out
//!
//! ## Responsibility
//! Produce exactly one [`Snapshot`] per cycle. Every registered collector is
//! invoked concurrently; each invocation is bounded by the cycle's collection
//! timeout and isolated, so one collector failing or hanging never aborts the
//! cycle or drops the other collectors' readings.
//!
//! ## Guarantees
//! - Total: always yields a snapshot, including the zero-collector and
//!   all-failed cases
//! - Structured: every collector future is joined before this stage returns;
//!   nothing outlives the fan-out
//! - Bounded: wall-clock wait never exceeds the collection timeout (all
//!   collectors run concurrently under individual timeouts)
//!
//! ## NOT Responsible For
//! - Scoring the snapshot (detection loop, `detect.rs`)
//! - Deciding which collectors exist (collector registry, `registry.rs`)

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::CollectionError;
use crate::registry::Collector;
use crate::snapshot::{CollectorOutcome, Snapshot};

/// Invoke all `collectors` concurrently and assemble one snapshot.
///
/// `collect_timeout` bounds each collector individually; because they run
/// concurrently it also bounds the whole fan-out.
pub async fn collect_snapshot(
    collectors: &[Arc<dyn Collector>],
    collect_timeout: Duration,
) -> Snapshot {
    let cycle_start = Instant::now();

    let futures = collectors.iter().map(|collector| {
        let collector = Arc::clone(collector);
        async move {
            let id = collector.id().to_string();
            let outcome = match timeout(collect_timeout, collector.collect()).await {
                Ok(Ok(reading)) => {
                    debug!(
                        target: "remedian::collect",
                        collector = %id,
                        "collector succeeded"
                    );
                    CollectorOutcome::Ok(reading)
                }
                Ok(Err(err)) => {
                    warn!(
                        target: "remedian::collect",
                        collector = %id,
                        %err,
                        "collector failed"
                    );
                    CollectorOutcome::Failed(err)
                }
                Err(_) => {
                    warn!(
                        target: "remedian::collect",
                        collector = %id,
                        timeout_ms = collect_timeout.as_millis() as u64,
                        "collector timed out"
                    );
                    CollectorOutcome::Failed(CollectionError::TimedOut(collect_timeout))
                }
            };
            (id, outcome)
        }
    });

    let outcomes = join_all(futures).await;
    let snapshot = Snapshot::assemble(cycle_start, outcomes);

    debug!(
        target: "remedian::collect",
        collectors = snapshot.len(),
        succeeded = snapshot.succeeded(),
        failed = snapshot.failed(),
        elapsed_ms = cycle_start.elapsed().as_millis() as u64,
        "snapshot assembled"
    );
    snapshot
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    use crate::snapshot::Reading;

    struct OkCollector {
        id: String,
        payload: serde_json::Value,
    }

    #[async_trait]
    impl Collector for OkCollector {
        fn id(&self) -> &str {
            &self.id
        }

        async fn collect(&self) -> Result<Reading, CollectionError> {
            Ok(Reading::new(self.payload.clone()))
        }
    }

    struct FailingCollector {
        id: String,
    }

    #[async_trait]
    impl Collector for FailingCollector {
        fn id(&self) -> &str {
            &self.id
        }

        async fn collect(&self) -> Result<Reading, CollectionError> {
            Err(CollectionError::Failed("connection refused".into()))
        }
    }

    struct HangingCollector {
        id: String,
    }

    #[async_trait]
    impl Collector for HangingCollector {
        fn id(&self) -> &str {
            &self.id
        }

        async fn collect(&self) -> Result<Reading, CollectionError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            unreachable!("hanging collector should be timed out");
        }
    }

    fn ok(id: &str) -> Arc<dyn Collector> {
        Arc::new(OkCollector { id: id.into(), payload: json!({"status": "ok"}) })
    }

    #[tokio::test]
    async fn test_all_collectors_succeed() {
        let collectors = vec![ok("a"), ok("b")];
        let snap = collect_snapshot(&collectors, Duration::from_secs(1)).await;
        assert_eq!(snap.succeeded(), 2);
        assert_eq!(snap.reading("a").unwrap().payload, json!({"status": "ok"}));
    }

    #[tokio::test]
    async fn test_one_failure_does_not_drop_other_readings() {
        let collectors: Vec<Arc<dyn Collector>> = vec![
            ok("a"),
            Arc::new(FailingCollector { id: "b".into() }),
            ok("c"),
        ];
        let snap = collect_snapshot(&collectors, Duration::from_secs(1)).await;
        assert_eq!(snap.succeeded(), 2);
        assert_eq!(snap.failed(), 1);
        assert!(snap.reading("a").is_some());
        assert!(snap.reading("c").is_some());
        assert_eq!(
            snap.outcome("b").unwrap().error(),
            Some(&CollectionError::Failed("connection refused".into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_recorded_as_failure_marker() {
        let collectors: Vec<Arc<dyn Collector>> = vec![
            ok("a"),
            Arc::new(HangingCollector { id: "b".into() }),
        ];
        let snap = collect_snapshot(&collectors, Duration::from_millis(50)).await;
        assert!(snap.reading("a").is_some());
        assert_eq!(
            snap.outcome("b").unwrap().error(),
            Some(&CollectionError::TimedOut(Duration::from_millis(50)))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_failed_still_yields_snapshot() {
        let collectors: Vec<Arc<dyn Collector>> = vec![
            Arc::new(FailingCollector { id: "a".into() }),
            Arc::new(HangingCollector { id: "b".into() }),
        ];
        let snap = collect_snapshot(&collectors, Duration::from_millis(50)).await;
        assert_eq!(snap.len(), 2);
        assert_eq!(snap.succeeded(), 0);
        assert!(!snap.has_readings());
    }

    #[tokio::test]
    async fn test_zero_collectors_yields_empty_snapshot() {
        let snap = collect_snapshot(&[], Duration::from_secs(1)).await;
        assert!(snap.is_empty());
        assert!(!snap.has_readings());
    }

    #[tokio::test]
    async fn test_snapshot_order_matches_input_order() {
        let collectors = vec![ok("z"), ok("a"), ok("m")];
        let snap = collect_snapshot(&collectors, Duration::from_secs(1)).await;
        let ids: Vec<&str> = snap.outcomes().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["z", "a", "m"]);
    }
}
