//! # Stage: Remediation Dispatcher
//!
//! ## Responsibility
//! Turn a root-cause label into at most one running fix. The dispatcher looks
//! up the fixer registered for the label and, if no fix for that label is
//! already in flight, spawns the apply action as an independent task. The
//! detection loop never waits for a fixer to complete.
//!
//! Two outcomes are expected and informational, not failures:
//! - no fixer registered for the label ("no known fix")
//! - a fix for the label is already in flight (the new dispatch is a no-op,
//!   which prevents fix storms while one fix is still applying)
//!
//! ## Guarantees
//! - At-most-one in-flight fix per label: check-and-insert on the in-flight
//!   map is a single critical section
//! - Isolated: a fixer failure or timeout is logged, never propagated, never
//!   retried by the dispatcher
//! - Drainable: [`drain`](RemediationDispatcher::drain) awaits every spawned
//!   remediation, so shutdown can let in-flight fixes run to completion
//!
//! ## NOT Responsible For
//! - Producing root-cause labels (diagnosis stage, `diagnose.rs`)
//! - Fixer-internal retry or backoff policy (opaque to the dispatcher)

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::registry::FixerRegistry;
use crate::snapshot::Snapshot;

// ---------------------------------------------------------------------------
// DispatchOutcome
// ---------------------------------------------------------------------------

/// What happened to one dispatch request. None of these is an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// A fixer was found and its apply action is now running.
    Dispatched,
    /// A fix for this label is already in flight; this dispatch was a no-op.
    AlreadyInFlight,
    /// No fixer is registered for this label.
    NoKnownFix,
}

impl std::fmt::Display for DispatchOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchOutcome::Dispatched      => write!(f, "dispatched"),
            DispatchOutcome::AlreadyInFlight => write!(f, "already_in_flight"),
            DispatchOutcome::NoKnownFix      => write!(f, "no_known_fix"),
        }
    }
}

// ---------------------------------------------------------------------------
// RemediationDispatcher
// ---------------------------------------------------------------------------

/// Dispatches fixers by root-cause label, enforcing at-most-one in-flight
/// remediation per label.
pub struct RemediationDispatcher {
    fixers: Arc<FixerRegistry>,
    apply_timeout: Duration,
    /// Label → start time of the currently running fix. The one piece of
    /// shared mutable state in the pipeline; insert/remove hold the lock.
    in_flight: Arc<Mutex<HashMap<String, Instant>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RemediationDispatcher {
    pub fn new(fixers: Arc<FixerRegistry>, apply_timeout: Duration) -> Self {
        Self {
            fixers,
            apply_timeout,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Labels with a fix currently applying.
    pub fn in_flight_labels(&self) -> Vec<String> {
        lock(&self.in_flight).keys().cloned().collect()
    }

    pub fn is_in_flight(&self, label: &str) -> bool {
        lock(&self.in_flight).contains_key(label)
    }

    /// Dispatch a fix for `label`.
    ///
    /// Must be called within a tokio runtime: a found fixer runs as an
    /// independent spawned task that may outlive the cycle that triggered it.
    /// `snapshot` is the anomalous snapshot, used for event context only.
    pub fn dispatch(&self, label: &str, snapshot: &Snapshot) -> DispatchOutcome {
        let Some(fixer) = self.fixers.get(label) else {
            info!(
                target: "remedian::dispatch",
                root_cause = %label,
                "no known fix for root cause"
            );
            return DispatchOutcome::NoKnownFix;
        };

        // Check-and-insert must be one critical section, otherwise two
        // dispatches for the same label could both pass the check.
        {
            let mut in_flight = lock(&self.in_flight);
            if in_flight.contains_key(label) {
                info!(
                    target: "remedian::dispatch",
                    root_cause = %label,
                    "fix already in flight; skipping dispatch"
                );
                return DispatchOutcome::AlreadyInFlight;
            }
            in_flight.insert(label.to_string(), Instant::now());
        }

        info!(
            target: "remedian::dispatch",
            root_cause = %label,
            snapshot_age_ms = snapshot.captured_at().elapsed().as_millis() as u64,
            "remediation dispatched"
        );

        let in_flight = Arc::clone(&self.in_flight);
        let apply_timeout = self.apply_timeout;
        let label = label.to_string();
        let handle = tokio::spawn(async move {
            let started = Instant::now();
            match timeout(apply_timeout, fixer.apply()).await {
                Ok(Ok(())) => {
                    info!(
                        target: "remedian::dispatch",
                        root_cause = %label,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "remediation completed"
                    );
                }
                Ok(Err(err)) => {
                    warn!(
                        target: "remedian::dispatch",
                        root_cause = %label,
                        %err,
                        "remediation failed"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "remedian::dispatch",
                        root_cause = %label,
                        timeout_ms = apply_timeout.as_millis() as u64,
                        "remediation timed out"
                    );
                }
            }
            // Whatever the outcome, the label is free for a fresh dispatch.
            lock(&in_flight).remove(&label);
        });

        let mut tasks = lock(&self.tasks);
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);

        DispatchOutcome::Dispatched
    }

    /// Await every spawned remediation task.
    ///
    /// Called by the detection loop at shutdown so in-flight fixes run to
    /// completion rather than being cancelled mid-apply.
    pub async fn drain(&self) {
        let handles = std::mem::take(&mut *lock(&self.tasks));
        for handle in handles {
            let _ = handle.await;
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::error::RemediationError;
    use crate::registry::Fixer;

    struct CountingFixer {
        label: String,
        applied: Arc<AtomicUsize>,
        hold: Duration,
        fail: bool,
    }

    #[async_trait]
    impl Fixer for CountingFixer {
        fn label(&self) -> &str {
            &self.label
        }

        async fn apply(&self) -> Result<(), RemediationError> {
            self.applied.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.hold).await;
            if self.fail {
                Err(RemediationError("restart script exited non-zero".into()))
            } else {
                Ok(())
            }
        }
    }

    fn snapshot() -> Snapshot {
        Snapshot::assemble(Instant::now(), Vec::new())
    }

    fn dispatcher_with(fixer: CountingFixer) -> RemediationDispatcher {
        let fixers = Arc::new(FixerRegistry::new());
        fixers.register(Arc::new(fixer)).unwrap();
        RemediationDispatcher::new(fixers, Duration::from_secs(60))
    }

    fn counting(label: &str, hold: Duration) -> (CountingFixer, Arc<AtomicUsize>) {
        let applied = Arc::new(AtomicUsize::new(0));
        let fixer = CountingFixer {
            label: label.into(),
            applied: Arc::clone(&applied),
            hold,
            fail: false,
        };
        (fixer, applied)
    }

    #[tokio::test]
    async fn test_unknown_label_is_no_known_fix_not_an_error() {
        let dispatcher =
            RemediationDispatcher::new(Arc::new(FixerRegistry::new()), Duration::from_secs(1));
        let outcome = dispatcher.dispatch("unknown_cause", &snapshot());
        assert_eq!(outcome, DispatchOutcome::NoKnownFix);
        assert!(dispatcher.in_flight_labels().is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_applies_fixer_exactly_once() {
        let (fixer, applied) = counting("db_timeout", Duration::ZERO);
        let dispatcher = dispatcher_with(fixer);
        assert_eq!(
            dispatcher.dispatch("db_timeout", &snapshot()),
            DispatchOutcome::Dispatched
        );
        dispatcher.drain().await;
        assert_eq!(applied.load(Ordering::SeqCst), 1);
        assert!(!dispatcher.is_in_flight("db_timeout"));
    }

    #[tokio::test]
    async fn test_second_dispatch_while_in_flight_is_noop() {
        let (fixer, applied) = counting("db_timeout", Duration::from_millis(200));
        let dispatcher = dispatcher_with(fixer);

        assert_eq!(
            dispatcher.dispatch("db_timeout", &snapshot()),
            DispatchOutcome::Dispatched
        );
        // Let the spawned task reach apply().
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(dispatcher.is_in_flight("db_timeout"));

        assert_eq!(
            dispatcher.dispatch("db_timeout", &snapshot()),
            DispatchOutcome::AlreadyInFlight
        );

        dispatcher.drain().await;
        assert_eq!(applied.load(Ordering::SeqCst), 1, "fixer must not run twice");
    }

    #[tokio::test]
    async fn test_fresh_dispatch_after_completion() {
        let (fixer, applied) = counting("db_timeout", Duration::ZERO);
        let dispatcher = dispatcher_with(fixer);

        dispatcher.dispatch("db_timeout", &snapshot());
        dispatcher.drain().await;
        assert_eq!(
            dispatcher.dispatch("db_timeout", &snapshot()),
            DispatchOutcome::Dispatched
        );
        dispatcher.drain().await;
        assert_eq!(applied.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_fix_clears_in_flight() {
        let applied = Arc::new(AtomicUsize::new(0));
        let dispatcher = dispatcher_with(CountingFixer {
            label: "db_timeout".into(),
            applied: Arc::clone(&applied),
            hold: Duration::ZERO,
            fail: true,
        });

        dispatcher.dispatch("db_timeout", &snapshot());
        dispatcher.drain().await;
        assert!(!dispatcher.is_in_flight("db_timeout"));
        // Failure is not retried by the dispatcher.
        assert_eq!(applied.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_fix_clears_in_flight() {
        let applied = Arc::new(AtomicUsize::new(0));
        let fixers = Arc::new(FixerRegistry::new());
        fixers
            .register(Arc::new(CountingFixer {
                label: "db_timeout".into(),
                applied: Arc::clone(&applied),
                hold: Duration::from_secs(3600),
                fail: false,
            }))
            .unwrap();
        let dispatcher = RemediationDispatcher::new(fixers, Duration::from_millis(100));

        dispatcher.dispatch("db_timeout", &snapshot());
        dispatcher.drain().await;
        assert!(!dispatcher.is_in_flight("db_timeout"));
    }

    #[tokio::test]
    async fn test_distinct_labels_run_concurrently() {
        let fixers = Arc::new(FixerRegistry::new());
        let (fa, applied_a) = counting("cause_a", Duration::from_millis(100));
        let (fb, applied_b) = counting("cause_b", Duration::from_millis(100));
        fixers.register(Arc::new(fa)).unwrap();
        fixers.register(Arc::new(fb)).unwrap();
        let dispatcher = RemediationDispatcher::new(fixers, Duration::from_secs(60));

        assert_eq!(dispatcher.dispatch("cause_a", &snapshot()), DispatchOutcome::Dispatched);
        assert_eq!(dispatcher.dispatch("cause_b", &snapshot()), DispatchOutcome::Dispatched);
        dispatcher.drain().await;
        assert_eq!(applied_a.load(Ordering::SeqCst), 1);
        assert_eq!(applied_b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dispatch_outcome_serializes_as_snake_case() {
        assert_eq!(
            serde_json::to_value(DispatchOutcome::NoKnownFix).unwrap(),
            serde_json::json!("no_known_fix")
        );
        assert_eq!(
            serde_json::to_value(DispatchOutcome::AlreadyInFlight).unwrap(),
            serde_json::json!("already_in_flight")
        );
    }

    #[tokio::test]
    async fn test_drain_with_no_tasks_is_noop() {
        let dispatcher =
            RemediationDispatcher::new(Arc::new(FixerRegistry::new()), Duration::from_secs(1));
        dispatcher.drain().await;
    }
}
