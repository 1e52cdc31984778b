//! # Stage: Detection Loop
//!
//! ## Responsibility
//! The process-wide control loop that closes the monitoring feedback cycle:
//!
//! ```text
//! CollectorRegistry ──► collect fan-out ──► Snapshot
//!                                              │
//! ModelRegistry ───► scoring fan-out ◄─────────┘
//!                         │ any score > threshold
//!                         ▼
//!                  DiagnosisStage ──► root-cause label
//!                         │
//!                         ▼
//!              RemediationDispatcher ──► Fixer (detached task)
//! ```
//!
//! Cycles run sequentially on one cadence; within a cycle, collector and
//! model invocations are fanned out concurrently and joined before the loop
//! proceeds. Remediation tasks are the one thing that may outlive a cycle.
//!
//! ## Guarantees
//! - No overlapping cycles: a new cycle starts only after the previous one's
//!   fan-out has fully resolved (the cadence interval delays missed ticks)
//! - Snapshot assembly completes before any model is scored; diagnosis for a
//!   snapshot happens after that snapshot's scoring
//! - Per-model isolation: a model that errors, times out, or returns an
//!   out-of-range score contributes nothing and never aborts the cycle
//! - Exactly one diagnosis per anomalous cycle, carrying the highest
//!   qualifying score
//! - The loop never terminates on a downstream error — only on the shutdown
//!   signal, which drains the in-progress cycle and in-flight remediations
//!
//! ## NOT Responsible For
//! - How readings are gathered, scores computed, or fixes applied (capability
//!   implementations behind the registries)

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::collect::collect_snapshot;
use crate::diagnose::{Diagnosis, DiagnosisStage};
use crate::dispatch::{DispatchOutcome, RemediationDispatcher};
use crate::error::ScoringError;
use crate::registry::{CollectorRegistry, FixerRegistry, Model, ModelRegistry};
use crate::snapshot::Snapshot;

// ---------------------------------------------------------------------------
// LoopConfig
// ---------------------------------------------------------------------------

/// Configuration for one detection loop instance.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Cycle cadence.
    pub poll_interval: Duration,
    /// Bound on each collector invocation (and, since collectors run
    /// concurrently, on the whole collection fan-out).
    pub collect_timeout: Duration,
    /// Bound on each model's `score` and the root-cause model's `label`.
    pub score_timeout: Duration,
    /// Bound on a fixer's apply action.
    pub apply_timeout: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            collect_timeout: Duration::from_secs(10),
            score_timeout: Duration::from_secs(10),
            apply_timeout: Duration::from_secs(60),
        }
    }
}

// ---------------------------------------------------------------------------
// CyclePhase + LoopStatus
// ---------------------------------------------------------------------------

/// Where the loop currently is within a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    #[default]
    Idle,
    Collecting,
    Scoring,
    Diagnosing,
    Remediating,
}

impl std::fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CyclePhase::Idle        => write!(f, "idle"),
            CyclePhase::Collecting  => write!(f, "collecting"),
            CyclePhase::Scoring     => write!(f, "scoring"),
            CyclePhase::Diagnosing  => write!(f, "diagnosing"),
            CyclePhase::Remediating => write!(f, "remediating"),
        }
    }
}

/// Loop activity counters, readable from outside via the status handle.
/// Serializable so operators can export it to a dashboard or health endpoint.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoopStatus {
    /// Cycles fully completed since start.
    pub cycles_run: u64,
    /// Cycles in which at least one model crossed its threshold.
    pub anomalies_raised: u64,
    /// Diagnoses that produced a root-cause label.
    pub diagnoses_resolved: u64,
    /// Dispatches that started a fix.
    pub fixes_dispatched: u64,
    /// Dispatches skipped because a fix for the label was in flight.
    pub fixes_skipped_in_flight: u64,
    /// Dispatches skipped because no fixer was registered for the label.
    pub fixes_skipped_no_fixer: u64,
    /// Current phase within the cycle.
    pub phase: CyclePhase,
    /// Whether the loop task is running.
    pub running: bool,
}

// ---------------------------------------------------------------------------
// Scoring fan-out
// ---------------------------------------------------------------------------

/// One model's accepted score for one snapshot.
#[derive(Debug, Clone)]
struct ModelScore {
    model: String,
    score: f64,
    threshold: f64,
}

/// Score `snapshot` against every model concurrently, each isolated and
/// bounded by `score_timeout`. Models that error, time out, or return an
/// out-of-range score contribute nothing.
async fn score_all(
    models: &[Arc<dyn Model>],
    snapshot: &Snapshot,
    score_timeout: Duration,
) -> Vec<ModelScore> {
    let futures = models.iter().map(|model| {
        let model = Arc::clone(model);
        async move {
            let name = model.name().to_string();
            let result = match timeout(score_timeout, model.score(snapshot)).await {
                Ok(Ok(score)) if (0.0..=1.0).contains(&score) => Ok(score),
                Ok(Ok(score)) => Err(ScoringError::OutOfRange(score)),
                Ok(Err(err)) => Err(err),
                Err(_) => Err(ScoringError::TimedOut(score_timeout)),
            };
            match result {
                Ok(score) => {
                    debug!(
                        target: "remedian::detect",
                        model = %name,
                        score,
                        threshold = model.threshold(),
                        "model scored snapshot"
                    );
                    Some(ModelScore { model: name, score, threshold: model.threshold() })
                }
                Err(err) => {
                    warn!(
                        target: "remedian::detect",
                        model = %name,
                        %err,
                        "model contributed no score this cycle"
                    );
                    None
                }
            }
        }
    });

    join_all(futures).await.into_iter().flatten().collect()
}

/// The single score that raises a diagnosis: the highest among those that
/// crossed their model's threshold.
fn pick_trigger(scores: &[ModelScore]) -> Option<&ModelScore> {
    scores
        .iter()
        .filter(|s| s.score > s.threshold)
        .max_by(|a, b| a.score.total_cmp(&b.score))
}

// ---------------------------------------------------------------------------
// DetectionLoop
// ---------------------------------------------------------------------------

/// One instance of the closed-loop pipeline. Owns its registries by `Arc`,
/// so independent loops can be constructed side by side (there is no global
/// state anywhere in the crate).
pub struct DetectionLoop {
    config: LoopConfig,
    collectors: Arc<CollectorRegistry>,
    models: Arc<ModelRegistry>,
    diagnosis: DiagnosisStage,
    dispatcher: Arc<RemediationDispatcher>,
    status: Arc<Mutex<LoopStatus>>,
}

impl DetectionLoop {
    pub fn new(
        config: LoopConfig,
        collectors: Arc<CollectorRegistry>,
        models: Arc<ModelRegistry>,
        fixers: Arc<FixerRegistry>,
    ) -> Self {
        let diagnosis = DiagnosisStage::new(Arc::clone(&models), config.score_timeout);
        let dispatcher = Arc::new(RemediationDispatcher::new(fixers, config.apply_timeout));
        Self {
            config,
            collectors,
            models,
            diagnosis,
            dispatcher,
            status: Arc::new(Mutex::new(LoopStatus::default())),
        }
    }

    /// Cloneable handle to the shared status (for dashboards / operators).
    pub fn status_handle(&self) -> Arc<Mutex<LoopStatus>> {
        Arc::clone(&self.status)
    }

    /// A copy of the current status.
    pub fn status_snapshot(&self) -> LoopStatus {
        lock(&self.status).clone()
    }

    /// The dispatcher driving remediations for this loop.
    pub fn dispatcher(&self) -> Arc<RemediationDispatcher> {
        Arc::clone(&self.dispatcher)
    }

    /// Run cycles at the configured cadence until `shutdown` flips to `true`
    /// (or its sender is dropped).
    ///
    /// The loop only checks the signal between cycles, so an in-progress
    /// cycle always drains — a snapshot is never dropped mid-assembly. After
    /// the last cycle, in-flight remediations are awaited to completion.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        lock(&self.status).running = true;
        info!(
            target: "remedian::detect",
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "detection loop started"
        );

        let mut cadence = interval(self.config.poll_interval);
        // A slow cycle delays the next tick instead of overlapping it.
        cadence.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = cadence.tick() => {
                    self.run_cycle().await;
                }
            }
        }

        info!(
            target: "remedian::detect",
            "shutdown signalled; draining in-flight remediations"
        );
        self.dispatcher.drain().await;

        let mut status = lock(&self.status);
        status.running = false;
        status.phase = CyclePhase::Idle;
        info!(target: "remedian::detect", cycles = status.cycles_run, "detection loop stopped");
    }

    /// Run exactly one cycle: collect → score → (diagnose → dispatch).
    ///
    /// Public so embedders and tests can drive cycles directly without the
    /// cadence timer.
    pub async fn run_cycle(&self) {
        let cycle = lock(&self.status).cycles_run;
        debug!(target: "remedian::detect", cycle, "cycle start");

        // Registry contents are copied once per cycle; concurrent
        // register/unregister calls take effect from the next cycle.
        self.set_phase(CyclePhase::Collecting);
        let collectors = self.collectors.list_all();
        let snapshot = collect_snapshot(&collectors, self.config.collect_timeout).await;

        self.set_phase(CyclePhase::Scoring);
        let trigger = if snapshot.has_readings() {
            let models = self.models.list_all();
            let scores = score_all(&models, &snapshot, self.config.score_timeout).await;
            pick_trigger(&scores).cloned()
        } else {
            // No evidence, no alarm.
            debug!(target: "remedian::detect", cycle, "snapshot has no readings; skipping scoring");
            None
        };

        if let Some(trigger) = trigger {
            lock(&self.status).anomalies_raised += 1;
            warn!(
                target: "remedian::detect",
                cycle,
                model = %trigger.model,
                score = trigger.score,
                threshold = trigger.threshold,
                "anomaly raised"
            );

            self.set_phase(CyclePhase::Diagnosing);
            let diagnosis = Diagnosis::new(snapshot, trigger.model, trigger.score);
            if let Some(label) = self.diagnosis.diagnose(&diagnosis).await {
                lock(&self.status).diagnoses_resolved += 1;

                self.set_phase(CyclePhase::Remediating);
                let outcome = self.dispatcher.dispatch(&label, diagnosis.snapshot());
                let mut status = lock(&self.status);
                match outcome {
                    DispatchOutcome::Dispatched => status.fixes_dispatched += 1,
                    DispatchOutcome::AlreadyInFlight => status.fixes_skipped_in_flight += 1,
                    DispatchOutcome::NoKnownFix => status.fixes_skipped_no_fixer += 1,
                }
            }
        }

        self.set_phase(CyclePhase::Idle);
        let cycles_run = {
            let mut status = lock(&self.status);
            status.cycles_run += 1;
            status.cycles_run
        };
        debug!(target: "remedian::detect", cycle = cycles_run - 1, "cycle end");
    }

    fn set_phase(&self, phase: CyclePhase) {
        lock(&self.status).phase = phase;
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
