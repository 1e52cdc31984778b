//! # Stage: Diagnosis
//!
//! ## Responsibility
//! Turn one anomalous snapshot into a root-cause label. The detection loop
//! hands this stage a [`Diagnosis`] request; the stage looks up the designated
//! root-cause model and asks it to classify the snapshot.
//!
//! Diagnosis is best-effort and never retried: by the time a retry could run,
//! the snapshot that triggered it is already stale. A missing root-cause model
//! or a model failure is logged and the request dropped — never fatal to the
//! loop.
//!
//! ## NOT Responsible For
//! - Deciding that a snapshot is anomalous (detection loop, `detect.rs`)
//! - Acting on the label (remediation dispatcher, `dispatch.rs`)

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

use crate::registry::ModelRegistry;
use crate::snapshot::Snapshot;

// ---------------------------------------------------------------------------
// Diagnosis
// ---------------------------------------------------------------------------

/// A transient record of one anomaly awaiting (or undergoing) diagnosis.
///
/// Carries the anomalous snapshot and the triggering score. Not persisted
/// beyond the handling of the anomaly.
#[derive(Debug, Clone)]
pub struct Diagnosis {
    id: Uuid,
    snapshot: Snapshot,
    triggering_model: String,
    score: f64,
}

impl Diagnosis {
    /// Record a new anomaly. `score` is the highest score among the models
    /// that crossed their thresholds this cycle.
    pub fn new(snapshot: Snapshot, triggering_model: String, score: f64) -> Self {
        Self { id: Uuid::new_v4(), snapshot, triggering_model, score }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Name of the model whose score raised this diagnosis.
    pub fn triggering_model(&self) -> &str {
        &self.triggering_model
    }

    /// The triggering anomaly score.
    pub fn score(&self) -> f64 {
        self.score
    }
}

// ---------------------------------------------------------------------------
// DiagnosisStage
// ---------------------------------------------------------------------------

/// Runs the designated root-cause model against anomalous snapshots.
pub struct DiagnosisStage {
    models: Arc<ModelRegistry>,
    label_timeout: Duration,
}

impl DiagnosisStage {
    pub fn new(models: Arc<ModelRegistry>, label_timeout: Duration) -> Self {
        Self { models, label_timeout }
    }

    /// Classify the root cause of `diagnosis`.
    ///
    /// Returns `None` when no root-cause model is designated or the model
    /// errors or times out; all three outcomes are logged and the request is
    /// dropped.
    pub async fn diagnose(&self, diagnosis: &Diagnosis) -> Option<String> {
        let model = match self.models.root_cause_model() {
            Ok(m) => m,
            Err(err) => {
                warn!(
                    target: "remedian::diagnose",
                    diagnosis = %diagnosis.id(),
                    %err,
                    "dropping diagnosis request"
                );
                return None;
            }
        };

        match timeout(self.label_timeout, model.label(diagnosis.snapshot())).await {
            Ok(Ok(label)) => {
                info!(
                    target: "remedian::diagnose",
                    diagnosis = %diagnosis.id(),
                    model = %model.name(),
                    triggered_by = %diagnosis.triggering_model(),
                    score = diagnosis.score(),
                    root_cause = %label,
                    "root cause identified"
                );
                Some(label)
            }
            Ok(Err(err)) => {
                warn!(
                    target: "remedian::diagnose",
                    diagnosis = %diagnosis.id(),
                    model = %model.name(),
                    %err,
                    "root-cause model failed; dropping diagnosis request"
                );
                None
            }
            Err(_) => {
                warn!(
                    target: "remedian::diagnose",
                    diagnosis = %diagnosis.id(),
                    model = %model.name(),
                    timeout_ms = self.label_timeout.as_millis() as u64,
                    "root-cause model timed out; dropping diagnosis request"
                );
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
