//! # Stage: Snapshot
//!
//! ## Responsibility
//! The data carried between pipeline stages: one cycle's aggregated readings
//! across all collectors. A [`Snapshot`] records, for every collector that was
//! registered at the start of the cycle, either its [`Reading`] or an explicit
//! failure marker — a failed collector contributes no reading but never blocks
//! assembly of the rest.
//!
//! ## Guarantees
//! - Immutable once assembled: accessors only, no mutators
//! - Ordered: outcomes appear in collector registration order, stable across
//!   cycles
//! - Total: an all-failed (or zero-collector) snapshot is still a valid
//!   snapshot; downstream stages treat it as not-anomalous by definition
//!
//! ## NOT Responsible For
//! - Invoking collectors (collection fan-out, `collect.rs`)
//! - Deciding anomaly status (detection loop, `detect.rs`)

use std::time::Instant;

use crate::error::CollectionError;

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// One collector's payload for one cycle.
///
/// The payload is opaque to the pipeline — domain-specific metrics as
/// arbitrary JSON. Models interpret it; the core only carries it.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    /// Domain-specific metrics, uninterpreted by the core.
    pub payload: serde_json::Value,
    /// When the collector captured this payload.
    pub captured_at: Instant,
}

impl Reading {
    /// Create a reading captured now.
    pub fn new(payload: serde_json::Value) -> Self {
        Self { payload, captured_at: Instant::now() }
    }
}

// ---------------------------------------------------------------------------
// CollectorOutcome
// ---------------------------------------------------------------------------

/// The resolved result of one collector in one cycle: a reading, or an
/// explicit failure marker.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectorOutcome {
    Ok(Reading),
    Failed(CollectionError),
}

impl CollectorOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, CollectorOutcome::Ok(_))
    }

    pub fn reading(&self) -> Option<&Reading> {
        match self {
            CollectorOutcome::Ok(r) => Some(r),
            CollectorOutcome::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&CollectionError> {
        match self {
            CollectorOutcome::Ok(_) => None,
            CollectorOutcome::Failed(e) => Some(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// One cycle's aggregated outcomes across all collectors.
///
/// Assembled once by the collection fan-out and immutable afterwards.
#[derive(Debug, Clone)]
pub struct Snapshot {
    captured_at: Instant,
    outcomes: Vec<(String, CollectorOutcome)>,
}

impl Snapshot {
    /// Assemble a snapshot from fully-resolved collector outcomes.
    ///
    /// `outcomes` must be in collector registration order; the snapshot
    /// preserves it.
    pub fn assemble(captured_at: Instant, outcomes: Vec<(String, CollectorOutcome)>) -> Self {
        Self { captured_at, outcomes }
    }

    /// The cycle timestamp (start of assembly).
    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    /// All outcomes in registration order.
    pub fn outcomes(&self) -> impl Iterator<Item = (&str, &CollectorOutcome)> {
        self.outcomes.iter().map(|(id, o)| (id.as_str(), o))
    }

    /// The outcome for a specific collector, if it was part of this cycle.
    pub fn outcome(&self, collector_id: &str) -> Option<&CollectorOutcome> {
        self.outcomes
            .iter()
            .find(|(id, _)| id == collector_id)
            .map(|(_, o)| o)
    }

    /// The reading for a specific collector, if it succeeded this cycle.
    pub fn reading(&self, collector_id: &str) -> Option<&Reading> {
        self.outcome(collector_id).and_then(CollectorOutcome::reading)
    }

    /// Number of collectors this cycle covered (succeeded or failed).
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Number of collectors that produced a reading.
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.is_ok()).count()
    }

    /// Number of collectors that failed or timed out.
    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    /// `true` if at least one collector produced a reading.
    ///
    /// A snapshot with no readings carries no evidence and is treated as
    /// not-anomalous by the detection loop without consulting any model.
    pub fn has_readings(&self) -> bool {
        self.outcomes.iter().any(|(_, o)| o.is_ok())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn ok(payload: serde_json::Value) -> CollectorOutcome {
        CollectorOutcome::Ok(Reading::new(payload))
    }

    fn failed() -> CollectorOutcome {
        CollectorOutcome::Failed(CollectionError::Failed("boom".into()))
    }

    #[test]
    fn test_snapshot_preserves_registration_order() {
        let snap = Snapshot::assemble(
            Instant::now(),
            vec![
                ("a".into(), ok(json!({"status": "ok"}))),
                ("b".into(), failed()),
                ("c".into(), ok(json!(1))),
            ],
        );
        let ids: Vec<&str> = snap.outcomes().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_reading_lookup_by_collector_id() {
        let snap = Snapshot::assemble(
            Instant::now(),
            vec![
                ("a".into(), ok(json!({"status": "ok"}))),
                ("b".into(), failed()),
            ],
        );
        assert_eq!(snap.reading("a").unwrap().payload, json!({"status": "ok"}));
        assert!(snap.reading("b").is_none(), "failed collector has no reading");
        assert!(snap.reading("missing").is_none());
    }

    #[test]
    fn test_failure_marker_is_explicit() {
        let snap = Snapshot::assemble(
            Instant::now(),
            vec![("b".into(), CollectorOutcome::Failed(CollectionError::TimedOut(Duration::from_secs(1))))],
        );
        let outcome = snap.outcome("b").unwrap();
        assert!(!outcome.is_ok());
        assert_eq!(
            outcome.error(),
            Some(&CollectionError::TimedOut(Duration::from_secs(1)))
        );
    }

    #[test]
    fn test_all_failed_snapshot_is_valid() {
        let snap = Snapshot::assemble(
            Instant::now(),
            vec![("a".into(), failed()), ("b".into(), failed())],
        );
        assert_eq!(snap.len(), 2);
        assert_eq!(snap.succeeded(), 0);
        assert_eq!(snap.failed(), 2);
        assert!(!snap.has_readings());
    }

    #[test]
    fn test_zero_collector_snapshot_is_valid() {
        let snap = Snapshot::assemble(Instant::now(), Vec::new());
        assert!(snap.is_empty());
        assert!(!snap.has_readings());
    }

    #[test]
    fn test_succeeded_and_failed_counts() {
        let snap = Snapshot::assemble(
            Instant::now(),
            vec![
                ("a".into(), ok(json!(null))),
                ("b".into(), failed()),
                ("c".into(), ok(json!(null))),
            ],
        );
        assert_eq!(snap.succeeded(), 2);
        assert_eq!(snap.failed(), 1);
        assert!(snap.has_readings());
    }
}
