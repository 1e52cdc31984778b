//! # remedian
//!
//! Closed-loop anomaly detection and automated remediation for a set of
//! integrated subsystems:
//!
//! ```text
//! collectors ──► Snapshot ──► models ──► anomaly? ──► diagnosis ──► fixer
//!     ▲                                                               │
//!     └────────────────── subsystems get healthier ◄──────────────────┘
//! ```
//!
//! Each cycle, the [`DetectionLoop`] fans out to every registered
//! [`Collector`] concurrently and assembles one immutable [`Snapshot`],
//! tolerating per-collector failures. Every registered [`Model`] scores the
//! snapshot; if any score crosses its model's threshold, the single
//! highest-scoring result becomes a [`Diagnosis`], the designated
//! [`RootCauseModel`] classifies the cause, and the
//! [`RemediationDispatcher`] starts the matching [`Fixer`] — at most one
//! in-flight fix per root-cause label.
//!
//! Collectors, models, and fixers are pluggable at runtime through their
//! registries; the loop itself never needs recompiling. All state is
//! in-memory and owned — construct as many independent loops as you like.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use remedian::{CollectorRegistry, DetectionLoop, FixerRegistry, LoopConfig, ModelRegistry};
//!
//! let collectors = Arc::new(CollectorRegistry::new());
//! let models = Arc::new(ModelRegistry::new());
//! let fixers = Arc::new(FixerRegistry::new());
//! // ... register capabilities ...
//!
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! let pipeline = DetectionLoop::new(LoopConfig::default(), collectors, models, fixers);
//! tokio::spawn(pipeline.run(shutdown_rx));
//! // ... later: shutdown_tx.send(true) drains the loop cleanly.
//! ```
//!
//! Observability is emitted as `tracing` events under the
//! `remedian::{collect,detect,diagnose,dispatch}` targets; install whatever
//! subscriber fits your process.

pub mod collect;
pub mod detect;
pub mod diagnose;
pub mod dispatch;
pub mod error;
pub mod registry;
pub mod snapshot;

pub use collect::collect_snapshot;
pub use detect::{CyclePhase, DetectionLoop, LoopConfig, LoopStatus};
pub use diagnose::{Diagnosis, DiagnosisStage};
pub use dispatch::{DispatchOutcome, RemediationDispatcher};
pub use error::{CollectionError, RegistryError, RemediationError, ScoringError};
pub use registry::{
    Collector, CollectorRegistry, Fixer, FixerRegistry, Model, ModelRegistry, RootCauseModel,
    DEFAULT_THRESHOLD,
};
pub use snapshot::{CollectorOutcome, Reading, Snapshot};
