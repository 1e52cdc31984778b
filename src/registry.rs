//! # Stage: Capability Traits & Registries
//!
//! ## Responsibility
//! The pluggable seams of the pipeline. Concrete collectors, scoring models,
//! and fixers live outside this crate and are registered against three small
//! capability traits:
//!
//! - [`Collector`] — one polling capability, invoked each cycle.
//! - [`Model`] — one scoring capability over a [`Snapshot`]; optionally
//!   extended to [`RootCauseModel`] for the diagnosis stage.
//! - [`Fixer`] — one remediation action, keyed by the root-cause label it
//!   handles.
//!
//! Each registry wraps its own lock, so register/unregister are safe to call
//! concurrently with loop execution. The loop copies the registry contents at
//! the start of each cycle and works from that consistent view.
//!
//! ## Guarantees
//! - Registration misuse (duplicate id/name/label, double root-cause
//!   designation) fails synchronously with [`RegistryError`] — never
//!   last-wins, never logged-and-swallowed
//! - Collector order is registration order, stable across cycles
//! - Lookups are idempotent between registration changes
//! - No globals: registries are plain owned values, so multiple independent
//!   loop instances can be constructed side by side
//!
//! ## NOT Responsible For
//! - Invoking any capability (fan-out, loop, and dispatcher do that)
//! - Timeouts around capability calls (callers bound every invocation)

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;

use crate::error::{CollectionError, RegistryError, RemediationError, ScoringError};
use crate::snapshot::{Reading, Snapshot};

/// Anomaly threshold used when a model does not override [`Model::threshold`].
pub const DEFAULT_THRESHOLD: f64 = 0.9;

// ---------------------------------------------------------------------------
// Capability traits
// ---------------------------------------------------------------------------

/// A single polling capability over one integrated subsystem.
#[async_trait]
pub trait Collector: Send + Sync {
    /// Unique identity within a registry. Also the snapshot key.
    fn id(&self) -> &str;

    /// Gather one reading. May suspend on IO; the fan-out bounds the wait.
    async fn collect(&self) -> Result<Reading, CollectionError>;
}

/// A named, immutable scoring capability over a snapshot.
#[async_trait]
pub trait Model: Send + Sync {
    /// Unique name within a registry.
    fn name(&self) -> &str;

    /// Score above which this model considers a snapshot anomalous.
    fn threshold(&self) -> f64 {
        DEFAULT_THRESHOLD
    }

    /// Anomaly score for `snapshot`, in [0, 1]. Scores outside the range are
    /// rejected by the detection loop as a [`ScoringError`].
    async fn score(&self, snapshot: &Snapshot) -> Result<f64, ScoringError>;
}

/// The designated model used by the diagnosis stage to classify an anomaly's
/// cause. In addition to scoring it produces a string-valued root-cause label.
#[async_trait]
pub trait RootCauseModel: Model {
    /// Classify the root cause of an anomalous snapshot.
    async fn label(&self, snapshot: &Snapshot) -> Result<String, ScoringError>;
}

/// A named remediation action keyed by the root-cause label it handles.
///
/// Retry and backoff, if any, are internal to the fixer — the dispatcher
/// invokes `apply` at most once per dispatch.
#[async_trait]
pub trait Fixer: Send + Sync {
    /// The root-cause label this fixer remediates. Registry key.
    fn label(&self) -> &str;

    /// Apply the remediation.
    async fn apply(&self) -> Result<(), RemediationError>;
}

// A poisoned registry lock only means another registration panicked; the
// guarded data is still a coherent Vec/HashMap, so recover the guard.
fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// CollectorRegistry
// ---------------------------------------------------------------------------

/// The ordered set of active collectors.
#[derive(Default)]
pub struct CollectorRegistry {
    inner: RwLock<Vec<Arc<dyn Collector>>>,
}

impl CollectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a collector. Fails if one with the same id is already registered.
    pub fn register(&self, collector: Arc<dyn Collector>) -> Result<(), RegistryError> {
        let mut inner = write_lock(&self.inner);
        if inner.iter().any(|c| c.id() == collector.id()) {
            return Err(RegistryError::DuplicateCollector(collector.id().to_string()));
        }
        inner.push(collector);
        Ok(())
    }

    /// Remove a collector by id. Returns `false` if it was not registered.
    pub fn unregister(&self, id: &str) -> bool {
        let mut inner = write_lock(&self.inner);
        let before = inner.len();
        inner.retain(|c| c.id() != id);
        inner.len() != before
    }

    /// Current collectors in registration order.
    pub fn list_all(&self) -> Vec<Arc<dyn Collector>> {
        read_lock(&self.inner).clone()
    }

    pub fn len(&self) -> usize {
        read_lock(&self.inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// ModelRegistry
// ---------------------------------------------------------------------------

/// Named scoring models plus the zero-or-one designated root-cause model.
///
/// Designation is independent of scoring registration: a root-cause model is
/// consulted only by the diagnosis stage unless it is also registered as a
/// scoring model.
#[derive(Default)]
pub struct ModelRegistry {
    models: RwLock<Vec<Arc<dyn Model>>>,
    root_cause: RwLock<Option<Arc<dyn RootCauseModel>>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a scoring model. Fails on a duplicate name.
    pub fn register(&self, model: Arc<dyn Model>) -> Result<(), RegistryError> {
        let mut models = write_lock(&self.models);
        if models.iter().any(|m| m.name() == model.name()) {
            return Err(RegistryError::DuplicateModel(model.name().to_string()));
        }
        models.push(model);
        Ok(())
    }

    /// Remove a scoring model by name. Returns `false` if it was not registered.
    pub fn unregister(&self, name: &str) -> bool {
        let mut models = write_lock(&self.models);
        let before = models.len();
        models.retain(|m| m.name() != name);
        models.len() != before
    }

    /// Current scoring models in registration order.
    pub fn list_all(&self) -> Vec<Arc<dyn Model>> {
        read_lock(&self.models).clone()
    }

    pub fn len(&self) -> usize {
        read_lock(&self.models).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Designate the root-cause model. Fails if one is already designated;
    /// call [`clear_root_cause`](Self::clear_root_cause) first to swap.
    pub fn designate_root_cause(
        &self,
        model: Arc<dyn RootCauseModel>,
    ) -> Result<(), RegistryError> {
        let mut slot = write_lock(&self.root_cause);
        if let Some(existing) = slot.as_ref() {
            return Err(RegistryError::RootCauseModelAlreadySet(
                existing.name().to_string(),
            ));
        }
        *slot = Some(model);
        Ok(())
    }

    /// Clear the designation, returning the previously designated model.
    pub fn clear_root_cause(&self) -> Option<Arc<dyn RootCauseModel>> {
        write_lock(&self.root_cause).take()
    }

    /// The designated root-cause model.
    pub fn root_cause_model(&self) -> Result<Arc<dyn RootCauseModel>, RegistryError> {
        read_lock(&self.root_cause)
            .clone()
            .ok_or(RegistryError::NoRootCauseModel)
    }
}

// ---------------------------------------------------------------------------
// FixerRegistry
// ---------------------------------------------------------------------------

/// Remediation actions keyed by root-cause label.
///
/// Duplicate registration is an error, never last-wins; use
/// [`replace`](Self::replace) when a swap is intended.
#[derive(Default)]
pub struct FixerRegistry {
    inner: RwLock<HashMap<String, Arc<dyn Fixer>>>,
}

impl FixerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a fixer. Fails if one is already registered for the same label.
    pub fn register(&self, fixer: Arc<dyn Fixer>) -> Result<(), RegistryError> {
        let mut inner = write_lock(&self.inner);
        let label = fixer.label().to_string();
        if inner.contains_key(&label) {
            return Err(RegistryError::DuplicateFixer(label));
        }
        inner.insert(label, fixer);
        Ok(())
    }

    /// Intentionally swap the fixer for a label, returning the previous one.
    pub fn replace(&self, fixer: Arc<dyn Fixer>) -> Option<Arc<dyn Fixer>> {
        write_lock(&self.inner).insert(fixer.label().to_string(), fixer)
    }

    /// Remove the fixer for a label. Returns `false` if none was registered.
    pub fn unregister(&self, label: &str) -> bool {
        write_lock(&self.inner).remove(label).is_some()
    }

    /// Look up the fixer for a root-cause label.
    pub fn get(&self, label: &str) -> Option<Arc<dyn Fixer>> {
        read_lock(&self.inner).get(label).cloned()
    }

    pub fn len(&self) -> usize {
        read_lock(&self.inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
