//! Error taxonomy for the remediation pipeline.
//!
//! Two propagation regimes, and every variant belongs to exactly one:
//!
//! - **Per-item errors** ([`CollectionError`], [`ScoringError`],
//!   [`RemediationError`]) are caught at the fan-out item boundary, logged,
//!   and excluded from the aggregate. They never abort a cycle or the loop.
//! - **Registration misuse** ([`RegistryError`]) is raised synchronously to
//!   the caller of the registration operation and never swallowed — it
//!   indicates a programming or configuration mistake.

use std::time::Duration;

use thiserror::Error;

/// Failure of a single collector within one cycle.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CollectionError {
    /// The collector itself reported a failure.
    #[error("collection failed: {0}")]
    Failed(String),
    /// The collector did not resolve within the per-cycle bound.
    #[error("collection timed out after {0:?}")]
    TimedOut(Duration),
}

/// Failure of a single model's scoring or labeling within one cycle.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScoringError {
    /// The model itself reported a failure.
    #[error("scoring failed: {0}")]
    Failed(String),
    /// The model returned a score outside the contractual [0, 1] range.
    #[error("score {0} outside [0, 1]")]
    OutOfRange(f64),
    /// The model did not resolve within the scoring bound.
    #[error("scoring timed out after {0:?}")]
    TimedOut(Duration),
}

/// Failure of a fixer's apply action.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("remediation failed: {0}")]
pub struct RemediationError(pub String);

/// Registration misuse. Raised synchronously to the registering caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A collector with this id is already registered.
    #[error("collector `{0}` is already registered")]
    DuplicateCollector(String),
    /// A model with this name is already registered.
    #[error("model `{0}` is already registered")]
    DuplicateModel(String),
    /// A fixer for this root-cause label is already registered.
    /// Use `FixerRegistry::replace` for an intentional swap.
    #[error("fixer for label `{0}` is already registered")]
    DuplicateFixer(String),
    /// A root-cause model is already designated; clear it first.
    #[error("root-cause model `{0}` is already designated")]
    RootCauseModelAlreadySet(String),
    /// No root-cause model has been designated.
    #[error("no root-cause model designated")]
    NoRootCauseModel,
}
