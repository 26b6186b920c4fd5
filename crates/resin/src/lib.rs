//! Resin classes, selectivity data and regeneration plans.
//!
//! The three resin classes the simulator handles are a tagged variant, not a
//! type hierarchy: everything class-specific downstream (deck fragments,
//! overlay corrections, breakthrough criteria) dispatches on [`ResinKind`]
//! through a capability record owned by the engine.

pub mod regen;
pub mod spec;

pub use regen::{FlowDirection, RegenMode, Regenerant, RegenerationPlan, Targets};
pub use spec::{ResinKind, ResinSpec, Selectivity};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResinError {
    #[error("inconsistent resin/vessel configuration: {0}")]
    InconsistentResinVessel(String),

    #[error("invalid resin specification: {0}")]
    InvalidSpec(String),
}

pub type Result<T> = std::result::Result<T, ResinError>;
