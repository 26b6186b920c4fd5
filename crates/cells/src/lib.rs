//! Discretization planning for the 1-D transport column.
//!
//! The solver does not integrate the full vessel. It integrates a
//! representative column of one square decimeter cross-section at the real
//! bed depth; bed-volume (BV) throughput is the ratio of water mass to pore
//! mass and is therefore identical for the column and the vessel. Capacity
//! per cell, not vessel size, is what controls Newton convergence, and the
//! planner's one real decision is how many cells keep that capacity bounded.

pub mod plan;
pub mod vessel;

pub use plan::{plan, CellPlan};
pub use vessel::Vessel;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CellsError {
    #[error("invalid vessel geometry: {0}")]
    InvalidVessel(String),
}

pub type Result<T> = std::result::Result<T, CellsError>;

/// Discretization constants
pub mod constants {
    /// Cross-section of the modeled representative column (m2)
    pub const COLUMN_AREA_M2: f64 = 0.01;

    /// Default cell count
    pub const NOMINAL_CELLS: usize = 16;

    /// Hard floor on cell count
    pub const MIN_CELLS: usize = 10;

    /// Hard cap on cell count; exceeding it is reported, never fatal
    pub const MAX_CELLS: usize = 1024;

    /// Per-cell mobile capacity bound for Na-form WAC (eq)
    pub const MAX_MOBILE_EQ_PER_CELL: f64 = 1.0;

    /// Per-cell immobile capacity bound for Na-form WAC (eq)
    pub const MAX_IMMOBILE_EQ_PER_CELL: f64 = 10.0;

    /// Molecular diffusion coefficient (m2/s)
    pub const DIFFUSION_M2_S: f64 = 1e-9;
}
