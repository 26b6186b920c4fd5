//! The simulation controller.
//!
//! Everything upstream of this crate is a component; this is the pipeline.
//! One call runs normalize -> plan -> build -> solve -> parse -> overlay and
//! folds the outcome into the unified result schema. The controller owns
//! the deck, the run artifacts, the curve and the result; components never
//! share mutable state, and two controllers never share anything at all,
//! so the enclosing server may run any number of simulations in parallel.

pub mod behavior;
pub mod cache;
pub mod config;
pub mod controller;
pub mod request;
pub mod result;

pub use behavior::ResinBehavior;
pub use config::EngineConfig;
pub use controller::Controller;
pub use request::{CalibrationKeyInput, CycleInput, SimulationRequest, WaterInput};
pub use result::{
    Diagnostics, ErrorBody, IonTrack, MassBalance, OptimizerEvaluation, Performance,
    RegenerationResults, SimulationResult, SolveInfo, Status,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unsupported schema_version '{0}'")]
    SchemaVersion(String),

    #[error(transparent)]
    Water(#[from] water::WaterError),

    #[error(transparent)]
    Resin(#[from] resin::ResinError),

    #[error(transparent)]
    Cells(#[from] cells::CellsError),

    #[error(transparent)]
    Deck(#[from] deck::DeckError),

    #[error(transparent)]
    Solver(#[from] solver::SolverError),

    #[error(transparent)]
    Curve(#[from] curves::CurveError),
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Version of the request/response schema this build speaks.
pub const SCHEMA_VERSION: &str = "1.0.0";
