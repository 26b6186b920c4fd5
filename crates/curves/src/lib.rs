//! Breakthrough-curve extraction and analysis.
//!
//! The punch table coming back from the solver is raw shift rows. This
//! crate types them, segments them into cycle phases, finds the
//! breakthrough point against the effluent target, derives the two metric
//! families (breakthrough-point values for sizing, service averages for
//! operating cost), and decimates the externalized curve.

pub mod curve;
pub mod decimate;
pub mod metrics;
pub mod parse;

pub use curve::{BreakthroughCurve, Criterion, CurveSample};
pub use decimate::decimate;
pub use metrics::{detect_breakthrough, service_metrics, Breakthrough, ServiceMetrics};
pub use parse::parse;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CurveError {
    #[error("punch table lacks required column '{0}'")]
    MissingColumn(String),

    #[error("no service-phase rows in punch output")]
    NoServiceRows,
}

pub type Result<T> = std::result::Result<T, CurveError>;

/// Transient window (BV) ignored before breakthrough detection; the first
/// pore-volume displacement carries preconditioning water, not feed.
pub const TRANSIENT_WINDOW_BV: f64 = 0.5;
