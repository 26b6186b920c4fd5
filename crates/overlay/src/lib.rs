//! Empirical corrections over the thermodynamic solve.
//!
//! PHREEQC predicts equilibrium. Real beds leak: regeneration is never
//! stoichiometric, films limit transfer, freshly acid-regenerated WAC sites
//! stay protonated long past what equilibrium says. This crate reconciles
//! the two with additive, calibrated corrections. It never replaces the
//! solver output, and applying it twice with the same calibration changes
//! nothing the second time.

pub mod apply;
pub mod calibration;
pub mod efficiency;

pub use apply::{apply, apply_sac, apply_wac_h, apply_wac_na, OverlayReport};
pub use calibration::{CalibrationKey, CalibrationParameters, CalibrationStore};
pub use efficiency::regeneration_efficiency;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OverlayError {
    #[error("no calibration on file for {0}; using the {1} defaults")]
    CalibrationMissing(String, &'static str),

    #[error("calibration file {0} unreadable: {1}")]
    CalibrationUnreadable(String, String),
}

pub type Result<T> = std::result::Result<T, OverlayError>;
