//! Feed water normalization for ion-exchange design.
//!
//! This crate turns a raw laboratory water analysis (mg/L per ion, pH,
//! temperature, flow) into a charge-balanced, derived-property water model
//! that the rest of the pipeline consumes: hardness and alkalinity as CaCO3,
//! ionic strength, TDS and the temporary/permanent hardness split.
//!
//! Charge balance is closed on chloride only. Sodium and bicarbonate are
//! never adjusted, since both directly change the simulated exchange
//! equilibria.

pub mod feed;
pub mod ions;
pub mod normalize;

pub use feed::FeedWater;
pub use ions::Ion;
pub use normalize::{normalize, NormalizedWater};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WaterError {
    #[error("charge imbalance of {imbalance_percent:.1}% exceeds the 15% limit: {detail}")]
    ChargeImbalance {
        imbalance_percent: f64,
        detail: String,
    },

    #[error("{field} = {value} outside allowed range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("unknown ion '{0}'")]
    UnknownIon(String),
}

pub type Result<T> = std::result::Result<T, WaterError>;

/// Conversion constants used throughout the water model
pub mod constants {
    /// Equivalent weight of CaCO3 (g/eq)
    pub const CACO3_EQ_WEIGHT: f64 = 50.04;

    /// Molar mass of HCO3- (g/mol)
    pub const HCO3_MOLAR_MASS: f64 = 61.02;

    /// Hardness factor for Ca (mg CaCO3 per mg Ca)
    pub const CA_HARDNESS_FACTOR: f64 = 2.5;

    /// Hardness factor for Mg (mg CaCO3 per mg Mg)
    pub const MG_HARDNESS_FACTOR: f64 = 4.1;

    /// Allowed residual charge imbalance (percent of mean ionic charge)
    pub const MAX_IMBALANCE_PERCENT: f64 = 15.0;
}
