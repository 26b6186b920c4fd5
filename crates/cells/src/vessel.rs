//! Vessel geometry.

use serde::{Deserialize, Serialize};

use crate::{CellsError, Result};

/// One ion-exchange vessel design.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vessel {
    /// Internal diameter (m)
    pub diameter_m: f64,

    /// Settled resin bed depth (m)
    pub bed_depth_m: f64,

    /// Vessels operating in parallel
    pub number_in_service: usize,

    /// Freeboard above the bed for expansion (m)
    #[serde(default)]
    pub freeboard_m: Option<f64>,
}

impl Vessel {
    pub fn validate(&self) -> Result<()> {
        if self.bed_depth_m < 0.75 {
            return Err(CellsError::InvalidVessel(format!(
                "bed depth {} m below the 0.75 m distribution minimum",
                self.bed_depth_m
            )));
        }
        if self.diameter_m <= 0.0 || self.diameter_m > 2.4 {
            return Err(CellsError::InvalidVessel(format!(
                "diameter {} m outside (0, 2.4] shop-fabrication range",
                self.diameter_m
            )));
        }
        if self.number_in_service < 1 {
            return Err(CellsError::InvalidVessel(
                "at least one vessel must be in service".into(),
            ));
        }
        Ok(())
    }

    /// Cross-sectional bed area of one vessel (m2)
    pub fn bed_area_m2(&self) -> f64 {
        std::f64::consts::FRAC_PI_4 * self.diameter_m * self.diameter_m
    }

    /// Settled resin volume across all vessels in service (L)
    pub fn resin_volume_l(&self) -> f64 {
        self.bed_area_m2() * self.bed_depth_m * self.number_in_service as f64 * 1000.0
    }

    /// Superficial (linear) service velocity (m/h) at the given total flow
    pub fn linear_velocity_m_h(&self, flow_m3_h: f64) -> f64 {
        flow_m3_h / (self.bed_area_m2() * self.number_in_service as f64)
    }
}
